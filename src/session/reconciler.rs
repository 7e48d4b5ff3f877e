//! Message reconciler: the single owner of a session's visible message list
//!
//! Three producers touch the list while a turn is in flight: the reply
//! accumulator (placeholder updates), the orchestrator (local inserts,
//! finalize, abort, full reloads) and the realtime feed (inserts made by this
//! or any other client). All of them enqueue [`ReconcileEvent`]s into one
//! inbox consumed by one task, so every update is applied in a single order.
//!
//! State machine:
//!
//! ```text
//! Empty --FullLoad--> Loaded --Placeholder--> Streaming --Finalize/Abort--> Loaded
//! ```
//!
//! Merge rules:
//!
//! - Durable ids are the dedup key; an insert whose durable id is already
//!   visible is a no-op.
//! - A placeholder update replaces the element holding that placeholder id,
//!   wherever it sits, or appends one if it is not visible yet.
//! - Finalize swaps the placeholder for the persisted message in place. If the
//!   persisted message already arrived through the realtime feed, the
//!   placeholder is removed instead.
//! - Placeholder ids are only ever compared with placeholder ids.

use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;

use super::message::{LocalId, Message};
use crate::error::Result;

/// Lifecycle state of one conversation's view.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReconcilerState {
    /// Nothing loaded yet
    Empty,
    /// Idle, history loaded
    Loaded,
    /// A placeholder reply is pending
    Streaming { local_id: LocalId },
}

/// Where an insert came from; only used for logging.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertSource {
    /// Returned by this session's own store call
    Local,
    /// Delivered by the realtime feed
    Realtime,
}

/// One state transition request.
#[derive(Debug, Clone)]
pub enum ReconcileEvent {
    /// Replace the whole list with the store's ordered read
    FullLoad(Vec<Message>),
    /// Accumulator emitted a grown placeholder
    Placeholder(Message),
    /// The reply was persisted; swap it in for the placeholder
    Finalize {
        local_id: Option<LocalId>,
        persisted: Message,
    },
    /// The turn ended without a persisted reply; keep what is visible
    Abort,
    /// A persisted message became known
    Insert {
        message: Message,
        source: InsertSource,
    },
}

/// Pure state machine; see the module docs for the merge rules.
#[derive(Debug)]
pub struct Reconciler {
    conversation_id: String,
    state: ReconcilerState,
    messages: Vec<Message>,
}

impl Reconciler {
    pub fn new(conversation_id: impl Into<String>) -> Self {
        Self {
            conversation_id: conversation_id.into(),
            state: ReconcilerState::Empty,
            messages: Vec::new(),
        }
    }

    pub fn conversation_id(&self) -> &str {
        &self.conversation_id
    }

    pub fn state(&self) -> &ReconcilerState {
        &self.state
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    /// Apply one event. Returns true if the visible list changed.
    pub fn apply(&mut self, event: ReconcileEvent) -> bool {
        match event {
            ReconcileEvent::FullLoad(messages) => self.full_load(messages),
            ReconcileEvent::Placeholder(message) => self.update_placeholder(message),
            ReconcileEvent::Finalize {
                local_id,
                persisted,
            } => self.finalize(local_id, persisted),
            ReconcileEvent::Abort => {
                if matches!(self.state, ReconcilerState::Streaming { .. }) {
                    tracing::debug!(conversation_id = %self.conversation_id, "Turn aborted, keeping placeholder");
                    self.state = ReconcilerState::Loaded;
                }
                false
            }
            ReconcileEvent::Insert { message, source } => self.insert(message, source),
        }
    }

    fn full_load(&mut self, messages: Vec<Message>) -> bool {
        tracing::debug!(
            conversation_id = %self.conversation_id,
            count = messages.len(),
            "Full load"
        );
        self.messages = messages;
        if self.state == ReconcilerState::Empty {
            self.state = ReconcilerState::Loaded;
        }
        true
    }

    fn update_placeholder(&mut self, message: Message) -> bool {
        let Some(local_id) = message.local_id().cloned() else {
            tracing::warn!("Ignoring placeholder update for a persisted message");
            return false;
        };

        match &self.state {
            ReconcilerState::Streaming { local_id: current } if *current != local_id => {
                tracing::warn!(
                    current = %current,
                    incoming = %local_id,
                    "Ignoring update for a placeholder that is not in flight"
                );
                return false;
            }
            ReconcilerState::Streaming { .. } => {}
            ReconcilerState::Empty | ReconcilerState::Loaded => {
                self.state = ReconcilerState::Streaming {
                    local_id: local_id.clone(),
                };
            }
        }

        match self.position_of_local(&local_id) {
            Some(pos) => self.messages[pos] = message,
            None => self.messages.push(message),
        }
        true
    }

    fn finalize(&mut self, local_id: Option<LocalId>, persisted: Message) -> bool {
        let Some(durable_id) = persisted.durable_id().map(str::to_string) else {
            tracing::warn!("Ignoring finalize with a message that is not persisted");
            return false;
        };

        let placeholder_pos = local_id.as_ref().and_then(|id| self.position_of_local(id));
        let already_visible = self.position_of_durable(&durable_id).is_some();

        let changed = match (placeholder_pos, already_visible) {
            (Some(pos), true) => {
                tracing::debug!(message_id = %durable_id, "Realtime copy arrived first, dropping placeholder");
                self.messages.remove(pos);
                true
            }
            (Some(pos), false) => {
                self.messages[pos] = persisted;
                true
            }
            (None, true) => false,
            (None, false) => {
                self.messages.push(persisted);
                true
            }
        };

        let finishes_turn = match (&self.state, &local_id) {
            (ReconcilerState::Streaming { local_id: current }, Some(id)) => current == id,
            _ => true,
        };
        if finishes_turn {
            self.state = ReconcilerState::Loaded;
        }

        changed
    }

    fn insert(&mut self, message: Message, source: InsertSource) -> bool {
        let Some(durable_id) = message.durable_id() else {
            tracing::warn!(?source, "Ignoring insert of a placeholder message");
            return false;
        };

        if message.conversation_id != self.conversation_id {
            tracing::debug!(
                ?source,
                message_conversation = %message.conversation_id,
                "Ignoring insert for another conversation"
            );
            return false;
        }

        if self.position_of_durable(durable_id).is_some() {
            tracing::trace!(?source, message_id = %durable_id, "Duplicate insert ignored");
            return false;
        }

        tracing::debug!(?source, message_id = %durable_id, "Appending message");
        self.messages.push(message);
        true
    }

    fn position_of_local(&self, local_id: &LocalId) -> Option<usize> {
        self.messages
            .iter()
            .position(|m| m.local_id() == Some(local_id))
    }

    fn position_of_durable(&self, durable_id: &str) -> Option<usize> {
        self.messages
            .iter()
            .position(|m| m.durable_id() == Some(durable_id))
    }
}

enum Command {
    Apply(ReconcileEvent),
    Snapshot(oneshot::Sender<Vec<Message>>),
}

/// Sending side of a reconciler inbox.
///
/// Cloning is cheap; the reconciler task stops once every handle is dropped.
#[derive(Clone)]
pub struct ReconcilerHandle {
    conversation_id: String,
    tx: mpsc::UnboundedSender<Command>,
}

impl std::fmt::Debug for ReconcilerHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReconcilerHandle")
            .field("conversation_id", &self.conversation_id)
            .finish()
    }
}

impl ReconcilerHandle {
    pub fn conversation_id(&self) -> &str {
        &self.conversation_id
    }

    /// Enqueue an event.
    pub fn send(&self, event: ReconcileEvent) {
        if self.tx.send(Command::Apply(event)).is_err() {
            tracing::debug!(conversation_id = %self.conversation_id, "Reconciler already stopped");
        }
    }

    pub fn full_load(&self, messages: Vec<Message>) {
        self.send(ReconcileEvent::FullLoad(messages));
    }

    pub fn placeholder(&self, message: Message) {
        self.send(ReconcileEvent::Placeholder(message));
    }

    pub fn finalize(&self, local_id: Option<LocalId>, persisted: Message) {
        self.send(ReconcileEvent::Finalize {
            local_id,
            persisted,
        });
    }

    pub fn abort(&self) {
        self.send(ReconcileEvent::Abort);
    }

    pub fn insert(&self, message: Message, source: InsertSource) {
        self.send(ReconcileEvent::Insert { message, source });
    }

    /// The visible list after every event enqueued before this call.
    pub async fn snapshot(&self) -> Result<Vec<Message>> {
        let (tx, rx) = oneshot::channel();
        self.tx
            .send(Command::Snapshot(tx))
            .map_err(|_| anyhow::anyhow!("reconciler for {} stopped", self.conversation_id))?;
        rx.await
            .map_err(|_| anyhow::anyhow!("reconciler for {} stopped", self.conversation_id))
    }
}

/// A running reconciler: its inbox, its published view and its task.
pub struct ReconcilerTask {
    pub handle: ReconcilerHandle,
    pub view: watch::Receiver<Vec<Message>>,
    pub join: JoinHandle<Reconciler>,
}

/// Spawn the task that owns `reconciler` and serially applies its inbox.
///
/// Every change is published to the returned `watch` view. The task returns
/// the final reconciler once all handles are dropped.
pub fn spawn_reconciler(reconciler: Reconciler) -> ReconcilerTask {
    let (tx, mut rx) = mpsc::unbounded_channel::<Command>();
    let (view_tx, view) = watch::channel(reconciler.messages().to_vec());
    let handle = ReconcilerHandle {
        conversation_id: reconciler.conversation_id().to_string(),
        tx,
    };

    let join = tokio::spawn(async move {
        let mut reconciler = reconciler;
        while let Some(command) = rx.recv().await {
            match command {
                Command::Apply(event) => {
                    if reconciler.apply(event) {
                        view_tx.send_replace(reconciler.messages().to_vec());
                    }
                }
                Command::Snapshot(reply) => {
                    let _ = reply.send(reconciler.messages().to_vec());
                }
            }
        }
        tracing::debug!(conversation_id = %reconciler.conversation_id(), "Reconciler stopped");
        reconciler
    });

    ReconcilerTask { handle, view, join }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::message::Role;
    use chrono::Utc;

    fn saved(id: &str, role: Role, content: &str) -> Message {
        Message::persisted(id, Utc::now(), role, "c1", content)
    }

    fn placeholders(r: &Reconciler, id: &LocalId) -> usize {
        r.messages()
            .iter()
            .filter(|m| m.local_id() == Some(id))
            .count()
    }

    fn loaded() -> Reconciler {
        let mut r = Reconciler::new("c1");
        r.apply(ReconcileEvent::FullLoad(vec![saved("m1", Role::User, "hi")]));
        r
    }

    #[test]
    fn test_full_load_moves_empty_to_loaded() {
        let mut r = Reconciler::new("c1");
        assert_eq!(r.state(), &ReconcilerState::Empty);
        r.apply(ReconcileEvent::FullLoad(vec![]));
        assert_eq!(r.state(), &ReconcilerState::Loaded);
    }

    #[test]
    fn test_placeholder_updates_in_place() {
        let mut r = loaded();
        let id = LocalId::generate();
        r.apply(ReconcileEvent::Placeholder(Message::pending(id.clone(), "c1", "Hel")));
        r.apply(ReconcileEvent::Placeholder(Message::pending(id.clone(), "c1", "Hello")));

        assert_eq!(r.messages().len(), 2);
        assert_eq!(r.messages()[1].content, "Hello");
        assert_eq!(placeholders(&r, &id), 1);
        assert_eq!(
            r.state(),
            &ReconcilerState::Streaming {
                local_id: id.clone()
            }
        );
    }

    #[test]
    fn test_placeholder_not_duplicated_after_interleaved_insert() {
        let mut r = loaded();
        let id = LocalId::generate();
        r.apply(ReconcileEvent::Placeholder(Message::pending(id.clone(), "c1", "a")));
        r.apply(ReconcileEvent::Insert {
            message: saved("other", Role::User, "from another client"),
            source: InsertSource::Realtime,
        });
        r.apply(ReconcileEvent::Placeholder(Message::pending(id.clone(), "c1", "ab")));

        assert_eq!(placeholders(&r, &id), 1);
        assert_eq!(r.messages().len(), 3);
        assert_eq!(r.messages()[1].content, "ab");
    }

    #[test]
    fn test_foreign_placeholder_ignored_while_streaming() {
        let mut r = loaded();
        let current = LocalId::generate();
        r.apply(ReconcileEvent::Placeholder(Message::pending(current.clone(), "c1", "a")));
        let changed = r.apply(ReconcileEvent::Placeholder(Message::pending(
            LocalId::generate(),
            "c1",
            "zzz",
        )));
        assert!(!changed);
        assert_eq!(r.messages().len(), 2);
    }

    #[test]
    fn test_finalize_replaces_placeholder_in_place() {
        let mut r = loaded();
        let id = LocalId::generate();
        r.apply(ReconcileEvent::Placeholder(Message::pending(id.clone(), "c1", "Hello")));
        r.apply(ReconcileEvent::Finalize {
            local_id: Some(id.clone()),
            persisted: saved("m2", Role::Assistant, "Hello"),
        });

        assert_eq!(r.messages().len(), 2);
        assert_eq!(r.messages()[1].durable_id(), Some("m2"));
        assert_eq!(placeholders(&r, &id), 0);
        assert_eq!(r.state(), &ReconcilerState::Loaded);
    }

    #[test]
    fn test_realtime_before_finalize_yields_single_copy() {
        let mut r = loaded();
        let id = LocalId::generate();
        r.apply(ReconcileEvent::Placeholder(Message::pending(id.clone(), "c1", "Hello")));
        r.apply(ReconcileEvent::Insert {
            message: saved("m2", Role::Assistant, "Hello"),
            source: InsertSource::Realtime,
        });
        r.apply(ReconcileEvent::Finalize {
            local_id: Some(id.clone()),
            persisted: saved("m2", Role::Assistant, "Hello"),
        });

        let assistants: Vec<_> = r
            .messages()
            .iter()
            .filter(|m| m.role == Role::Assistant)
            .collect();
        assert_eq!(assistants.len(), 1);
        assert_eq!(assistants[0].durable_id(), Some("m2"));
    }

    #[test]
    fn test_realtime_after_finalize_is_noop() {
        let mut r = loaded();
        let id = LocalId::generate();
        r.apply(ReconcileEvent::Placeholder(Message::pending(id.clone(), "c1", "Hello")));
        r.apply(ReconcileEvent::Finalize {
            local_id: Some(id),
            persisted: saved("m2", Role::Assistant, "Hello"),
        });
        let changed = r.apply(ReconcileEvent::Insert {
            message: saved("m2", Role::Assistant, "Hello"),
            source: InsertSource::Realtime,
        });
        assert!(!changed);
        assert_eq!(r.messages().len(), 2);
    }

    #[test]
    fn test_duplicate_insert_is_idempotent() {
        let mut once = loaded();
        let mut twice = loaded();
        let event = ReconcileEvent::Insert {
            message: saved("m9", Role::Assistant, "x"),
            source: InsertSource::Realtime,
        };
        once.apply(event.clone());
        twice.apply(event.clone());
        twice.apply(event);
        assert_eq!(once.messages(), twice.messages());
    }

    #[test]
    fn test_finalize_without_placeholder_appends() {
        let mut r = loaded();
        r.apply(ReconcileEvent::Finalize {
            local_id: None,
            persisted: saved("m2", Role::Assistant, ""),
        });
        assert_eq!(r.messages().len(), 2);
        assert_eq!(r.state(), &ReconcilerState::Loaded);
    }

    #[test]
    fn test_abort_keeps_placeholder_and_returns_to_loaded() {
        let mut r = loaded();
        let id = LocalId::generate();
        r.apply(ReconcileEvent::Placeholder(Message::pending(id.clone(), "c1", "partial")));
        r.apply(ReconcileEvent::Abort);
        assert_eq!(r.state(), &ReconcilerState::Loaded);
        assert_eq!(r.messages()[1].content, "partial");
        assert!(r.messages()[1].is_pending());
    }

    #[test]
    fn test_insert_for_other_conversation_ignored() {
        let mut r = loaded();
        let stray = Message::persisted("x", Utc::now(), Role::User, "c2", "elsewhere");
        assert!(!r.apply(ReconcileEvent::Insert {
            message: stray,
            source: InsertSource::Realtime,
        }));
    }

    #[tokio::test]
    async fn test_task_applies_events_in_order_and_publishes() {
        let task = spawn_reconciler(Reconciler::new("c1"));
        let mut view = task.view.clone();

        task.handle.full_load(vec![saved("m1", Role::User, "hi")]);
        let id = LocalId::generate();
        task.handle
            .placeholder(Message::pending(id.clone(), "c1", "He"));
        task.handle
            .placeholder(Message::pending(id.clone(), "c1", "Hey"));

        let snapshot = task.handle.snapshot().await.unwrap();
        assert_eq!(snapshot.len(), 2);
        assert_eq!(snapshot[1].content, "Hey");

        view.changed().await.unwrap();
        assert_eq!(view.borrow_and_update().len(), 2);

        let ReconcilerTask { handle, join, .. } = task;
        drop(handle);
        let final_state = join.await.unwrap();
        assert_eq!(
            final_state.state(),
            &ReconcilerState::Streaming { local_id: id }
        );
    }
}
