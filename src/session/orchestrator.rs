//! Session orchestrator: drives one user turn end to end
//!
//! A turn persists the user message, names the conversation on its first
//! message, opens the stream, folds deltas into a placeholder reply, persists
//! the final reply and swaps it in. Every visible-list mutation goes through
//! the active conversation's reconciler inbox.
//!
//! Only one turn may be in flight per session. A send while busy is rejected,
//! not queued. Switching conversations mid-turn does not cancel the turn: it
//! keeps its own inbox handle, finishes persisting the reply headlessly, and
//! the detached reconciler stops once the turn drops that handle.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use futures::StreamExt;
use tokio::sync::{watch, RwLock};
use tokio::task::JoinHandle;

use super::accumulator::ReplyAccumulator;
use super::collaborators::{ChatStore, RealtimeFeed};
use super::message::{derive_title, Conversation, Message, Role};
use super::reconciler::{spawn_reconciler, InsertSource, Reconciler, ReconcilerHandle};
use crate::config::SessionConfig;
use crate::error::{ChatError, Result};
use crate::stream::decoder::decode_lines;
use crate::stream::parser::{DeltaAssembler, ParsedLine};
use crate::stream::{ByteStream, ChatTransport, ChatTurn};

/// HTTP status the chat service uses for rate limiting.
pub const STATUS_RATE_LIMITED: u16 = 429;

/// HTTP status the chat service uses when the workspace is out of credits.
pub const STATUS_PAYMENT_REQUIRED: u16 = 402;

/// Result of a successful [`ChatSession::send_message`] call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TurnOutcome {
    /// No conversation was active; one was created and activated. The caller
    /// must send again.
    ConversationCreated { conversation_id: String },
    /// The turn ran to completion
    Completed { user: Message, assistant: Message },
}

/// Marks the session busy for as long as it lives.
struct BusyGuard<'a>(&'a AtomicBool);

impl<'a> BusyGuard<'a> {
    fn acquire(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| Self(flag))
    }
}

impl Drop for BusyGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

struct ActiveConversation {
    id: String,
    reconciler: ReconcilerHandle,
    view: watch::Receiver<Vec<Message>>,
    realtime: JoinHandle<()>,
}

impl Drop for ActiveConversation {
    fn drop(&mut self) {
        tracing::debug!(conversation_id = %self.id, "Unsubscribing from realtime feed");
        self.realtime.abort();
    }
}

/// Chat session bound to one store, one transport and one realtime feed.
pub struct ChatSession {
    store: Arc<dyn ChatStore>,
    transport: Arc<dyn ChatTransport>,
    feed: Arc<dyn RealtimeFeed>,
    config: SessionConfig,
    active: RwLock<Option<ActiveConversation>>,
    conversations: watch::Sender<Vec<Conversation>>,
    busy: AtomicBool,
}

impl ChatSession {
    pub fn new(
        store: Arc<dyn ChatStore>,
        transport: Arc<dyn ChatTransport>,
        feed: Arc<dyn RealtimeFeed>,
        config: SessionConfig,
    ) -> Self {
        let (conversations, _) = watch::channel(Vec::new());
        Self {
            store,
            transport,
            feed,
            config,
            active: RwLock::new(None),
            conversations,
            busy: AtomicBool::new(false),
        }
    }

    /// True while a turn is in flight.
    pub fn is_busy(&self) -> bool {
        self.busy.load(Ordering::Acquire)
    }

    /// Id of the active conversation, if any.
    pub async fn active_conversation_id(&self) -> Option<String> {
        self.active.read().await.as_ref().map(|a| a.id.clone())
    }

    /// Live view of the conversation list, most recently updated first.
    pub fn conversations(&self) -> watch::Receiver<Vec<Conversation>> {
        self.conversations.subscribe()
    }

    /// Live view of the active conversation's messages.
    ///
    /// A new receiver is needed after every conversation switch.
    pub async fn messages(&self) -> Option<watch::Receiver<Vec<Message>>> {
        self.active.read().await.as_ref().map(|a| a.view.clone())
    }

    /// The active conversation's messages after all queued updates.
    pub async fn snapshot(&self) -> Result<Vec<Message>> {
        let handle = self.active_handle().await.ok_or(ChatError::NoActiveConversation)?;
        handle.snapshot().await
    }

    async fn active_handle(&self) -> Option<ReconcilerHandle> {
        self.active.read().await.as_ref().map(|a| a.reconciler.clone())
    }

    /// Reload the conversation list.
    ///
    /// When nothing is active yet, the most recently updated conversation is
    /// selected.
    pub async fn refresh_conversations(&self) -> Result<Vec<Conversation>> {
        let list = self.store.list_conversations().await?;
        self.conversations.send_replace(list.clone());

        let nothing_active = self.active.read().await.is_none();
        if nothing_active {
            if let Some(latest) = list.first() {
                self.select_conversation(&latest.id).await?;
            }
        }

        Ok(list)
    }

    /// Create a conversation, make it active and refresh the list.
    pub async fn create_conversation(&self) -> Result<Conversation> {
        let conversation = self.store.create_conversation().await.map_err(|e| {
            tracing::warn!(error = %e, "Creating conversation failed");
            ChatError::PersistenceFailure("Failed to create new conversation".to_string())
        })?;
        tracing::info!(conversation_id = %conversation.id, "Created conversation");

        self.select_conversation(&conversation.id).await?;
        if let Err(e) = self.refresh_conversations().await {
            tracing::warn!(error = %e, "Refreshing conversation list failed");
        }

        Ok(conversation)
    }

    /// Make `conversation_id` the active conversation.
    ///
    /// Tears down the previous realtime subscription, subscribes for the new
    /// conversation and performs a full load.
    pub async fn select_conversation(&self, conversation_id: &str) -> Result<()> {
        if self.store.get_conversation(conversation_id).await?.is_none() {
            return Err(ChatError::ConversationNotFound(conversation_id.to_string()).into());
        }

        // Subscribe before reading so nothing inserted in between is missed;
        // the reconciler dedups the overlap.
        let subscription = self.feed.subscribe(conversation_id).await?;
        let history = self.store.list_messages(conversation_id).await?;

        let task = spawn_reconciler(Reconciler::new(conversation_id));
        task.handle.full_load(history);

        let forward = task.handle.clone();
        let mut events = subscription.into_stream();
        let realtime = tokio::spawn(async move {
            while let Some(message) = events.next().await {
                forward.insert(message, InsertSource::Realtime);
            }
            tracing::debug!(conversation_id = %forward.conversation_id(), "Realtime feed ended");
        });

        let next = ActiveConversation {
            id: conversation_id.to_string(),
            reconciler: task.handle,
            view: task.view,
            realtime,
        };

        let previous = self.active.write().await.replace(next);
        if let Some(previous) = previous {
            tracing::info!(from = %previous.id, to = %conversation_id, "Switched conversation");
        } else {
            tracing::info!(conversation_id = %conversation_id, "Opened conversation");
        }

        Ok(())
    }

    /// Reload the active conversation from the store.
    pub async fn reload(&self) -> Result<()> {
        let handle = self.active_handle().await.ok_or(ChatError::NoActiveConversation)?;
        let history = self.store.list_messages(handle.conversation_id()).await?;
        handle.full_load(history);
        Ok(())
    }

    /// Detach from the active conversation and unsubscribe.
    pub async fn close(&self) {
        self.active.write().await.take();
    }

    /// Run one user turn.
    ///
    /// # Errors
    ///
    /// Typed failures are raised as [`ChatError`]: `EmptyMessage`,
    /// `SessionBusy`, `RateLimited`, `QuotaExceeded`, `TransportFailure` or
    /// `PersistenceFailure`. The session is idle again on every return.
    pub async fn send_message(&self, text: &str) -> Result<TurnOutcome> {
        if text.trim().is_empty() {
            return Err(ChatError::EmptyMessage.into());
        }

        let Some(handle) = self.active_handle().await else {
            let conversation = self.create_conversation().await?;
            return Ok(TurnOutcome::ConversationCreated {
                conversation_id: conversation.id,
            });
        };

        let Some(_busy) = BusyGuard::acquire(&self.busy) else {
            tracing::debug!("Rejecting send while a turn is in flight");
            return Err(ChatError::SessionBusy.into());
        };

        self.run_turn(&handle, text).await
    }

    async fn run_turn(&self, handle: &ReconcilerHandle, text: &str) -> Result<TurnOutcome> {
        let conversation_id = handle.conversation_id().to_string();
        let history = handle.snapshot().await?;

        let user = self
            .store
            .create_message(&conversation_id, Role::User, text)
            .await
            .map_err(|e| {
                tracing::warn!(conversation_id = %conversation_id, error = %e, "Saving user message failed");
                ChatError::PersistenceFailure("Failed to save your message".to_string())
            })?;
        handle.insert(user.clone(), InsertSource::Local);

        if history.is_empty() {
            self.name_conversation(&conversation_id, text).await;
        }

        let mut turns: Vec<ChatTurn> = history
            .iter()
            .map(|m| ChatTurn::new(m.role, m.content.clone()))
            .collect();
        turns.push(ChatTurn::new(Role::User, text));

        let body = self.open_stream(&turns).await?;

        let accumulator = match self.drive_stream(&conversation_id, body, handle).await {
            Ok(accumulator) => accumulator,
            Err(e) => {
                handle.abort();
                return Err(e);
            }
        };

        let finished = accumulator.finish();
        match self
            .store
            .create_message(&conversation_id, Role::Assistant, &finished.content)
            .await
        {
            Ok(assistant) => {
                tracing::info!(
                    conversation_id = %conversation_id,
                    message_id = %assistant.display_id(),
                    chars = assistant.content.chars().count(),
                    "Assistant reply saved"
                );
                handle.finalize(finished.local_id, assistant.clone());
                Ok(TurnOutcome::Completed { user, assistant })
            }
            Err(e) => {
                tracing::warn!(conversation_id = %conversation_id, error = %e, "Saving assistant reply failed");
                handle.abort();
                Err(ChatError::PersistenceFailure(
                    "Failed to save the assistant reply".to_string(),
                )
                .into())
            }
        }
    }

    /// Title the conversation after its first message. Failures are logged
    /// and do not stop the turn.
    async fn name_conversation(&self, conversation_id: &str, first_message: &str) {
        let title = derive_title(first_message, self.config.title_max_chars);
        if let Err(e) = self
            .store
            .update_conversation_title(conversation_id, &title)
            .await
        {
            tracing::warn!(conversation_id = %conversation_id, error = %e, "Updating conversation title failed");
            return;
        }
        if let Err(e) = self.refresh_conversations().await {
            tracing::warn!(error = %e, "Refreshing conversation list failed");
        }
    }

    /// Open the stream and map the status to a typed outcome.
    async fn open_stream(&self, turns: &[ChatTurn]) -> Result<ByteStream> {
        let response = self.transport.open(turns).await.map_err(|e| {
            tracing::warn!(error = %e, "Opening chat stream failed");
            ChatError::TransportFailure("Could not reach chat service".to_string())
        })?;

        match response.status {
            STATUS_RATE_LIMITED => {
                tracing::warn!(status = response.status, "Chat service rate limited the request");
                Err(ChatError::RateLimited(
                    "Too many requests. Please try again later.".to_string(),
                )
                .into())
            }
            STATUS_PAYMENT_REQUIRED => {
                tracing::warn!(status = response.status, "Chat service quota exhausted");
                Err(ChatError::QuotaExceeded("Please add credits to your workspace.".to_string()).into())
            }
            _ if !response.is_success() => {
                tracing::warn!(status = response.status, "Chat service returned an error status");
                Err(ChatError::TransportFailure("Failed to start stream".to_string()).into())
            }
            _ => response.body.ok_or_else(|| {
                tracing::warn!("Chat service response had no body");
                anyhow::Error::from(ChatError::TransportFailure(
                    "Failed to start stream".to_string(),
                ))
            }),
        }
    }

    /// Decoder -> parser -> accumulator, publishing each grown placeholder.
    async fn drive_stream(
        &self,
        conversation_id: &str,
        body: ByteStream,
        handle: &ReconcilerHandle,
    ) -> Result<ReplyAccumulator> {
        let mut lines = Box::pin(decode_lines(body));
        let mut assembler = DeltaAssembler::new(self.config.max_merge_attempts);
        let mut accumulator = ReplyAccumulator::new(conversation_id);
        let mut completed = false;

        while let Some(line) = lines.next().await {
            let line = line.map_err(|e| {
                tracing::warn!(conversation_id = %conversation_id, error = %e, "Chat stream interrupted");
                ChatError::TransportFailure("Stream interrupted".to_string())
            })?;

            match assembler.feed(&line) {
                ParsedLine::Fragment(fragment) => {
                    if let Some(placeholder) = accumulator.push(&fragment) {
                        handle.placeholder(placeholder);
                    }
                }
                ParsedLine::Done => {
                    completed = true;
                    break;
                }
                ParsedLine::Nothing => {}
            }
        }
        assembler.finish();

        if !completed {
            tracing::debug!(conversation_id = %conversation_id, "Stream ended without a termination marker");
        }

        Ok(accumulator)
    }
}
