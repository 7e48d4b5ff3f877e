//! Assistant reply accumulator
//!
//! Folds content fragments into one growing string. The placeholder identity
//! is created lazily on the first fragment, so a turn that never produces
//! content never shows a placeholder.

use super::message::{LocalId, Message};

/// Content handed off for persistence once the stream completes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FinishedReply {
    /// Placeholder to replace, if one was ever shown
    pub local_id: Option<LocalId>,
    /// Final accumulated text
    pub content: String,
}

/// Growing assistant reply for one turn.
///
/// # Examples
///
/// ```
/// use streamchat::session::accumulator::ReplyAccumulator;
///
/// let mut acc = ReplyAccumulator::new("conv-1");
/// let first = acc.push("Hel").unwrap();
/// let second = acc.push("lo").unwrap();
/// assert_eq!(first.local_id(), second.local_id());
/// assert_eq!(second.content, "Hello");
/// assert_eq!(acc.finish().content, "Hello");
/// ```
#[derive(Debug)]
pub struct ReplyAccumulator {
    conversation_id: String,
    local_id: Option<LocalId>,
    content: String,
}

impl ReplyAccumulator {
    pub fn new(conversation_id: impl Into<String>) -> Self {
        Self {
            conversation_id: conversation_id.into(),
            local_id: None,
            content: String::new(),
        }
    }

    /// Append `fragment` and return the updated placeholder.
    ///
    /// Empty fragments change nothing and emit nothing.
    pub fn push(&mut self, fragment: &str) -> Option<Message> {
        if fragment.is_empty() {
            return None;
        }

        self.content.push_str(fragment);
        let local_id = self.local_id.get_or_insert_with(LocalId::generate).clone();

        Some(Message::pending(
            local_id,
            self.conversation_id.clone(),
            self.content.clone(),
        ))
    }

    /// Placeholder id, once the first fragment has arrived.
    pub fn local_id(&self) -> Option<&LocalId> {
        self.local_id.as_ref()
    }

    pub fn content(&self) -> &str {
        &self.content
    }

    /// Finish the turn and hand off the accumulated text.
    pub fn finish(self) -> FinishedReply {
        FinishedReply {
            local_id: self.local_id,
            content: self.content,
        }
    }
}
