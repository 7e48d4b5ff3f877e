//! Interfaces the session core needs from the outside world
//!
//! - [`ChatStore`]: durable conversations and messages.
//! - [`RealtimeFeed`]: push notifications of inserted messages.
//!
//! [`crate::storage::SqliteStorage`] and [`crate::storage::InsertFeed`] are
//! the bundled implementations.

use std::pin::Pin;

use futures::Stream;

use super::message::{Conversation, Message, Role};
use crate::error::Result;

/// Persistence collaborator.
#[async_trait::async_trait]
pub trait ChatStore: Send + Sync {
    /// Create an empty conversation titled "New Conversation".
    async fn create_conversation(&self) -> Result<Conversation>;

    /// All conversations, most recently updated first.
    async fn list_conversations(&self) -> Result<Vec<Conversation>>;

    /// One conversation by id.
    async fn get_conversation(&self, id: &str) -> Result<Option<Conversation>>;

    /// Set a conversation's title.
    async fn update_conversation_title(&self, id: &str, title: &str) -> Result<()>;

    /// Persist a message and return it with its durable id and timestamp.
    ///
    /// Also advances the conversation's `updated_at`.
    async fn create_message(
        &self,
        conversation_id: &str,
        role: Role,
        content: &str,
    ) -> Result<Message>;

    /// Messages of one conversation in ascending creation order.
    async fn list_messages(&self, conversation_id: &str) -> Result<Vec<Message>>;
}

/// Live stream of messages inserted into one conversation.
///
/// Dropping the subscription unsubscribes.
pub struct Subscription {
    topic: String,
    events: Pin<Box<dyn Stream<Item = Message> + Send>>,
}

impl Subscription {
    pub fn new(topic: impl Into<String>, events: Pin<Box<dyn Stream<Item = Message> + Send>>) -> Self {
        Self {
            topic: topic.into(),
            events,
        }
    }

    /// Conversation id this subscription listens to.
    pub fn topic(&self) -> &str {
        &self.topic
    }

    /// Consume the subscription into its event stream.
    pub fn into_stream(self) -> Pin<Box<dyn Stream<Item = Message> + Send>> {
        self.events
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("topic", &self.topic)
            .finish()
    }
}

/// Realtime collaborator.
#[async_trait::async_trait]
pub trait RealtimeFeed: Send + Sync {
    /// Subscribe to message inserts for `conversation_id`.
    async fn subscribe(&self, conversation_id: &str) -> Result<Subscription>;
}
