//! In-process change feed of committed message inserts
//!
//! [`InsertFeed`] is a tokio broadcast channel. The store publishes every
//! message it commits; each subscription filters for one conversation.

use futures::stream;
use tokio::sync::broadcast;

use crate::error::Result;
use crate::session::collaborators::{RealtimeFeed, Subscription};
use crate::session::message::Message;

/// Default broadcast buffer per subscriber.
pub const DEFAULT_FEED_CAPACITY: usize = 256;

/// Broadcast feed of inserted messages.
///
/// Cloning shares the same channel.
#[derive(Debug, Clone)]
pub struct InsertFeed {
    tx: broadcast::Sender<Message>,
}

impl Default for InsertFeed {
    fn default() -> Self {
        Self::new(DEFAULT_FEED_CAPACITY)
    }
}

impl InsertFeed {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    /// Publish a committed message. Having no subscribers is not an error.
    pub fn publish(&self, message: Message) {
        match self.tx.send(message) {
            Ok(receivers) => tracing::trace!(receivers, "Published insert"),
            Err(_) => tracing::trace!("Published insert with no subscribers"),
        }
    }

    /// Number of live subscriptions.
    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }

    fn subscription(&self, conversation_id: &str) -> Subscription {
        let rx = self.tx.subscribe();
        let topic = conversation_id.to_string();

        let events = stream::unfold((rx, topic.clone()), |(mut rx, topic)| async move {
            loop {
                match rx.recv().await {
                    Ok(message) if message.conversation_id == topic => {
                        return Some((message, (rx, topic)));
                    }
                    Ok(_) => continue,
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        tracing::warn!(
                            conversation_id = %topic,
                            skipped,
                            "Realtime subscriber lagged, inserts dropped"
                        );
                        continue;
                    }
                    Err(broadcast::error::RecvError::Closed) => return None,
                }
            }
        });

        Subscription::new(topic, Box::pin(events))
    }
}

#[async_trait::async_trait]
impl RealtimeFeed for InsertFeed {
    async fn subscribe(&self, conversation_id: &str) -> Result<Subscription> {
        tracing::debug!(conversation_id = %conversation_id, "Subscribing to inserts");
        Ok(self.subscription(conversation_id))
    }
}
