use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Listing row for a stored conversation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationSummary {
    /// Conversation id (ULID)
    pub id: String,
    /// Current title
    pub title: String,
    /// When the conversation was created
    pub created_at: DateTime<Utc>,
    /// When a message was last added
    pub updated_at: DateTime<Utc>,
    /// Number of persisted messages
    pub message_count: usize,
}
