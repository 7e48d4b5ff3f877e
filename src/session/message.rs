//! Conversation and message data model
//!
//! A message is either still pending (a placeholder for the assistant reply
//! being streamed, identified by a [`LocalId`]) or persisted (a durable id and
//! server timestamp). The two id spaces never mix: local ids carry the
//! `local-` prefix, durable ids are ULIDs.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Prefix reserved for locally generated placeholder ids.
pub const LOCAL_ID_PREFIX: &str = "local-";

/// Title given to a conversation before its first message.
pub const DEFAULT_CONVERSATION_TITLE: &str = "New Conversation";

/// Who authored a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

impl Role {
    /// Wire/storage name of the role.
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }

    /// Parse a stored role name.
    pub fn parse_str(s: &str) -> Option<Self> {
        match s {
            "user" => Some(Role::User),
            "assistant" => Some(Role::Assistant),
            _ => None,
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Locally generated placeholder identity.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct LocalId(String);

impl LocalId {
    /// Generate a fresh placeholder id.
    ///
    /// # Examples
    ///
    /// ```
    /// use streamchat::session::message::LocalId;
    ///
    /// let id = LocalId::generate();
    /// assert!(id.as_str().starts_with("local-"));
    /// assert_ne!(id, LocalId::generate());
    /// ```
    pub fn generate() -> Self {
        Self(format!("{}{}", LOCAL_ID_PREFIX, uuid::Uuid::new_v4()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for LocalId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Identity of a message: placeholder or durable.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum MessageIdentity {
    /// In-progress reply not yet saved
    Pending { local_id: LocalId },
    /// Saved by the store
    Persisted {
        id: String,
        created_at: DateTime<Utc>,
    },
}

/// A chat message as shown in the session view.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub identity: MessageIdentity,
    pub role: Role,
    pub content: String,
    pub conversation_id: String,
}

impl Message {
    /// Build a placeholder assistant message.
    pub fn pending(
        local_id: LocalId,
        conversation_id: impl Into<String>,
        content: impl Into<String>,
    ) -> Self {
        Self {
            identity: MessageIdentity::Pending { local_id },
            role: Role::Assistant,
            content: content.into(),
            conversation_id: conversation_id.into(),
        }
    }

    /// Build a persisted message.
    pub fn persisted(
        id: impl Into<String>,
        created_at: DateTime<Utc>,
        role: Role,
        conversation_id: impl Into<String>,
        content: impl Into<String>,
    ) -> Self {
        Self {
            identity: MessageIdentity::Persisted {
                id: id.into(),
                created_at,
            },
            role,
            content: content.into(),
            conversation_id: conversation_id.into(),
        }
    }

    /// Durable id, if persisted.
    pub fn durable_id(&self) -> Option<&str> {
        match &self.identity {
            MessageIdentity::Persisted { id, .. } => Some(id),
            MessageIdentity::Pending { .. } => None,
        }
    }

    /// Placeholder id, if pending.
    pub fn local_id(&self) -> Option<&LocalId> {
        match &self.identity {
            MessageIdentity::Pending { local_id } => Some(local_id),
            MessageIdentity::Persisted { .. } => None,
        }
    }

    pub fn is_pending(&self) -> bool {
        matches!(self.identity, MessageIdentity::Pending { .. })
    }

    /// Server timestamp, if persisted.
    pub fn created_at(&self) -> Option<DateTime<Utc>> {
        match &self.identity {
            MessageIdentity::Persisted { created_at, .. } => Some(*created_at),
            MessageIdentity::Pending { .. } => None,
        }
    }

    /// Id used for display regardless of state.
    pub fn display_id(&self) -> &str {
        match &self.identity {
            MessageIdentity::Persisted { id, .. } => id,
            MessageIdentity::Pending { local_id } => local_id.as_str(),
        }
    }
}

/// A conversation owned by the store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Conversation {
    pub id: String,
    pub title: String,
    pub updated_at: DateTime<Utc>,
}

/// Derive a conversation title from the first user message.
///
/// Truncation counts characters, not bytes, so multi-byte text is never cut
/// mid-character.
///
/// # Examples
///
/// ```
/// use streamchat::session::message::derive_title;
///
/// assert_eq!(derive_title("short", 50), "short");
/// assert_eq!(derive_title("héllo wörld", 5), "héllo");
/// ```
pub fn derive_title(first_message: &str, max_chars: usize) -> String {
    first_message.chars().take(max_chars).collect()
}
