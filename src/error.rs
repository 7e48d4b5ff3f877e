//! Error types for StreamChat
//!
//! This module defines all error types used throughout the application,
//! using `thiserror` for ergonomic error handling.

use thiserror::Error;

/// Main error type for StreamChat operations
///
/// The first four user-facing variants (`RateLimited`, `QuotaExceeded`,
/// `TransportFailure`, `PersistenceFailure`) carry a short human-readable
/// description and never embed raw transport payloads.
#[derive(Error, Debug)]
pub enum ChatError {
    /// The chat service rejected the request with a rate-limit status
    #[error("Rate limited: {0}")]
    RateLimited(String),

    /// The chat service rejected the request because the quota is exhausted
    #[error("Quota exceeded: {0}")]
    QuotaExceeded(String),

    /// The stream could not be opened or was interrupted
    #[error("Transport failure: {0}")]
    TransportFailure(String),

    /// A message, title or conversation could not be persisted
    #[error("Persistence failure: {0}")]
    PersistenceFailure(String),

    /// The message text was empty or whitespace only
    #[error("Cannot send an empty message")]
    EmptyMessage,

    /// A turn is already in flight for this session
    #[error("A message is already being sent")]
    SessionBusy,

    /// An operation needed an active conversation but none is selected
    #[error("No active conversation")]
    NoActiveConversation,

    /// The referenced conversation does not exist
    #[error("Conversation not found: {0}")]
    ConversationNotFound(String),

    /// Configuration-related errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// Conversation storage errors (database operations)
    #[error("Storage error: {0}")]
    Storage(String),

    /// IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization errors
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// YAML parsing errors
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// HTTP request errors
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
}

impl ChatError {
    /// Returns true for failures the user resolves by waiting or topping up,
    /// rather than by retrying immediately.
    pub fn is_user_actionable(&self) -> bool {
        matches!(self, ChatError::RateLimited(_) | ChatError::QuotaExceeded(_))
    }

    /// Short title suitable for a notice banner.
    pub fn notice_title(&self) -> &'static str {
        match self {
            ChatError::RateLimited(_) => "Rate Limit",
            ChatError::QuotaExceeded(_) => "Payment Required",
            ChatError::SessionBusy => "Busy",
            _ => "Error",
        }
    }
}

/// Result type alias for StreamChat operations
///
/// This is a convenience alias that uses `anyhow::Error` as the error type,
/// allowing for rich error context and easy error propagation. Typed
/// failures travel inside it as [`ChatError`] and are recovered with
/// `downcast_ref`.
pub type Result<T> = anyhow::Result<T>;

/// Look up the [`ChatError`] carried by an `anyhow::Error`, if any.
pub fn chat_error(err: &anyhow::Error) -> Option<&ChatError> {
    err.downcast_ref::<ChatError>()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rate_limited_display() {
        let error = ChatError::RateLimited("Too many requests".to_string());
        assert_eq!(error.to_string(), "Rate limited: Too many requests");
    }

    #[test]
    fn test_quota_exceeded_display() {
        let error = ChatError::QuotaExceeded("add credits".to_string());
        assert_eq!(error.to_string(), "Quota exceeded: add credits");
    }

    #[test]
    fn test_transport_failure_display() {
        let error = ChatError::TransportFailure("Failed to start stream".to_string());
        assert_eq!(
            error.to_string(),
            "Transport failure: Failed to start stream"
        );
    }

    #[test]
    fn test_persistence_failure_display() {
        let error = ChatError::PersistenceFailure("disk full".to_string());
        assert_eq!(error.to_string(), "Persistence failure: disk full");
    }

    #[test]
    fn test_user_actionable_classification() {
        assert!(ChatError::RateLimited(String::new()).is_user_actionable());
        assert!(ChatError::QuotaExceeded(String::new()).is_user_actionable());
        assert!(!ChatError::TransportFailure(String::new()).is_user_actionable());
        assert!(!ChatError::SessionBusy.is_user_actionable());
    }

    #[test]
    fn test_notice_titles() {
        assert_eq!(
            ChatError::RateLimited(String::new()).notice_title(),
            "Rate Limit"
        );
        assert_eq!(
            ChatError::QuotaExceeded(String::new()).notice_title(),
            "Payment Required"
        );
        assert_eq!(
            ChatError::PersistenceFailure(String::new()).notice_title(),
            "Error"
        );
    }

    #[test]
    fn test_downcast_through_anyhow() {
        let err: anyhow::Error = ChatError::SessionBusy.into();
        assert!(matches!(chat_error(&err), Some(ChatError::SessionBusy)));
    }

    #[test]
    fn test_io_error_conversion() {
        let io_error = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let error: ChatError = io_error.into();
        assert!(matches!(error, ChatError::Io(_)));
    }

    #[test]
    fn test_json_error_conversion() {
        let json_error = serde_json::from_str::<serde_json::Value>("{invalid json}").unwrap_err();
        let error: ChatError = json_error.into();
        assert!(matches!(error, ChatError::Serialization(_)));
    }

    #[test]
    fn test_error_is_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<ChatError>();
    }
}
