//! StreamChat - streaming chat session library
//!
//! This library turns one user message into a persisted exchange with a
//! streaming chat service: it stores the message, streams the reply into a
//! live placeholder, persists the final reply and keeps the visible message
//! list consistent with inserts made by any client.
//!
//! # Architecture
//!
//! The library is organized into the following modules:
//!
//! - `session`: data model, reply accumulator, reconciler and the turn orchestrator
//! - `stream`: transport abstraction, line decoder and event parser
//! - `storage`: SQLite store and the in-process insert feed
//! - `config`: Configuration management and validation
//! - `error`: Error types and result aliases
//! - `cli`: Command-line interface definition
//! - `commands`: CLI command handlers
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use streamchat::{ChatSession, Config, HttpChatTransport, SqliteStorage};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Config::default();
//!     config.validate()?;
//!
//!     let storage = Arc::new(SqliteStorage::new()?);
//!     let transport = Arc::new(HttpChatTransport::from_config(&config.transport)?);
//!     let feed = Arc::new(storage.feed());
//!     let session = ChatSession::new(storage, transport, feed, config.session.clone());
//!
//!     session.create_conversation().await?;
//!     session.send_message("Hello!").await?;
//!     Ok(())
//! }
//! ```

pub mod cli;
pub mod commands;
pub mod config;
pub mod error;
pub mod session;
pub mod storage;
pub mod stream;

// Re-export commonly used types
pub use config::Config;
pub use error::{ChatError, Result};
pub use session::{ChatSession, Conversation, Message, Role, TurnOutcome};
pub use storage::{InsertFeed, SqliteStorage};
pub use stream::http::HttpChatTransport;

#[cfg(test)]
pub mod test_utils;
