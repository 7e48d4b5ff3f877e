//! Streaming transport abstraction and the line protocol it carries
//!
//! The chat service answers a POST with a line-delimited event stream:
//!
//! ```text
//! data: {"choices":[{"delta":{"content":"Hel"}}]}
//! : keepalive
//! data: {"choices":[{"delta":{"content":"lo"}}]}
//! data: [DONE]
//! ```
//!
//! Submodules:
//!
//! - [`decoder`] -- turns a byte stream into complete lines.
//! - [`parser`] -- classifies each line and re-merges split payloads.
//! - [`http::HttpChatTransport`] -- reqwest implementation of [`ChatTransport`].
//! - `fake::FakeTransport` -- scripted transport used in tests (cfg(test) only).
//!
//! The transport only opens the request and hands back the raw status and
//! body; status interpretation belongs to the session orchestrator.

use std::pin::Pin;

use bytes::Bytes;
use futures::Stream;
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::session::message::Role;

pub mod decoder;
pub mod http;
pub mod parser;

#[cfg(test)]
pub mod fake;

/// Raw response body as a stream of byte chunks.
pub type ByteStream = Pin<Box<dyn Stream<Item = std::io::Result<Bytes>> + Send>>;

/// One `{role, content}` pair of the request context.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatTurn {
    /// Who said it
    pub role: Role,
    /// What was said
    pub content: String,
}

impl ChatTurn {
    /// Build a turn from a role and its text.
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
        }
    }
}

/// Request body posted to the chat endpoint.
#[derive(Debug, Serialize)]
pub struct ChatRequest<'a> {
    /// Full prior history followed by the new user message
    pub messages: &'a [ChatTurn],
}

/// What the transport got back when it opened the stream.
pub struct StreamResponse {
    /// HTTP status code
    pub status: u16,
    /// Response body; `None` when the server sent no body
    pub body: Option<ByteStream>,
}

impl std::fmt::Debug for StreamResponse {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamResponse")
            .field("status", &self.status)
            .field("has_body", &self.body.is_some())
            .finish()
    }
}

impl StreamResponse {
    /// Returns true for 2xx statuses.
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// Abstraction over the streaming chat service.
///
/// # Examples
///
/// ```no_run
/// use streamchat::stream::ChatTransport;
///
/// // Implementations are created via their own constructors; this trait is
/// // used polymorphically through `Arc<dyn ChatTransport>`.
/// ```
#[async_trait::async_trait]
pub trait ChatTransport: Send + Sync + std::fmt::Debug {
    /// Open a streaming completion for `history`.
    ///
    /// # Errors
    ///
    /// Returns [`crate::error::ChatError::TransportFailure`] when the request
    /// could not be sent at all. Non-2xx statuses are NOT errors here.
    async fn open(&self, history: &[ChatTurn]) -> Result<StreamResponse>;
}
