//! Scripted in-process transport for unit tests
//!
//! [`FakeTransport`] replays the same scripted response on every `open` and
//! records each request's history so tests can assert on it.

use std::sync::{Arc, Mutex};

use bytes::Bytes;
use tokio::sync::Notify;

use super::{ByteStream, ChatTransport, ChatTurn, StreamResponse};
use crate::error::{ChatError, Result};

#[derive(Debug, Clone)]
enum Script {
    Stream { lines: Vec<String>, interrupt: bool },
    Status(u16),
    NoBody,
    Unreachable,
}

/// Transport that answers from a fixed script.
#[derive(Debug)]
pub struct FakeTransport {
    script: Script,
    gate: Option<Arc<Notify>>,
    requests: Mutex<Vec<Vec<ChatTurn>>>,
}

impl FakeTransport {
    fn with_script(script: Script) -> Self {
        Self {
            script,
            gate: None,
            requests: Mutex::new(Vec::new()),
        }
    }

    /// 200 response whose body is `lines`, one chunk per line.
    pub fn lines(lines: &[&str]) -> Self {
        Self::with_script(Script::Stream {
            lines: lines.iter().map(|l| l.to_string()).collect(),
            interrupt: false,
        })
    }

    /// 200 response that fails with an I/O error after `lines`.
    pub fn interrupted_after(lines: &[&str]) -> Self {
        Self::with_script(Script::Stream {
            lines: lines.iter().map(|l| l.to_string()).collect(),
            interrupt: true,
        })
    }

    /// Response with `status` and an empty body.
    pub fn status(status: u16) -> Self {
        Self::with_script(Script::Status(status))
    }

    /// 200 response without a body.
    pub fn no_body() -> Self {
        Self::with_script(Script::NoBody)
    }

    /// `open` fails before any response arrives.
    pub fn unreachable() -> Self {
        Self::with_script(Script::Unreachable)
    }

    /// Like [`FakeTransport::lines`], but `open` waits until the returned
    /// gate is notified.
    pub fn gated(lines: &[&str]) -> (Self, Arc<Notify>) {
        let gate = Arc::new(Notify::new());
        let mut transport = Self::lines(lines);
        transport.gate = Some(gate.clone());
        (transport, gate)
    }

    /// Histories passed to every `open` call so far.
    pub fn requests(&self) -> Vec<Vec<ChatTurn>> {
        self.requests.lock().unwrap().clone()
    }
}

fn body_of(chunks: Vec<std::io::Result<Bytes>>) -> ByteStream {
    Box::pin(futures::stream::iter(chunks))
}

#[async_trait::async_trait]
impl ChatTransport for FakeTransport {
    async fn open(&self, history: &[ChatTurn]) -> Result<StreamResponse> {
        self.requests.lock().unwrap().push(history.to_vec());

        if let Some(gate) = &self.gate {
            gate.notified().await;
        }

        match &self.script {
            Script::Stream { lines, interrupt } => {
                let mut chunks: Vec<std::io::Result<Bytes>> = lines
                    .iter()
                    .map(|l| Ok(Bytes::from(format!("{}\n", l))))
                    .collect();
                if *interrupt {
                    chunks.push(Err(std::io::Error::new(
                        std::io::ErrorKind::ConnectionReset,
                        "connection reset",
                    )));
                }
                Ok(StreamResponse {
                    status: 200,
                    body: Some(body_of(chunks)),
                })
            }
            Script::Status(status) => Ok(StreamResponse {
                status: *status,
                body: Some(body_of(Vec::new())),
            }),
            Script::NoBody => Ok(StreamResponse {
                status: 200,
                body: None,
            }),
            Script::Unreachable => {
                Err(ChatError::TransportFailure("connection refused".to_string()).into())
            }
        }
    }
}
