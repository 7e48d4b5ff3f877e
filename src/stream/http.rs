//! HTTP implementation of [`ChatTransport`]
//!
//! Every turn is a single POST of the full history. The response body is
//! handed back unread as a byte stream; a non-2xx status is returned as-is so
//! the caller can map it.

use std::time::Duration;

use futures::TryStreamExt;

use super::{ByteStream, ChatRequest, ChatTransport, ChatTurn, StreamResponse};
use crate::config::TransportConfig;
use crate::error::{ChatError, Result};

/// reqwest-backed chat transport.
///
/// # Examples
///
/// ```no_run
/// use std::time::Duration;
/// use url::Url;
/// use streamchat::stream::http::HttpChatTransport;
///
/// let transport = HttpChatTransport::new(
///     Url::parse("http://localhost:54321/functions/v1/chat").unwrap(),
///     None,
///     Duration::from_secs(120),
/// )
/// .unwrap();
/// ```
#[derive(Debug)]
pub struct HttpChatTransport {
    http_client: reqwest::Client,
    endpoint: url::Url,
    api_key: Option<String>,
    header_timeout: Duration,
}

impl HttpChatTransport {
    /// Build a transport for `endpoint`.
    ///
    /// `api_key`, when set, is sent as a bearer token. `timeout` bounds
    /// connecting and waiting for the response headers. The streamed body
    /// is not bounded, so a long reply may keep arriving past it.
    ///
    /// # Errors
    ///
    /// Returns [`ChatError::Config`] if the HTTP client cannot be built.
    pub fn new(endpoint: url::Url, api_key: Option<String>, timeout: Duration) -> Result<Self> {
        let http_client = reqwest::Client::builder()
            .connect_timeout(timeout)
            .build()
            .map_err(|e| ChatError::Config(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            http_client,
            endpoint,
            api_key,
            header_timeout: timeout,
        })
    }

    /// Build a transport from the `transport` config section.
    pub fn from_config(config: &TransportConfig) -> Result<Self> {
        let endpoint = url::Url::parse(&config.endpoint)
            .map_err(|e| ChatError::Config(format!("Invalid endpoint URL: {}", e)))?;
        Self::new(
            endpoint,
            config.api_key.clone(),
            Duration::from_secs(config.timeout_seconds),
        )
    }

    pub fn endpoint(&self) -> &url::Url {
        &self.endpoint
    }
}

#[async_trait::async_trait]
impl ChatTransport for HttpChatTransport {
    async fn open(&self, history: &[ChatTurn]) -> Result<StreamResponse> {
        let mut req = self
            .http_client
            .post(self.endpoint.as_str())
            .header("Accept", "text/event-stream")
            .json(&ChatRequest { messages: history });

        if let Some(key) = &self.api_key {
            req = req.bearer_auth(key);
        }

        tracing::debug!(endpoint = %self.endpoint, turns = history.len(), "Opening chat stream");

        let response = tokio::time::timeout(self.header_timeout, req.send())
            .await
            .map_err(|_| {
                ChatError::TransportFailure(format!(
                    "No response headers within {}s",
                    self.header_timeout.as_secs()
                ))
            })?
            .map_err(|e| ChatError::TransportFailure(format!("HTTP POST failed: {}", e)))?;

        let status = response.status();
        tracing::debug!(status = status.as_u16(), "Chat stream response");

        let body: ByteStream = Box::pin(
            response
                .bytes_stream()
                .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e)),
        );

        Ok(StreamResponse {
            status: status.as_u16(),
            body: Some(body),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_config_rejects_bad_url() {
        let config = TransportConfig {
            endpoint: "not a url".to_string(),
            ..TransportConfig::default()
        };
        let err = HttpChatTransport::from_config(&config).unwrap_err();
        assert!(err.to_string().contains("Invalid endpoint URL"));
    }

    #[test]
    fn test_from_config_keeps_endpoint() {
        let config = TransportConfig::default();
        let transport = HttpChatTransport::from_config(&config).unwrap();
        assert_eq!(transport.endpoint().as_str(), config.endpoint);
    }
}
