//! Configuration management for StreamChat
//!
//! This module handles loading, parsing, validating, and managing
//! configuration from files, environment variables, and CLI overrides.

use crate::error::{ChatError, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Main configuration structure for StreamChat
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Streaming chat endpoint settings
    #[serde(default)]
    pub transport: TransportConfig,

    /// Session behaviour (title length, parser limits)
    #[serde(default)]
    pub session: SessionConfig,

    /// Conversation storage settings
    #[serde(default)]
    pub storage: StorageConfig,

    /// Log output settings
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Streaming transport configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransportConfig {
    /// URL of the streaming chat endpoint
    #[serde(default = "default_endpoint")]
    pub endpoint: String,

    /// Optional bearer token sent with every request
    #[serde(default)]
    pub api_key: Option<String>,

    /// Seconds allowed for connecting and receiving response headers
    #[serde(default = "default_timeout_seconds")]
    pub timeout_seconds: u64,
}

fn default_endpoint() -> String {
    "http://localhost:54321/functions/v1/chat".to_string()
}

fn default_timeout_seconds() -> u64 {
    120
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            endpoint: default_endpoint(),
            api_key: None,
            timeout_seconds: default_timeout_seconds(),
        }
    }
}

/// Session configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Maximum characters kept when deriving a title from the first message
    #[serde(default = "default_title_max_chars")]
    pub title_max_chars: usize,

    /// How many follow-up lines an unparsable data line may absorb before
    /// it is dropped
    #[serde(default = "default_max_merge_attempts")]
    pub max_merge_attempts: usize,
}

fn default_title_max_chars() -> usize {
    50
}

fn default_max_merge_attempts() -> usize {
    8
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            title_max_chars: default_title_max_chars(),
            max_merge_attempts: default_max_merge_attempts(),
        }
    }
}

/// Storage configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Explicit SQLite database path; the user data directory is used when unset
    #[serde(default)]
    pub path: Option<String>,
}

/// Logging configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Emit JSON formatted log lines instead of human-readable text
    #[serde(default)]
    pub json: bool,
}

impl Config {
    /// Load configuration from file with environment and CLI overrides
    ///
    /// # Arguments
    ///
    /// * `path` - Path to configuration file
    /// * `cli` - CLI arguments for overrides
    ///
    /// # Errors
    ///
    /// Returns error if the file exists but cannot be read or parsed
    pub fn load(path: &str, cli: &crate::cli::Cli) -> Result<Self> {
        let mut config = if Path::new(path).exists() {
            Self::from_file(path)?
        } else {
            tracing::warn!("Config file not found at {}, using defaults", path);
            Self::default()
        };

        config.apply_env_vars();
        config.apply_cli_overrides(cli);

        Ok(config)
    }

    fn from_file(path: &str) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .map_err(|e| ChatError::Config(format!("Failed to read config file: {}", e)))?;
        serde_yaml::from_str(&contents)
            .map_err(|e| ChatError::Config(format!("Failed to parse config: {}", e)).into())
    }

    fn apply_env_vars(&mut self) {
        if let Ok(endpoint) = std::env::var("STREAMCHAT_ENDPOINT") {
            self.transport.endpoint = endpoint;
        }

        if let Ok(api_key) = std::env::var("STREAMCHAT_API_KEY") {
            self.transport.api_key = Some(api_key);
        }

        if let Ok(timeout) = std::env::var("STREAMCHAT_TIMEOUT_SECONDS") {
            if let Ok(value) = timeout.parse() {
                self.transport.timeout_seconds = value;
            } else {
                tracing::warn!("Invalid STREAMCHAT_TIMEOUT_SECONDS: {}", timeout);
            }
        }

        if let Ok(title_max) = std::env::var("STREAMCHAT_TITLE_MAX_CHARS") {
            if let Ok(value) = title_max.parse() {
                self.session.title_max_chars = value;
            } else {
                tracing::warn!("Invalid STREAMCHAT_TITLE_MAX_CHARS: {}", title_max);
            }
        }

        if let Ok(attempts) = std::env::var("STREAMCHAT_MAX_MERGE_ATTEMPTS") {
            if let Ok(value) = attempts.parse() {
                self.session.max_merge_attempts = value;
            } else {
                tracing::warn!("Invalid STREAMCHAT_MAX_MERGE_ATTEMPTS: {}", attempts);
            }
        }

        if let Ok(db_path) = std::env::var("STREAMCHAT_DB") {
            tracing::debug!(db_path = %db_path, "Env override: STREAMCHAT_DB");
            self.storage.path = Some(db_path);
        }
    }

    fn apply_cli_overrides(&mut self, cli: &crate::cli::Cli) {
        if cli.verbose {
            tracing::debug!("Verbose mode enabled");
        }

        if let Some(endpoint) = &cli.endpoint {
            self.transport.endpoint = endpoint.clone();
        }

        if let Some(path) = &cli.storage_path {
            self.storage.path = Some(path.clone());
        }

        if cli.json_logs {
            self.logging.json = true;
        }
    }

    /// Validate the configuration
    ///
    /// # Errors
    ///
    /// Returns error if any validation check fails
    pub fn validate(&self) -> Result<()> {
        if self.transport.endpoint.trim().is_empty() {
            return Err(ChatError::Config("transport.endpoint cannot be empty".to_string()).into());
        }

        let endpoint = url::Url::parse(&self.transport.endpoint).map_err(|e| {
            ChatError::Config(format!(
                "Invalid transport.endpoint {}: {}",
                self.transport.endpoint, e
            ))
        })?;

        if !matches!(endpoint.scheme(), "http" | "https") {
            return Err(ChatError::Config(format!(
                "transport.endpoint must use http or https, got {}",
                endpoint.scheme()
            ))
            .into());
        }

        if self.transport.timeout_seconds == 0 {
            return Err(ChatError::Config(
                "transport.timeout_seconds must be greater than 0".to_string(),
            )
            .into());
        }

        if self.session.title_max_chars == 0 {
            return Err(ChatError::Config(
                "session.title_max_chars must be greater than 0".to_string(),
            )
            .into());
        }

        if self.session.max_merge_attempts == 0 {
            return Err(ChatError::Config(
                "session.max_merge_attempts must be greater than 0".to_string(),
            )
            .into());
        }

        Ok(())
    }
}
