//! Command-line interface definition for StreamChat
//!
//! This module defines the CLI structure using clap's derive API,
//! providing commands for interactive chat, one-shot sends and history.

use clap::{Parser, Subcommand};

/// StreamChat - streaming chat client with persisted conversations
#[derive(Parser, Debug, Clone)]
#[command(name = "streamchat")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Path to configuration file
    #[arg(short, long, default_value = "config/config.yaml")]
    pub config: Option<String>,

    /// Enable verbose logging
    #[arg(short, long)]
    pub verbose: bool,

    /// Override the conversation database path
    #[arg(long, env = "STREAMCHAT_DB")]
    pub storage_path: Option<String>,

    /// Override the streaming chat endpoint
    #[arg(long)]
    pub endpoint: Option<String>,

    /// Emit JSON formatted logs
    #[arg(long)]
    pub json_logs: bool,

    /// Command to execute
    #[command(subcommand)]
    pub command: Commands,
}

/// Available commands for StreamChat
#[derive(Subcommand, Debug, Clone)]
pub enum Commands {
    /// Start an interactive chat session
    Chat {
        /// Conversation to open (defaults to the most recently updated one)
        #[arg(long)]
        conversation: Option<String>,
    },

    /// Send a single message and print the streamed reply
    Send {
        /// Conversation to send into (a new one is created when omitted)
        #[arg(long)]
        conversation: Option<String>,

        /// Message text
        message: String,
    },

    /// Inspect stored conversations
    History {
        /// History subcommand
        #[command(subcommand)]
        command: HistoryCommand,
    },
}

/// History subcommands
#[derive(Subcommand, Debug, Clone)]
pub enum HistoryCommand {
    /// List conversations, most recently updated first
    List,

    /// Print every message of one conversation
    Show {
        /// Conversation identifier
        id: String,
    },
}

impl Cli {
    /// Parse command line arguments
    pub fn parse_args() -> Self {
        Self::parse()
    }
}
