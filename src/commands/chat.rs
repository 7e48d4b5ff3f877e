//! Interactive chat mode handler.
//!
//! Opens the store and transport, selects a conversation and runs a
//! readline loop. Plain lines are sent as messages; lines starting with `/`
//! are session commands.

use colored::Colorize;
use rustyline::error::ReadlineError;
use rustyline::DefaultEditor;

use super::{open_conversation, open_session, print_notice, send_and_render};
use crate::config::Config;
use crate::error::{chat_error, Result};
use crate::session::{ChatSession, TurnOutcome};
use crate::storage::SqliteStorage;

/// Session command entered at the prompt
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChatCommand {
    /// Start a new conversation
    New,
    /// List conversations
    List,
    /// Switch to a conversation by id or prefix
    Switch(String),
    /// Print the current conversation
    Show,
    Help,
    Exit,
    /// A `/word` that is not a command
    Unknown(String),
    /// Plain text to send
    Message(String),
}

/// Parse one input line.
pub fn parse_chat_command(line: &str) -> ChatCommand {
    let trimmed = line.trim();
    let Some(rest) = trimmed.strip_prefix('/') else {
        return ChatCommand::Message(trimmed.to_string());
    };

    let mut parts = rest.splitn(2, char::is_whitespace);
    let name = parts.next().unwrap_or_default().to_lowercase();
    let arg = parts.next().map(str::trim).unwrap_or_default();

    match name.as_str() {
        "new" => ChatCommand::New,
        "list" | "ls" => ChatCommand::List,
        "switch" | "open" if !arg.is_empty() => ChatCommand::Switch(arg.to_string()),
        "show" => ChatCommand::Show,
        "help" | "?" => ChatCommand::Help,
        "exit" | "quit" | "q" => ChatCommand::Exit,
        _ => ChatCommand::Unknown(trimmed.to_string()),
    }
}

fn print_help() {
    println!("{}", "Commands:".bold());
    println!("  {}        start a new conversation", "/new".cyan());
    println!("  {}       list conversations", "/list".cyan());
    println!("  {}  switch conversation", "/switch <id>".cyan());
    println!("  {}       print the current conversation", "/show".cyan());
    println!("  {}       show this help", "/help".cyan());
    println!("  {}       leave", "/exit".cyan());
    println!();
}

async fn print_conversations(session: &ChatSession) -> Result<()> {
    let list = session.refresh_conversations().await?;
    let active = session.active_conversation_id().await;
    for conversation in list {
        let marker = if Some(&conversation.id) == active.as_ref() {
            "*".green().bold()
        } else {
            " ".normal()
        };
        println!(
            "{} {}  {}",
            marker,
            conversation.id.cyan(),
            conversation.title
        );
    }
    println!();
    Ok(())
}

async fn print_current(session: &ChatSession) -> Result<()> {
    for message in session.snapshot().await? {
        let who = if message.is_pending() {
            "assistant (unsaved)".yellow().bold()
        } else {
            message.role.to_string().blue().bold()
        };
        println!("{}: {}", who, message.content);
    }
    println!();
    Ok(())
}

/// Open `conversation`, the most recent conversation, or a new one.
async fn open_initial(
    storage: &SqliteStorage,
    session: &ChatSession,
    conversation: Option<&str>,
) -> Result<()> {
    match conversation {
        Some(id) => {
            open_conversation(storage, session, id).await?;
        }
        None => {
            session.refresh_conversations().await?;
            if session.active_conversation_id().await.is_none() {
                session.create_conversation().await?;
            }
        }
    }
    Ok(())
}

/// Start interactive chat mode
///
/// # Examples
///
/// ```no_run
/// use streamchat::commands::chat;
/// use streamchat::config::Config;
///
/// # async fn demo() -> anyhow::Result<()> {
/// chat::run_chat(Config::default(), None).await?;
/// # Ok(())
/// # }
/// ```
pub async fn run_chat(config: Config, conversation: Option<String>) -> Result<()> {
    tracing::info!("Starting interactive chat mode");

    let (storage, session) = open_session(&config)?;
    open_initial(&storage, &session, conversation.as_deref()).await?;

    let mut rl = DefaultEditor::new()?;

    println!("{}", "StreamChat".bold());
    println!("Type {} for commands.\n", "/help".cyan());

    loop {
        let active = session.active_conversation_id().await;
        let title = session
            .conversations()
            .borrow()
            .iter()
            .find(|c| Some(&c.id) == active.as_ref())
            .map(|c| c.title.clone())
            .unwrap_or_default();
        let prompt = format!("{} > ", title.dimmed());

        let line = match rl.readline(&prompt) {
            Ok(line) => line,
            Err(ReadlineError::Interrupted) | Err(ReadlineError::Eof) => break,
            Err(e) => {
                tracing::error!(error = %e, "Readline error");
                break;
            }
        };
        if line.trim().is_empty() {
            continue;
        }
        rl.add_history_entry(line.trim())?;

        let result = match parse_chat_command(&line) {
            ChatCommand::Exit => break,
            ChatCommand::Help => {
                print_help();
                Ok(())
            }
            ChatCommand::New => session.create_conversation().await.map(|c| {
                println!("{} {}\n", "Started".green(), c.id.cyan());
            }),
            ChatCommand::List => print_conversations(&session).await,
            ChatCommand::Switch(id) => open_conversation(&storage, &session, &id)
                .await
                .map(|id| println!("{} {}\n", "Switched to".green(), id.cyan())),
            ChatCommand::Show => print_current(&session).await,
            ChatCommand::Unknown(input) => {
                println!("{} {}\n", "Unknown command:".yellow(), input);
                Ok(())
            }
            ChatCommand::Message(text) => match send_and_render(&session, &text).await {
                Ok(Some(TurnOutcome::ConversationCreated { conversation_id })) => {
                    println!(
                        "{} {}, send your message again.\n",
                        "Started".green(),
                        conversation_id.cyan()
                    );
                    Ok(())
                }
                Ok(_) => {
                    println!();
                    Ok(())
                }
                Err(e) => Err(e),
            },
        };

        if let Err(e) = result {
            match chat_error(&e) {
                Some(err) => print_notice(err),
                None => eprintln!("{} {:#}", "Error:".red().bold(), e),
            }
        }
    }

    session.close().await;
    println!("Goodbye.");
    Ok(())
}
