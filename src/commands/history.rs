use crate::cli::HistoryCommand;
use crate::config::Config;
use crate::error::{ChatError, Result};
use crate::session::Role;
use crate::storage::SqliteStorage;
use colored::Colorize;
use prettytable::{format, Table};

/// Shorten `title` to at most `max` characters, marking the cut.
fn shorten(title: &str, max: usize) -> String {
    if title.chars().count() > max {
        let kept: String = title.chars().take(max.saturating_sub(3)).collect();
        format!("{}...", kept)
    } else {
        title.to_string()
    }
}

/// Handle history commands
pub fn handle_history(config: &Config, command: HistoryCommand) -> Result<()> {
    let storage = SqliteStorage::open(config.storage.path.as_deref())?;

    match command {
        HistoryCommand::List => {
            let summaries = storage.conversation_summaries()?;

            if summaries.is_empty() {
                println!("{}", "No conversations found.".yellow());
                return Ok(());
            }

            let mut table = Table::new();
            table.set_format(*format::consts::FORMAT_BORDERS_ONLY);

            table.add_row(prettytable::row![
                "ID".bold(),
                "Title".bold(),
                "Messages".bold(),
                "Last Updated".bold()
            ]);

            for summary in summaries {
                let id_short: String = summary.id.chars().take(10).collect();
                let updated = summary.updated_at.format("%Y-%m-%d %H:%M").to_string();

                table.add_row(prettytable::row![
                    id_short.cyan(),
                    shorten(&summary.title, 40),
                    summary.message_count,
                    updated
                ]);
            }

            println!("\nConversations:");
            table.printstd();
            println!();
            println!(
                "Use {} to continue one.",
                "streamchat chat --conversation <ID>".cyan()
            );
            println!();
        }
        HistoryCommand::Show { id } => {
            let resolved = storage
                .resolve_conversation_id(&id)?
                .ok_or_else(|| ChatError::ConversationNotFound(id.clone()))?;
            let conversation = storage
                .conversation(&resolved)?
                .ok_or_else(|| ChatError::ConversationNotFound(resolved.clone()))?;

            println!("\n{} {}", conversation.title.bold(), conversation.id.dimmed());
            println!();

            for message in storage.messages(&resolved)? {
                let who = match message.role {
                    Role::User => "you".green().bold(),
                    Role::Assistant => "assistant".blue().bold(),
                };
                let when = message
                    .created_at()
                    .map(|t| t.format("%H:%M:%S").to_string())
                    .unwrap_or_default();
                println!("{} {}", who, when.dimmed());
                println!("{}\n", message.content);
            }
        }
    }

    Ok(())
}
