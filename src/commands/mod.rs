/*!
Command handlers for the CLI

This module provides command handlers invoked by the CLI entrypoint.

It exposes three top-level command modules:

- `chat`    -- Interactive chat over one or more conversations
- `send`    -- Send a single message and print the reply
- `history` -- List and print stored conversations

Shared helpers build a [`ChatSession`] from configuration and render a turn
to the terminal while it streams.
*/

use std::io::Write;
use std::sync::Arc;

use colored::Colorize;
use tokio::sync::{oneshot, watch};

use crate::config::Config;
use crate::error::{chat_error, ChatError, Result};
use crate::session::{ChatSession, Message, TurnOutcome};
use crate::storage::SqliteStorage;
use crate::stream::http::HttpChatTransport;

pub mod chat;
pub mod history;
pub mod send;

/// Wire the SQLite store, its insert feed and the HTTP transport into a
/// session.
pub fn open_session(config: &Config) -> Result<(Arc<SqliteStorage>, ChatSession)> {
    let storage = Arc::new(SqliteStorage::open(config.storage.path.as_deref())?);
    tracing::debug!(db = %storage.db_path().display(), "Opened conversation store");

    let transport = Arc::new(HttpChatTransport::from_config(&config.transport)?);
    let feed = Arc::new(storage.feed());
    let session = ChatSession::new(storage.clone(), transport, feed, config.session.clone());

    Ok((storage, session))
}

/// Resolve a full id or unique prefix and make it the active conversation.
pub async fn open_conversation(
    storage: &SqliteStorage,
    session: &ChatSession,
    id_or_prefix: &str,
) -> Result<String> {
    let id = storage
        .resolve_conversation_id(id_or_prefix)?
        .ok_or_else(|| ChatError::ConversationNotFound(id_or_prefix.to_string()))?;
    session.select_conversation(&id).await?;
    Ok(id)
}

/// Print reply text as the placeholder grows. Returns how many bytes of the
/// reply were printed.
async fn echo_reply(
    mut view: watch::Receiver<Vec<Message>>,
    mut stop: oneshot::Receiver<()>,
) -> usize {
    // A placeholder left behind by an earlier failed turn is not ours.
    let stale = view
        .borrow_and_update()
        .iter()
        .rev()
        .find_map(|m| m.local_id().cloned());

    let mut printed = 0usize;
    loop {
        tokio::select! {
            changed = view.changed() => {
                if changed.is_err() {
                    break;
                }
                let pending = view
                    .borrow_and_update()
                    .last()
                    .filter(|m| m.is_pending() && m.local_id() != stale.as_ref())
                    .map(|m| m.content.clone());
                if let Some(content) = pending {
                    if content.len() > printed && content.is_char_boundary(printed) {
                        print!("{}", &content[printed..]);
                        let _ = std::io::stdout().flush();
                        printed = content.len();
                    }
                }
            }
            _ = &mut stop => break,
        }
    }
    printed
}

/// Run one turn, echoing the reply as it streams.
///
/// Typed failures are printed as notices and swallowed so interactive
/// callers can keep going; untyped errors propagate.
pub async fn send_and_render(session: &ChatSession, text: &str) -> Result<Option<TurnOutcome>> {
    let echo = match session.messages().await {
        Some(view) => {
            let (stop_tx, stop_rx) = oneshot::channel();
            Some((stop_tx, tokio::spawn(echo_reply(view, stop_rx))))
        }
        None => None,
    };

    let result = session.send_message(text).await;

    let printed = match echo {
        Some((stop_tx, join)) => {
            let _ = stop_tx.send(());
            join.await.unwrap_or(0)
        }
        None => 0,
    };

    match result {
        Ok(TurnOutcome::Completed { user, assistant }) => {
            if let Some(rest) = assistant.content.get(printed..) {
                print!("{}", rest);
            }
            println!();
            Ok(Some(TurnOutcome::Completed { user, assistant }))
        }
        Ok(outcome @ TurnOutcome::ConversationCreated { .. }) => Ok(Some(outcome)),
        Err(e) => {
            if printed > 0 {
                println!();
            }
            match chat_error(&e) {
                Some(err) => {
                    print_notice(err);
                    Ok(None)
                }
                None => Err(e),
            }
        }
    }
}

/// Print a typed failure as a one-line notice.
pub fn print_notice(err: &ChatError) {
    let description = match err {
        ChatError::RateLimited(d)
        | ChatError::QuotaExceeded(d)
        | ChatError::TransportFailure(d)
        | ChatError::PersistenceFailure(d) => d.clone(),
        other => other.to_string(),
    };
    let title = format!("[{}]", err.notice_title());

    if err.is_user_actionable() {
        eprintln!("{} {}", title.yellow().bold(), description.yellow());
    } else {
        eprintln!("{} {}", title.red().bold(), description.red());
    }
}
