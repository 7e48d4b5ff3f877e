//! One-shot send: post a single message and print the streamed reply.

use colored::Colorize;

use super::{open_conversation, open_session, send_and_render};
use crate::config::Config;
use crate::error::Result;
use crate::session::TurnOutcome;

/// Send `message` into `conversation` (or a fresh conversation) and print
/// the reply.
///
/// # Errors
///
/// Fails when the conversation cannot be found or the turn does not
/// complete.
pub async fn run_send(config: Config, conversation: Option<String>, message: String) -> Result<()> {
    let (storage, session) = open_session(&config)?;

    let conversation_id = match conversation.as_deref() {
        Some(id) => open_conversation(&storage, &session, id).await?,
        None => session.create_conversation().await?.id,
    };
    tracing::info!(conversation_id = %conversation_id, "Sending one-shot message");

    let outcome = send_and_render(&session, &message).await?;
    session.close().await;

    match outcome {
        Some(TurnOutcome::Completed { .. }) => {
            eprintln!("{} {}", "conversation:".dimmed(), conversation_id.cyan());
            Ok(())
        }
        // The conversation was opened above, so only a failed turn lands here.
        _ => anyhow::bail!("Message was not answered"),
    }
}
