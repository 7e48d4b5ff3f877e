//! StreamChat - streaming chat client CLI
//!
#![doc = "StreamChat - streaming chat client CLI"]
#![doc = "Main entry point for the StreamChat application."]

use anyhow::Result;

use tracing_subscriber::{layer::SubscriberExt, EnvFilter};

use streamchat::cli::{Cli, Commands};
use streamchat::commands;
use streamchat::config::Config;

#[tokio::main]
async fn main() -> Result<()> {
    // Parse command line arguments
    let cli = Cli::parse_args();

    // Load configuration, logging with the CLI-requested format until the
    // file's logging section is known
    let config_path = cli.config.as_deref().unwrap_or("config/config.yaml");
    let config = tracing::subscriber::with_default(
        log_subscriber(cli.verbose, cli.json_logs),
        || Config::load(config_path, &cli),
    )?;

    init_tracing(cli.verbose, config.logging.json)?;

    // Validate configuration
    config.validate()?;

    // Execute command
    match cli.command {
        Commands::Chat { conversation } => {
            if let Some(c) = &conversation {
                tracing::debug!("Opening conversation: {}", c);
            }
            commands::chat::run_chat(config, conversation).await?;
            Ok(())
        }
        Commands::Send {
            conversation,
            message,
        } => {
            tracing::info!("Starting one-shot send");
            commands::send::run_send(config, conversation, message).await?;
            Ok(())
        }
        Commands::History { command } => {
            tracing::info!("Starting history command");
            commands::history::handle_history(&config, command)?;
            Ok(())
        }
    }
}

/// Initialize the global tracing subscriber
fn init_tracing(verbose: bool, json: bool) -> Result<()> {
    tracing::subscriber::set_global_default(log_subscriber(verbose, json))?;
    Ok(())
}

/// Build a subscriber with the environment filter
///
/// Logs go to stderr so streamed replies on stdout stay clean.
fn log_subscriber(verbose: bool, json: bool) -> Box<dyn tracing::Subscriber + Send + Sync> {
    let default_directive = if verbose {
        "streamchat=debug"
    } else {
        "streamchat=info"
    };
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_directive));

    let registry = tracing_subscriber::registry().with(env_filter);
    if json {
        Box::new(
            registry.with(
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_writer(std::io::stderr),
            ),
        )
    } else {
        Box::new(registry.with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr)))
    }
}
