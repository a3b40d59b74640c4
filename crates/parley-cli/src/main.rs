//! Parley CLI — entry point.
//!
//! # Commands
//!
//! - `parley serve` — run the WebSocket gateway
//! - `parley chat [-m MESSAGE] [-c CONVERSATION] [--tools]` — chat from the terminal (single-shot or REPL)
//! - `parley status` — show configuration and provider status
//! - `parley onboard` — write a default config

mod helpers;
mod onboard;
mod repl;
mod serve;
mod status;

use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use futures_util::StreamExt;
use tracing::info;

use parley_chat::{ChatSession, ExchangeOptions};
use parley_core::config::{load_config, Config};
use parley_core::store::open_store;
use parley_providers::ProviderRegistry;

// ─────────────────────────────────────────────
// CLI definition
// ─────────────────────────────────────────────

/// Parley — real-time conversational gateway
#[derive(Parser)]
#[command(name = "parley", version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the WebSocket gateway
    Serve {
        /// Enable debug logging
        #[arg(long, default_value_t = false)]
        logs: bool,
    },

    /// Chat with the active provider (single-shot or interactive REPL)
    Chat {
        /// Single message (non-interactive). Omit for REPL mode.
        #[arg(short, long)]
        message: Option<String>,

        /// Continue an existing conversation
        #[arg(short, long)]
        conversation: Option<u64>,

        /// Provider id or kind to use instead of the active one
        #[arg(long)]
        provider: Option<String>,

        /// Wait for the whole reply instead of streaming it
        #[arg(long, default_value_t = false)]
        no_stream: bool,

        /// Let the model call the enabled tools
        #[arg(long, default_value_t = false)]
        tools: bool,

        /// Enable debug logging
        #[arg(long, default_value_t = false)]
        logs: bool,
    },

    /// Show configuration and provider status
    Status,

    /// Write a default configuration
    Onboard,
}

// ─────────────────────────────────────────────
// Entrypoint
// ─────────────────────────────────────────────

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Serve { logs } => {
            init_logging(logs);
            serve::run().await
        }
        Commands::Chat {
            message,
            conversation,
            provider,
            no_stream,
            tools,
            logs,
        } => {
            init_logging(logs);
            let options = ChatOptions {
                conversation,
                provider,
                stream: !no_stream,
                use_tools: tools,
            };
            run_chat(message, options).await
        }
        Commands::Status => status::run(),
        Commands::Onboard => onboard::run(),
    }
}

// ─────────────────────────────────────────────
// Chat command
// ─────────────────────────────────────────────

/// Per-invocation chat settings shared by single-shot and REPL mode.
#[derive(Clone, Debug, Default)]
pub struct ChatOptions {
    pub conversation: Option<u64>,
    /// Provider id or kind; `None` uses the active one.
    pub provider: Option<String>,
    pub stream: bool,
    pub use_tools: bool,
}

impl ChatOptions {
    fn exchange(&self) -> ExchangeOptions<'_> {
        ExchangeOptions {
            conversation_id: self.conversation,
            system_prompt: None,
            provider_id: self.provider.as_deref(),
            use_tools: self.use_tools,
        }
    }
}

async fn run_chat(message: Option<String>, options: ChatOptions) -> Result<()> {
    let config = load_config(None);
    let session = build_session(&config, options.provider.as_deref()).await?;

    match message {
        Some(msg) => {
            let summary = session.provider().await;
            info!(provider = %summary.id, tools = options.use_tools, "processing single message");
            exchange(&session, &msg, &options).await?;
        }
        None => {
            repl::run(session, options).await?;
        }
    }

    Ok(())
}

/// Build a chat session from the loaded configuration, bound to `provider`
/// (or the active provider).
pub async fn build_session(config: &Config, provider: Option<&str>) -> Result<ChatSession> {
    let registry = ProviderRegistry::new(config.providers.clone())
        .context("invalid provider configuration")?;
    let store = open_store(&config.storage)
        .await
        .context("failed to open conversation store")?;

    let bound = registry
        .bind(provider)
        .context("failed to start chat session")?;
    let model = bound
        .strategy
        .create_model(&bound.config)
        .context("failed to start chat session")?;
    Ok(ChatSession::with_binding(
        Arc::new(registry),
        store,
        &config.chat,
        bound,
        model,
    ))
}

/// Run one exchange and print the reply. Returns the conversation id.
pub async fn exchange(session: &ChatSession, text: &str, options: &ChatOptions) -> Result<u64> {
    if !options.stream {
        let reply = session
            .send_message(text, options.exchange())
            .await
            .context("chat exchange failed")?;
        helpers::print_reply(&reply.reply, Some(&reply.usage));
        return Ok(reply.conversation_id);
    }

    let mut reply = session
        .stream_message(text, options.exchange())
        .await
        .context("chat exchange failed")?;
    helpers::print_reply_header();
    while let Some(fragment) = reply.fragments.next().await {
        helpers::print_fragment(&fragment);
    }
    helpers::finish_reply();
    Ok(reply.conversation_id)
}

/// Initialize tracing/logging.
fn init_logging(verbose: bool) {
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        if verbose {
            EnvFilter::new("parley=debug,info")
        } else {
            EnvFilter::new("warn")
        }
    });

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .compact()
        .init();
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_chat_flags() {
        let cli = Cli::parse_from([
            "parley", "chat", "-m", "hi", "-c", "7", "--provider", "main", "--no-stream", "--tools",
        ]);
        match cli.command {
            Commands::Chat {
                message,
                conversation,
                provider,
                no_stream,
                tools,
                logs,
            } => {
                assert_eq!(message.as_deref(), Some("hi"));
                assert_eq!(conversation, Some(7));
                assert_eq!(provider.as_deref(), Some("main"));
                assert!(no_stream);
                assert!(tools);
                assert!(!logs);
            }
            _ => panic!("expected chat command"),
        }
    }

    #[tokio::test]
    async fn test_build_session_without_providers_fails() {
        let mut config = Config::default();
        config.storage.kind = parley_core::config::schema::StorageKind::Memory;
        let err = build_session(&config, None).await.err().unwrap();
        assert!(format!("{err:#}").contains("No active provider configured"));
    }

    #[test]
    fn test_chat_options_to_exchange() {
        let options = ChatOptions {
            conversation: Some(3),
            provider: Some("backup".into()),
            stream: true,
            use_tools: true,
        };
        let exchange = options.exchange();
        assert_eq!(exchange.conversation_id, Some(3));
        assert_eq!(exchange.provider_id, Some("backup"));
        assert!(exchange.use_tools);
        assert!(exchange.system_prompt.is_none());
    }
}
