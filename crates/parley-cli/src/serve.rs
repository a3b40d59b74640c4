//! Serve command — runs the WebSocket gateway until Ctrl+C.
//!
//! Startup sequence:
//! 1. Load config
//! 2. Build the gateway context (provider registry, store, speech backends)
//! 3. Bind the listener
//! 4. Accept clients; Ctrl+C cancels the shutdown token and every connection
//!    tears down

use std::sync::Arc;

use anyhow::{Context, Result};
use colored::Colorize;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::info;

use parley_core::config::load_config;
use parley_gateway::{serve, GatewayContext};

use crate::helpers;

/// Run the gateway.
pub async fn run() -> Result<()> {
    helpers::print_banner();
    println!("  Mode: Gateway");
    println!();

    let config = load_config(None);
    let ctx = GatewayContext::from_config(&config)
        .await
        .context("failed to initialize gateway")?;

    let addr = format!("{}:{}", config.gateway.host, config.gateway.port);
    let listener = TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;

    match ctx.registry.active() {
        Some(active) => println!("  Provider:  {} ({})", active.name, active.model_name),
        None => println!("  Provider:  {}", "none active".yellow()),
    }
    println!(
        "  Speech:    transcription {} | synthesis {}",
        on_off(ctx.voice.transcription.is_some()),
        on_off(ctx.voice.synthesis.is_some()),
    );
    println!("  Listening: ws://{addr}");
    println!();
    println!("  Ctrl+C to stop");
    println!();

    let shutdown = CancellationToken::new();
    {
        let shutdown = shutdown.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                println!();
                println!("  Shutting down...");
                info!("received Ctrl+C, shutting down");
            }
            shutdown.cancel();
        });
    }

    serve(listener, Arc::new(ctx), shutdown).await?;

    println!("  Gateway stopped. Goodbye!");
    Ok(())
}

fn on_off(enabled: bool) -> String {
    if enabled {
        "on".green().to_string()
    } else {
        "off".dimmed().to_string()
    }
}
