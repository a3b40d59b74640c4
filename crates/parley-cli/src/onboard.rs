//! `parley onboard` — initialize configuration and data directories.
//!
//! - Creates `~/.parley/config.json` with defaults plus one example provider
//! - Creates the conversations and history directories

use std::path::Path;

use anyhow::{Context, Result};
use colored::Colorize;

use parley_core::config::schema::{ProviderConfig, ProviderKind};
use parley_core::config::{get_config_path, load_config, save_config};
use parley_core::utils::{get_conversations_path, get_data_path};

/// Run the onboard command.
pub fn run() -> Result<()> {
    println!();
    println!("{}", "Parley — Setup".cyan().bold());
    println!();

    let config_path = get_config_path();
    write_default_config(&config_path)?;

    let conversations = get_conversations_path();
    std::fs::create_dir_all(&conversations)
        .with_context(|| format!("failed to create {}", conversations.display()))?;
    println!("  {} conversations at {}", "✓".green(), conversations.display());

    let history = get_data_path().join("history");
    std::fs::create_dir_all(&history)
        .with_context(|| format!("failed to create {}", history.display()))?;

    println!();
    println!(
        "{}",
        "  Setup complete! Add an API key to the provider entry, then run `parley chat`.".green()
    );
    println!();

    Ok(())
}

/// Write the default config unless one already exists. Returns whether a
/// file was written.
fn write_default_config(path: &Path) -> Result<bool> {
    if path.exists() {
        println!("  {} config already exists at {}", "✓".green(), path.display());
        return Ok(false);
    }

    let mut config = load_config(Some(path));
    if config.providers.is_empty() {
        config.providers.push(example_provider());
    }
    save_config(&config, Some(path))
        .with_context(|| format!("failed to write {}", path.display()))?;
    println!("  {} created config at {}", "✓".green(), path.display());
    Ok(true)
}

fn example_provider() -> ProviderConfig {
    ProviderConfig {
        id: "openai".into(),
        name: "OpenAI".into(),
        kind: ProviderKind::OpenAi,
        model_name: "gpt-4o-mini".into(),
        description: "Default chat provider".into(),
        ..Default::default()
    }
}

// ─────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────
