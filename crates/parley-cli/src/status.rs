//! `parley status` — show configuration and provider status.

use anyhow::Result;
use colored::Colorize;

use parley_core::config::schema::{Config, StorageKind};
use parley_core::config::{get_config_path, load_config};
use parley_core::utils::{expand_home, get_conversations_path, mask_secret};
use parley_providers::ProviderRegistry;

/// Run the status command.
pub fn run() -> Result<()> {
    let config = load_config(None);
    let config_path = get_config_path();

    println!();
    println!("{}", "Parley Status".cyan().bold());
    println!();

    println!(
        "  {:<18} {} {}",
        "Config:".bold(),
        config_path.display(),
        if config_path.exists() {
            "✓".green().to_string()
        } else {
            "(not found)".red().to_string()
        }
    );
    println!(
        "  {:<18} ws://{}:{}",
        "Gateway:".bold(),
        config.gateway.host,
        config.gateway.port
    );
    println!("  {:<18} {}", "Storage:".bold(), storage_line(&config));
    println!("  {:<18} {}", "Tools:".bold(), tools_line(&config));

    // Providers
    println!();
    println!("  {}", "Providers:".bold());
    if config.providers.is_empty() {
        println!("    {}", "· none configured".dimmed());
    }
    let active = active_id(&config);
    for provider in &config.providers {
        let marker = if Some(provider.id.as_str()) == active.as_deref() {
            "●".green().to_string()
        } else if provider.is_active {
            "○".to_string()
        } else {
            "·".dimmed().to_string()
        };
        let key = if provider.is_configured() {
            mask_secret(&provider.api_key)
        } else {
            "(no key)".red().to_string()
        };
        let problem = match provider.validate() {
            Ok(()) => String::new(),
            Err(e) => format!("  {}", e.to_string().red()),
        };
        println!(
            "    {} {:<16} {:<14} {:<24} {}{}",
            marker,
            provider.id,
            provider.kind.as_str(),
            provider.model_name,
            key,
            problem
        );
    }

    // Speech
    println!();
    let voice = &config.voice;
    let key = if voice.api_key.is_empty() {
        "(no key)".red().to_string()
    } else {
        mask_secret(&voice.api_key)
    };
    println!("  {:<18} {}", "Speech key:".bold(), key);
    println!(
        "  {:<18} {} {}",
        "Transcription:".bold(),
        enabled(voice.transcription.enabled),
        voice.transcription.url.dimmed()
    );
    println!(
        "  {:<18} {} {} → {:?}",
        "Synthesis:".bold(),
        enabled(voice.synthesis.enabled),
        voice.synthesis.model.dimmed(),
        voice.synthesis.output
    );

    println!();

    Ok(())
}

/// Id of the provider exchanges would run against, if the config is valid.
fn active_id(config: &Config) -> Option<String> {
    let registry = ProviderRegistry::new(config.providers.clone()).ok()?;
    registry.active().map(|p| p.id.clone())
}

fn storage_line(config: &Config) -> String {
    match config.storage.kind {
        StorageKind::Memory => "memory".to_string(),
        StorageKind::Jsonl => {
            let dir = if config.storage.dir.is_empty() {
                get_conversations_path()
            } else {
                expand_home(&config.storage.dir)
            };
            format!("jsonl ({})", dir.display())
        }
    }
}

fn tools_line(config: &Config) -> String {
    let tools = &config.chat.tools;
    if tools.enabled.is_empty() {
        return "none".dimmed().to_string();
    }
    format!(
        "{} {}",
        tools.enabled.join(", "),
        format!("(max {} rounds, on request)", tools.max_iterations).dimmed()
    )
}

fn enabled(on: bool) -> String {
    if on {
        "✓ enabled".green().to_string()
    } else {
        "· disabled".dimmed().to_string()
    }
}
