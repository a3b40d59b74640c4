//! Config loader — reads `~/.parley/config.json`, merges env vars, and
//! applies legacy migrations.
//!
//! # Loading precedence
//! 1. Defaults (from `Config::default()`)
//! 2. JSON file at `~/.parley/config.json`
//! 3. Environment variables `PARLEY_<SECTION>__<FIELD>` (override JSON)

use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use super::schema::{Config, ProviderConfig};

/// Default config file path.
pub fn get_config_path() -> PathBuf {
    crate::utils::get_data_path().join("config.json")
}

/// Load configuration from the default path + env vars.
///
/// Falls back to `Config::default()` if the file doesn't exist or can't be parsed.
pub fn load_config(path: Option<&Path>) -> Config {
    let config_path = path.map(PathBuf::from).unwrap_or_else(get_config_path);

    load_config_from_path(&config_path)
}

/// Load config from a specific file path.
fn load_config_from_path(path: &Path) -> Config {
    if !path.exists() {
        info!("No config file found at {}, using defaults", path.display());
        return apply_env_overrides(Config::default());
    }

    debug!("Loading config from {}", path.display());

    let content = match std::fs::read_to_string(path) {
        Ok(c) => c,
        Err(e) => {
            warn!("Failed to read config file {}: {}", path.display(), e);
            return apply_env_overrides(Config::default());
        }
    };

    // Parse JSON → Value first for migration
    let mut raw: serde_json::Value = match serde_json::from_str(&content) {
        Ok(v) => v,
        Err(e) => {
            warn!("Failed to parse config JSON: {}", e);
            return apply_env_overrides(Config::default());
        }
    };

    migrate_config(&mut raw);

    let config: Config = match serde_json::from_value(raw) {
        Ok(c) => c,
        Err(e) => {
            warn!("Failed to deserialize config: {}", e);
            return apply_env_overrides(Config::default());
        }
    };

    apply_env_overrides(config)
}

/// Save configuration to disk (pretty-printed JSON with camelCase keys).
pub fn save_config(config: &Config, path: Option<&Path>) -> std::io::Result<()> {
    let config_path = path.map(PathBuf::from).unwrap_or_else(get_config_path);

    if let Some(parent) = config_path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let json = serde_json::to_string_pretty(config).map_err(std::io::Error::other)?;

    std::fs::write(&config_path, json)?;
    debug!("Config saved to {}", config_path.display());
    Ok(())
}

/// Apply legacy config migrations.
///
/// Moves a top-level single `provider` object into the `providers` array.
fn migrate_config(raw: &mut serde_json::Value) {
    let Some(obj) = raw.as_object_mut() else {
        return;
    };
    let Some(legacy) = obj.remove("provider") else {
        return;
    };
    if !legacy.is_object() {
        warn!("Ignoring legacy 'provider' entry that is not an object");
        return;
    }

    let providers = obj
        .entry("providers")
        .or_insert_with(|| serde_json::Value::Array(Vec::new()));
    match providers.as_array_mut() {
        Some(list) => {
            let legacy_id = legacy.get("id").cloned();
            let duplicate = legacy_id.is_some()
                && list.iter().any(|p| p.get("id") == legacy_id.as_ref());
            if !duplicate {
                list.push(legacy);
                debug!("Migrated provider → providers[]");
            }
        }
        None => warn!("'providers' is not an array; legacy 'provider' entry dropped"),
    }
}

/// Apply environment variable overrides on top of a loaded config.
///
/// Env var format: `PARLEY_<SECTION>__<FIELD>` (double underscore as delimiter).
///
/// Supported overrides:
/// - `PARLEY_GATEWAY__HOST` → `gateway.host`
/// - `PARLEY_GATEWAY__PORT` → `gateway.port`
/// - `PARLEY_VOICE__API_KEY` → `voice.api_key` (else `DEEPGRAM_API_KEY` when unset)
/// - `PARLEY_CHAT__DEFAULT_SYSTEM_PROMPT` → `chat.default_system_prompt`
/// - `PARLEY_PROVIDERS__<ID>__API_KEY` → `providers[id].api_key`
/// - `PARLEY_PROVIDERS__<ID>__API_BASE` → `providers[id].extra_settings.api_base`
fn apply_env_overrides(mut config: Config) -> Config {
    // Gateway
    if let Ok(val) = std::env::var("PARLEY_GATEWAY__HOST") {
        config.gateway.host = val;
    }
    if let Ok(val) = std::env::var("PARLEY_GATEWAY__PORT") {
        if let Ok(p) = val.parse::<u16>() {
            config.gateway.port = p;
        }
    }

    // Voice
    if let Ok(val) = std::env::var("PARLEY_VOICE__API_KEY") {
        config.voice.api_key = val;
    } else if config.voice.api_key.is_empty() {
        if let Ok(val) = std::env::var("DEEPGRAM_API_KEY") {
            config.voice.api_key = val;
        }
    }

    // Chat
    if let Ok(val) = std::env::var("PARLEY_CHAT__DEFAULT_SYSTEM_PROMPT") {
        config.chat.default_system_prompt = val;
    }

    // Providers (by id)
    for provider in &mut config.providers {
        apply_provider_env(provider);
    }

    config
}

/// Env var key segment for a provider id (`"azure-east"` → `"AZURE_EAST"`).
fn env_key(id: &str) -> String {
    id.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() {
                c.to_ascii_uppercase()
            } else {
                '_'
            }
        })
        .collect()
}

/// Apply env var overrides for a single provider.
fn apply_provider_env(provider: &mut ProviderConfig) {
    let name = env_key(&provider.id);
    if let Ok(val) = std::env::var(format!("PARLEY_PROVIDERS__{name}__API_KEY")) {
        provider.api_key = val;
    }
    if let Ok(val) = std::env::var(format!("PARLEY_PROVIDERS__{name}__API_BASE")) {
        provider
            .extra_settings
            .insert("api_base".into(), serde_json::Value::String(val));
    }
}

// ─────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────
