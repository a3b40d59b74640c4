//! Configuration schema.
//!
//! Hierarchy: `Config` → `providers[]`, `ChatConfig`, `VoiceConfig`,
//! `GatewayConfig`, `StorageConfig`.
//!
//! JSON on disk uses **camelCase** keys; Rust uses snake_case.
//! We use `#[serde(rename_all = "camelCase")]` to handle the conversion.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

use crate::error::GatewayError;

// ─────────────────────────────────────────────
// Root Config
// ─────────────────────────────────────────────

/// Root configuration — loaded from `~/.parley/config.json` + env vars.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Config {
    pub providers: Vec<ProviderConfig>,
    pub chat: ChatConfig,
    pub voice: VoiceConfig,
    pub gateway: GatewayConfig,
    pub storage: StorageConfig,
}

impl Config {
    /// Look up a provider entry by its identifier.
    pub fn provider(&self, id: &str) -> Option<&ProviderConfig> {
        self.providers.iter().find(|p| p.id == id)
    }
}

// ─────────────────────────────────────────────
// Providers
// ─────────────────────────────────────────────

/// The vendor family a provider entry speaks to.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ProviderKind {
    #[default]
    #[serde(rename = "openai")]
    OpenAi,
    #[serde(rename = "anthropic")]
    Anthropic,
    #[serde(rename = "cohere")]
    Cohere,
    #[serde(rename = "huggingface")]
    HuggingFace,
    #[serde(rename = "azure_openai")]
    AzureOpenAi,
    #[serde(rename = "google")]
    Google,
}

impl ProviderKind {
    /// All supported vendor kinds.
    pub const ALL: [ProviderKind; 6] = [
        ProviderKind::OpenAi,
        ProviderKind::Anthropic,
        ProviderKind::Cohere,
        ProviderKind::HuggingFace,
        ProviderKind::AzureOpenAi,
        ProviderKind::Google,
    ];

    /// The identifier used in config files and client requests.
    pub fn as_str(&self) -> &'static str {
        match self {
            ProviderKind::OpenAi => "openai",
            ProviderKind::Anthropic => "anthropic",
            ProviderKind::Cohere => "cohere",
            ProviderKind::HuggingFace => "huggingface",
            ProviderKind::AzureOpenAi => "azure_openai",
            ProviderKind::Google => "google",
        }
    }

    /// Parse a kind identifier (`"openai"`, `"azure_openai"`, ...).
    pub fn parse(s: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|k| k.as_str() == s)
    }

    /// Extra settings this vendor cannot work without.
    pub fn required_settings(&self) -> &'static [&'static str] {
        match self {
            ProviderKind::AzureOpenAi | ProviderKind::HuggingFace => &["api_base"],
            _ => &[],
        }
    }
}

impl fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One configured language-model provider.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct ProviderConfig {
    /// Unique identifier, referenced by `provider_id` in client requests.
    pub id: String,
    /// Display name.
    pub name: String,
    /// Vendor family.
    pub kind: ProviderKind,
    /// Model identifier passed to the vendor (deployment name on Azure).
    pub model_name: String,
    /// API key for authentication.
    pub api_key: String,
    /// Sampling temperature.
    pub temperature: f64,
    /// Maximum tokens to generate per reply.
    pub max_tokens: u32,
    /// Nucleus sampling.
    pub top_p: f64,
    /// Vendor-specific settings (`api_base`, `api_version`, ...).
    pub extra_settings: HashMap<String, serde_json::Value>,
    /// Whether this entry may be selected.
    pub is_active: bool,
    /// Higher wins when choosing the active provider.
    pub priority: i32,
    /// Price per 1K input tokens.
    pub input_cost_per_1k: f64,
    /// Price per 1K output tokens.
    pub output_cost_per_1k: f64,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub description: String,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            id: String::new(),
            name: String::new(),
            kind: ProviderKind::default(),
            model_name: String::new(),
            api_key: String::new(),
            temperature: 0.7,
            max_tokens: 1024,
            top_p: 1.0,
            extra_settings: HashMap::new(),
            is_active: true,
            priority: 0,
            input_cost_per_1k: 0.0,
            output_cost_per_1k: 0.0,
            description: String::new(),
        }
    }
}

impl ProviderConfig {
    /// Whether this provider has a configured API key.
    pub fn is_configured(&self) -> bool {
        !self.api_key.is_empty()
    }

    /// A string-valued extra setting, if present and non-empty.
    pub fn extra_str(&self, key: &str) -> Option<&str> {
        self.extra_settings
            .get(key)
            .and_then(|v| v.as_str())
            .filter(|s| !s.is_empty())
    }

    /// Custom API base URL, if configured.
    pub fn api_base(&self) -> Option<&str> {
        self.extra_str("api_base")
    }

    /// Check the fields every call depends on.
    ///
    /// Runs when the configuration is loaded into the provider registry, so
    /// a broken entry is rejected before any request is made.
    pub fn validate(&self) -> Result<(), GatewayError> {
        if self.id.trim().is_empty() {
            return Err(GatewayError::Configuration(
                "provider entry is missing an id".into(),
            ));
        }
        if self.model_name.trim().is_empty() {
            return Err(GatewayError::Configuration(format!(
                "provider {} is missing modelName",
                self.id
            )));
        }
        for key in self.kind.required_settings() {
            if self.extra_str(key).is_none() {
                return Err(GatewayError::Configuration(format!(
                    "{} requires '{}' in extra settings",
                    self.kind, key
                )));
            }
        }
        Ok(())
    }
}

// ─────────────────────────────────────────────
// Chat
// ─────────────────────────────────────────────

/// Conversation defaults.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ChatConfig {
    /// System prompt for new conversations when the client sends none.
    pub default_system_prompt: String,
    /// Maximum prior turns replayed to the model (0 = all).
    pub history_limit: usize,
    pub tools: ToolsConfig,
}

/// Tools offered to the model when a request sets `use_tools`.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ToolsConfig {
    /// Names of the enabled built-in tools.
    pub enabled: Vec<String>,
    /// Model round trips allowed per exchange before giving up.
    pub max_iterations: usize,
}

impl Default for ToolsConfig {
    fn default() -> Self {
        Self {
            enabled: vec!["add".into(), "get_current_time".into()],
            max_iterations: 5,
        }
    }
}

// ─────────────────────────────────────────────
// Voice
// ─────────────────────────────────────────────

/// Speech backends (Deepgram-compatible listen/speak sockets).
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct VoiceConfig {
    /// API key for the speech backend.
    /// Falls back to DEEPGRAM_API_KEY env var if empty.
    pub api_key: String,
    pub transcription: TranscriptionConfig,
    pub synthesis: SynthesisConfig,
}

/// Live transcription socket settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TranscriptionConfig {
    pub enabled: bool,
    /// Listen endpoint, without query string.
    pub url: String,
    /// Model name; omitted from the query when empty.
    pub model: String,
    pub encoding: String,
    pub sample_rate: u32,
    /// Language hint; omitted from the query when empty.
    pub language: String,
}

impl Default for TranscriptionConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            url: "wss://api.deepgram.com/v1/listen".into(),
            model: String::new(),
            encoding: "linear16".into(),
            sample_rate: 16000,
            language: String::new(),
        }
    }
}

/// Where synthesized audio goes.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AudioOutputKind {
    /// Forward to the connected client as binary frames.
    #[default]
    Client,
    /// Append raw PCM to `outputPath`.
    File,
    /// Discard.
    None,
}

/// Text-to-speech socket settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SynthesisConfig {
    pub enabled: bool,
    /// Speak endpoint, without query string.
    pub url: String,
    pub model: String,
    pub encoding: String,
    pub sample_rate: u32,
    pub output: AudioOutputKind,
    /// Target file when `output` is `file`.
    pub output_path: String,
    /// Capacity of the playback queue, in audio frames.
    pub playback_queue: usize,
}

impl Default for SynthesisConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            url: "wss://api.deepgram.com/v1/speak".into(),
            model: "aura-2-thalia-en".into(),
            encoding: "linear16".into(),
            sample_rate: 48000,
            output: AudioOutputKind::Client,
            output_path: String::new(),
            playback_queue: 64,
        }
    }
}

// ─────────────────────────────────────────────
// Gateway
// ─────────────────────────────────────────────

/// WebSocket gateway configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct GatewayConfig {
    /// Listen address.
    pub host: String,
    /// Listen port.
    pub port: u16,
    /// How long teardown waits for each task before aborting it.
    pub teardown_timeout_ms: u64,
    /// Capacity of the per-connection outbound queue.
    pub client_queue: usize,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 18790,
            teardown_timeout_ms: 2000,
            client_queue: 256,
        }
    }
}

// ─────────────────────────────────────────────
// Storage
// ─────────────────────────────────────────────

/// Conversation store backend.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageKind {
    Memory,
    #[default]
    Jsonl,
}

/// Conversation persistence settings.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct StorageConfig {
    pub kind: StorageKind,
    /// Directory for JSONL files; empty means `~/.parley/conversations`.
    pub dir: String,
}

// ─────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────
