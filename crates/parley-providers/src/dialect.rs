//! Wire dialects — how one vendor's HTTP API is spoken.
//!
//! The generic [`HttpChatModel`](crate::http_model::HttpChatModel) does the
//! transport; a dialect supplies the endpoint, headers, request body and the
//! JSON paths to read reply text from.

use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use serde_json::Value;

use parley_core::config::schema::ProviderConfig;
use parley_core::error::{GatewayError, Result};
use parley_core::types::{Message, ToolCall, ToolDefinition};

// ─────────────────────────────────────────────
// Request parameters
// ─────────────────────────────────────────────

/// Sampling parameters copied out of a provider config.
#[derive(Clone, Debug, PartialEq)]
pub struct RequestParams {
    pub model: String,
    pub temperature: f64,
    pub max_tokens: u32,
    pub top_p: f64,
}

impl From<&ProviderConfig> for RequestParams {
    fn from(config: &ProviderConfig) -> Self {
        RequestParams {
            model: config.model_name.clone(),
            temperature: config.temperature,
            max_tokens: config.max_tokens,
            top_p: config.top_p,
        }
    }
}

// ─────────────────────────────────────────────
// Dialect trait
// ─────────────────────────────────────────────

/// What one SSE `data:` payload means for the reply.
#[derive(Clone, Debug, PartialEq)]
pub enum StreamEvent {
    /// A text delta to emit.
    Text(String),
    /// The vendor's end-of-reply marker.
    End,
    /// Metadata, pings, role headers.
    Ignore,
}

/// Vendor-specific request and response shapes.
pub trait WireDialect: Send + Sync {
    /// Display name for logs.
    fn name(&self) -> &'static str;

    /// Full request URL.
    fn endpoint(&self, stream: bool) -> String;

    /// Authentication and version headers.
    fn headers(&self) -> HeaderMap;

    /// JSON request body.
    fn build_body(&self, messages: &[Message], stream: bool) -> Value;

    /// Reply text of a non-streamed response.
    fn reply_text(&self, raw: &Value) -> Option<String>;

    /// Interpret one parsed SSE payload.
    fn stream_event(&self, event: &Value) -> StreamEvent;

    /// Whether the vendor accepts tool definitions.
    fn supports_tools(&self) -> bool {
        false
    }

    /// Attach tool definitions to a request body.
    fn add_tools(&self, _body: &mut Value, _tools: &[ToolDefinition]) {}

    /// Tool calls of a non-streamed response.
    fn tool_calls(&self, _raw: &Value) -> Vec<ToolCall> {
        Vec::new()
    }
}

// ─────────────────────────────────────────────
// Shared helpers
// ─────────────────────────────────────────────

/// Build a header map, rejecting values that are not valid header text.
pub(crate) fn header_map(pairs: &[(&'static str, String)]) -> Result<HeaderMap> {
    let mut headers = HeaderMap::new();
    for (name, value) in pairs {
        let value = HeaderValue::from_str(value).map_err(|_| {
            GatewayError::Configuration(format!("invalid value for header {name}"))
        })?;
        headers.insert(HeaderName::from_static(name), value);
    }
    Ok(headers)
}

/// Trim a configured base URL, or fall back to the vendor default.
pub(crate) fn base_url(config: &ProviderConfig, default: &str) -> String {
    config
        .api_base()
        .unwrap_or(default)
        .trim_end_matches('/')
        .to_string()
}

/// Pull the system prompt out of a message list.
///
/// Multiple system messages are joined with a blank line; the remaining
/// messages keep their order.
pub(crate) fn split_system(messages: &[Message]) -> (Option<String>, Vec<&Message>) {
    let mut system = Vec::new();
    let mut rest = Vec::new();
    for msg in messages {
        match msg {
            Message::System { content } => {
                if !content.is_empty() {
                    system.push(content.as_str());
                }
            }
            other => rest.push(other),
        }
    }
    let system = if system.is_empty() {
        None
    } else {
        Some(system.join("\n\n"))
    };
    (system, rest)
}

/// Read a token counter at a JSON pointer.
pub(crate) fn count_at(raw: &Value, pointer: &str) -> Option<u32> {
    raw.pointer(pointer)
        .and_then(Value::as_u64)
        .map(|n| u32::try_from(n).unwrap_or(u32::MAX))
}

/// Concatenate the `text` fields of a JSON array of content parts.
pub(crate) fn join_text_parts(parts: Option<&Value>) -> Option<String> {
    let parts = parts?.as_array()?;
    let text: String = parts
        .iter()
        .filter_map(|p| p.get("text").and_then(Value::as_str))
        .collect();
    Some(text)
}
