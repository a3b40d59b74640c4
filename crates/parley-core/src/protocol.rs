//! Client control channel — inbound requests and outbound events.
//!
//! Everything the gateway exchanges with a connected client is either a JSON
//! text frame or a binary audio frame. Inbound text frames parse into
//! [`ClientControl`]; everything sent back is a [`ClientEvent`].

use bytes::Bytes;
use serde_json::{json, Value};

use crate::error::GatewayError;
use crate::types::UsageStats;

// ─────────────────────────────────────────────
// Inbound
// ─────────────────────────────────────────────

/// A chat request from the client.
#[derive(Clone, Debug, PartialEq)]
pub struct ChatRequest {
    pub message: String,
    pub provider_id: Option<String>,
    pub system_prompt: Option<String>,
    pub conversation_id: Option<u64>,
    /// Stream the reply fragment by fragment (default `true`).
    pub stream: bool,
    /// Speak the reply through the synthesis relay (default `false`).
    pub enable_tts: bool,
    /// Offer the enabled tools to the model (default `false`).
    pub use_tools: bool,
}

/// A parsed inbound text frame.
#[derive(Clone, Debug, PartialEq)]
pub enum ClientControl {
    Chat(ChatRequest),
    Heartbeat,
    Speak { text: String },
    Stop,
}

impl ClientControl {
    /// Parse an inbound text frame.
    ///
    /// Frames with a `type` of `heartbeat`, `speak` or `stop` are control
    /// messages; anything else is treated as a chat request.
    pub fn parse(text: &str) -> Result<Self, GatewayError> {
        let value: Value = serde_json::from_str(text)
            .map_err(|_| GatewayError::Protocol("Invalid JSON format".into()))?;
        if !value.is_object() {
            return Err(GatewayError::Protocol("Invalid JSON format".into()));
        }

        match value.get("type").and_then(Value::as_str) {
            Some("heartbeat") => return Ok(ClientControl::Heartbeat),
            Some("stop") => return Ok(ClientControl::Stop),
            Some("speak") => {
                let text = value
                    .get("text")
                    .and_then(Value::as_str)
                    .map(str::trim)
                    .unwrap_or_default();
                if text.is_empty() {
                    return Err(GatewayError::Protocol("Text is required".into()));
                }
                return Ok(ClientControl::Speak {
                    text: text.to_string(),
                });
            }
            _ => {}
        }

        let message = value
            .get("message")
            .and_then(Value::as_str)
            .unwrap_or_default();
        if message.trim().is_empty() {
            return Err(GatewayError::Protocol("Message is required".into()));
        }

        Ok(ClientControl::Chat(ChatRequest {
            message: message.to_string(),
            provider_id: value.get("provider_id").and_then(id_string),
            system_prompt: value
                .get("system_prompt")
                .and_then(Value::as_str)
                .filter(|s| !s.is_empty())
                .map(str::to_string),
            conversation_id: value.get("conversation_id").and_then(id_number),
            stream: value.get("stream").and_then(Value::as_bool).unwrap_or(true),
            enable_tts: value
                .get("enable_tts")
                .and_then(Value::as_bool)
                .unwrap_or(false),
            use_tools: value
                .get("use_tools")
                .and_then(Value::as_bool)
                .unwrap_or(false),
        }))
    }
}

/// Accept ids sent either as strings or numbers.
fn id_string(v: &Value) -> Option<String> {
    match v {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn id_number(v: &Value) -> Option<u64> {
    match v {
        Value::Number(n) => n.as_u64(),
        Value::String(s) => s.parse().ok(),
        _ => None,
    }
}

// ─────────────────────────────────────────────
// Outbound
// ─────────────────────────────────────────────

/// Provider identity echoed in non-streamed replies.
#[derive(Clone, Debug, PartialEq)]
pub struct ProviderSummary {
    pub id: String,
    pub name: String,
    pub model: String,
}

/// Everything the gateway sends to a client.
#[derive(Clone, Debug, PartialEq)]
pub enum ClientEvent {
    /// `{"status":"ready"}`
    Ready,
    /// One streamed reply fragment.
    ChatChunk(String),
    /// End of a streamed reply.
    ChatComplete,
    /// A complete, non-streamed reply.
    ChatReply {
        provider: ProviderSummary,
        conversation_id: u64,
        reply: String,
        usage: UsageStats,
    },
    /// A non-empty live transcript.
    Transcript(String),
    /// A sentence unit handed to the synthesis backend.
    SpeechProcessing(String),
    /// All units of one utterance have been sent for synthesis.
    SpeechComplete,
    /// Heartbeat echo.
    Heartbeat,
    /// `{"error": ...}`
    Error(String),
    /// Synthesized audio forwarded as a binary frame.
    Audio(Bytes),
}

impl ClientEvent {
    /// JSON body for text events; `None` for binary audio.
    pub fn to_json(&self) -> Option<Value> {
        let value = match self {
            ClientEvent::Ready => json!({ "status": "ready" }),
            ClientEvent::ChatChunk(chunk) => json!({ "type": "chat.message", "chunk": chunk }),
            ClientEvent::ChatComplete => json!({ "type": "chat.complete" }),
            ClientEvent::ChatReply {
                provider,
                conversation_id,
                reply,
                usage,
            } => json!({
                "type": "chat.message",
                "provider": {
                    "id": provider.id,
                    "name": provider.name,
                    "model": provider.model,
                },
                "conversation_id": conversation_id,
                "reply": reply,
                "usage": usage,
            }),
            ClientEvent::Transcript(text) => json!({ "type": "transcript", "text": text }),
            ClientEvent::SpeechProcessing(text) => json!({ "status": "processing", "text": text }),
            ClientEvent::SpeechComplete => json!({ "type": "tts.complete" }),
            ClientEvent::Heartbeat => json!({ "type": "heartbeat" }),
            ClientEvent::Error(message) => json!({ "error": message }),
            ClientEvent::Audio(_) => return None,
        };
        Some(value)
    }

    /// Error event carrying the client-facing text of a gateway error.
    pub fn from_error(err: &GatewayError) -> Self {
        ClientEvent::Error(err.client_message())
    }
}

// ─────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────
