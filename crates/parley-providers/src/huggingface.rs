//! HuggingFace text generation (TGI / Inference API).
//!
//! The chat is flattened into one prompt. `api_base` is either the full URL
//! of a text-generation endpoint or a model repo id, which is resolved
//! against the hosted Inference API.
//!
//! TGI reports no token usage, so output tokens are estimated from the reply
//! word count. The estimate is not authoritative and input is always zero.

use std::sync::Arc;

use reqwest::header::HeaderMap;
use serde_json::{json, Value};

use parley_core::config::schema::{ProviderConfig, ProviderKind};
use parley_core::error::{GatewayError, Result};
use parley_core::types::{Message, UsageStats};

use crate::dialect::{header_map, RequestParams, StreamEvent, WireDialect};
use crate::http_model::HttpChatModel;
use crate::traits::{ChatModel, ProviderStrategy};

const INFERENCE_API: &str = "https://api-inference.huggingface.co/models";

/// Tokens per word used by the usage estimate.
const TOKENS_PER_WORD: f64 = 1.3;

pub struct HuggingFaceDialect {
    endpoint: String,
    headers: HeaderMap,
    params: RequestParams,
}

impl HuggingFaceDialect {
    pub fn new(config: &ProviderConfig) -> Result<Self> {
        let api_base = config.api_base().ok_or_else(|| {
            GatewayError::Configuration("huggingface requires 'api_base' in extra settings".into())
        })?;
        let endpoint = if api_base.starts_with("http://") || api_base.starts_with("https://") {
            api_base.trim_end_matches('/').to_string()
        } else {
            format!("{INFERENCE_API}/{}", api_base.trim_matches('/'))
        };

        let mut pairs = Vec::new();
        if !config.api_key.is_empty() {
            pairs.push(("authorization", format!("Bearer {}", config.api_key)));
        }

        Ok(HuggingFaceDialect {
            endpoint,
            headers: header_map(&pairs)?,
            params: RequestParams::from(config),
        })
    }
}

/// Flatten a chat into a single prompt ending with an open assistant turn.
fn flatten_prompt(messages: &[Message]) -> String {
    let mut prompt = String::new();
    for msg in messages {
        let label = match msg {
            Message::System { .. } => "System",
            Message::User { .. } => "User",
            Message::Assistant { .. } | Message::ToolCalls { .. } => "Assistant",
            Message::Tool { .. } => "Tool",
        };
        if msg.content().is_empty() {
            continue;
        }
        prompt.push_str(label);
        prompt.push_str(": ");
        prompt.push_str(msg.content());
        prompt.push('\n');
    }
    prompt.push_str("Assistant:");
    prompt
}

/// `generated_text` of an object response or of the first array element.
fn generated_text(raw: &Value) -> Option<&str> {
    let item = match raw {
        Value::Array(items) => items.first()?,
        other => other,
    };
    item.get("generated_text").and_then(Value::as_str)
}

impl WireDialect for HuggingFaceDialect {
    fn name(&self) -> &'static str {
        "HuggingFace"
    }

    fn endpoint(&self, _stream: bool) -> String {
        self.endpoint.clone()
    }

    fn headers(&self) -> HeaderMap {
        self.headers.clone()
    }

    fn build_body(&self, messages: &[Message], stream: bool) -> Value {
        json!({
            "inputs": flatten_prompt(messages),
            "parameters": {
                "max_new_tokens": self.params.max_tokens,
                "temperature": self.params.temperature,
                "top_p": self.params.top_p,
                "return_full_text": false,
            },
            "stream": stream,
        })
    }

    fn reply_text(&self, raw: &Value) -> Option<String> {
        generated_text(raw).map(|s| s.trim_start().to_string())
    }

    fn stream_event(&self, event: &Value) -> StreamEvent {
        let special = event
            .pointer("/token/special")
            .and_then(Value::as_bool)
            .unwrap_or(false);
        let finished = event.get("details").is_some_and(|d| !d.is_null());
        match event.pointer("/token/text").and_then(Value::as_str) {
            Some(text) if !special && !text.is_empty() => StreamEvent::Text(text.to_string()),
            _ if finished => StreamEvent::End,
            _ => StreamEvent::Ignore,
        }
    }
}

pub struct HuggingFaceStrategy;

impl ProviderStrategy for HuggingFaceStrategy {
    fn kind(&self) -> ProviderKind {
        ProviderKind::HuggingFace
    }

    fn create_model(&self, config: &ProviderConfig) -> Result<Arc<dyn ChatModel>> {
        config.validate()?;
        let dialect = HuggingFaceDialect::new(config)?;
        Ok(Arc::new(HttpChatModel::new(Arc::new(dialect), &config.model_name)?))
    }

    fn extract_usage(&self, raw: &Value) -> UsageStats {
        let words = generated_text(raw)
            .map(|text| text.split_whitespace().count())
            .unwrap_or(0);
        let estimate = (words as f64 * TOKENS_PER_WORD).floor() as u32;
        UsageStats::new(0, estimate, None)
    }
}
