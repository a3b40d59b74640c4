//! Anthropic Messages API.
//!
//! The system prompt travels as a top-level `system` field; only user and
//! assistant turns go in `messages`. Usage reports input and output counts
//! only, so the total is their sum.

use std::sync::Arc;

use reqwest::header::HeaderMap;
use serde_json::{json, Value};

use parley_core::config::schema::{ProviderConfig, ProviderKind};
use parley_core::error::Result;
use parley_core::types::{Message, UsageStats};

use crate::dialect::{
    base_url, count_at, header_map, join_text_parts, split_system, RequestParams, StreamEvent,
    WireDialect,
};
use crate::http_model::HttpChatModel;
use crate::traits::{ChatModel, ProviderStrategy};

const DEFAULT_API_BASE: &str = "https://api.anthropic.com";
const DEFAULT_API_VERSION: &str = "2023-06-01";

pub struct AnthropicDialect {
    api_base: String,
    headers: HeaderMap,
    params: RequestParams,
}

impl AnthropicDialect {
    pub fn new(config: &ProviderConfig) -> Result<Self> {
        let version = config
            .extra_str("anthropic_version")
            .unwrap_or(DEFAULT_API_VERSION)
            .to_string();
        Ok(AnthropicDialect {
            api_base: base_url(config, DEFAULT_API_BASE),
            headers: header_map(&[
                ("x-api-key", config.api_key.clone()),
                ("anthropic-version", version),
            ])?,
            params: RequestParams::from(config),
        })
    }
}

impl WireDialect for AnthropicDialect {
    fn name(&self) -> &'static str {
        "Anthropic"
    }

    fn endpoint(&self, _stream: bool) -> String {
        format!("{}/v1/messages", self.api_base)
    }

    fn headers(&self) -> HeaderMap {
        self.headers.clone()
    }

    fn build_body(&self, messages: &[Message], stream: bool) -> Value {
        let (system, turns) = split_system(messages);
        let turns: Vec<Value> = turns
            .iter()
            .map(|m| json!({ "role": m.role(), "content": m.content() }))
            .collect();

        let mut body = json!({
            "model": self.params.model,
            "messages": turns,
            "max_tokens": self.params.max_tokens,
            "temperature": self.params.temperature,
            "stream": stream,
        });
        if let Some(system) = system {
            body["system"] = Value::String(system);
        }
        body
    }

    fn reply_text(&self, raw: &Value) -> Option<String> {
        join_text_parts(raw.get("content"))
    }

    fn stream_event(&self, event: &Value) -> StreamEvent {
        match event.get("type").and_then(Value::as_str) {
            Some("content_block_delta") => match event.pointer("/delta/text").and_then(Value::as_str) {
                Some(text) if !text.is_empty() => StreamEvent::Text(text.to_string()),
                _ => StreamEvent::Ignore,
            },
            Some("message_stop") => StreamEvent::End,
            _ => StreamEvent::Ignore,
        }
    }
}

pub struct AnthropicStrategy;

impl ProviderStrategy for AnthropicStrategy {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Anthropic
    }

    fn create_model(&self, config: &ProviderConfig) -> Result<Arc<dyn ChatModel>> {
        config.validate()?;
        let dialect = AnthropicDialect::new(config)?;
        Ok(Arc::new(HttpChatModel::new(Arc::new(dialect), &config.model_name)?))
    }

    fn extract_usage(&self, raw: &Value) -> UsageStats {
        UsageStats::new(
            count_at(raw, "/usage/input_tokens").unwrap_or(0),
            count_at(raw, "/usage/output_tokens").unwrap_or(0),
            None,
        )
    }
}
