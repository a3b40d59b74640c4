//! Google Gemini (Generative Language API).
//!
//! Assistant turns use the `model` role; the system prompt goes in
//! `systemInstruction`. Streaming uses `:streamGenerateContent?alt=sse`,
//! where every event is a partial `GenerateContentResponse`.

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

const DEFAULT_API_BASE: &str = "https://generativelanguage.googleapis.com/v1beta";

pub struct GoogleDialect {
    api_base: String,
    headers: HeaderMap,
    params: RequestParams,
}

impl GoogleDialect {
    pub fn new(config: &ProviderConfig) -> Result<Self> {
        Ok(GoogleDialect {
            api_base: base_url(config, DEFAULT_API_BASE),
            headers: header_map(&[("x-goog-api-key", config.api_key.clone())])?,
            params: RequestParams::from(config),
        })
    }

    fn candidate_text(value: &Value) -> Option<String> {
        join_text_parts(value.pointer("/candidates/0/content/parts"))
    }
}

impl WireDialect for GoogleDialect {
    fn name(&self) -> &'static str {
        "Google"
    }

    fn endpoint(&self, stream: bool) -> String {
        if stream {
            format!(
                "{}/models/{}:streamGenerateContent?alt=sse",
                self.api_base, self.params.model
            )
        } else {
            format!("{}/models/{}:generateContent", self.api_base, self.params.model)
        }
    }

    fn headers(&self) -> HeaderMap {
        self.headers.clone()
    }

    fn build_body(&self, messages: &[Message], _stream: bool) -> Value {
        let (system, turns) = split_system(messages);
        let contents: Vec<Value> = turns
            .iter()
            .map(|m| {
                let role = match m {
                    Message::Assistant { .. } | Message::ToolCalls { .. } => "model",
                    _ => "user",
                };
                json!({ "role": role, "parts": [{ "text": m.content() }] })
            })
            .collect();

        let mut body = json!({
            "contents": contents,
            "generationConfig": {
                "temperature": self.params.temperature,
                "maxOutputTokens": self.params.max_tokens,
                "topP": self.params.top_p,
            },
        });
        if let Some(system) = system {
            body["systemInstruction"] = json!({ "parts": [{ "text": system }] });
        }
        body
    }

    fn reply_text(&self, raw: &Value) -> Option<String> {
        Self::candidate_text(raw)
    }

    fn stream_event(&self, event: &Value) -> StreamEvent {
        match Self::candidate_text(event) {
            Some(text) if !text.is_empty() => StreamEvent::Text(text),
            _ => StreamEvent::Ignore,
        }
    }
}

pub struct GoogleStrategy;

impl ProviderStrategy for GoogleStrategy {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Google
    }

    fn create_model(&self, config: &ProviderConfig) -> Result<Arc<dyn ChatModel>> {
        config.validate()?;
        let dialect = GoogleDialect::new(config)?;
        Ok(Arc::new(HttpChatModel::new(Arc::new(dialect), &config.model_name)?))
    }

    fn extract_usage(&self, raw: &Value) -> UsageStats {
        UsageStats::new(
            count_at(raw, "/usageMetadata/promptTokenCount").unwrap_or(0),
            count_at(raw, "/usageMetadata/candidatesTokenCount").unwrap_or(0),
            count_at(raw, "/usageMetadata/totalTokenCount"),
        )
    }
}
