//! OpenAI chat completions.
//!
//! `POST {api_base}/chat/completions` with bearer auth. The message list is
//! sent as-is (system role included). Tools go out as `tools` function
//! definitions and come back as `choices[0].message.tool_calls`. Azure
//! OpenAI reuses the body and response shapes from here.

use std::sync::Arc;

use reqwest::header::HeaderMap;
use serde_json::{json, Value};

use parley_core::config::schema::{ProviderConfig, ProviderKind};
use parley_core::error::Result;
use parley_core::types::{Message, ToolCall, ToolDefinition, UsageStats};

use crate::dialect::{base_url, count_at, header_map, RequestParams, StreamEvent, WireDialect};
use crate::http_model::HttpChatModel;
use crate::traits::{ChatModel, ProviderStrategy};

const DEFAULT_API_BASE: &str = "https://api.openai.com/v1";

// ─────────────────────────────────────────────
// Shared OpenAI-shaped helpers
// ─────────────────────────────────────────────

pub(crate) fn chat_messages(messages: &[Message]) -> Vec<Value> {
    messages
        .iter()
        .map(|m| match m {
            Message::ToolCalls {
                content,
                tool_calls,
            } => {
                let content = if content.is_empty() {
                    Value::Null
                } else {
                    json!(content)
                };
                json!({ "role": "assistant", "content": content, "tool_calls": tool_calls })
            }
            Message::Tool {
                tool_call_id,
                content,
            } => json!({ "role": "tool", "tool_call_id": tool_call_id, "content": content }),
            other => json!({ "role": other.role(), "content": other.content() }),
        })
        .collect()
}

pub(crate) fn add_tools(body: &mut Value, tools: &[ToolDefinition]) {
    if tools.is_empty() {
        return;
    }
    body["tools"] = json!(tools);
    body["tool_choice"] = json!("auto");
}

/// `choices[0].message.tool_calls`; malformed entries are skipped.
pub(crate) fn tool_calls(raw: &Value) -> Vec<ToolCall> {
    raw.pointer("/choices/0/message/tool_calls")
        .and_then(Value::as_array)
        .map(|calls| {
            calls
                .iter()
                .filter_map(|c| serde_json::from_value(c.clone()).ok())
                .collect()
        })
        .unwrap_or_default()
}

pub(crate) fn reply_text(raw: &Value) -> Option<String> {
    raw.pointer("/choices/0/message/content")
        .and_then(Value::as_str)
        .map(str::to_string)
}

pub(crate) fn stream_event(event: &Value) -> StreamEvent {
    match event
        .pointer("/choices/0/delta/content")
        .and_then(Value::as_str)
    {
        Some(text) if !text.is_empty() => StreamEvent::Text(text.to_string()),
        _ => StreamEvent::Ignore,
    }
}

/// `usage.prompt_tokens / completion_tokens / total_tokens`.
pub(crate) fn usage(raw: &Value) -> UsageStats {
    UsageStats::new(
        count_at(raw, "/usage/prompt_tokens").unwrap_or(0),
        count_at(raw, "/usage/completion_tokens").unwrap_or(0),
        count_at(raw, "/usage/total_tokens"),
    )
}

// ─────────────────────────────────────────────
// Dialect
// ─────────────────────────────────────────────

pub struct OpenAiDialect {
    api_base: String,
    headers: HeaderMap,
    params: RequestParams,
}

impl OpenAiDialect {
    pub fn new(config: &ProviderConfig) -> Result<Self> {
        let mut pairs = Vec::new();
        if !config.api_key.is_empty() {
            pairs.push(("authorization", format!("Bearer {}", config.api_key)));
        }
        if let Some(org) = config.extra_str("organization") {
            pairs.push(("openai-organization", org.to_string()));
        }

        Ok(OpenAiDialect {
            api_base: base_url(config, DEFAULT_API_BASE),
            headers: header_map(&pairs)?,
            params: RequestParams::from(config),
        })
    }
}

impl WireDialect for OpenAiDialect {
    fn name(&self) -> &'static str {
        "OpenAI"
    }

    fn endpoint(&self, _stream: bool) -> String {
        format!("{}/chat/completions", self.api_base)
    }

    fn headers(&self) -> HeaderMap {
        self.headers.clone()
    }

    fn build_body(&self, messages: &[Message], stream: bool) -> Value {
        json!({
            "model": self.params.model,
            "messages": chat_messages(messages),
            "temperature": self.params.temperature,
            "max_tokens": self.params.max_tokens,
            "top_p": self.params.top_p,
            "stream": stream,
        })
    }

    fn reply_text(&self, raw: &Value) -> Option<String> {
        reply_text(raw)
    }

    fn stream_event(&self, event: &Value) -> StreamEvent {
        stream_event(event)
    }

    fn supports_tools(&self) -> bool {
        true
    }

    fn add_tools(&self, body: &mut Value, tools: &[ToolDefinition]) {
        add_tools(body, tools)
    }

    fn tool_calls(&self, raw: &Value) -> Vec<ToolCall> {
        tool_calls(raw)
    }
}

// ─────────────────────────────────────────────
// Strategy
// ─────────────────────────────────────────────

pub struct OpenAiStrategy;

impl ProviderStrategy for OpenAiStrategy {
    fn kind(&self) -> ProviderKind {
        ProviderKind::OpenAi
    }

    fn create_model(&self, config: &ProviderConfig) -> Result<Arc<dyn ChatModel>> {
        config.validate()?;
        let dialect = OpenAiDialect::new(config)?;
        Ok(Arc::new(HttpChatModel::new(Arc::new(dialect), &config.model_name)?))
    }

    fn extract_usage(&self, raw: &Value) -> UsageStats {
        usage(raw)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> ProviderConfig {
        ProviderConfig {
            id: "main".into(),
            model_name: "gpt-4o-mini".into(),
            api_key: "sk-test".into(),
            temperature: 0.2,
            max_tokens: 64,
            ..Default::default()
        }
    }

    #[test]
    fn test_endpoint_default_and_override() {
        let dialect = OpenAiDialect::new(&config()).unwrap();
        assert_eq!(dialect.endpoint(false), "https://api.openai.com/v1/chat/completions");

        let mut custom = config();
        custom
            .extra_settings
            .insert("api_base".into(), json!("https://proxy.local/v1/"));
        let dialect = OpenAiDialect::new(&custom).unwrap();
        assert_eq!(dialect.endpoint(true), "https://proxy.local/v1/chat/completions");
    }

    #[test]
    fn test_body_keeps_system_role() {
        let dialect = OpenAiDialect::new(&config()).unwrap();
        let body = dialect.build_body(&[Message::system("Be brief."), Message::user("Hi")], false);
        assert_eq!(body["model"], "gpt-4o-mini");
        assert_eq!(body["max_tokens"], 64);
        assert_eq!(body["messages"][0], json!({"role": "system", "content": "Be brief."}));
        assert_eq!(body["messages"][1]["role"], "user");
    }

    #[test]
    fn test_tool_messages_on_the_wire() {
        let call = ToolCall::new("call_1", "add", r#"{"a":2,"b":3}"#);
        let wire = chat_messages(&[
            Message::user("2+3?"),
            Message::tool_calls("", vec![call]),
            Message::tool_result("call_1", "5"),
        ]);
        assert_eq!(wire[1]["role"], "assistant");
        assert!(wire[1]["content"].is_null());
        assert_eq!(wire[1]["tool_calls"][0]["id"], "call_1");
        assert_eq!(wire[1]["tool_calls"][0]["type"], "function");
        assert_eq!(wire[1]["tool_calls"][0]["function"]["name"], "add");
        assert_eq!(wire[2], json!({"role": "tool", "tool_call_id": "call_1", "content": "5"}));
    }

    #[test]
    fn test_tools_added_only_when_present() {
        let dialect = OpenAiDialect::new(&config()).unwrap();
        let mut body = dialect.build_body(&[Message::user("Hi")], false);
        dialect.add_tools(&mut body, &[]);
        assert!(body.get("tools").is_none());

        let def = ToolDefinition::new("add", "Add two numbers", json!({"type": "object"}));
        dialect.add_tools(&mut body, &[def]);
        assert_eq!(body["tools"][0]["function"]["name"], "add");
        assert_eq!(body["tool_choice"], "auto");
    }

    #[test]
    fn test_parse_tool_calls() {
        let raw = json!({"choices": [{"message": {"content": null, "tool_calls": [
            {"id": "call_1", "type": "function", "function": {"name": "add", "arguments": "{\"a\":1}"}},
            {"broken": true}
        ]}}]});
        let calls = tool_calls(&raw);
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].function.name, "add");
        assert_eq!(calls[0].function.arguments, r#"{"a":1}"#);
        assert!(tool_calls(&json!({"choices": []})).is_empty());
    }

    #[test]
    fn test_usage_with_total() {
        let raw = json!({"usage": {"prompt_tokens": 9, "completion_tokens": 3, "total_tokens": 13}});
        let usage = OpenAiStrategy.extract_usage(&raw);
        assert_eq!(usage, UsageStats { input_tokens: 9, output_tokens: 3, total_tokens: 13 });
    }

    #[test]
    fn test_usage_missing_is_zero() {
        assert_eq!(OpenAiStrategy.extract_usage(&json!({})), UsageStats::zero());
    }

    #[test]
    fn test_stream_event() {
        let delta = json!({"choices": [{"delta": {"content": "Hi"}}]});
        assert_eq!(stream_event(&delta), StreamEvent::Text("Hi".into()));
        let role = json!({"choices": [{"delta": {"role": "assistant"}}]});
        assert_eq!(stream_event(&role), StreamEvent::Ignore);
    }

    #[test]
    fn test_create_model() {
        let model = OpenAiStrategy.create_model(&config()).unwrap();
        assert_eq!(model.model_name(), "gpt-4o-mini");
    }
}
