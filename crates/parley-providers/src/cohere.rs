//! Cohere Chat API (v2).
//!
//! Usage lives under `usage.tokens`; older responses only carry
//! `usage.billed_units`, which is used as a fallback.

use std::sync::Arc;

use reqwest::header::HeaderMap;
use serde_json::{json, Value};

use parley_core::config::schema::{ProviderConfig, ProviderKind};
use parley_core::error::Result;
use parley_core::types::{Message, UsageStats};

use crate::dialect::{
    base_url, count_at, header_map, join_text_parts, RequestParams, StreamEvent, WireDialect,
};
use crate::http_model::HttpChatModel;
use crate::openai;
use crate::traits::{ChatModel, ProviderStrategy};

const DEFAULT_API_BASE: &str = "https://api.cohere.com";

pub struct CohereDialect {
    api_base: String,
    headers: HeaderMap,
    params: RequestParams,
}

impl CohereDialect {
    pub fn new(config: &ProviderConfig) -> Result<Self> {
        Ok(CohereDialect {
            api_base: base_url(config, DEFAULT_API_BASE),
            headers: header_map(&[("authorization", format!("Bearer {}", config.api_key))])?,
            params: RequestParams::from(config),
        })
    }
}

impl WireDialect for CohereDialect {
    fn name(&self) -> &'static str {
        "Cohere"
    }

    fn endpoint(&self, _stream: bool) -> String {
        format!("{}/v2/chat", self.api_base)
    }

    fn headers(&self) -> HeaderMap {
        self.headers.clone()
    }

    fn build_body(&self, messages: &[Message], stream: bool) -> Value {
        json!({
            "model": self.params.model,
            "messages": openai::chat_messages(messages),
            "temperature": self.params.temperature,
            "max_tokens": self.params.max_tokens,
            "p": self.params.top_p,
            "stream": stream,
        })
    }

    fn reply_text(&self, raw: &Value) -> Option<String> {
        join_text_parts(raw.pointer("/message/content"))
    }

    fn stream_event(&self, event: &Value) -> StreamEvent {
        match event.get("type").and_then(Value::as_str) {
            Some("content-delta") => {
                match event
                    .pointer("/delta/message/content/text")
                    .and_then(Value::as_str)
                {
                    Some(text) if !text.is_empty() => StreamEvent::Text(text.to_string()),
                    _ => StreamEvent::Ignore,
                }
            }
            Some("message-end") => StreamEvent::End,
            _ => StreamEvent::Ignore,
        }
    }
}

pub struct CohereStrategy;

impl ProviderStrategy for CohereStrategy {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Cohere
    }

    fn create_model(&self, config: &ProviderConfig) -> Result<Arc<dyn ChatModel>> {
        config.validate()?;
        let dialect = CohereDialect::new(config)?;
        Ok(Arc::new(HttpChatModel::new(Arc::new(dialect), &config.model_name)?))
    }

    fn extract_usage(&self, raw: &Value) -> UsageStats {
        let section = if raw.pointer("/usage/tokens").is_some() {
            "/usage/tokens"
        } else {
            "/usage/billed_units"
        };
        UsageStats::new(
            count_at(raw, &format!("{section}/input_tokens")).unwrap_or(0),
            count_at(raw, &format!("{section}/output_tokens")).unwrap_or(0),
            None,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures_util::StreamExt;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn config(api_base: &str) -> ProviderConfig {
        let mut config = ProviderConfig {
            id: "cohere".into(),
            kind: ProviderKind::Cohere,
            model_name: "command-r-plus".into(),
            api_key: "co-key".into(),
            ..Default::default()
        };
        config.extra_settings.insert("api_base".into(), json!(api_base));
        config
    }

    #[test]
    fn test_usage_prefers_tokens() {
        let raw = json!({"usage": {
            "tokens": {"input_tokens": 20, "output_tokens": 8},
            "billed_units": {"input_tokens": 10, "output_tokens": 8}
        }});
        let usage = CohereStrategy.extract_usage(&raw);
        assert_eq!(usage, UsageStats { input_tokens: 20, output_tokens: 8, total_tokens: 28 });
    }

    #[test]
    fn test_usage_falls_back_to_billed_units() {
        let raw = json!({"usage": {"billed_units": {"input_tokens": 10, "output_tokens": 4}}});
        assert_eq!(CohereStrategy.extract_usage(&raw).total_tokens, 14);
        assert_eq!(CohereStrategy.extract_usage(&json!({})), UsageStats::zero());
    }

    #[test]
    fn test_body_uses_p_for_top_p() {
        let dialect = CohereDialect::new(&config("https://api.cohere.com")).unwrap();
        let body = dialect.build_body(&[Message::system("S"), Message::user("Hi")], false);
        assert_eq!(body["p"], 1.0);
        assert_eq!(body["messages"][0]["role"], "system");
    }

    #[tokio::test]
    async fn test_invoke_and_stream() {
        let mock_server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/v2/chat"))
            .and(header("Authorization", "Bearer co-key"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "message": {"role": "assistant", "content": [{"type": "text", "text": "Bonjour"}]},
                "usage": {"tokens": {"input_tokens": 3, "output_tokens": 1}}
            })))
            .mount(&mock_server)
            .await;

        let model = CohereStrategy.create_model(&config(&mock_server.uri())).unwrap();
        let reply = model.invoke(&[Message::user("Hi")]).await.unwrap();
        assert_eq!(reply.content, "Bonjour");

        let dialect = CohereDialect::new(&config(&mock_server.uri())).unwrap();
        let delta = json!({"type": "content-delta", "delta": {"message": {"content": {"text": "Bon"}}}});
        assert_eq!(dialect.stream_event(&delta), StreamEvent::Text("Bon".into()));
        assert_eq!(dialect.stream_event(&json!({"type": "message-end"})), StreamEvent::End);
    }

    #[tokio::test]
    async fn test_stream_against_mock() {
        let mock_server = MockServer::start().await;

        let body = concat!(
            "event: message-start\ndata: {\"type\":\"message-start\"}\n\n",
            "event: content-delta\ndata: {\"type\":\"content-delta\",\"delta\":{\"message\":{\"content\":{\"text\":\"Bon\"}}}}\n\n",
            "event: content-delta\ndata: {\"type\":\"content-delta\",\"delta\":{\"message\":{\"content\":{\"text\":\"jour\"}}}}\n\n",
            "event: message-end\ndata: {\"type\":\"message-end\"}\n\n",
        );
        Mock::given(method("POST"))
            .and(path("/v2/chat"))
            .respond_with(ResponseTemplate::new(200).set_body_string(body))
            .mount(&mock_server)
            .await;

        let model = CohereStrategy.create_model(&config(&mock_server.uri())).unwrap();
        let fragments: Vec<String> = model
            .stream(&[Message::user("Hi")])
            .await
            .unwrap()
            .map(|r| r.unwrap())
            .collect()
            .await;
        assert_eq!(fragments.concat(), "Bonjour");
    }
}
