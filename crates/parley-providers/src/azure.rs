//! Azure OpenAI — OpenAI request/response shapes on a per-deployment URL.
//!
//! Requires `api_base` (the resource endpoint). `model_name` is the
//! deployment name; `api_version` defaults to `2023-05-15`.

use std::sync::Arc;

use reqwest::header::HeaderMap;
use serde_json::{json, Value};

use parley_core::config::schema::{ProviderConfig, ProviderKind};
use parley_core::error::{GatewayError, Result};
use parley_core::types::{Message, ToolCall, ToolDefinition, UsageStats};

use crate::dialect::{header_map, RequestParams, StreamEvent, WireDialect};
use crate::http_model::HttpChatModel;
use crate::openai;
use crate::traits::{ChatModel, ProviderStrategy};

const DEFAULT_API_VERSION: &str = "2023-05-15";

pub struct AzureOpenAiDialect {
    endpoint: String,
    headers: HeaderMap,
    params: RequestParams,
}

impl AzureOpenAiDialect {
    pub fn new(config: &ProviderConfig) -> Result<Self> {
        let api_base = config.api_base().ok_or_else(|| {
            GatewayError::Configuration("azure_openai requires 'api_base' in extra settings".into())
        })?;
        let api_version = config.extra_str("api_version").unwrap_or(DEFAULT_API_VERSION);
        let endpoint = format!(
            "{}/openai/deployments/{}/chat/completions?api-version={}",
            api_base.trim_end_matches('/'),
            config.model_name,
            api_version
        );

        Ok(AzureOpenAiDialect {
            endpoint,
            headers: header_map(&[("api-key", config.api_key.clone())])?,
            params: RequestParams::from(config),
        })
    }
}

impl WireDialect for AzureOpenAiDialect {
    fn name(&self) -> &'static str {
        "Azure OpenAI"
    }

    fn endpoint(&self, _stream: bool) -> String {
        self.endpoint.clone()
    }

    fn headers(&self) -> HeaderMap {
        self.headers.clone()
    }

    fn build_body(&self, messages: &[Message], stream: bool) -> Value {
        json!({
            "messages": openai::chat_messages(messages),
            "temperature": self.params.temperature,
            "max_tokens": self.params.max_tokens,
            "top_p": self.params.top_p,
            "stream": stream,
        })
    }

    fn reply_text(&self, raw: &Value) -> Option<String> {
        openai::reply_text(raw)
    }

    fn stream_event(&self, event: &Value) -> StreamEvent {
        openai::stream_event(event)
    }

    fn supports_tools(&self) -> bool {
        true
    }

    fn add_tools(&self, body: &mut Value, tools: &[ToolDefinition]) {
        openai::add_tools(body, tools)
    }

    fn tool_calls(&self, raw: &Value) -> Vec<ToolCall> {
        openai::tool_calls(raw)
    }
}

pub struct AzureOpenAiStrategy;

impl ProviderStrategy for AzureOpenAiStrategy {
    fn kind(&self) -> ProviderKind {
        ProviderKind::AzureOpenAi
    }

    fn create_model(&self, config: &ProviderConfig) -> Result<Arc<dyn ChatModel>> {
        config.validate()?;
        let dialect = AzureOpenAiDialect::new(config)?;
        Ok(Arc::new(HttpChatModel::new(Arc::new(dialect), &config.model_name)?))
    }

    fn extract_usage(&self, raw: &Value) -> UsageStats {
        openai::usage(raw)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn config(api_base: Option<&str>) -> ProviderConfig {
        let mut config = ProviderConfig {
            id: "azure".into(),
            kind: ProviderKind::AzureOpenAi,
            model_name: "gpt4o-prod".into(),
            api_key: "az-key".into(),
            ..Default::default()
        };
        if let Some(base) = api_base {
            config.extra_settings.insert("api_base".into(), json!(base));
        }
        config
    }

    #[test]
    fn test_requires_api_base() {
        let err = AzureOpenAiStrategy.create_model(&config(None)).err().unwrap();
        assert!(matches!(err, GatewayError::Configuration(_)));
    }

    #[test]
    fn test_endpoint_uses_deployment_and_version() {
        let dialect = AzureOpenAiDialect::new(&config(Some("https://res.openai.azure.com/"))).unwrap();
        assert_eq!(
            dialect.endpoint(false),
            "https://res.openai.azure.com/openai/deployments/gpt4o-prod/chat/completions?api-version=2023-05-15"
        );

        let mut custom = config(Some("https://res.openai.azure.com"));
        custom.extra_settings.insert("api_version".into(), json!("2024-06-01"));
        let dialect = AzureOpenAiDialect::new(&custom).unwrap();
        assert!(dialect.endpoint(false).ends_with("api-version=2024-06-01"));
    }

    #[tokio::test]
    async fn test_invoke_against_mock() {
        let mock_server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/openai/deployments/gpt4o-prod/chat/completions"))
            .and(query_param("api-version", "2023-05-15"))
            .and(header("api-key", "az-key"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "choices": [{ "message": { "content": "From Azure" } }],
                "usage": { "prompt_tokens": 4, "completion_tokens": 2, "total_tokens": 6 }
            })))
            .mount(&mock_server)
            .await;

        let model = AzureOpenAiStrategy
            .create_model(&config(Some(&mock_server.uri())))
            .unwrap();
        let reply = model.invoke(&[Message::user("Hi")]).await.unwrap();
        assert_eq!(reply.content, "From Azure");
        assert_eq!(AzureOpenAiStrategy.extract_usage(&reply.raw).total_tokens, 6);
    }
}
