//! Generic HTTP chat model.
//!
//! Talks to any vendor endpoint through a [`WireDialect`]: one POST per
//! exchange, JSON for complete replies, server-sent events for streams.

use std::sync::Arc;
use std::time::Duration;

use async_stream::try_stream;
use async_trait::async_trait;
use serde_json::Value;
use tracing::{debug, error, warn};

use parley_core::error::{GatewayError, Result};
use parley_core::types::{Message, ToolDefinition};

use crate::dialect::{StreamEvent, WireDialect};
use crate::sse::SseReader;
use crate::traits::{ChatModel, FragmentStream, ModelReply};

/// Request timeout for a whole exchange.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(120);

// ─────────────────────────────────────────────
// HttpChatModel
// ─────────────────────────────────────────────

/// A chat model reached over HTTP.
pub struct HttpChatModel {
    /// HTTP client (shared, connection-pooled).
    client: reqwest::Client,
    /// Vendor request/response shapes.
    dialect: Arc<dyn WireDialect>,
    /// Model identifier, for logging.
    model: String,
}

impl std::fmt::Debug for HttpChatModel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpChatModel")
            .field("provider", &self.dialect.name())
            .field("endpoint", &self.dialect.endpoint(false))
            .field("model", &self.model)
            .finish()
    }
}

impl HttpChatModel {
    pub fn new(dialect: Arc<dyn WireDialect>, model: &str) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| GatewayError::Configuration(format!("failed to build HTTP client: {e}")))?;

        Ok(HttpChatModel {
            client,
            dialect,
            model: model.to_string(),
        })
    }

    /// POST the request and check the status.
    async fn send(
        &self,
        messages: &[Message],
        tools: &[ToolDefinition],
        stream: bool,
    ) -> Result<reqwest::Response> {
        let url = self.dialect.endpoint(stream);
        let mut body = self.dialect.build_body(messages, stream);
        self.dialect.add_tools(&mut body, tools);

        debug!(
            provider = self.dialect.name(),
            model = %self.model,
            messages = messages.len(),
            tools = tools.len(),
            stream,
            "Calling LLM"
        );

        let response = self
            .client
            .post(&url)
            .headers(self.dialect.headers())
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                error!(provider = self.dialect.name(), error = %e, "HTTP request failed");
                GatewayError::Upstream(format!("Error calling LLM: {e}"))
            })?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| "Failed to read error body".to_string());
            error!(
                provider = self.dialect.name(),
                status = %status,
                body = %error_text,
                "API error"
            );
            return Err(GatewayError::Upstream(format!(
                "Error calling LLM: {status} — {error_text}"
            )));
        }

        Ok(response)
    }
}

/// Vendor error object embedded in a 200 response or SSE event.
fn embedded_error(value: &Value) -> Option<String> {
    let err = value.get("error")?;
    Some(
        err.get("message")
            .and_then(Value::as_str)
            .map(str::to_string)
            .unwrap_or_else(|| err.to_string()),
    )
}

#[async_trait]
impl ChatModel for HttpChatModel {
    async fn invoke(&self, messages: &[Message]) -> Result<ModelReply> {
        self.invoke_with_tools(messages, &[]).await
    }

    async fn invoke_with_tools(
        &self,
        messages: &[Message],
        tools: &[ToolDefinition],
    ) -> Result<ModelReply> {
        let tools: &[ToolDefinition] = if self.dialect.supports_tools() {
            tools
        } else {
            if !tools.is_empty() {
                warn!(provider = self.dialect.name(), "Provider does not support tools, ignoring them");
            }
            &[]
        };
        let response = self.send(messages, tools, false).await?;

        let raw: Value = response.json().await.map_err(|e| {
            error!(provider = self.dialect.name(), error = %e, "Failed to parse LLM response");
            GatewayError::Upstream(format!("Error parsing LLM response: {e}"))
        })?;

        if let Some(message) = embedded_error(&raw) {
            return Err(GatewayError::Upstream(message));
        }

        let tool_calls = self.dialect.tool_calls(&raw);
        let content = match self.dialect.reply_text(&raw) {
            Some(content) => content,
            None if !tool_calls.is_empty() => String::new(),
            None => {
                return Err(GatewayError::Upstream(format!(
                    "{} response contained no text",
                    self.dialect.name()
                )))
            }
        };

        debug!(
            provider = self.dialect.name(),
            chars = content.len(),
            tool_calls = tool_calls.len(),
            "LLM response received"
        );
        Ok(ModelReply {
            content,
            tool_calls,
            raw,
        })
    }

    async fn stream(&self, messages: &[Message]) -> Result<FragmentStream> {
        let response = self.send(messages, &[], true).await?;
        let dialect = Arc::clone(&self.dialect);
        let mut reader = SseReader::new(Box::pin(response.bytes_stream()));

        let stream = try_stream! {
            while let Some(payload) = reader.next_event().await? {
                if payload == "[DONE]" {
                    break;
                }
                let event: Value = match serde_json::from_str(&payload) {
                    Ok(v) => v,
                    Err(e) => {
                        warn!(provider = dialect.name(), error = %e, "Skipping non-JSON stream event");
                        continue;
                    }
                };
                if let Some(message) = embedded_error(&event) {
                    Err(GatewayError::Upstream(message))?;
                }
                match dialect.stream_event(&event) {
                    StreamEvent::Text(text) => yield text,
                    StreamEvent::End => break,
                    StreamEvent::Ignore => {}
                }
            }
            debug!(provider = dialect.name(), "LLM stream finished");
        };

        Ok(Box::pin(stream))
    }

    fn model_name(&self) -> &str {
        &self.model
    }
}

// ─────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────
