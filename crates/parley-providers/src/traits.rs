//! Provider contracts — the strategy every vendor implements and the model
//! handle it produces.
//!
//! A strategy is stateless: it turns a [`ProviderConfig`] into a ready
//! [`ChatModel`] and knows how to read token usage out of that vendor's raw
//! response. Nothing outside a strategy matches on the vendor.

use std::pin::Pin;
use std::sync::Arc;

use async_trait::async_trait;
use futures_util::Stream;
use serde_json::Value;
use tracing::warn;

use parley_core::config::schema::{ProviderConfig, ProviderKind};
use parley_core::error::Result;
use parley_core::types::{Message, ToolCall, ToolDefinition, UsageStats};

/// Text fragments of a streamed reply, in emission order.
pub type FragmentStream = Pin<Box<dyn Stream<Item = Result<String>> + Send>>;

/// A complete, non-streamed model reply.
#[derive(Clone, Debug)]
pub struct ModelReply {
    /// Reply text. Empty when the model only asked for tool calls.
    pub content: String,
    /// Tool calls the model asked for, in order.
    pub tool_calls: Vec<ToolCall>,
    /// The vendor's response body, kept for usage extraction.
    pub raw: Value,
}

impl ModelReply {
    /// A plain text reply.
    pub fn text(content: impl Into<String>, raw: Value) -> Self {
        ModelReply {
            content: content.into(),
            tool_calls: Vec::new(),
            raw,
        }
    }

    pub fn has_tool_calls(&self) -> bool {
        !self.tool_calls.is_empty()
    }
}

/// A ready-to-call chat model bound to one provider configuration.
#[async_trait]
pub trait ChatModel: Send + Sync {
    /// Send the messages and wait for the whole reply.
    async fn invoke(&self, messages: &[Message]) -> Result<ModelReply>;

    /// Like [`invoke`](Self::invoke), offering `tools` to the model.
    ///
    /// Models without function calling ignore the tools.
    async fn invoke_with_tools(
        &self,
        messages: &[Message],
        tools: &[ToolDefinition],
    ) -> Result<ModelReply> {
        if !tools.is_empty() {
            warn!(model = self.model_name(), "Model does not support tools, ignoring them");
        }
        self.invoke(messages).await
    }

    /// Send the messages and stream the reply fragment by fragment.
    ///
    /// Errors before the first byte (HTTP status, connect failure) are
    /// returned directly; errors mid-stream arrive as stream items.
    async fn stream(&self, messages: &[Message]) -> Result<FragmentStream>;

    /// Model identifier, for logging.
    fn model_name(&self) -> &str;
}

/// One vendor's chat-completion capability.
pub trait ProviderStrategy: Send + Sync {
    /// The vendor family this strategy serves.
    fn kind(&self) -> ProviderKind;

    /// Build a model handle.
    ///
    /// Fails with `Configuration` when vendor-required settings are absent.
    fn create_model(&self, config: &ProviderConfig) -> Result<Arc<dyn ChatModel>>;

    /// Read token usage from a raw response. Missing counters are zero.
    fn extract_usage(&self, raw: &Value) -> UsageStats;
}
