//! Core types for Parley — chat messages, token usage, conversations and turns.
//!
//! Messages use the role-tagged shape most chat-completion APIs share. Each
//! provider dialect maps this neutral list onto its own wire format.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::config::schema::ProviderConfig;
use crate::protocol::ProviderSummary;

// ─────────────────────────────────────────────
// Messages
// ─────────────────────────────────────────────

/// A chat message sent to a language model.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(tag = "role", rename_all = "lowercase")]
pub enum Message {
    System { content: String },
    User { content: String },
    Assistant { content: String },
    /// An assistant turn that asks for tool calls.
    #[serde(rename = "assistant_tool_calls")]
    ToolCalls {
        content: String,
        tool_calls: Vec<ToolCall>,
    },
    /// The result of one tool call.
    Tool {
        tool_call_id: String,
        content: String,
    },
}

impl Message {
    /// Create a system message.
    pub fn system(content: impl Into<String>) -> Self {
        Message::System {
            content: content.into(),
        }
    }

    /// Create a user message.
    pub fn user(content: impl Into<String>) -> Self {
        Message::User {
            content: content.into(),
        }
    }

    /// Create an assistant message.
    pub fn assistant(content: impl Into<String>) -> Self {
        Message::Assistant {
            content: content.into(),
        }
    }

    /// Create an assistant message carrying tool calls.
    pub fn tool_calls(content: impl Into<String>, tool_calls: Vec<ToolCall>) -> Self {
        Message::ToolCalls {
            content: content.into(),
            tool_calls,
        }
    }

    /// Create a tool result message.
    pub fn tool_result(tool_call_id: impl Into<String>, content: impl Into<String>) -> Self {
        Message::Tool {
            tool_call_id: tool_call_id.into(),
            content: content.into(),
        }
    }

    /// The role name as it appears on the wire (`"system"`, `"user"`,
    /// `"assistant"`, `"tool"`).
    pub fn role(&self) -> &'static str {
        match self {
            Message::System { .. } => "system",
            Message::User { .. } => "user",
            Message::Assistant { .. } | Message::ToolCalls { .. } => "assistant",
            Message::Tool { .. } => "tool",
        }
    }

    /// The text content of the message.
    pub fn content(&self) -> &str {
        match self {
            Message::System { content }
            | Message::User { content }
            | Message::Assistant { content }
            | Message::ToolCalls { content, .. }
            | Message::Tool { content, .. } => content,
        }
    }
}

// ─────────────────────────────────────────────
// Tool calls (function calling)
// ─────────────────────────────────────────────

/// A tool call requested by the model.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct ToolCall {
    /// Id used to match the result to the call.
    pub id: String,
    /// Always `"function"`.
    #[serde(rename = "type")]
    pub call_type: String,
    pub function: FunctionCall,
}

impl ToolCall {
    pub fn new(id: impl Into<String>, name: impl Into<String>, arguments: impl Into<String>) -> Self {
        ToolCall {
            id: id.into(),
            call_type: "function".to_string(),
            function: FunctionCall {
                name: name.into(),
                arguments: arguments.into(),
            },
        }
    }
}

/// Function name and JSON-encoded arguments of a tool call.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct FunctionCall {
    pub name: String,
    pub arguments: String,
}

/// A tool offered to the model.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct ToolDefinition {
    /// Always `"function"`.
    #[serde(rename = "type")]
    pub tool_type: String,
    pub function: FunctionDefinition,
}

/// Schema of a function tool.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct FunctionDefinition {
    pub name: String,
    pub description: String,
    /// JSON Schema of the arguments object.
    pub parameters: serde_json::Value,
}

impl ToolDefinition {
    pub fn new(
        name: impl Into<String>,
        description: impl Into<String>,
        parameters: serde_json::Value,
    ) -> Self {
        ToolDefinition {
            tool_type: "function".to_string(),
            function: FunctionDefinition {
                name: name.into(),
                description: description.into(),
                parameters,
            },
        }
    }
}

// ─────────────────────────────────────────────
// Token usage
// ─────────────────────────────────────────────

/// Normalized token accounting every provider strategy must produce.
#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct UsageStats {
    pub input_tokens: u32,
    pub output_tokens: u32,
    pub total_tokens: u32,
}

impl UsageStats {
    /// Zeroed usage, used for streamed replies and failed calls.
    pub fn zero() -> Self {
        Self::default()
    }

    /// Build usage from input/output counts, with an optional vendor-reported total.
    ///
    /// When the vendor reports a total it is authoritative; otherwise the
    /// total is the sum of input and output.
    pub fn new(input_tokens: u32, output_tokens: u32, reported_total: Option<u32>) -> Self {
        Self {
            input_tokens,
            output_tokens,
            total_tokens: reported_total
                .unwrap_or_else(|| input_tokens.saturating_add(output_tokens)),
        }
    }

    /// Add another call's counters, saturating.
    pub fn accumulate(&mut self, other: UsageStats) {
        self.input_tokens = self.input_tokens.saturating_add(other.input_tokens);
        self.output_tokens = self.output_tokens.saturating_add(other.output_tokens);
        self.total_tokens = self.total_tokens.saturating_add(other.total_tokens);
    }

    /// Estimated cost of this usage under the provider's per-1K pricing.
    pub fn cost(&self, provider: &ProviderConfig) -> f64 {
        f64::from(self.input_tokens) / 1000.0 * provider.input_cost_per_1k
            + f64::from(self.output_tokens) / 1000.0 * provider.output_cost_per_1k
    }
}

// ─────────────────────────────────────────────
// Conversations and turns
// ─────────────────────────────────────────────

/// A conversation: an ordered series of logged turns sharing a system prompt.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct Conversation {
    pub id: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default)]
    pub system_prompt: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Conversation {
    /// Create a conversation record with the given id.
    pub fn new(id: u64, title: Option<String>, system_prompt: impl Into<String>) -> Self {
        let now = Utc::now();
        Conversation {
            id,
            title,
            system_prompt: system_prompt.into(),
            created_at: now,
            updated_at: now,
        }
    }
}

/// One logged user-message / model-reply pair. Append-only.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct ChatLog {
    /// Assigned by the store on append; `0` before that.
    #[serde(default)]
    pub id: u64,
    pub conversation_id: u64,
    pub provider_id: String,
    pub system_prompt: String,
    pub user_message: String,
    pub ai_response: String,
    pub input_tokens: u32,
    pub output_tokens: u32,
    pub total_tokens: u32,
    pub created_at: DateTime<Utc>,
}

impl ChatLog {
    /// Build a new, not yet stored, turn.
    pub fn new(
        conversation_id: u64,
        provider_id: impl Into<String>,
        system_prompt: impl Into<String>,
        user_message: impl Into<String>,
        ai_response: impl Into<String>,
        usage: UsageStats,
    ) -> Self {
        ChatLog {
            id: 0,
            conversation_id,
            provider_id: provider_id.into(),
            system_prompt: system_prompt.into(),
            user_message: user_message.into(),
            ai_response: ai_response.into(),
            input_tokens: usage.input_tokens,
            output_tokens: usage.output_tokens,
            total_tokens: usage.total_tokens,
            created_at: Utc::now(),
        }
    }

    /// The token usage recorded for this turn.
    pub fn usage(&self) -> UsageStats {
        UsageStats {
            input_tokens: self.input_tokens,
            output_tokens: self.output_tokens,
            total_tokens: self.total_tokens,
        }
    }
}

/// Result of a non-streaming exchange.
#[derive(Clone, Debug, PartialEq)]
pub struct ChatReply {
    pub reply: String,
    pub usage: UsageStats,
    pub conversation_id: u64,
    /// The provider that produced the reply.
    pub provider: ProviderSummary,
}

// ─────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_message_serialization_uses_role_tag() {
        let json = serde_json::to_value(Message::system("Be brief.")).unwrap();
        assert_eq!(json, json!({"role": "system", "content": "Be brief."}));

        let json = serde_json::to_value(Message::assistant("Sure.")).unwrap();
        assert_eq!(json["role"], "assistant");
    }

    #[test]
    fn test_message_accessors() {
        let msg = Message::user("Hello");
        assert_eq!(msg.role(), "user");
        assert_eq!(msg.content(), "Hello");
    }

    #[test]
    fn test_tool_messages() {
        let call = ToolCall::new("call_1", "add", r#"{"a":1,"b":2}"#);
        let msg = Message::tool_calls("", vec![call.clone()]);
        assert_eq!(msg.role(), "assistant");
        let Message::ToolCalls { tool_calls, .. } = &msg else {
            panic!("expected tool calls");
        };
        assert_eq!(tool_calls[0].function.name, "add");

        let result = Message::tool_result("call_1", "3");
        assert_eq!(result.role(), "tool");
        assert_eq!(result.content(), "3");
    }

    #[test]
    fn test_tool_definition_shape() {
        let def = ToolDefinition::new("add", "Add two numbers", json!({"type": "object"}));
        let json = serde_json::to_value(&def).unwrap();
        assert_eq!(json["type"], "function");
        assert_eq!(json["function"]["name"], "add");
        assert_eq!(json["function"]["parameters"]["type"], "object");
    }

    #[test]
    fn test_usage_total_defaults_to_sum() {
        let usage = UsageStats::new(10, 5, None);
        assert_eq!(usage.total_tokens, 15);
    }

    #[test]
    fn test_usage_vendor_total_is_authoritative() {
        let usage = UsageStats::new(10, 5, Some(20));
        assert_eq!(usage.total_tokens, 20);
    }

    #[test]
    fn test_usage_accumulate() {
        let mut usage = UsageStats::new(10, 5, None);
        usage.accumulate(UsageStats::new(3, 2, Some(6)));
        assert_eq!(usage, UsageStats { input_tokens: 13, output_tokens: 7, total_tokens: 21 });

        let mut big = UsageStats::new(u32::MAX, 0, None);
        big.accumulate(UsageStats::new(1, 0, None));
        assert_eq!(big.input_tokens, u32::MAX);
    }

    #[test]
    fn test_usage_cost() {
        let provider = ProviderConfig {
            input_cost_per_1k: 0.5,
            output_cost_per_1k: 1.5,
            ..Default::default()
        };
        let usage = UsageStats::new(2000, 1000, None);
        assert!((usage.cost(&provider) - 2.5).abs() < 1e-9);
    }

    #[test]
    fn test_chat_log_keeps_usage() {
        let log = ChatLog::new(7, "main", "", "hi", "hello", UsageStats::new(3, 4, None));
        assert_eq!(log.id, 0);
        assert_eq!(log.conversation_id, 7);
        assert_eq!(log.usage().total_tokens, 7);
    }
}
