//! Context builder — assembles the message list for one exchange.
//!
//! Order is fixed: an optional system message, the prior turns of the
//! conversation oldest first as user/assistant pairs, then the current user
//! text.

use tracing::debug;

use parley_core::types::{ChatLog, Conversation, Message};

/// Builds the model input for a chat exchange.
#[derive(Clone, Debug, Default)]
pub struct ContextBuilder {
    /// Maximum prior turns replayed (0 = all).
    history_limit: usize,
}

impl ContextBuilder {
    pub fn new(history_limit: usize) -> Self {
        Self { history_limit }
    }

    /// The system prompt in effect: explicit > conversation default > none.
    pub fn effective_system_prompt<'a>(
        explicit: Option<&'a str>,
        conversation: &'a Conversation,
    ) -> &'a str {
        match explicit {
            Some(prompt) if !prompt.is_empty() => prompt,
            _ => &conversation.system_prompt,
        }
    }

    /// Build the full message list for a model call.
    pub fn build_messages(&self, system_prompt: &str, turns: &[ChatLog], user_text: &str) -> Vec<Message> {
        let skip = if self.history_limit > 0 {
            turns.len().saturating_sub(self.history_limit)
        } else {
            0
        };
        let history = &turns[skip..];

        let mut messages = Vec::with_capacity(history.len() * 2 + 2);
        if !system_prompt.is_empty() {
            messages.push(Message::system(system_prompt));
        }
        for turn in history {
            messages.push(Message::user(&turn.user_message));
            messages.push(Message::assistant(&turn.ai_response));
        }
        messages.push(Message::user(user_text));

        debug!(
            history = history.len(),
            dropped = skip,
            messages = messages.len(),
            "Built chat context"
        );
        messages
    }
}
