//! In-memory conversation store.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::RwLock;

use super::ConversationStore;
use crate::error::{GatewayError, Result};
use crate::types::{ChatLog, Conversation};

#[derive(Default)]
struct Inner {
    next_id: u64,
    conversations: HashMap<u64, Conversation>,
    turns: HashMap<u64, Vec<ChatLog>>,
}

/// Process-local store with auto-increment ids. Nothing survives a restart.
#[derive(Default)]
pub struct MemoryStore {
    inner: RwLock<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ConversationStore for MemoryStore {
    async fn create_conversation(
        &self,
        title: Option<String>,
        system_prompt: &str,
    ) -> Result<Conversation> {
        let mut inner = self.inner.write().await;
        inner.next_id += 1;
        let conversation = Conversation::new(inner.next_id, title, system_prompt);
        inner
            .conversations
            .insert(conversation.id, conversation.clone());
        inner.turns.insert(conversation.id, Vec::new());
        Ok(conversation)
    }

    async fn get_conversation(&self, id: u64) -> Result<Option<Conversation>> {
        Ok(self.inner.read().await.conversations.get(&id).cloned())
    }

    async fn list_turns(&self, conversation_id: u64) -> Result<Vec<ChatLog>> {
        Ok(self
            .inner
            .read()
            .await
            .turns
            .get(&conversation_id)
            .cloned()
            .unwrap_or_default())
    }

    async fn append_turn(&self, mut turn: ChatLog) -> Result<ChatLog> {
        let mut inner = self.inner.write().await;
        let conversation = inner
            .conversations
            .get_mut(&turn.conversation_id)
            .ok_or_else(|| GatewayError::NotFound(format!("conversation {}", turn.conversation_id)))?;
        conversation.updated_at = Utc::now();

        let turns = inner.turns.entry(turn.conversation_id).or_default();
        turn.id = turns.len() as u64 + 1;
        turns.push(turn.clone());
        Ok(turn)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::UsageStats;

    #[tokio::test]
    async fn test_ids_auto_increment() {
        let store = MemoryStore::new();
        let a = store.create_conversation(None, "").await.unwrap();
        let b = store.create_conversation(Some("second".into()), "sys").await.unwrap();
        assert_eq!(a.id, 1);
        assert_eq!(b.id, 2);
        assert_eq!(b.system_prompt, "sys");
    }

    #[tokio::test]
    async fn test_append_and_list_in_order() {
        let store = MemoryStore::new();
        let conv = store.create_conversation(None, "").await.unwrap();
        for i in 0..3 {
            let turn = ChatLog::new(conv.id, "p", "", format!("q{i}"), format!("a{i}"), UsageStats::zero());
            let stored = store.append_turn(turn).await.unwrap();
            assert_eq!(stored.id, i + 1);
        }
        let turns = store.list_turns(conv.id).await.unwrap();
        let questions: Vec<&str> = turns.iter().map(|t| t.user_message.as_str()).collect();
        assert_eq!(questions, vec!["q0", "q1", "q2"]);
    }

    #[tokio::test]
    async fn test_append_to_unknown_conversation() {
        let store = MemoryStore::new();
        let turn = ChatLog::new(42, "p", "", "q", "a", UsageStats::zero());
        let err = store.append_turn(turn).await.unwrap_err();
        assert!(matches!(err, GatewayError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_get_unknown_conversation() {
        let store = MemoryStore::new();
        assert!(store.get_conversation(9).await.unwrap().is_none());
        assert!(store.list_turns(9).await.unwrap().is_empty());
    }
}
