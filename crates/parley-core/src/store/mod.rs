//! Conversation persistence — the four-operation store contract plus two
//! backends.
//!
//! - [`MemoryStore`]: process-local maps, used by tests and `storage.kind = "memory"`.
//! - [`JsonlStore`]: one `.jsonl` file per conversation under `~/.parley/conversations/`.
//!   Line 1 is a metadata record `{"_type":"metadata", ...}`, lines 2+ are turns.

pub mod jsonl;
pub mod memory;

use std::sync::Arc;

use async_trait::async_trait;

use crate::config::schema::{StorageConfig, StorageKind};
use crate::error::Result;
use crate::types::{ChatLog, Conversation};
use crate::utils;

pub use jsonl::JsonlStore;
pub use memory::MemoryStore;

/// Persistence collaborator used by chat sessions.
///
/// Conversations are only ever created and appended to; nothing here deletes.
#[async_trait]
pub trait ConversationStore: Send + Sync {
    /// Create a new, empty conversation.
    async fn create_conversation(
        &self,
        title: Option<String>,
        system_prompt: &str,
    ) -> Result<Conversation>;

    /// Look up a conversation by id.
    async fn get_conversation(&self, id: u64) -> Result<Option<Conversation>>;

    /// All turns of a conversation, oldest first.
    async fn list_turns(&self, conversation_id: u64) -> Result<Vec<ChatLog>>;

    /// Append a turn and return it with its assigned id.
    ///
    /// Fails with `NotFound` when the conversation does not exist.
    async fn append_turn(&self, turn: ChatLog) -> Result<ChatLog>;
}

/// Build the store selected by the storage config.
pub async fn open_store(config: &StorageConfig) -> Result<Arc<dyn ConversationStore>> {
    match config.kind {
        StorageKind::Memory => Ok(Arc::new(MemoryStore::new())),
        StorageKind::Jsonl => {
            let dir = if config.dir.is_empty() {
                utils::get_conversations_path()
            } else {
                utils::expand_home(&config.dir)
            };
            Ok(Arc::new(JsonlStore::open(Some(dir)).await?))
        }
    }
}
