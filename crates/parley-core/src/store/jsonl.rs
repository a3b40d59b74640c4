//! JSONL conversation store with an in-memory cache.
//!
//! File format: `~/.parley/conversations/{id}.jsonl`
//! - Line 1: `{"_type":"metadata","id":1,"title":null,"system_prompt":"...","created_at":"...","updated_at":"..."}`
//! - Line 2+: one `ChatLog` per line, oldest first

use std::collections::HashMap;
use std::path::PathBuf;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, warn};

use super::ConversationStore;
use crate::error::{GatewayError, Result};
use crate::types::{ChatLog, Conversation};
use crate::utils;

// ─────────────────────────────────────────────
// Conversation metadata (first line of JSONL)
// ─────────────────────────────────────────────

#[derive(Debug, Serialize, Deserialize)]
struct ConversationMetadata {
    #[serde(rename = "_type")]
    record_type: String,
    id: u64,
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    system_prompt: String,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl From<&Conversation> for ConversationMetadata {
    fn from(c: &Conversation) -> Self {
        ConversationMetadata {
            record_type: "metadata".to_string(),
            id: c.id,
            title: c.title.clone(),
            system_prompt: c.system_prompt.clone(),
            created_at: c.created_at,
            updated_at: c.updated_at,
        }
    }
}

#[derive(Clone)]
struct CachedConversation {
    conversation: Conversation,
    turns: Vec<ChatLog>,
}

// ─────────────────────────────────────────────
// JsonlStore
// ─────────────────────────────────────────────

/// Conversation store persisting each conversation to its own JSONL file.
pub struct JsonlStore {
    /// Directory where `.jsonl` conversation files are stored.
    dir: PathBuf,
    /// Conversations loaded or written during this process.
    cache: RwLock<HashMap<u64, CachedConversation>>,
    /// Highest id handed out so far.
    last_id: Mutex<u64>,
    /// Held across the load, push and rewrite of an append.
    appends: Mutex<()>,
}

impl JsonlStore {
    /// Open a store rooted at `dir` (default `~/.parley/conversations/`).
    ///
    /// The directory is created if it doesn't exist, and scanned once to find
    /// the highest existing conversation id.
    pub async fn open(dir: Option<PathBuf>) -> Result<Self> {
        let dir = dir.unwrap_or_else(utils::get_conversations_path);
        tokio::fs::create_dir_all(&dir).await?;

        let mut last_id = 0;
        let mut entries = tokio::fs::read_dir(&dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().map_or(true, |ext| ext != "jsonl") {
                continue;
            }
            if let Some(id) = path
                .file_stem()
                .and_then(|s| s.to_str())
                .and_then(|s| s.parse::<u64>().ok())
            {
                last_id = last_id.max(id);
            }
        }
        debug!(dir = %dir.display(), last_id, "Opened conversation store");

        Ok(JsonlStore {
            dir,
            cache: RwLock::new(HashMap::new()),
            last_id: Mutex::new(last_id),
            appends: Mutex::new(()),
        })
    }

    fn conversation_path(&self, id: u64) -> PathBuf {
        self.dir.join(format!("{id}.jsonl"))
    }

    /// Fetch a conversation from cache, falling back to disk.
    async fn load(&self, id: u64) -> Result<Option<CachedConversation>> {
        if let Some(cached) = self.cache.read().await.get(&id) {
            return Ok(Some(cached.clone()));
        }

        let Some(loaded) = self.load_from_disk(id).await? else {
            return Ok(None);
        };
        self.cache.write().await.insert(id, loaded.clone());
        Ok(Some(loaded))
    }

    async fn load_from_disk(&self, id: u64) -> Result<Option<CachedConversation>> {
        let path = self.conversation_path(id);
        let content = match tokio::fs::read_to_string(&path).await {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        let mut conversation = None;
        let mut turns = Vec::new();
        for (index, line) in content.lines().enumerate() {
            if line.trim().is_empty() {
                continue;
            }
            if index == 0 {
                match serde_json::from_str::<ConversationMetadata>(line) {
                    Ok(meta) if meta.record_type == "metadata" => {
                        conversation = Some(Conversation {
                            id: meta.id,
                            title: meta.title,
                            system_prompt: meta.system_prompt,
                            created_at: meta.created_at,
                            updated_at: meta.updated_at,
                        });
                        continue;
                    }
                    _ => {
                        warn!(path = %path.display(), "Conversation file has no metadata line");
                        return Ok(None);
                    }
                }
            }
            match serde_json::from_str::<ChatLog>(line) {
                Ok(turn) => turns.push(turn),
                Err(e) => warn!(path = %path.display(), line = index + 1, "Skipping bad turn: {}", e),
            }
        }

        let Some(conversation) = conversation else {
            return Ok(None);
        };
        debug!(
            "Loaded conversation {} with {} turns from disk",
            id,
            turns.len()
        );
        Ok(Some(CachedConversation {
            conversation,
            turns,
        }))
    }

    /// Write the whole conversation file (overwrite).
    async fn save_to_disk(&self, cached: &CachedConversation) -> Result<()> {
        let path = self.conversation_path(cached.conversation.id);

        let mut out = serde_json::to_string(&ConversationMetadata::from(&cached.conversation))?;
        out.push('\n');
        for turn in &cached.turns {
            out.push_str(&serde_json::to_string(turn)?);
            out.push('\n');
        }
        tokio::fs::write(&path, out).await?;

        debug!(
            "Saved conversation {} ({} turns) to {}",
            cached.conversation.id,
            cached.turns.len(),
            path.display()
        );
        Ok(())
    }
}

#[async_trait]
impl ConversationStore for JsonlStore {
    async fn create_conversation(
        &self,
        title: Option<String>,
        system_prompt: &str,
    ) -> Result<Conversation> {
        let id = {
            let mut last = self.last_id.lock().await;
            *last += 1;
            *last
        };
        let cached = CachedConversation {
            conversation: Conversation::new(id, title, system_prompt),
            turns: Vec::new(),
        };
        self.save_to_disk(&cached).await?;
        self.cache.write().await.insert(id, cached.clone());
        Ok(cached.conversation)
    }

    async fn get_conversation(&self, id: u64) -> Result<Option<Conversation>> {
        Ok(self.load(id).await?.map(|c| c.conversation))
    }

    async fn list_turns(&self, conversation_id: u64) -> Result<Vec<ChatLog>> {
        Ok(self
            .load(conversation_id)
            .await?
            .map(|c| c.turns)
            .unwrap_or_default())
    }

    async fn append_turn(&self, mut turn: ChatLog) -> Result<ChatLog> {
        let _guard = self.appends.lock().await;
        let mut cached = self
            .load(turn.conversation_id)
            .await?
            .ok_or_else(|| GatewayError::NotFound(format!("conversation {}", turn.conversation_id)))?;

        turn.id = cached.turns.len() as u64 + 1;
        cached.turns.push(turn.clone());
        cached.conversation.updated_at = Utc::now();

        self.save_to_disk(&cached).await?;
        self.cache.write().await.insert(turn.conversation_id, cached);
        Ok(turn)
    }
}

// ─────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::UsageStats;
    use std::sync::Arc;
    use tempfile::tempdir;

    #[tokio::test]
    async fn test_create_writes_metadata_line() {
        let dir = tempdir().unwrap();
        let store = JsonlStore::open(Some(dir.path().to_path_buf())).await.unwrap();
        let conv = store.create_conversation(Some("demo".into()), "Be nice.").await.unwrap();

        let content = std::fs::read_to_string(dir.path().join("1.jsonl")).unwrap();
        let lines: Vec<&str> = content.trim().lines().collect();
        assert_eq!(lines.len(), 1);
        let meta: serde_json::Value = serde_json::from_str(lines[0]).unwrap();
        assert_eq!(meta["_type"], "metadata");
        assert_eq!(meta["id"], conv.id);
        assert_eq!(meta["system_prompt"], "Be nice.");
    }

    #[tokio::test]
    async fn test_append_persists_turns() {
        let dir = tempdir().unwrap();
        let store = JsonlStore::open(Some(dir.path().to_path_buf())).await.unwrap();
        let conv = store.create_conversation(None, "").await.unwrap();

        store
            .append_turn(ChatLog::new(conv.id, "main", "", "Hello", "Hi!", UsageStats::new(2, 1, None)))
            .await
            .unwrap();

        let content = std::fs::read_to_string(dir.path().join("1.jsonl")).unwrap();
        let lines: Vec<&str> = content.trim().lines().collect();
        assert_eq!(lines.len(), 2);
        let turn: serde_json::Value = serde_json::from_str(lines[1]).unwrap();
        assert_eq!(turn["user_message"], "Hello");
        assert_eq!(turn["total_tokens"], 3);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_appends_are_all_kept() {
        let dir = tempdir().unwrap();
        let store = Arc::new(JsonlStore::open(Some(dir.path().to_path_buf())).await.unwrap());
        let conv = store.create_conversation(None, "").await.unwrap();

        let mut tasks = Vec::new();
        for i in 0..20 {
            let store = store.clone();
            tasks.push(tokio::spawn(async move {
                let msg = format!("message {i}");
                store
                    .append_turn(ChatLog::new(conv.id, "main", "", &msg, "ok", UsageStats::zero()))
                    .await
                    .unwrap()
            }));
        }
        let mut ids = Vec::new();
        for task in tasks {
            ids.push(task.await.unwrap().id);
        }
        ids.sort();
        assert_eq!(ids, (1..=20).collect::<Vec<u64>>());

        assert_eq!(store.list_turns(conv.id).await.unwrap().len(), 20);
        let reopened = JsonlStore::open(Some(dir.path().to_path_buf())).await.unwrap();
        assert_eq!(reopened.list_turns(conv.id).await.unwrap().len(), 20);
    }

    #[tokio::test]
    async fn test_persistence_round_trip() {
        let dir = tempdir().unwrap();

        {
            let store = JsonlStore::open(Some(dir.path().to_path_buf())).await.unwrap();
            let conv = store.create_conversation(None, "sys").await.unwrap();
            store
                .append_turn(ChatLog::new(conv.id, "main", "sys", "one", "1", UsageStats::zero()))
                .await
                .unwrap();
            store
                .append_turn(ChatLog::new(conv.id, "main", "sys", "two", "2", UsageStats::zero()))
                .await
                .unwrap();
        }

        // New store (empty cache) should load from disk and continue ids
        {
            let store = JsonlStore::open(Some(dir.path().to_path_buf())).await.unwrap();
            let conv = store.get_conversation(1).await.unwrap().unwrap();
            assert_eq!(conv.system_prompt, "sys");
            let turns = store.list_turns(1).await.unwrap();
            assert_eq!(turns.len(), 2);
            assert_eq!(turns[1].user_message, "two");
            assert_eq!(turns[1].id, 2);

            let next = store.create_conversation(None, "").await.unwrap();
            assert_eq!(next.id, 2);
        }
    }

    #[tokio::test]
    async fn test_append_unknown_conversation() {
        let dir = tempdir().unwrap();
        let store = JsonlStore::open(Some(dir.path().to_path_buf())).await.unwrap();
        let err = store
            .append_turn(ChatLog::new(5, "main", "", "q", "a", UsageStats::zero()))
            .await
            .unwrap_err();
        assert!(matches!(err, GatewayError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_ignores_non_jsonl_files() {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join("notes.txt"), "x").unwrap();
        std::fs::write(dir.path().join("99.bak"), "x").unwrap();
        let store = JsonlStore::open(Some(dir.path().to_path_buf())).await.unwrap();
        let conv = store.create_conversation(None, "").await.unwrap();
        assert_eq!(conv.id, 1);
    }
}
