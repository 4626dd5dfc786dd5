use crate::ConversationStore;
use async_trait::async_trait;
use chatrelay_common::{ConversationRecord, Result};
use std::collections::HashMap;
use tokio::sync::RwLock;

/// Process-local store. Records are lost when the process exits.
#[derive(Debug, Default)]
pub struct MemoryStore {
    records: RwLock<HashMap<String, ConversationRecord>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ConversationStore for MemoryStore {
    fn backend(&self) -> &'static str {
        "memory"
    }

    async fn get(&self, id: &str) -> Result<Option<ConversationRecord>> {
        Ok(self.records.read().await.get(id).cloned())
    }

    async fn set(&self, id: &str, record: &ConversationRecord) -> Result<()> {
        self.records
            .write()
            .await
            .insert(id.to_string(), record.clone());
        Ok(())
    }

    async fn has(&self, id: &str) -> Result<bool> {
        Ok(self.records.read().await.contains_key(id))
    }

    async fn list_all(&self) -> Result<Vec<ConversationRecord>> {
        Ok(self.records.read().await.values().cloned().collect())
    }

    async fn delete(&self, id: &str) -> Result<()> {
        self.records.write().await.remove(id);
        Ok(())
    }

    async fn clear(&self) -> Result<()> {
        self.records.write().await.clear();
        Ok(())
    }
}
