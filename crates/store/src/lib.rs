mod memory;
mod redis_store;


pub use memory::MemoryStore;
pub use redis_store::RedisStore;

use async_trait::async_trait;
use chatrelay_common::{ConversationRecord, Result};
use chatrelay_config::StoreConfig;
use std::sync::Arc;
use tracing::info;

/// Key-addressed conversation storage
///
/// Every backend must show the same observable behavior: a missing id is
/// `None` rather than an error, `set` overwrites the whole record, and
/// `delete` of an unknown id succeeds. There is no locking across calls, so
/// concurrent writers to one id race and the last `set` wins.
#[async_trait]
pub trait ConversationStore: Send + Sync {
    /// Short backend name for logs
    fn backend(&self) -> &'static str;

    /// Fetch a fresh copy of the record stored under `id`
    async fn get(&self, id: &str) -> Result<Option<ConversationRecord>>;

    /// Replace whatever is stored under `id`
    async fn set(&self, id: &str, record: &ConversationRecord) -> Result<()>;

    async fn has(&self, id: &str) -> Result<bool>;

    /// All records, in no particular order
    async fn list_all(&self) -> Result<Vec<ConversationRecord>>;

    async fn delete(&self, id: &str) -> Result<()>;

    /// Remove every record
    async fn clear(&self) -> Result<()>;

    /// Release backend resources
    async fn shutdown(&self) -> Result<()> {
        Ok(())
    }
}

/// Shared handle to the process-wide store
#[derive(Clone)]
pub struct StoreHandle {
    inner: Arc<dyn ConversationStore>,
}

impl StoreHandle {
    /// Create a new store handle
    pub fn new(store: impl ConversationStore + 'static) -> Self {
        Self {
            inner: Arc::new(store),
        }
    }

    pub fn backend(&self) -> &'static str {
        self.inner.backend()
    }

    pub async fn get(&self, id: &str) -> Result<Option<ConversationRecord>> {
        self.inner.get(id).await
    }

    pub async fn set(&self, id: &str, record: &ConversationRecord) -> Result<()> {
        self.inner.set(id, record).await
    }

    pub async fn has(&self, id: &str) -> Result<bool> {
        self.inner.has(id).await
    }

    pub async fn list_all(&self) -> Result<Vec<ConversationRecord>> {
        self.inner.list_all().await
    }

    pub async fn delete(&self, id: &str) -> Result<()> {
        self.inner.delete(id).await
    }

    pub async fn clear(&self) -> Result<()> {
        self.inner.clear().await
    }

    pub async fn shutdown(&self) -> Result<()> {
        self.inner.shutdown().await
    }
}

/// Factory for the configured store backend
pub struct StoreFactory;

impl StoreFactory {
    /// Build the backend selected by configuration. Called once at startup.
    pub async fn create(config: &StoreConfig) -> Result<StoreHandle> {
        if config.distributed_mode {
            let url = config.connection_string.as_deref().ok_or_else(|| {
                chatrelay_common::Error::Config(
                    "distributed mode requires a store connection string".into(),
                )
            })?;
            let store = RedisStore::connect(url).await?;
            info!("Using shared Redis conversation store");
            Ok(StoreHandle::new(store))
        } else {
            info!("Using in-memory conversation store");
            Ok(StoreHandle::new(MemoryStore::new()))
        }
    }
}
