use crate::ConversationStore;
use async_trait::async_trait;
use chatrelay_common::{ConversationRecord, Error, Result};
use futures::future::try_join_all;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

/// Store backed by a shared Redis instance
///
/// Each conversation lives under its raw id as a JSON string. Keys are not
/// namespaced: `list_all` reads every key in the database and `clear` issues
/// `FLUSHALL`, which also wipes keys written by anything else sharing the
/// instance.
pub struct RedisStore {
    connection: RwLock<Option<ConnectionManager>>,
}

impl RedisStore {
    /// Connect to the Redis instance at `url`
    pub async fn connect(url: &str) -> Result<Self> {
        let client = redis::Client::open(url).map_err(store_error)?;
        let manager = client.get_connection_manager().await.map_err(store_error)?;
        info!("Connected to Redis conversation store");

        Ok(Self {
            connection: RwLock::new(Some(manager)),
        })
    }

    async fn connection(&self) -> Result<ConnectionManager> {
        self.connection
            .read()
            .await
            .clone()
            .ok_or_else(|| Error::Store("store connection already closed".into()))
    }
}

fn store_error(err: redis::RedisError) -> Error {
    Error::Store(err.to_string())
}

/// Parse a stored value. Unparseable values are errors, never empty records.
pub(crate) fn decode_record(id: &str, raw: &str) -> Result<ConversationRecord> {
    serde_json::from_str(raw)
        .map_err(|e| Error::Store(format!("value under {} is not a conversation: {}", id, e)))
}

/// Decode `(key, value)` pairs read by a listing.
///
/// A key deleted between `KEYS` and `GET` comes back as `None` and is skipped.
pub(crate) fn decode_listing<'a, I>(entries: I) -> Result<Vec<ConversationRecord>>
where
    I: IntoIterator<Item = (&'a str, Option<String>)>,
{
    entries
        .into_iter()
        .filter_map(|(key, value)| value.map(|raw| decode_record(key, &raw)))
        .collect()
}

pub(crate) fn encode_record(record: &ConversationRecord) -> Result<String> {
    serde_json::to_string(record).map_err(|e| Error::Store(e.to_string()))
}

#[async_trait]
impl ConversationStore for RedisStore {
    fn backend(&self) -> &'static str {
        "redis"
    }

    async fn get(&self, id: &str) -> Result<Option<ConversationRecord>> {
        let mut con = self.connection().await?;
        let raw: Option<String> = con.get(id).await.map_err(store_error)?;

        raw.map(|value| decode_record(id, &value)).transpose()
    }

    async fn set(&self, id: &str, record: &ConversationRecord) -> Result<()> {
        let payload = encode_record(record)?;
        let mut con = self.connection().await?;
        let _: () = con.set(id, payload).await.map_err(store_error)?;
        Ok(())
    }

    async fn has(&self, id: &str) -> Result<bool> {
        let mut con = self.connection().await?;
        let exists: bool = con.exists(id).await.map_err(store_error)?;
        Ok(exists)
    }

    async fn list_all(&self) -> Result<Vec<ConversationRecord>> {
        let mut con = self.connection().await?;
        let keys: Vec<String> = con.keys("*").await.map_err(store_error)?;
        debug!("Listing {} stored conversations", keys.len());

        let values = try_join_all(keys.iter().map(|key| {
            let mut con = con.clone();
            async move {
                let value: Option<String> = con.get(key).await?;
                Ok::<_, redis::RedisError>(value)
            }
        }))
        .await
        .map_err(store_error)?;

        decode_listing(keys.iter().map(String::as_str).zip(values))
    }

    async fn delete(&self, id: &str) -> Result<()> {
        let mut con = self.connection().await?;
        let _: () = con.del(id).await.map_err(store_error)?;
        Ok(())
    }

    async fn clear(&self) -> Result<()> {
        warn!("Flushing the entire Redis instance");
        let mut con = self.connection().await?;
        let _: () = redis::cmd("FLUSHALL")
            .query_async(&mut con)
            .await
            .map_err(store_error)?;
        Ok(())
    }

    async fn shutdown(&self) -> Result<()> {
        if self.connection.write().await.take().is_some() {
            info!("Closed Redis conversation store");
        }
        Ok(())
    }
}
