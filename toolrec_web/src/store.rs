use async_trait::async_trait;
use redis::{aio::ConnectionManager, AsyncCommands, Client};
use std::collections::HashMap;
use thiserror::Error;
use tokio::sync::RwLock;
use toolrec::ExternalId;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("redis error: {0}")]
    Redis(#[from] redis::RedisError),
    #[error("store unavailable")]
    Unavailable,
}

/// Read side of the published lists
#[async_trait]
pub trait ListStore: Send + Sync {
    /// The list under `key`, empty when the key is absent or expired
    async fn get_list(&self, key: &str) -> Result<Vec<ExternalId>, StoreError>;

    async fn ping(&self) -> Result<(), StoreError>;
}

pub struct RedisStore {
    connection: ConnectionManager,
}

impl RedisStore {
    pub async fn connect(url: &str) -> Result<RedisStore, StoreError> {
        let client = Client::open(url)?;
        let connection = ConnectionManager::new(client).await?;

        Ok(RedisStore { connection })
    }
}

#[async_trait]
impl ListStore for RedisStore {
    async fn get_list(&self, key: &str) -> Result<Vec<ExternalId>, StoreError> {
        let mut connection = self.connection.clone();
        let values: Vec<String> = connection.lrange(key, 0, -1).await?;

        // Redis keeps integers as their decimal text
        Ok(values.iter().map(|v| ExternalId::parse(v)).collect())
    }

    async fn ping(&self) -> Result<(), StoreError> {
        let mut connection = self.connection.clone();
        redis::cmd("PING")
            .query_async::<_, String>(&mut connection)
            .await?;
        Ok(())
    }
}

/// In-process store for tests and local runs
#[derive(Debug, Default)]
pub struct MemoryStore {
    lists: RwLock<HashMap<String, Vec<ExternalId>>>,
    unavailable: bool,
}

impl MemoryStore {
    pub fn new() -> MemoryStore {
        MemoryStore::default()
    }

    /// A store whose every call fails
    pub fn unavailable() -> MemoryStore {
        MemoryStore {
            lists: RwLock::default(),
            unavailable: true,
        }
    }

    pub async fn insert(&self, key: impl Into<String>, items: Vec<ExternalId>) {
        self.lists.write().await.insert(key.into(), items);
    }
}

#[async_trait]
impl ListStore for MemoryStore {
    async fn get_list(&self, key: &str) -> Result<Vec<ExternalId>, StoreError> {
        if self.unavailable {
            return Err(StoreError::Unavailable);
        }
        Ok(self.lists.read().await.get(key).cloned().unwrap_or_default())
    }

    async fn ping(&self) -> Result<(), StoreError> {
        if self.unavailable {
            return Err(StoreError::Unavailable);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn absent_keys_read_as_empty() {
        let store = MemoryStore::new();
        store.insert("k", vec![ExternalId::Int(3)]).await;

        assert_eq!(store.get_list("k").await.unwrap(), vec![ExternalId::Int(3)]);
        assert!(store.get_list("missing").await.unwrap().is_empty());
        assert!(store.ping().await.is_ok());
    }

    #[tokio::test]
    async fn unavailable_store_fails() {
        let store = MemoryStore::unavailable();
        assert!(matches!(store.get_list("k").await, Err(StoreError::Unavailable)));
        assert!(store.ping().await.is_err());
    }
}
