//! Store manager that dispatches to the configured provider.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::info;

use playhub_core::config::StoreConfig;
use playhub_core::error::AppError;
use playhub_core::result::AppResult;
use playhub_core::traits::store::{StateStore, StoreOp, StoreReply};

use crate::memory::MemoryStore;

/// Store manager that wraps the configured state store.
///
/// The provider is selected at construction time based on configuration.
/// Components hold it as `Arc<StoreManager>`.
#[derive(Debug, Clone)]
pub struct StoreManager {
    /// The inner store.
    inner: Arc<dyn StateStore>,
    /// Redis client, present when the Redis provider is active.
    #[cfg(feature = "redis-backend")]
    redis: Option<crate::redis::RedisClient>,
}

impl StoreManager {
    /// Create a new store manager from configuration.
    pub async fn new(config: &StoreConfig) -> AppResult<Self> {
        match config.provider.as_str() {
            #[cfg(feature = "redis-backend")]
            "redis" => {
                info!("Initializing Redis state store");
                let client = crate::redis::RedisClient::connect(&config.redis).await?;
                let store = crate::redis::RedisStore::new(client.clone());
                Ok(Self {
                    inner: Arc::new(store),
                    redis: Some(client),
                })
            }
            "memory" => {
                info!("Initializing in-memory state store");
                Ok(Self::from_store(Arc::new(MemoryStore::new())))
            }
            other => Err(AppError::configuration(format!(
                "Unknown store provider: '{other}'. Supported: memory, redis"
            ))),
        }
    }

    /// Create a store manager from an existing store (for testing).
    pub fn from_store(store: Arc<dyn StateStore>) -> Self {
        Self {
            inner: store,
            #[cfg(feature = "redis-backend")]
            redis: None,
        }
    }

    /// A fresh in-memory store manager.
    pub fn memory() -> Self {
        Self::from_store(Arc::new(MemoryStore::new()))
    }

    /// Get a reference to the inner store.
    pub fn store(&self) -> &dyn StateStore {
        self.inner.as_ref()
    }

    /// The Redis client, when the Redis provider is active.
    #[cfg(feature = "redis-backend")]
    pub fn redis_client(&self) -> Option<&crate::redis::RedisClient> {
        self.redis.as_ref()
    }

    /// Get a typed value by deserializing from JSON.
    pub async fn get_json<T: serde::de::DeserializeOwned>(&self, key: &str) -> AppResult<Option<T>> {
        match self.inner.get(key).await? {
            Some(value) => {
                let parsed = serde_json::from_str(&value)?;
                Ok(Some(parsed))
            }
            None => Ok(None),
        }
    }

    /// Set a typed value by serializing to JSON.
    pub async fn set_json<T: serde::Serialize + Sync>(
        &self,
        key: &str,
        value: &T,
        ttl: Option<Duration>,
    ) -> AppResult<()> {
        let json = serde_json::to_string(value)?;
        self.inner.set(key, &json, ttl).await
    }
}

#[async_trait]
impl StateStore for StoreManager {
    async fn get(&self, key: &str) -> AppResult<Option<String>> {
        self.inner.get(key).await
    }

    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> AppResult<()> {
        self.inner.set(key, value, ttl).await
    }

    async fn set_nx(&self, key: &str, value: &str, ttl: Option<Duration>) -> AppResult<bool> {
        self.inner.set_nx(key, value, ttl).await
    }

    async fn delete(&self, key: &str) -> AppResult<bool> {
        self.inner.delete(key).await
    }

    async fn exists(&self, key: &str) -> AppResult<bool> {
        self.inner.exists(key).await
    }

    async fn expire(&self, key: &str, ttl: Duration) -> AppResult<bool> {
        self.inner.expire(key, ttl).await
    }

    async fn sadd(&self, key: &str, member: &str) -> AppResult<bool> {
        self.inner.sadd(key, member).await
    }

    async fn srem(&self, key: &str, member: &str) -> AppResult<bool> {
        self.inner.srem(key, member).await
    }

    async fn sismember(&self, key: &str, member: &str) -> AppResult<bool> {
        self.inner.sismember(key, member).await
    }

    async fn smembers(&self, key: &str) -> AppResult<Vec<String>> {
        self.inner.smembers(key).await
    }

    async fn zadd(&self, key: &str, score: f64, member: &str) -> AppResult<()> {
        self.inner.zadd(key, score, member).await
    }

    async fn zrem(&self, key: &str, member: &str) -> AppResult<bool> {
        self.inner.zrem(key, member).await
    }

    async fn zcard(&self, key: &str) -> AppResult<u64> {
        self.inner.zcard(key).await
    }

    async fn zrevrange(&self, key: &str, start: isize, stop: isize) -> AppResult<Vec<String>> {
        self.inner.zrevrange(key, start, stop).await
    }

    async fn rpush(&self, key: &str, value: &str) -> AppResult<u64> {
        self.inner.rpush(key, value).await
    }

    async fn lpush(&self, key: &str, value: &str) -> AppResult<u64> {
        self.inner.lpush(key, value).await
    }

    async fn lrange(&self, key: &str, start: isize, stop: isize) -> AppResult<Vec<String>> {
        self.inner.lrange(key, start, stop).await
    }

    async fn ltrim(&self, key: &str, start: isize, stop: isize) -> AppResult<()> {
        self.inner.ltrim(key, start, stop).await
    }

    async fn stream_append(&self, key: &str, payload: &str, max_len: usize) -> AppResult<String> {
        self.inner.stream_append(key, payload, max_len).await
    }

    async fn stream_len(&self, key: &str) -> AppResult<u64> {
        self.inner.stream_len(key).await
    }

    async fn pipeline(&self, ops: Vec<StoreOp>) -> AppResult<Vec<StoreReply>> {
        self.inner.pipeline(ops).await
    }

    async fn health_check(&self) -> AppResult<bool> {
        self.inner.health_check().await
    }

    fn backend_name(&self) -> &'static str {
        self.inner.backend_name()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::{Deserialize, Serialize};

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Sample {
        n: u32,
    }

    #[tokio::test]
    async fn test_json_helpers() {
        let manager = StoreManager::memory();
        manager.set_json("p", &Sample { n: 7 }, None).await.unwrap();
        let back: Option<Sample> = manager.get_json("p").await.unwrap();
        assert_eq!(back, Some(Sample { n: 7 }));
        assert_eq!(manager.backend_name(), "memory");
    }

    #[tokio::test]
    async fn test_unknown_provider_is_rejected() {
        let config = StoreConfig {
            provider: "etcd".into(),
            ..StoreConfig::default()
        };
        let err = StoreManager::new(&config).await.unwrap_err();
        assert_eq!(err.kind, playhub_core::error::ErrorKind::Configuration);
    }
}
