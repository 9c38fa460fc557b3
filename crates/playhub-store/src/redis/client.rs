//! Redis connection management.

use redis::Client;
use redis::aio::{ConnectionManager, MultiplexedConnection, PubSub};
use tracing::info;

use playhub_core::config::store::RedisStoreConfig;
use playhub_core::error::{AppError, ErrorKind};
use playhub_core::result::AppResult;

/// Redis client wrapper with connection management.
///
/// Regular commands share one reconnecting [`ConnectionManager`]. Blocking
/// reads and pub/sub subscriptions get dedicated connections so they never
/// stall the shared one.
#[derive(Clone)]
pub struct RedisClient {
    /// Client used to open dedicated connections.
    client: Client,
    /// Redis connection manager (pooled, reconnecting).
    conn: ConnectionManager,
    /// Key prefix for all keys.
    key_prefix: String,
}

impl std::fmt::Debug for RedisClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisClient")
            .field("key_prefix", &self.key_prefix)
            .finish_non_exhaustive()
    }
}

impl RedisClient {
    /// Create a new Redis client from configuration.
    pub async fn connect(config: &RedisStoreConfig) -> AppResult<Self> {
        info!(url = %mask_redis_url(&config.url), "Connecting to Redis");

        let client = Client::open(config.url.as_str()).map_err(|e| {
            AppError::with_source(ErrorKind::Store, "Failed to create Redis client", e)
        })?;

        let conn = ConnectionManager::new(client.clone()).await.map_err(|e| {
            AppError::with_source(ErrorKind::Store, "Failed to connect to Redis", e)
        })?;

        info!("Successfully connected to Redis");
        Ok(Self {
            client,
            conn,
            key_prefix: config.key_prefix.clone(),
        })
    }

    /// Get a mutable clone of the connection manager.
    pub fn conn_mut(&self) -> ConnectionManager {
        self.conn.clone()
    }

    /// Open a dedicated connection for blocking commands (`XREADGROUP BLOCK`).
    pub async fn dedicated(&self) -> AppResult<MultiplexedConnection> {
        self.client
            .get_multiplexed_async_connection()
            .await
            .map_err(|e| AppError::with_source(ErrorKind::Store, "Failed to open Redis connection", e))
    }

    /// Open a pub/sub connection.
    pub async fn pubsub(&self) -> AppResult<PubSub> {
        self.client
            .get_async_pubsub()
            .await
            .map_err(|e| AppError::with_source(ErrorKind::Transport, "Failed to open Redis pub/sub", e))
    }

    /// Build a full key with the configured prefix.
    pub fn prefixed_key(&self, key: &str) -> String {
        format!("{}{key}", self.key_prefix)
    }

    /// Return the key prefix.
    pub fn prefix(&self) -> &str {
        &self.key_prefix
    }
}

/// Mask password in Redis URL for safe logging.
fn mask_redis_url(url: &str) -> String {
    if let Some(at_pos) = url.find('@') {
        if let Some(colon_pos) = url[..at_pos].rfind(':') {
            let scheme_end = url.find("://").map(|p| p + 3).unwrap_or(0);
            if colon_pos > scheme_end {
                return format!("{}:****@{}", &url[..colon_pos], &url[at_pos + 1..]);
            }
        }
    }
    url.to_string()
}
