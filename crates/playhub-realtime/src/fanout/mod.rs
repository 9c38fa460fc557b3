//! Cluster fan-out of flushed deliveries.
//!
//! Every node publishes what its batching optimizer flushes; every node's
//! listener hands deliveries from other nodes to its own sockets and
//! fallback clients. Local subscribers are served directly, so a node skips
//! its own echoes.

pub mod memory;
#[cfg(feature = "redis-pubsub")]
pub mod redis_pubsub;

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::info;

use playhub_core::config::RealtimeConfig;
use playhub_core::error::AppError;
use playhub_core::result::AppResult;
use playhub_store::StoreManager;

use crate::message::ServerMessage;

pub use memory::MemoryFanout;
#[cfg(feature = "redis-pubsub")]
pub use redis_pubsub::RedisFanout;

/// A delivery travelling between nodes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FanoutMessage {
    /// Publishing node.
    pub origin: String,
    /// Target channel.
    pub channel: String,
    /// Message for the channel's subscribers.
    pub message: ServerMessage,
}

/// Cross-node broadcast adapter.
#[async_trait]
pub trait ClusterFanout: Send + Sync + std::fmt::Debug + 'static {
    /// Broadcast to every node.
    async fn publish(&self, message: &FanoutMessage) -> AppResult<()>;

    /// Receive broadcasts from every node, including this one.
    async fn subscribe(&self) -> AppResult<mpsc::Receiver<FanoutMessage>>;

    /// Probe reachability.
    async fn health_check(&self) -> AppResult<bool>;

    /// Short adapter name for logs and health output.
    fn name(&self) -> &'static str;
}

/// Pick the adapter matching the store backend: Redis pub/sub when the store
/// is Redis, in-process otherwise.
pub fn from_store(store: &StoreManager, config: &RealtimeConfig) -> AppResult<Arc<dyn ClusterFanout>> {
    #[cfg(feature = "redis-pubsub")]
    if let Some(client) = store.redis_client() {
        info!(channel = %config.fanout_channel, "Using Redis pub/sub cluster fan-out");
        return Ok(Arc::new(RedisFanout::new(
            client.clone(),
            &config.fanout_channel,
            config.channel_buffer_size,
        )));
    }

    if store.store().backend_name() != "memory" {
        return Err(AppError::configuration(format!(
            "No cluster fan-out available for the '{}' store",
            store.store().backend_name()
        )));
    }
    info!("Using in-memory cluster fan-out");
    Ok(Arc::new(MemoryFanout::new(config.channel_buffer_size)))
}
