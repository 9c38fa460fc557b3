//! Event transports for cross-node fan-out.
//!
//! A transport moves [`TransportEnvelope`]s between nodes on topics named
//! after the event namespace (`game.*` travels on `game`). Delivery is
//! at-least-once; receivers tolerate duplicates.

pub mod memory;
#[cfg(feature = "redis-streams")]
pub mod redis_streams;

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::info;

use playhub_core::config::EventsConfig;
use playhub_core::error::AppError;
use playhub_core::events::DomainEvent;
use playhub_core::result::AppResult;
use playhub_store::StoreManager;

pub use memory::MemoryTransport;
#[cfg(feature = "redis-streams")]
pub use redis_streams::RedisStreamsTransport;

/// An event as it travels between nodes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransportEnvelope {
    /// Node that published the event.
    pub origin: String,
    /// The event.
    pub event: DomainEvent,
}

/// Pluggable message transport.
#[async_trait]
pub trait EventTransport: Send + Sync + std::fmt::Debug + 'static {
    /// Publish an envelope on a topic.
    async fn publish(&self, topic: &str, envelope: &TransportEnvelope) -> AppResult<()>;

    /// Join a topic. Envelopes arrive on the returned receiver until it is
    /// dropped or the transport shuts down.
    async fn subscribe(&self, topic: &str) -> AppResult<mpsc::Receiver<TransportEnvelope>>;

    /// Probe reachability without publishing anything.
    async fn health_check(&self) -> AppResult<bool>;

    /// Stop background readers.
    fn shutdown(&self);

    /// Short transport name for logs and health output.
    fn name(&self) -> &'static str;
}

/// Build the transport selected by `events.transport`.
#[cfg_attr(not(feature = "redis-streams"), allow(unused_variables))]
pub fn from_config(
    config: &EventsConfig,
    node_id: &str,
    store: &StoreManager,
) -> AppResult<Arc<dyn EventTransport>> {
    match config.transport.as_str() {
        "memory" => {
            info!("Using in-memory event transport");
            Ok(Arc::new(MemoryTransport::new(config.channel_buffer_size)))
        }
        #[cfg(feature = "redis-streams")]
        "redis" => {
            let client = store.redis_client().cloned().ok_or_else(|| {
                AppError::configuration(
                    "The redis event transport requires store.provider = \"redis\"",
                )
            })?;
            let group = config
                .consumer_group
                .clone()
                .unwrap_or_else(|| node_id.to_string());
            info!(group = %group, "Using Redis Streams event transport");
            Ok(Arc::new(RedisStreamsTransport::new(
                client,
                group,
                node_id.to_string(),
                config,
            )))
        }
        other => Err(AppError::configuration(format!(
            "Unknown event transport: '{other}'. Supported: memory, redis"
        ))),
    }
}
