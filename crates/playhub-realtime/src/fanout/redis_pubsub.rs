//! Redis pub/sub fan-out for multi-node deployments.

use async_trait::async_trait;
use futures::StreamExt;
use tokio::sync::mpsc;
use tracing::{error, info, warn};

use playhub_core::error::{AppError, ErrorKind};
use playhub_core::result::AppResult;
use playhub_store::redis::RedisClient;

use super::{ClusterFanout, FanoutMessage};

/// Publishes deliveries on one Redis channel shared by every node.
#[derive(Debug, Clone)]
pub struct RedisFanout {
    client: RedisClient,
    channel: String,
    buffer_size: usize,
}

impl RedisFanout {
    /// Create a fan-out on `channel` (the store key prefix is applied).
    pub fn new(client: RedisClient, channel: &str, buffer_size: usize) -> Self {
        let channel = client.prefixed_key(channel);
        Self {
            client,
            channel,
            buffer_size: buffer_size.max(1),
        }
    }
}

#[async_trait]
impl ClusterFanout for RedisFanout {
    async fn publish(&self, message: &FanoutMessage) -> AppResult<()> {
        let payload = serde_json::to_string(message)?;
        let mut conn = self.client.conn_mut();
        redis::cmd("PUBLISH")
            .arg(&self.channel)
            .arg(payload)
            .query_async::<i64>(&mut conn)
            .await
            .map_err(|e| AppError::with_source(ErrorKind::Transport, "Redis PUBLISH failed", e))?;
        Ok(())
    }

    async fn subscribe(&self) -> AppResult<mpsc::Receiver<FanoutMessage>> {
        let mut pubsub = self.client.pubsub().await?;
        pubsub
            .subscribe(&self.channel)
            .await
            .map_err(|e| AppError::with_source(ErrorKind::Transport, "Redis SUBSCRIBE failed", e))?;
        info!(channel = %self.channel, "Subscribed to cluster fan-out");

        let (tx, rx) = mpsc::channel(self.buffer_size);
        let channel = self.channel.clone();
        tokio::spawn(async move {
            let mut messages = pubsub.into_on_message();
            while let Some(msg) = messages.next().await {
                let payload: String = match msg.get_payload() {
                    Ok(payload) => payload,
                    Err(e) => {
                        warn!(channel = %channel, error = %e, "Unreadable fan-out payload");
                        continue;
                    }
                };
                match serde_json::from_str::<FanoutMessage>(&payload) {
                    Ok(message) => {
                        if tx.send(message).await.is_err() {
                            break;
                        }
                    }
                    Err(e) => warn!(channel = %channel, error = %e, "Malformed fan-out message"),
                }
            }
            error!(channel = %channel, "Cluster fan-out subscription ended");
        });
        Ok(rx)
    }

    async fn health_check(&self) -> AppResult<bool> {
        let mut conn = self.client.conn_mut();
        let pong = redis::cmd("PING")
            .query_async::<String>(&mut conn)
            .await
            .map_err(|e| AppError::with_source(ErrorKind::Transport, "Redis PING failed", e))?;
        Ok(pong == "PONG")
    }

    fn name(&self) -> &'static str {
        "redis"
    }
}
