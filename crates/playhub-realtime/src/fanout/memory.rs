//! In-process fan-out for single-node deployments and tests.

use async_trait::async_trait;
use tokio::sync::{broadcast, mpsc};
use tracing::warn;

use playhub_core::result::AppResult;

use super::{ClusterFanout, FanoutMessage};

/// Broadcast-channel fan-out. Engines sharing one instance behave like
/// nodes of a cluster.
#[derive(Debug)]
pub struct MemoryFanout {
    sender: broadcast::Sender<FanoutMessage>,
    buffer_size: usize,
}

impl MemoryFanout {
    /// Create a fan-out with the given per-subscriber buffer.
    pub fn new(buffer_size: usize) -> Self {
        let buffer_size = buffer_size.max(1);
        let (sender, _) = broadcast::channel(buffer_size);
        Self {
            sender,
            buffer_size,
        }
    }
}

#[async_trait]
impl ClusterFanout for MemoryFanout {
    async fn publish(&self, message: &FanoutMessage) -> AppResult<()> {
        let _ = self.sender.send(message.clone());
        Ok(())
    }

    async fn subscribe(&self) -> AppResult<mpsc::Receiver<FanoutMessage>> {
        let mut rx = self.sender.subscribe();
        let (tx, out) = mpsc::channel(self.buffer_size);
        tokio::spawn(async move {
            loop {
                match rx.recv().await {
                    Ok(message) => {
                        if tx.send(message).await.is_err() {
                            break;
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!(skipped, "Fan-out subscriber lagged");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        });
        Ok(out)
    }

    async fn health_check(&self) -> AppResult<bool> {
        Ok(true)
    }

    fn name(&self) -> &'static str {
        "memory"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::ServerMessage;

    #[tokio::test]
    async fn test_every_subscriber_receives() {
        let fanout = MemoryFanout::new(8);
        let mut a = fanout.subscribe().await.unwrap();
        let mut b = fanout.subscribe().await.unwrap();
        let message = FanoutMessage {
            origin: "node-1".into(),
            channel: "room:lobby".into(),
            message: ServerMessage::Subscribed {
                channel: "room:lobby".into(),
            },
        };
        fanout.publish(&message).await.unwrap();
        assert_eq!(a.recv().await.unwrap(), message);
        assert_eq!(b.recv().await.unwrap(), message);
    }
}
