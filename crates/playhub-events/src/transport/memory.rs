//! In-process transport for single-node deployments and tests.

use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::{RwLock, broadcast, mpsc};
use tokio_util::sync::CancellationToken;
use tracing::warn;

use playhub_core::result::AppResult;

use super::{EventTransport, TransportEnvelope};

/// In-memory transport: one broadcast channel per topic.
///
/// Several brokers sharing one instance behave like nodes of a cluster.
#[derive(Debug)]
pub struct MemoryTransport {
    /// Topic name → broadcast sender
    topics: RwLock<HashMap<String, broadcast::Sender<TransportEnvelope>>>,
    /// Buffer size for topics
    buffer_size: usize,
    shutdown: CancellationToken,
}

impl MemoryTransport {
    /// Create a new in-memory transport
    pub fn new(buffer_size: usize) -> Self {
        Self {
            topics: RwLock::new(HashMap::new()),
            buffer_size,
            shutdown: CancellationToken::new(),
        }
    }

    async fn sender(&self, topic: &str) -> broadcast::Sender<TransportEnvelope> {
        if let Some(tx) = self.topics.read().await.get(topic) {
            return tx.clone();
        }
        let mut topics = self.topics.write().await;
        topics
            .entry(topic.to_string())
            .or_insert_with(|| broadcast::channel(self.buffer_size).0)
            .clone()
    }
}

#[async_trait]
impl EventTransport for MemoryTransport {
    async fn publish(&self, topic: &str, envelope: &TransportEnvelope) -> AppResult<()> {
        // No receivers is not an error.
        let _ = self.sender(topic).await.send(envelope.clone());
        Ok(())
    }

    async fn subscribe(&self, topic: &str) -> AppResult<mpsc::Receiver<TransportEnvelope>> {
        let mut rx = self.sender(topic).await.subscribe();
        let (tx, out) = mpsc::channel(self.buffer_size);
        let shutdown = self.shutdown.clone();
        let topic = topic.to_string();

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    received = rx.recv() => match received {
                        Ok(envelope) => {
                            if tx.send(envelope).await.is_err() {
                                break;
                            }
                        }
                        Err(broadcast::error::RecvError::Lagged(skipped)) => {
                            warn!(topic = %topic, skipped, "Transport subscriber lagged");
                        }
                        Err(broadcast::error::RecvError::Closed) => break,
                    },
                }
            }
        });

        Ok(out)
    }

    async fn health_check(&self) -> AppResult<bool> {
        Ok(!self.shutdown.is_cancelled())
    }

    fn shutdown(&self) {
        self.shutdown.cancel();
    }

    fn name(&self) -> &'static str {
        "memory"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use playhub_core::events::{AggregateRef, DomainEvent, EventMetadata, EventPayload};
    use playhub_core::types::{GameId, GameStatus};
    use uuid::Uuid;

    fn envelope(origin: &str) -> TransportEnvelope {
        TransportEnvelope {
            origin: origin.into(),
            event: DomainEvent::new(
                &AggregateRef::game(GameId::new()),
                EventPayload::PlayerLeft {
                    identity_id: "u".into(),
                    status: GameStatus::Paused,
                },
                EventMetadata {
                    identity_id: None,
                    session_id: None,
                    timestamp: Utc::now(),
                    version: 1,
                    correlation_id: Uuid::new_v4(),
                    causation_id: None,
                },
            ),
        }
    }

    #[tokio::test]
    async fn test_subscribers_receive_published() {
        let transport = MemoryTransport::new(16);
        let mut a = transport.subscribe("game").await.unwrap();
        let mut b = transport.subscribe("game").await.unwrap();
        transport.publish("game", &envelope("n1")).await.unwrap();
        assert_eq!(a.recv().await.unwrap().origin, "n1");
        assert_eq!(b.recv().await.unwrap().origin, "n1");
    }

    #[tokio::test]
    async fn test_publish_without_subscribers_is_ok() {
        let transport = MemoryTransport::new(16);
        assert!(transport.publish("game", &envelope("n1")).await.is_ok());
    }

    #[tokio::test]
    async fn test_shutdown_closes_receivers() {
        let transport = MemoryTransport::new(16);
        let mut rx = transport.subscribe("game").await.unwrap();
        transport.shutdown();
        assert!(rx.recv().await.is_none());
        assert!(!transport.health_check().await.unwrap());
    }
}
