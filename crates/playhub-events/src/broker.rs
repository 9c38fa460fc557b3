//! Event broker: durable publish, local dispatch, and cluster fan-out.

use std::collections::HashSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::{Mutex, RwLock};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use playhub_core::events::{
    AggregateRef, DomainEvent, EventMetadata, EventPattern, EventPayload, MetadataOverrides,
};
use playhub_core::result::AppResult;
use playhub_core::traits::store::StateStore;
use playhub_store::StoreManager;

use crate::handler::EventHandler;
use crate::log::{EventLog, Snapshot};
use crate::transport::{EventTransport, TransportEnvelope};

/// Broker counters.
#[derive(Debug, Default)]
pub struct BrokerStats {
    /// Events durably appended by this node.
    pub published: AtomicU64,
    /// Events received from other nodes.
    pub received: AtomicU64,
    /// Handler invocations that returned an error.
    pub handler_failures: AtomicU64,
    /// Transport publishes that failed after a durable append.
    pub transport_failures: AtomicU64,
}

/// Reachability of the broker's dependencies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct BrokerHealth {
    /// Event transport reachable.
    pub transport: bool,
    /// Shared store reachable.
    pub store: bool,
}

struct Registration {
    pattern: EventPattern,
    handler: Arc<dyn EventHandler>,
}

/// Local handler table, shared with transport listener tasks.
#[derive(Default)]
struct Dispatcher {
    registrations: RwLock<Vec<Registration>>,
    stats: BrokerStats,
}

impl Dispatcher {
    /// Invoke every matching handler in its own task.
    async fn dispatch(self: &Arc<Self>, event: &DomainEvent) -> usize {
        let registrations = self.registrations.read().await;
        let mut invoked = 0;
        for registration in registrations
            .iter()
            .filter(|r| r.pattern.matches(&event.event_type))
        {
            let handler = Arc::clone(&registration.handler);
            let event = event.clone();
            let dispatcher = Arc::clone(self);
            tokio::spawn(async move {
                if let Err(e) = handler.handle(&event).await {
                    dispatcher
                        .stats
                        .handler_failures
                        .fetch_add(1, Ordering::Relaxed);
                    warn!(
                        handler = %handler.name(),
                        event_type = %event.event_type,
                        event_id = %event.id,
                        error = %e,
                        "Event handler failed"
                    );
                }
            });
            invoked += 1;
        }
        invoked
    }
}

/// Event broker.
///
/// `publish` is complete once the event is in the aggregate log; fan-out to
/// other nodes is best-effort and local handlers never block the caller.
pub struct EventBroker {
    node_id: String,
    log: EventLog,
    store: Arc<StoreManager>,
    transport: Arc<dyn EventTransport>,
    dispatcher: Arc<Dispatcher>,
    joined_topics: Mutex<HashSet<String>>,
    shutdown: CancellationToken,
}

impl std::fmt::Debug for EventBroker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBroker")
            .field("node_id", &self.node_id)
            .field("transport", &self.transport.name())
            .finish_non_exhaustive()
    }
}

impl EventBroker {
    /// Create a broker.
    pub fn new(
        node_id: impl Into<String>,
        store: Arc<StoreManager>,
        transport: Arc<dyn EventTransport>,
        stream_max_len: usize,
    ) -> Self {
        Self {
            node_id: node_id.into(),
            log: EventLog::new(Arc::clone(&store), stream_max_len),
            store,
            transport,
            dispatcher: Arc::new(Dispatcher::default()),
            joined_topics: Mutex::new(HashSet::new()),
            shutdown: CancellationToken::new(),
        }
    }

    /// This node's id.
    pub fn node_id(&self) -> &str {
        &self.node_id
    }

    /// The underlying event log.
    pub fn log(&self) -> &EventLog {
        &self.log
    }

    /// Counters.
    pub fn stats(&self) -> &BrokerStats {
        &self.dispatcher.stats
    }

    /// Publish an event for an aggregate.
    ///
    /// The version defaults to the aggregate's next version. If the durable
    /// append fails the error is returned and nothing is delivered.
    pub async fn publish(
        &self,
        aggregate: &AggregateRef,
        payload: EventPayload,
        overrides: MetadataOverrides,
    ) -> AppResult<DomainEvent> {
        let version = match overrides.version {
            Some(v) => v,
            None => self.log.current_version(&aggregate.aggregate_id).await? + 1,
        };
        let metadata = EventMetadata {
            identity_id: overrides.identity_id,
            session_id: overrides.session_id,
            timestamp: Utc::now(),
            version,
            correlation_id: overrides.correlation_id.unwrap_or_else(Uuid::new_v4),
            causation_id: overrides.causation_id,
        };
        let event = DomainEvent::new(aggregate, payload, metadata);

        self.log.append(&event).await?;
        self.dispatcher
            .stats
            .published
            .fetch_add(1, Ordering::Relaxed);

        let envelope = TransportEnvelope {
            origin: self.node_id.clone(),
            event: event.clone(),
        };
        if let Err(e) = self.transport.publish(event.topic(), &envelope).await {
            self.dispatcher
                .stats
                .transport_failures
                .fetch_add(1, Ordering::Relaxed);
            warn!(
                event_type = %event.event_type,
                aggregate_id = %event.aggregate_id,
                error = %e,
                "Transport publish failed; event is persisted but not fanned out"
            );
        }

        let invoked = self.dispatcher.dispatch(&event).await;
        debug!(
            event_type = %event.event_type,
            aggregate_id = %event.aggregate_id,
            version,
            handlers = invoked,
            "Event published"
        );
        Ok(event)
    }

    /// Register a local handler for an exact type or a namespace wildcard
    /// (`game.*`). The first subscription on a namespace joins its topic.
    pub async fn subscribe(&self, pattern: &str, handler: Arc<dyn EventHandler>) -> AppResult<()> {
        let pattern = EventPattern::parse(pattern);
        let topic = pattern.topic().to_string();
        info!(pattern = %pattern, handler = %handler.name(), "Event handler registered");
        self.dispatcher
            .registrations
            .write()
            .await
            .push(Registration { pattern, handler });

        let mut joined = self.joined_topics.lock().await;
        if joined.contains(&topic) {
            return Ok(());
        }
        let mut rx = self.transport.subscribe(&topic).await?;
        joined.insert(topic.clone());

        let dispatcher = Arc::clone(&self.dispatcher);
        let node_id = self.node_id.clone();
        let shutdown = self.shutdown.clone();
        tokio::spawn(async move {
            loop {
                let envelope = tokio::select! {
                    _ = shutdown.cancelled() => break,
                    received = rx.recv() => match received {
                        Some(envelope) => envelope,
                        None => break,
                    },
                };
                if envelope.origin == node_id {
                    continue;
                }
                dispatcher.stats.received.fetch_add(1, Ordering::Relaxed);
                dispatcher.dispatch(&envelope.event).await;
            }
            debug!(topic = %topic, "Topic listener stopped");
        });
        Ok(())
    }

    /// Events of an aggregate after `from_version`.
    pub async fn replay(&self, aggregate_id: &str, from_version: u64) -> AppResult<Vec<DomainEvent>> {
        self.log.replay(aggregate_id, from_version).await
    }

    /// Events of an aggregate recorded at or after `since`.
    pub async fn replay_from_timestamp(
        &self,
        aggregate_id: &str,
        since: DateTime<Utc>,
    ) -> AppResult<Vec<DomainEvent>> {
        self.log.replay_from_timestamp(aggregate_id, since).await
    }

    /// Store a snapshot.
    pub async fn snapshot<T: Serialize + Sync>(
        &self,
        aggregate_id: &str,
        version: u64,
        state: &T,
    ) -> AppResult<Snapshot> {
        self.log.snapshot(aggregate_id, version, state).await
    }

    /// Latest snapshot.
    pub async fn get_snapshot(&self, aggregate_id: &str) -> AppResult<Option<Snapshot>> {
        self.log.get_snapshot(aggregate_id).await
    }

    /// Probe transport and store. Nothing is published.
    pub async fn health_check(&self) -> BrokerHealth {
        let transport = self.transport.health_check().await.unwrap_or(false);
        let store = self.store.health_check().await.unwrap_or(false);
        BrokerHealth { transport, store }
    }

    /// Stop topic listeners and the transport's readers.
    pub fn shutdown(&self) {
        self.shutdown.cancel();
        self.transport.shutdown();
        info!(node_id = %self.node_id, "Event broker stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use playhub_core::error::{AppError, ErrorKind};
    use playhub_core::types::{GameId, GameStatus};
    use playhub_store::MemoryStore;
    use tokio::sync::mpsc;

    use crate::handler::handler_fn;
    use crate::transport::MemoryTransport;

    fn left(identity: &str) -> EventPayload {
        EventPayload::PlayerLeft {
            identity_id: identity.into(),
            status: GameStatus::Paused,
        }
    }

    fn recorder(name: &str) -> (Arc<dyn EventHandler>, mpsc::UnboundedReceiver<DomainEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let handler: Arc<dyn EventHandler> = Arc::new(handler_fn(name.to_string(), move |event| {
            let tx = tx.clone();
            async move {
                let _ = tx.send(event);
                Ok(())
            }
        }));
        (handler, rx)
    }

    fn broker(node: &str, store: Arc<StoreManager>, transport: Arc<MemoryTransport>) -> EventBroker {
        EventBroker::new(node, store, transport, 1000)
    }

    #[tokio::test]
    async fn test_publish_assigns_sequential_versions() {
        let store = Arc::new(StoreManager::memory());
        let broker = broker("n1", store, Arc::new(MemoryTransport::new(64)));
        let agg = AggregateRef::game(GameId::new());
        let first = broker
            .publish(&agg, left("a"), MetadataOverrides::default())
            .await
            .unwrap();
        let second = broker
            .publish(&agg, left("b"), MetadataOverrides::default().by("b"))
            .await
            .unwrap();
        assert_eq!(first.version(), 1);
        assert_eq!(second.version(), 2);
        assert_eq!(second.metadata.identity_id.as_deref(), Some("b"));
        assert_eq!(broker.replay(&agg.aggregate_id, 0).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_failing_handler_does_not_block_others() {
        let store = Arc::new(StoreManager::memory());
        let broker = broker("n1", store, Arc::new(MemoryTransport::new(64)));
        let failing = handler_fn("failing", |_event| async {
            Err(AppError::internal("boom"))
        });
        broker.subscribe("game.*", Arc::new(failing)).await.unwrap();
        let (ok, mut rx) = recorder("ok");
        broker.subscribe("game.player_left", ok).await.unwrap();

        let agg = AggregateRef::game(GameId::new());
        broker
            .publish(&agg, left("a"), MetadataOverrides::default())
            .await
            .unwrap();
        let got = tokio::time::timeout(Duration::from_secs(1), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(got.event_type, "game.player_left");
    }

    #[tokio::test]
    async fn test_failed_append_delivers_nothing() {
        let memory = Arc::new(MemoryStore::new());
        let store = Arc::new(StoreManager::from_store(memory.clone()));
        let broker = broker("n1", store, Arc::new(MemoryTransport::new(64)));
        let (handler, mut rx) = recorder("rec");
        broker.subscribe("game.*", handler).await.unwrap();

        memory.set_unavailable(true);
        let err = broker
            .publish(
                &AggregateRef::game(GameId::new()),
                left("a"),
                MetadataOverrides::at_version(1),
            )
            .await
            .unwrap_err();
        assert_eq!(err.kind, ErrorKind::Store);
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_remote_events_reach_local_handlers_without_echo() {
        let store = Arc::new(StoreManager::memory());
        let transport = Arc::new(MemoryTransport::new(64));
        let node_a = broker("a", Arc::clone(&store), Arc::clone(&transport));
        let node_b = broker("b", store, transport);

        let (on_a, mut rx_a) = recorder("a");
        let (on_b, mut rx_b) = recorder("b");
        node_a.subscribe("game.*", on_a).await.unwrap();
        node_b.subscribe("game.*", on_b).await.unwrap();

        let agg = AggregateRef::game(GameId::new());
        node_a
            .publish(&agg, left("x"), MetadataOverrides::default())
            .await
            .unwrap();

        let remote = tokio::time::timeout(Duration::from_secs(1), rx_b.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(remote.aggregate_id, agg.aggregate_id);

        // Node A sees its own event exactly once, from local dispatch.
        assert!(rx_a.recv().await.is_some());
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(rx_a.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_health_reports_store_outage() {
        let memory = Arc::new(MemoryStore::new());
        let store = Arc::new(StoreManager::from_store(memory.clone()));
        let broker = broker("n1", store, Arc::new(MemoryTransport::new(8)));
        assert_eq!(
            broker.health_check().await,
            BrokerHealth {
                transport: true,
                store: true
            }
        );
        memory.set_unavailable(true);
        assert!(!broker.health_check().await.store);
    }
}
