//! Fallback transports for clients that cannot hold a socket.
//!
//! Server-push clients get a stream that opens with a `hello` event and
//! carries a heartbeat on a fixed interval. Long-poll clients get a bounded
//! queue (oldest evicted) that each poll drains; an empty queue holds the
//! poll until a message arrives or the timeout elapses, whichever is first.
//!
//! Both kinds share one delivery contract and one channel subscription
//! table. Closed connections are announced on [`FallbackService::closed`]
//! so the orchestrator can run its teardown.

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use chrono::Utc;
use dashmap::DashMap;
use serde::Serialize;
use tokio::sync::{Notify, broadcast, mpsc};
use tokio::time::Instant;
use tracing::{debug, info, warn};

use playhub_core::config::FallbackConfig;
use playhub_core::error::AppError;
use playhub_core::result::AppResult;
use playhub_core::traits::identity::Identity;
use playhub_core::types::ConnectionId;

use crate::channel::ChannelRegistry;
use crate::health::{FallbackHealth, HealthStatus};
use crate::message::ServerMessage;

const SSE_BUFFER: usize = 256;

/// Fallback sub-protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FallbackProtocol {
    /// Server-push stream.
    Sse,
    /// Long polling.
    LongPoll,
}

/// Deliveries made by a broadcast, per protocol.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DeliveryCounts {
    /// Server-push deliveries.
    pub sse: usize,
    /// Long-poll deliveries.
    pub long_poll: usize,
}

/// Announcement of a closed fallback connection.
#[derive(Debug, Clone, PartialEq)]
pub struct FallbackClosed {
    /// Connection id.
    pub connection_id: ConnectionId,
    /// Owner.
    pub identity: Identity,
    /// Protocol it used.
    pub protocol: FallbackProtocol,
}

#[derive(Debug)]
struct FallbackConnection {
    identity: Identity,
    protocol: FallbackProtocol,
    last_activity: Instant,
    stream: Option<mpsc::Sender<ServerMessage>>,
    queue: VecDeque<(ServerMessage, usize)>,
    queued_bytes: usize,
    notify: Arc<Notify>,
}

/// Server-push and long-poll connection service.
#[derive(Debug)]
pub struct FallbackService {
    config: FallbackConfig,
    connections: DashMap<ConnectionId, FallbackConnection>,
    channels: ChannelRegistry,
    queued_messages: AtomicUsize,
    buffered_bytes: AtomicUsize,
    closed: broadcast::Sender<FallbackClosed>,
}

impl FallbackService {
    /// Create a service.
    pub fn new(config: FallbackConfig) -> Self {
        let (closed, _) = broadcast::channel(1024);
        Self {
            config,
            connections: DashMap::new(),
            channels: ChannelRegistry::new(),
            queued_messages: AtomicUsize::new(0),
            buffered_bytes: AtomicUsize::new(0),
            closed,
        }
    }

    /// Closed-connection announcements.
    pub fn closed(&self) -> broadcast::Receiver<FallbackClosed> {
        self.closed.subscribe()
    }

    /// Open a server-push stream. The first item is the `hello` event; the
    /// stream ends when the connection is torn down.
    pub fn connect_sse(&self, identity: Identity) -> (ConnectionId, mpsc::Receiver<ServerMessage>) {
        let id = ConnectionId::new();
        let (tx, rx) = mpsc::channel(SSE_BUFFER);
        let _ = tx.try_send(self.hello(id));
        self.insert(id, identity, FallbackProtocol::Sse, Some(tx));
        (id, rx)
    }

    /// Open a long-poll connection. The `hello` event waits in its queue.
    pub fn connect_long_poll(&self, identity: Identity) -> ConnectionId {
        let id = ConnectionId::new();
        self.insert(id, identity, FallbackProtocol::LongPoll, None);
        self.send(id, self.hello(id));
        id
    }

    fn hello(&self, connection_id: ConnectionId) -> ServerMessage {
        ServerMessage::Hello {
            connection_id,
            heartbeat_interval_secs: self.config.heartbeat_interval_seconds,
        }
    }

    fn insert(
        &self,
        id: ConnectionId,
        identity: Identity,
        protocol: FallbackProtocol,
        stream: Option<mpsc::Sender<ServerMessage>>,
    ) {
        info!(conn_id = %id, identity_id = %identity.id, ?protocol, "Fallback connection opened");
        self.connections.insert(
            id,
            FallbackConnection {
                identity,
                protocol,
                last_activity: Instant::now(),
                stream,
                queue: VecDeque::new(),
                queued_bytes: 0,
                notify: Arc::new(Notify::new()),
            },
        );
    }

    /// Owner of a connection; counts as activity.
    pub fn touch(&self, id: ConnectionId) -> Option<Identity> {
        let mut conn = self.connections.get_mut(&id)?;
        conn.last_activity = Instant::now();
        Some(conn.identity.clone())
    }

    /// Protocol of a live connection.
    pub fn protocol(&self, id: ConnectionId) -> Option<FallbackProtocol> {
        self.connections.get(&id).map(|c| c.protocol)
    }

    /// Wait for messages on a long-poll connection.
    ///
    /// Returns queued messages at once if there are any; otherwise waits up
    /// to `timeout` (capped by configuration) for the first message and
    /// returns an empty list on timeout.
    pub async fn poll(&self, id: ConnectionId, timeout: Option<Duration>) -> AppResult<Vec<ServerMessage>> {
        let max = Duration::from_millis(self.config.max_poll_timeout_ms);
        let timeout = timeout
            .unwrap_or(Duration::from_millis(self.config.default_poll_timeout_ms))
            .min(max);
        let deadline = Instant::now() + timeout;

        loop {
            let notify = {
                let mut conn = self
                    .connections
                    .get_mut(&id)
                    .ok_or_else(|| AppError::not_found(format!("Fallback connection {id} not found")))?;
                if conn.protocol != FallbackProtocol::LongPoll {
                    return Err(AppError::validation("Connection is not a long-poll connection"));
                }
                conn.last_activity = Instant::now();
                if !conn.queue.is_empty() {
                    return Ok(self.drain(&mut conn));
                }
                conn.notify.clone()
            };

            // A permit stored by `notify_one` between the check above and
            // this wait completes it immediately.
            if tokio::time::timeout_at(deadline, notify.notified()).await.is_err() {
                return Ok(self
                    .connections
                    .get_mut(&id)
                    .map(|mut conn| self.drain(&mut conn))
                    .unwrap_or_default());
            }
        }
    }

    fn drain(&self, conn: &mut FallbackConnection) -> Vec<ServerMessage> {
        let count = conn.queue.len();
        self.queued_messages.fetch_sub(count, Ordering::Relaxed);
        self.buffered_bytes
            .fetch_sub(conn.queued_bytes, Ordering::Relaxed);
        conn.queued_bytes = 0;
        conn.queue.drain(..).map(|(message, _)| message).collect()
    }

    /// Deliver a message to one connection.
    pub fn send(&self, id: ConnectionId, message: ServerMessage) -> bool {
        let mut closed = false;
        let delivered = match self.connections.get_mut(&id) {
            None => false,
            Some(mut conn) => match conn.protocol {
                FallbackProtocol::Sse => match conn.stream.as_ref().map(|s| s.try_send(message)) {
                    Some(Ok(())) => true,
                    Some(Err(mpsc::error::TrySendError::Full(_))) => {
                        warn!(conn_id = %id, "Server-push buffer full, dropping message");
                        false
                    }
                    Some(Err(mpsc::error::TrySendError::Closed(_))) | None => {
                        closed = true;
                        false
                    }
                },
                FallbackProtocol::LongPoll => {
                    self.enqueue(&mut conn, message);
                    true
                }
            },
        };
        if closed {
            self.disconnect(id);
        }
        delivered
    }

    fn enqueue(&self, conn: &mut FallbackConnection, message: ServerMessage) {
        let size = serde_json::to_string(&message).map(|s| s.len()).unwrap_or(0);
        if conn.queue.len() >= self.config.max_queue_size.max(1) {
            if let Some((_, evicted)) = conn.queue.pop_front() {
                conn.queued_bytes -= evicted;
                self.queued_messages.fetch_sub(1, Ordering::Relaxed);
                self.buffered_bytes.fetch_sub(evicted, Ordering::Relaxed);
                debug!(identity_id = %conn.identity.id, "Long-poll queue full, evicted oldest");
            }
        }
        conn.queue.push_back((message, size));
        conn.queued_bytes += size;
        self.queued_messages.fetch_add(1, Ordering::Relaxed);
        self.buffered_bytes.fetch_add(size, Ordering::Relaxed);
        conn.notify.notify_one();
    }

    /// Deliver a message to every subscriber of a channel.
    pub fn broadcast(&self, channel: &str, message: &ServerMessage) -> DeliveryCounts {
        let mut counts = DeliveryCounts::default();
        for id in self.channels.subscribers(channel) {
            let protocol = self.protocol(id);
            if self.send(id, message.clone()) {
                match protocol {
                    Some(FallbackProtocol::Sse) => counts.sse += 1,
                    Some(FallbackProtocol::LongPoll) => counts.long_poll += 1,
                    None => {}
                }
            }
        }
        counts
    }

    /// Add a channel subscription without acknowledging it.
    pub fn join(&self, id: ConnectionId, channel: &str) -> AppResult<bool> {
        self.require(id)?;
        Ok(self.channels.subscribe(channel, id))
    }

    /// Drop a channel subscription without acknowledging it.
    pub fn leave(&self, id: ConnectionId, channel: &str) -> bool {
        self.channels.unsubscribe(channel, id)
    }

    /// Subscribe a connection to a channel and acknowledge it on the
    /// connection. Returns `false` if it was already subscribed.
    pub fn subscribe(&self, id: ConnectionId, channel: &str) -> AppResult<bool> {
        let added = self.join(id, channel)?;
        self.send(
            id,
            ServerMessage::Subscribed {
                channel: channel.to_string(),
            },
        );
        Ok(added)
    }

    /// Unsubscribe and acknowledge.
    pub fn unsubscribe(&self, id: ConnectionId, channel: &str) -> AppResult<bool> {
        self.require(id)?;
        let removed = self.leave(id, channel);
        self.send(
            id,
            ServerMessage::Unsubscribed {
                channel: channel.to_string(),
            },
        );
        Ok(removed)
    }

    /// Subscriptions held by a connection.
    pub fn subscription_count(&self, id: ConnectionId) -> usize {
        self.channels.subscription_count(id)
    }

    fn require(&self, id: ConnectionId) -> AppResult<()> {
        if self.connections.contains_key(&id) {
            Ok(())
        } else {
            Err(AppError::not_found(format!("Fallback connection {id} not found")))
        }
    }

    /// Send a heartbeat on every server-push stream. Streams whose client
    /// went away are torn down. Returns the number of heartbeats sent.
    pub fn heartbeat(&self) -> usize {
        let streams: Vec<ConnectionId> = self
            .connections
            .iter()
            .filter(|c| c.protocol == FallbackProtocol::Sse)
            .map(|c| *c.key())
            .collect();
        streams
            .into_iter()
            .filter(|id| {
                self.send(
                    *id,
                    ServerMessage::Heartbeat {
                        timestamp: Utc::now(),
                    },
                )
            })
            .count()
    }

    /// Tear down connections inactive for longer than `threshold`.
    pub fn sweep_inactive(&self, threshold: Duration) -> Vec<ConnectionId> {
        let now = Instant::now();
        let stale: Vec<ConnectionId> = self
            .connections
            .iter()
            .filter(|c| now.duration_since(c.last_activity) > threshold)
            .map(|c| *c.key())
            .collect();
        let removed: Vec<ConnectionId> = stale
            .into_iter()
            .filter(|id| self.disconnect(*id).is_some())
            .collect();
        if !removed.is_empty() {
            info!(removed = removed.len(), "Swept inactive fallback connections");
        }
        removed
    }

    /// Tear a connection down. Ends its stream, wakes a held poll and
    /// announces the closure. Idempotent.
    pub fn disconnect(&self, id: ConnectionId) -> Option<FallbackClosed> {
        let (_, mut conn) = self.connections.remove(&id)?;
        self.channels.unsubscribe_all(id);
        self.drain(&mut conn);
        conn.notify.notify_one();
        let closed = FallbackClosed {
            connection_id: id,
            identity: conn.identity,
            protocol: conn.protocol,
        };
        info!(conn_id = %id, protocol = ?closed.protocol, "Fallback connection closed");
        let _ = self.closed.send(closed.clone());
        Some(closed)
    }

    /// Number of open connections.
    pub fn connection_count(&self) -> usize {
        self.connections.len()
    }

    /// Messages waiting in long-poll queues.
    pub fn queued_messages(&self) -> usize {
        self.queued_messages.load(Ordering::Relaxed)
    }

    /// Status against the configured thresholds.
    pub fn health(&self) -> FallbackHealth {
        let sse = self
            .connections
            .iter()
            .filter(|c| c.protocol == FallbackProtocol::Sse)
            .count();
        let connections = self.connections.len();
        let queued_messages = self.queued_messages();
        let buffered_bytes = self.buffered_bytes.load(Ordering::Relaxed);

        let status = if buffered_bytes > self.config.unhealthy_buffered_bytes {
            HealthStatus::Unhealthy
        } else if queued_messages > self.config.degraded_queued_messages
            || connections > self.config.degraded_connections
        {
            HealthStatus::Degraded
        } else {
            HealthStatus::Healthy
        };

        FallbackHealth {
            status,
            connections,
            sse,
            long_poll: connections - sse,
            queued_messages,
            buffered_bytes,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn service() -> FallbackService {
        FallbackService::new(FallbackConfig {
            max_queue_size: 3,
            ..Default::default()
        })
    }

    fn alice() -> Identity {
        Identity::new("alice", "Alice")
    }

    fn subscribed(channel: &str) -> ServerMessage {
        ServerMessage::Subscribed {
            channel: channel.into(),
        }
    }

    #[tokio::test]
    async fn test_sse_stream_opens_with_hello() {
        let service = service();
        let (id, mut rx) = service.connect_sse(alice());
        assert!(matches!(
            rx.recv().await.unwrap(),
            ServerMessage::Hello { connection_id, .. } if connection_id == id
        ));
        assert!(service.subscribe(id, "room:lobby").unwrap());
        assert_eq!(rx.recv().await.unwrap(), subscribed("room:lobby"));

        let counts = service.broadcast("room:lobby", &subscribed("x"));
        assert_eq!(counts, DeliveryCounts { sse: 1, long_poll: 0 });

        service.disconnect(id);
        assert_eq!(rx.recv().await.unwrap(), subscribed("x"));
        assert!(rx.recv().await.is_none());
    }

    #[tokio::test]
    async fn test_poll_returns_queued_immediately() {
        let service = service();
        let id = service.connect_long_poll(alice());
        let first = service.poll(id, Some(Duration::from_secs(5))).await.unwrap();
        assert!(matches!(first.as_slice(), [ServerMessage::Hello { .. }]));
        assert_eq!(service.queued_messages(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_poll_resolves_on_first_message() {
        let service = Arc::new(service());
        let id = service.connect_long_poll(alice());
        service.poll(id, None).await.unwrap();

        let sender = service.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(500)).await;
            sender.send(id, subscribed("room:lobby"));
        });

        let started = Instant::now();
        let messages = service.poll(id, Some(Duration::from_millis(2000))).await.unwrap();
        assert_eq!(messages, vec![subscribed("room:lobby")]);
        assert_eq!(started.elapsed(), Duration::from_millis(500));
    }

    #[tokio::test(start_paused = true)]
    async fn test_poll_times_out_empty() {
        let service = service();
        let id = service.connect_long_poll(alice());
        service.poll(id, None).await.unwrap();
        let started = Instant::now();
        assert!(service.poll(id, Some(Duration::from_millis(2000))).await.unwrap().is_empty());
        assert_eq!(started.elapsed(), Duration::from_millis(2000));
    }

    #[tokio::test]
    async fn test_queue_evicts_oldest() {
        let service = service();
        let id = service.connect_long_poll(alice());
        for n in 0..4 {
            service.send(id, subscribed(&format!("room:{n}")));
        }
        let messages = service.poll(id, None).await.unwrap();
        assert_eq!(
            messages,
            vec![subscribed("room:1"), subscribed("room:2"), subscribed("room:3")]
        );
        assert_eq!(service.health().buffered_bytes, 0);
    }

    #[tokio::test]
    async fn test_disconnect_is_idempotent_and_announced() {
        let service = service();
        let mut closed = service.closed();
        let id = service.connect_long_poll(alice());
        assert!(service.disconnect(id).is_some());
        assert!(service.disconnect(id).is_none());
        assert_eq!(closed.recv().await.unwrap().connection_id, id);
        assert!(!service.send(id, subscribed("x")));
        assert_eq!(service.poll(id, None).await.unwrap_err().kind, playhub_core::error::ErrorKind::NotFound);
    }

    #[tokio::test]
    async fn test_dropped_stream_is_torn_down_on_heartbeat() {
        let service = service();
        let (_, rx) = service.connect_sse(alice());
        let (_, _live) = service.connect_sse(alice());
        drop(rx);
        assert_eq!(service.heartbeat(), 1);
        assert_eq!(service.connection_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_sweep_removes_idle_connections() {
        let service = service();
        let idle = service.connect_long_poll(alice());
        let busy = service.connect_long_poll(alice());
        tokio::time::advance(Duration::from_secs(90)).await;
        service.touch(busy);
        tokio::time::advance(Duration::from_secs(40)).await;
        assert_eq!(service.sweep_inactive(Duration::from_secs(120)), vec![idle]);
        assert!(service.sweep_inactive(Duration::from_secs(120)).is_empty());
    }

    #[tokio::test]
    async fn test_health_thresholds() {
        let service = FallbackService::new(FallbackConfig {
            degraded_connections: 1,
            unhealthy_buffered_bytes: 10_000,
            ..Default::default()
        });
        let id = service.connect_long_poll(alice());
        assert_eq!(service.health().status, HealthStatus::Healthy);
        service.connect_long_poll(alice());
        assert_eq!(service.health().status, HealthStatus::Degraded);

        let big = "x".repeat(20_000);
        service.send(id, subscribed(&big));
        let health = service.health();
        assert_eq!(health.status, HealthStatus::Unhealthy);
        assert_eq!(health.long_poll, 2);
    }
}
