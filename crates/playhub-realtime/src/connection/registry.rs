//! Connection registry.
//!
//! Tracks live connections in process-local maps and mirrors each record to
//! the shared store (`conn:{id}`, `conn:identity:{identity}`) so any node can
//! look a connection up. The local maps are caches: evicting them loses
//! nothing the store does not also hold.
//!
//! Removing a connection archives a [`SessionRecoveryRecord`] under its
//! session id. A reconnect that presents the session id gets the record back
//! (at most once) and resumes where it left off.

use std::collections::{BTreeSet, HashSet};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use moka::future::Cache;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use playhub_core::config::RealtimeConfig;
use playhub_core::result::AppResult;
use playhub_core::traits::identity::Identity;
use playhub_core::traits::store::{StateStore, StoreOp};
use playhub_core::types::{ConnectionId, GameId, SessionId};
use playhub_store::{StoreManager, keys};

const LATENCY_SMOOTHING: f64 = 0.2;
const LIFECYCLE_BUFFER: usize = 1024;

/// Transport a connection arrived on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransportKind {
    /// Persistent socket.
    WebSocket,
    /// Server-push stream.
    Sse,
    /// Long polling.
    LongPoll,
}

/// Connection status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionStatus {
    /// Live.
    Connected,
    /// Transport dropped, the client is expected back.
    Reconnecting,
    /// Closed.
    Disconnected,
}

/// Handshake metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConnectionMetadata {
    /// Transport.
    pub transport: TransportKind,
    /// Remote address as reported by the server.
    pub remote_addr: Option<String>,
}

impl ConnectionMetadata {
    /// Metadata for a socket connection.
    pub fn websocket(remote_addr: Option<String>) -> Self {
        Self {
            transport: TransportKind::WebSocket,
            remote_addr,
        }
    }
}

/// Per-connection performance counters.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ConnectionStats {
    /// Messages delivered to the client.
    pub messages_sent: u64,
    /// Messages received from the client.
    pub messages_received: u64,
    /// Bytes delivered to the client.
    pub bytes_sent: u64,
    /// Bytes received from the client.
    pub bytes_received: u64,
    /// Smoothed round-trip latency.
    pub latency_ms: Option<f64>,
    /// Quality score, 0 to 100.
    pub quality: u8,
}

/// Direction of counted traffic.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrafficDirection {
    /// Client to server.
    Inbound,
    /// Server to client.
    Outbound,
}

/// One live transport binding.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConnectionRecord {
    /// Connection id.
    pub connection_id: ConnectionId,
    /// Identity id.
    pub identity_id: String,
    /// Display name.
    pub display_name: String,
    /// Session id, stable across reconnects.
    pub session_id: SessionId,
    /// Registration time.
    pub connected_at: DateTime<Utc>,
    /// Last inbound or outbound activity.
    pub last_activity: DateTime<Utc>,
    /// Status.
    pub status: ConnectionStatus,
    /// Subscribed channel names.
    pub subscriptions: BTreeSet<String>,
    /// Game the connection is playing in.
    pub game_id: Option<GameId>,
    /// Handshake metadata.
    pub metadata: ConnectionMetadata,
    /// Counters.
    pub stats: ConnectionStats,
}

/// Archived state of a torn-down connection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionRecoveryRecord {
    /// Session id.
    pub session_id: SessionId,
    /// Identity id.
    pub identity_id: String,
    /// Display name.
    pub display_name: String,
    /// Last known game.
    pub game_id: Option<GameId>,
    /// Subscriptions held at teardown.
    pub subscriptions: BTreeSet<String>,
    /// Last activity before teardown.
    pub last_activity: DateTime<Utc>,
    /// Teardown time.
    pub disconnected_at: DateTime<Utc>,
    /// When the record stops being recoverable.
    pub expires_at: DateTime<Utc>,
}

/// Registry statistics.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RegistryStats {
    /// Connections known to this node.
    pub total: usize,
    /// Connected.
    pub active: usize,
    /// Mid-teardown, recovery record not yet archived.
    pub reconnecting: usize,
    /// Distinct identities.
    pub unique_identities: usize,
    /// Mean age of the known connections.
    pub mean_session_duration_secs: f64,
}

/// Lifecycle notifications for presence and analytics consumers.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ConnectionLifecycleEvent {
    /// A connection registered.
    Connected {
        /// Connection id.
        connection_id: ConnectionId,
        /// Identity id.
        identity_id: String,
        /// Session id.
        session_id: SessionId,
    },
    /// A connection was removed.
    Disconnected {
        /// Connection id.
        connection_id: ConnectionId,
        /// Identity id.
        identity_id: String,
        /// Session id.
        session_id: SessionId,
    },
    /// A connection's status changed.
    StatusChanged {
        /// Connection id.
        connection_id: ConnectionId,
        /// Previous status.
        from: ConnectionStatus,
        /// New status.
        to: ConnectionStatus,
    },
}

#[derive(Debug)]
struct LocalConnection {
    record: ConnectionRecord,
    last_seen: Instant,
}

/// Registry of live connections.
#[derive(Debug)]
pub struct ConnectionRegistry {
    store: Arc<StoreManager>,
    local: DashMap<ConnectionId, LocalConnection>,
    by_identity: DashMap<String, HashSet<ConnectionId>>,
    recovery_cache: Cache<SessionId, (SessionRecoveryRecord, Instant)>,
    lifecycle: broadcast::Sender<ConnectionLifecycleEvent>,
    recovery_ttl: Duration,
    record_ttl: Duration,
}

impl ConnectionRegistry {
    /// Creates a registry over the shared store.
    pub fn new(store: Arc<StoreManager>, config: &RealtimeConfig) -> Self {
        let recovery_ttl = Duration::from_secs(config.recovery_ttl_seconds);
        let (lifecycle, _) = broadcast::channel(LIFECYCLE_BUFFER);
        Self {
            store,
            local: DashMap::new(),
            by_identity: DashMap::new(),
            recovery_cache: Cache::builder()
                .max_capacity(10_000)
                .time_to_live(recovery_ttl)
                .build(),
            lifecycle,
            recovery_ttl,
            record_ttl: Duration::from_secs(config.connection_record_ttl_seconds),
        }
    }

    /// Lifecycle notification stream.
    pub fn subscribe_lifecycle(&self) -> broadcast::Receiver<ConnectionLifecycleEvent> {
        self.lifecycle.subscribe()
    }

    /// Registers a connection. A supplied session id is kept; otherwise a
    /// new one is minted.
    pub async fn register(
        &self,
        connection_id: ConnectionId,
        identity: &Identity,
        session_id: Option<SessionId>,
        metadata: ConnectionMetadata,
    ) -> ConnectionRecord {
        let now = Utc::now();
        let record = ConnectionRecord {
            connection_id,
            identity_id: identity.id.clone(),
            display_name: identity.display_name.clone(),
            session_id: session_id.unwrap_or_default(),
            connected_at: now,
            last_activity: now,
            status: ConnectionStatus::Connected,
            subscriptions: BTreeSet::new(),
            game_id: None,
            metadata,
            stats: ConnectionStats {
                quality: 100,
                ..Default::default()
            },
        };

        self.local.insert(
            connection_id,
            LocalConnection {
                record: record.clone(),
                last_seen: Instant::now(),
            },
        );
        self.by_identity
            .entry(record.identity_id.clone())
            .or_default()
            .insert(connection_id);
        self.mirror(&record).await;

        info!(
            conn_id = %connection_id,
            identity_id = %record.identity_id,
            session_id = %record.session_id,
            transport = ?record.metadata.transport,
            "Connection registered"
        );
        let _ = self.lifecycle.send(ConnectionLifecycleEvent::Connected {
            connection_id,
            identity_id: record.identity_id.clone(),
            session_id: record.session_id,
        });
        record
    }

    /// Marks activity on a connection.
    pub fn touch(&self, connection_id: ConnectionId) {
        if let Some(mut entry) = self.local.get_mut(&connection_id) {
            entry.record.last_activity = Utc::now();
            entry.last_seen = Instant::now();
        }
    }

    /// Changes status. Returns `true` and emits a notification only when the
    /// status actually changed.
    pub async fn set_status(&self, connection_id: ConnectionId, status: ConnectionStatus) -> bool {
        let changed = {
            let Some(mut entry) = self.local.get_mut(&connection_id) else {
                return false;
            };
            let from = entry.record.status;
            if from == status {
                None
            } else {
                entry.record.status = status;
                Some((from, entry.record.clone()))
            }
        };
        let Some((from, record)) = changed else {
            return false;
        };
        self.mirror(&record).await;
        debug!(conn_id = %connection_id, ?from, to = ?status, "Connection status changed");
        let _ = self.lifecycle.send(ConnectionLifecycleEvent::StatusChanged {
            connection_id,
            from,
            to: status,
        });
        true
    }

    /// Records a channel subscription. Returns `false` if already held.
    pub async fn add_subscription(&self, connection_id: ConnectionId, channel: &str) -> bool {
        let record = self.update(connection_id, |r| r.subscriptions.insert(channel.to_string()));
        match record {
            Some((true, record)) => {
                self.mirror(&record).await;
                true
            }
            _ => false,
        }
    }

    /// Drops a channel subscription. Returns `false` if it was not held.
    pub async fn remove_subscription(&self, connection_id: ConnectionId, channel: &str) -> bool {
        let record = self.update(connection_id, |r| r.subscriptions.remove(channel));
        match record {
            Some((true, record)) => {
                self.mirror(&record).await;
                true
            }
            _ => false,
        }
    }

    /// Sets or clears the active game.
    pub async fn set_game_ref(&self, connection_id: ConnectionId, game_id: Option<GameId>) {
        let record = self.update(connection_id, |r| {
            let changed = r.game_id != game_id;
            r.game_id = game_id;
            changed
        });
        if let Some((true, record)) = record {
            self.mirror(&record).await;
        }
    }

    /// Counts one message of `bytes` in the given direction. Counts as activity.
    pub fn record_traffic(&self, connection_id: ConnectionId, direction: TrafficDirection, bytes: usize) {
        if let Some(mut entry) = self.local.get_mut(&connection_id) {
            let stats = &mut entry.record.stats;
            match direction {
                TrafficDirection::Inbound => {
                    stats.messages_received += 1;
                    stats.bytes_received += bytes as u64;
                }
                TrafficDirection::Outbound => {
                    stats.messages_sent += 1;
                    stats.bytes_sent += bytes as u64;
                }
            }
            entry.record.last_activity = Utc::now();
            entry.last_seen = Instant::now();
        }
    }

    /// Folds a latency sample into the moving average and recomputes the
    /// quality score. Returns `(latency_ms, quality)`.
    pub fn record_latency(&self, connection_id: ConnectionId, sample_ms: f64) -> Option<(f64, u8)> {
        let mut entry = self.local.get_mut(&connection_id)?;
        let sample = sample_ms.max(0.0);
        let stats = &mut entry.record.stats;
        let latency = match stats.latency_ms {
            Some(previous) => LATENCY_SMOOTHING * sample + (1.0 - LATENCY_SMOOTHING) * previous,
            None => sample,
        };
        stats.latency_ms = Some(latency);
        stats.quality = quality_score(latency);
        Some((latency, stats.quality))
    }

    /// Looks a connection up locally, then in the store.
    pub async fn get(&self, connection_id: ConnectionId) -> Option<ConnectionRecord> {
        if let Some(entry) = self.local.get(&connection_id) {
            return Some(entry.record.clone());
        }
        match self
            .store
            .get_json::<ConnectionRecord>(&keys::connection(connection_id))
            .await
        {
            Ok(record) => record,
            Err(e) => {
                warn!(conn_id = %connection_id, error = %e, "Connection lookup in store failed");
                None
            }
        }
    }

    /// Connections of one identity across all nodes. Falls back to this
    /// node's view when the store is unreachable.
    pub async fn list_by_identity(&self, identity_id: &str) -> Vec<ConnectionRecord> {
        let ids = match self
            .store
            .smembers(&keys::identity_connections(identity_id))
            .await
        {
            Ok(ids) => ids
                .iter()
                .filter_map(|id| id.parse::<ConnectionId>().ok())
                .collect::<Vec<_>>(),
            Err(e) => {
                warn!(identity_id, error = %e, "Identity index unavailable, using local view");
                self.by_identity
                    .get(identity_id)
                    .map(|ids| ids.iter().copied().collect())
                    .unwrap_or_default()
            }
        };

        let mut records = Vec::with_capacity(ids.len());
        for id in ids {
            if let Some(record) = self.get(id).await {
                records.push(record);
            }
        }
        records
    }

    /// Ids of local connections with no activity for longer than `threshold`.
    pub fn inactive(&self, threshold: Duration) -> Vec<ConnectionId> {
        let now = Instant::now();
        self.local
            .iter()
            .filter(|entry| now.duration_since(entry.last_seen) > threshold)
            .map(|entry| *entry.key())
            .collect()
    }

    /// Removes every connection inactive for longer than `threshold`.
    pub async fn sweep_inactive(&self, threshold: Duration) -> usize {
        let mut removed = 0;
        for id in self.inactive(threshold) {
            if self.remove(id).await.is_some() {
                removed += 1;
            }
        }
        if removed > 0 {
            info!(removed, "Swept inactive connections");
        }
        removed
    }

    /// Removes a connection and archives its recovery record. Returns the
    /// record, or `None` if the connection was already gone.
    pub async fn remove(&self, connection_id: ConnectionId) -> Option<SessionRecoveryRecord> {
        let (_, local) = self.local.remove(&connection_id)?;
        let record = local.record;

        if let Some(mut ids) = self.by_identity.get_mut(&record.identity_id) {
            ids.remove(&connection_id);
            if ids.is_empty() {
                drop(ids);
                self.by_identity
                    .remove_if(&record.identity_id, |_, ids| ids.is_empty());
            }
        }

        let now = Utc::now();
        let recovery = SessionRecoveryRecord {
            session_id: record.session_id,
            identity_id: record.identity_id.clone(),
            display_name: record.display_name.clone(),
            game_id: record.game_id,
            subscriptions: record.subscriptions.clone(),
            last_activity: record.last_activity,
            disconnected_at: now,
            expires_at: now + chrono::Duration::seconds(self.recovery_ttl.as_secs() as i64),
        };

        if let Err(e) = self.archive(&record, &recovery).await {
            warn!(conn_id = %connection_id, error = %e, "Failed to archive connection in store");
        }
        self.recovery_cache
            .insert(
                recovery.session_id,
                (recovery.clone(), Instant::now() + self.recovery_ttl),
            )
            .await;

        info!(
            conn_id = %connection_id,
            identity_id = %record.identity_id,
            session_id = %record.session_id,
            "Connection removed"
        );
        let _ = self.lifecycle.send(ConnectionLifecycleEvent::Disconnected {
            connection_id,
            identity_id: record.identity_id,
            session_id: record.session_id,
        });
        Some(recovery)
    }

    /// Looks up a recovery record, locally first.
    pub async fn recover(&self, session_id: SessionId) -> Option<SessionRecoveryRecord> {
        if let Some((record, deadline)) = self.recovery_cache.get(&session_id).await {
            if Instant::now() < deadline {
                return Some(record);
            }
            self.recovery_cache.invalidate(&session_id).await;
        }

        let record = match self
            .store
            .get_json::<SessionRecoveryRecord>(&keys::session_recovery(session_id))
            .await
        {
            Ok(record) => record?,
            Err(e) => {
                warn!(session_id = %session_id, error = %e, "Recovery lookup in store failed");
                return None;
            }
        };

        let remaining = (record.expires_at - Utc::now()).to_std().ok()?;
        self.recovery_cache
            .insert(session_id, (record.clone(), Instant::now() + remaining))
            .await;
        Some(record)
    }

    /// Discards a recovery record after a successful reconnect.
    pub async fn consume_recovery(&self, session_id: SessionId) {
        self.recovery_cache.invalidate(&session_id).await;
        if let Err(e) = self.store.delete(&keys::session_recovery(session_id)).await {
            warn!(session_id = %session_id, error = %e, "Failed to delete recovery record");
        }
    }

    /// Counters over this node's connections.
    pub fn stats(&self) -> RegistryStats {
        let now = Utc::now();
        let mut stats = RegistryStats::default();
        let mut total_secs = 0.0;
        for entry in self.local.iter() {
            stats.total += 1;
            match entry.record.status {
                ConnectionStatus::Connected => stats.active += 1,
                ConnectionStatus::Reconnecting => stats.reconnecting += 1,
                ConnectionStatus::Disconnected => {}
            }
            total_secs += (now - entry.record.connected_at).num_milliseconds() as f64 / 1000.0;
        }
        stats.unique_identities = self.by_identity.len();
        if stats.total > 0 {
            stats.mean_session_duration_secs = total_secs / stats.total as f64;
        }
        stats
    }

    /// All local records.
    pub fn snapshot(&self) -> Vec<ConnectionRecord> {
        self.local.iter().map(|e| e.record.clone()).collect()
    }

    /// Number of local connections.
    pub fn len(&self) -> usize {
        self.local.len()
    }

    /// Whether this node holds no connections.
    pub fn is_empty(&self) -> bool {
        self.local.is_empty()
    }

    fn update<T>(
        &self,
        connection_id: ConnectionId,
        f: impl FnOnce(&mut ConnectionRecord) -> T,
    ) -> Option<(T, ConnectionRecord)> {
        let mut entry = self.local.get_mut(&connection_id)?;
        let out = f(&mut entry.record);
        Some((out, entry.record.clone()))
    }

    async fn mirror(&self, record: &ConnectionRecord) {
        let result: AppResult<()> = async {
            let value = serde_json::to_string(record)?;
            let index = keys::identity_connections(&record.identity_id);
            self.store
                .pipeline(vec![
                    StoreOp::Set {
                        key: keys::connection(record.connection_id),
                        value,
                        ttl: Some(self.record_ttl),
                    },
                    StoreOp::SAdd {
                        key: index.clone(),
                        member: record.connection_id.to_string(),
                    },
                    StoreOp::Expire {
                        key: index,
                        ttl: self.record_ttl,
                    },
                ])
                .await
                .map(|_| ())
        }
        .await;
        if let Err(e) = result {
            warn!(conn_id = %record.connection_id, error = %e, "Failed to mirror connection to store");
        }
    }

    async fn archive(
        &self,
        record: &ConnectionRecord,
        recovery: &SessionRecoveryRecord,
    ) -> AppResult<()> {
        let value = serde_json::to_string(recovery)?;
        self.store
            .pipeline(vec![
                StoreOp::Set {
                    key: keys::session_recovery(recovery.session_id),
                    value,
                    ttl: Some(self.recovery_ttl),
                },
                StoreOp::Delete {
                    key: keys::connection(record.connection_id),
                },
                StoreOp::SRem {
                    key: keys::identity_connections(&record.identity_id),
                    member: record.connection_id.to_string(),
                },
            ])
            .await?;
        Ok(())
    }
}

/// 100 at zero latency, one point lost per 10 ms.
fn quality_score(latency_ms: f64) -> u8 {
    (100.0 - latency_ms / 10.0).clamp(0.0, 100.0).round() as u8
}
