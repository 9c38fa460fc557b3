//! Per-aggregate event log and snapshots.
//!
//! Layout in the shared store:
//!
//! - `events:{aggregate}:v:{version}`: version claim, written with `SET NX`;
//!   the claim is the serialization point for concurrent writers
//! - `events:{aggregate}`: list of serialized events in version order
//! - `stream:{aggregate_type}`: global stream of every event of one type
//! - `snapshots:{aggregate}`: sorted set of snapshots scored by version

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde::de::DeserializeOwned;
use tracing::{debug, warn};

use playhub_core::error::AppError;
use playhub_core::events::DomainEvent;
use playhub_core::result::AppResult;
use playhub_core::traits::store::StateStore;
use playhub_store::StoreManager;
use playhub_store::keys;

/// A materialized aggregate state at one version.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    /// Aggregate id.
    pub aggregate_id: String,
    /// Version the state reflects.
    pub version: u64,
    /// Serialized state.
    pub state: serde_json::Value,
    /// When the snapshot was taken.
    pub taken_at: DateTime<Utc>,
}

impl Snapshot {
    /// Deserialize the state.
    pub fn state_as<T: DeserializeOwned>(&self) -> AppResult<T> {
        Ok(serde_json::from_value(self.state.clone())?)
    }
}

/// Append-only event log over the shared store.
#[derive(Debug, Clone)]
pub struct EventLog {
    store: Arc<StoreManager>,
    stream_max_len: usize,
}

impl EventLog {
    /// Create an event log.
    pub fn new(store: Arc<StoreManager>, stream_max_len: usize) -> Self {
        Self {
            store,
            stream_max_len,
        }
    }

    /// Append an event.
    ///
    /// Fails with `Conflict` when the event's version is already taken and
    /// with `Validation` when the previous version does not exist yet.
    pub async fn append(&self, event: &DomainEvent) -> AppResult<()> {
        let aggregate_id = &event.aggregate_id;
        let version = event.version();
        if version == 0 {
            return Err(AppError::validation("Event versions start at 1"));
        }
        if version > 1 {
            let previous = keys::event_version(aggregate_id, version - 1);
            if !self.store.exists(&previous).await? {
                return Err(AppError::validation(format!(
                    "Version {version} of '{aggregate_id}' is out of order"
                )));
            }
        }

        let claim = keys::event_version(aggregate_id, version);
        if !self
            .store
            .set_nx(&claim, &event.id.to_string(), None)
            .await?
        {
            return Err(AppError::conflict(format!(
                "Version {version} of '{aggregate_id}' was already written"
            )));
        }

        let json = serde_json::to_string(event)?;
        if let Err(e) = self.store.rpush(&keys::event_log(aggregate_id), &json).await {
            // Release the claim so the version can be retried.
            if let Err(release) = self.store.delete(&claim).await {
                warn!(aggregate_id = %aggregate_id, version, error = %release, "Failed to release version claim");
            }
            return Err(e);
        }

        let stream = keys::aggregate_stream(&event.aggregate_type);
        if let Err(e) = self
            .store
            .stream_append(&stream, &json, self.stream_max_len)
            .await
        {
            warn!(
                aggregate_id = %aggregate_id,
                version,
                error = %e,
                "Event stored in aggregate log but not in type stream"
            );
        }

        debug!(
            aggregate_id = %aggregate_id,
            version,
            event_type = %event.event_type,
            "Event appended"
        );
        Ok(())
    }

    /// Events with a version greater than `from_version`, in version order.
    pub async fn replay(&self, aggregate_id: &str, from_version: u64) -> AppResult<Vec<DomainEvent>> {
        let raw = self
            .store
            .lrange(&keys::event_log(aggregate_id), from_version as isize, -1)
            .await?;
        let mut events = raw
            .iter()
            .map(|s| serde_json::from_str::<DomainEvent>(s))
            .collect::<Result<Vec<_>, _>>()?;
        events.retain(|e| e.version() > from_version);
        events.sort_by_key(DomainEvent::version);
        Ok(events)
    }

    /// Events recorded at or after `since`, in version order.
    pub async fn replay_from_timestamp(
        &self,
        aggregate_id: &str,
        since: DateTime<Utc>,
    ) -> AppResult<Vec<DomainEvent>> {
        let mut events = self.replay(aggregate_id, 0).await?;
        events.retain(|e| e.metadata.timestamp >= since);
        Ok(events)
    }

    /// Highest version in the log, 0 when empty.
    pub async fn current_version(&self, aggregate_id: &str) -> AppResult<u64> {
        let last = self
            .store
            .lrange(&keys::event_log(aggregate_id), -1, -1)
            .await?;
        match last.first() {
            Some(raw) => Ok(serde_json::from_str::<DomainEvent>(raw)?.version()),
            None => Ok(0),
        }
    }

    /// Store a snapshot. Older snapshots are kept; reads return the latest.
    pub async fn snapshot<T: Serialize + Sync>(
        &self,
        aggregate_id: &str,
        version: u64,
        state: &T,
    ) -> AppResult<Snapshot> {
        let snapshot = Snapshot {
            aggregate_id: aggregate_id.to_string(),
            version,
            state: serde_json::to_value(state)?,
            taken_at: Utc::now(),
        };
        let json = serde_json::to_string(&snapshot)?;
        self.store
            .zadd(&keys::snapshots(aggregate_id), version as f64, &json)
            .await?;
        debug!(aggregate_id = %aggregate_id, version, "Snapshot stored");
        Ok(snapshot)
    }

    /// The most recent snapshot.
    pub async fn get_snapshot(&self, aggregate_id: &str) -> AppResult<Option<Snapshot>> {
        let latest = self
            .store
            .zrevrange(&keys::snapshots(aggregate_id), 0, 0)
            .await?;
        match latest.first() {
            Some(raw) => Ok(Some(serde_json::from_str(raw)?)),
            None => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use playhub_core::error::ErrorKind;
    use playhub_core::events::{AggregateRef, EventMetadata, EventPayload};
    use playhub_core::types::{GameId, GameStatus};
    use uuid::Uuid;

    fn event(game: GameId, version: u64) -> DomainEvent {
        DomainEvent::new(
            &AggregateRef::game(game),
            EventPayload::PlayerLeft {
                identity_id: "u1".into(),
                status: GameStatus::Waiting,
            },
            EventMetadata {
                identity_id: None,
                session_id: None,
                timestamp: Utc::now(),
                version,
                correlation_id: Uuid::new_v4(),
                causation_id: None,
            },
        )
    }

    fn log() -> EventLog {
        EventLog::new(Arc::new(StoreManager::memory()), 1000)
    }

    #[tokio::test]
    async fn test_append_and_replay_in_order() {
        let log = log();
        let game = GameId::new();
        for v in 1..=3 {
            log.append(&event(game, v)).await.unwrap();
        }
        let id = game.to_string();
        let all = log.replay(&id, 0).await.unwrap();
        assert_eq!(all.iter().map(|e| e.version()).collect::<Vec<_>>(), vec![1, 2, 3]);
        let tail = log.replay(&id, 2).await.unwrap();
        assert_eq!(tail.len(), 1);
        assert_eq!(tail[0].version(), 3);
        assert_eq!(log.current_version(&id).await.unwrap(), 3);
    }

    #[tokio::test]
    async fn test_taken_version_is_a_conflict() {
        let log = log();
        let game = GameId::new();
        log.append(&event(game, 1)).await.unwrap();
        let err = log.append(&event(game, 1)).await.unwrap_err();
        assert_eq!(err.kind, ErrorKind::Conflict);
        assert_eq!(log.replay(&game.to_string(), 0).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_gap_is_rejected() {
        let log = log();
        let game = GameId::new();
        let err = log.append(&event(game, 2)).await.unwrap_err();
        assert_eq!(err.kind, ErrorKind::Validation);
    }

    #[tokio::test]
    async fn test_latest_snapshot_wins() {
        let log = log();
        let id = GameId::new().to_string();
        log.snapshot(&id, 10, &serde_json::json!({"v": 10})).await.unwrap();
        log.snapshot(&id, 20, &serde_json::json!({"v": 20})).await.unwrap();
        let snap = log.get_snapshot(&id).await.unwrap().unwrap();
        assert_eq!(snap.version, 20);
        assert_eq!(snap.state["v"], 20);
    }

    #[tokio::test]
    async fn test_replay_from_timestamp_filters() {
        let log = log();
        let game = GameId::new();
        log.append(&event(game, 1)).await.unwrap();
        let cutoff = Utc::now() + chrono::Duration::seconds(1);
        let mut late = event(game, 2);
        late.metadata.timestamp = cutoff + chrono::Duration::seconds(1);
        log.append(&late).await.unwrap();
        let events = log
            .replay_from_timestamp(&game.to_string(), cutoff)
            .await
            .unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].version(), 2);
    }
}
