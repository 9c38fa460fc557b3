//! Domain events.
//!
//! Events are immutable, versioned facts about one aggregate. They are
//! appended to the event log, fanned out through the event transport and
//! replayed to rebuild aggregate state.

pub mod game;
pub mod pattern;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::types::id::{EventId, GameId, SessionId};

pub use game::{CompletionReason, EventPayload};
pub use pattern::EventPattern;

/// Aggregate type of game events.
pub const GAME_AGGREGATE: &str = "game";

/// Identifies the aggregate an event belongs to.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AggregateRef {
    /// Aggregate type (`game`).
    pub aggregate_type: String,
    /// Aggregate id.
    pub aggregate_id: String,
}

impl AggregateRef {
    /// Create an aggregate reference.
    pub fn new(aggregate_type: impl Into<String>, aggregate_id: impl Into<String>) -> Self {
        Self {
            aggregate_type: aggregate_type.into(),
            aggregate_id: aggregate_id.into(),
        }
    }

    /// Reference to a game aggregate.
    pub fn game(id: GameId) -> Self {
        Self::new(GAME_AGGREGATE, id.to_string())
    }
}

/// Metadata block attached to every event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventMetadata {
    /// Identity that caused the event.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub identity_id: Option<String>,
    /// Session the cause arrived on.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<SessionId>,
    /// When the event was recorded.
    pub timestamp: DateTime<Utc>,
    /// Aggregate version this event produces. Starts at 1.
    pub version: u64,
    /// Correlation id shared by every event of one request.
    pub correlation_id: Uuid,
    /// Id of the event that caused this one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub causation_id: Option<Uuid>,
}

/// Caller-supplied metadata; anything left `None` is filled in at publish.
#[derive(Debug, Clone, Default)]
pub struct MetadataOverrides {
    /// Explicit version; defaults to the aggregate's next version.
    pub version: Option<u64>,
    /// Acting identity.
    pub identity_id: Option<String>,
    /// Acting session.
    pub session_id: Option<SessionId>,
    /// Correlation id; a fresh one is minted when absent.
    pub correlation_id: Option<Uuid>,
    /// Causing event.
    pub causation_id: Option<Uuid>,
}

impl MetadataOverrides {
    /// Overrides pinning an explicit version.
    pub fn at_version(version: u64) -> Self {
        Self {
            version: Some(version),
            ..Self::default()
        }
    }

    /// Set the acting identity.
    pub fn by(mut self, identity_id: impl Into<String>) -> Self {
        self.identity_id = Some(identity_id.into());
        self
    }
}

/// An immutable domain event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DomainEvent {
    /// Unique event id.
    pub id: EventId,
    /// Dot-namespaced type, e.g. `game.player_joined`.
    pub event_type: String,
    /// Aggregate id.
    pub aggregate_id: String,
    /// Aggregate type.
    pub aggregate_type: String,
    /// Typed payload.
    pub payload: EventPayload,
    /// Metadata block.
    pub metadata: EventMetadata,
}

impl DomainEvent {
    /// Build an event from a payload and fully resolved metadata.
    pub fn new(aggregate: &AggregateRef, payload: EventPayload, metadata: EventMetadata) -> Self {
        Self {
            id: EventId::new(),
            event_type: payload.event_type().to_string(),
            aggregate_id: aggregate.aggregate_id.clone(),
            aggregate_type: aggregate.aggregate_type.clone(),
            payload,
            metadata,
        }
    }

    /// Version this event produces.
    pub fn version(&self) -> u64 {
        self.metadata.version
    }

    /// Transport topic: the namespace segment of the event type.
    pub fn topic(&self) -> &str {
        topic_of(&self.event_type)
    }
}

/// The namespace segment of an event type (`game.completed` -> `game`).
pub fn topic_of(event_type: &str) -> &str {
    event_type.split('.').next().unwrap_or(event_type)
}
