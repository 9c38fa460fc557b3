//! Store key builders for every PlayHub entry.
//!
//! Centralising key construction prevents typos and makes it easy
//! to find every key the application uses. Backend prefixes (e.g. the
//! Redis `key_prefix`) are applied by the provider, not here.

use playhub_core::types::{ConnectionId, GameId, SessionId};

// ── Connection keys ────────────────────────────────────────

/// Mirror of a live connection record.
pub fn connection(conn_id: ConnectionId) -> String {
    format!("conn:{conn_id}")
}

/// Set of connection ids held by one identity across all instances.
pub fn identity_connections(identity_id: &str) -> String {
    format!("conn:identity:{identity_id}")
}

/// Session recovery record.
pub fn session_recovery(session_id: SessionId) -> String {
    format!("session:recovery:{session_id}")
}

// ── Rate limiting keys ─────────────────────────────────────

/// Sliding window of admission tickets.
pub fn rate_limit(action: &str, identity: &str) -> String {
    format!("ratelimit:{action}:{identity}")
}

/// Set of blacklisted identities.
pub fn rate_limit_blacklist() -> String {
    "ratelimit:blacklist".to_string()
}

/// Set of whitelisted identities.
pub fn rate_limit_whitelist() -> String {
    "ratelimit:whitelist".to_string()
}

// ── Event keys ─────────────────────────────────────────────

/// Per-aggregate event log (list of serialized events in version order).
pub fn event_log(aggregate_id: &str) -> String {
    format!("events:{aggregate_id}")
}

/// Version claim for one aggregate version.
pub fn event_version(aggregate_id: &str, version: u64) -> String {
    format!("events:{aggregate_id}:v:{version}")
}

/// Global stream of every event of one aggregate type.
pub fn aggregate_stream(aggregate_type: &str) -> String {
    format!("stream:{aggregate_type}")
}

/// Snapshots of one aggregate, scored by version.
pub fn snapshots(aggregate_id: &str) -> String {
    format!("snapshots:{aggregate_id}")
}

/// Transport stream of one topic.
pub fn topic_stream(topic: &str) -> String {
    format!("bus:{topic}")
}

// ── Game keys ──────────────────────────────────────────────

/// Cached game aggregate.
pub fn game(game_id: GameId) -> String {
    format!("game:{game_id}")
}

// ── History keys ───────────────────────────────────────────

/// Message history of one target (`channel`, `game`, `user`).
pub fn history(kind: &str, target: &str) -> String {
    format!("history:{kind}:{target}")
}
