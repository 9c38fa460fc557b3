//! Health surface for orchestration probes.

use serde::Serialize;

/// Coarse health.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthStatus {
    /// Everything reachable and within thresholds.
    Healthy,
    /// Serving, with reduced guarantees.
    Degraded,
    /// Not fit to serve.
    Unhealthy,
}

impl HealthStatus {
    /// HTTP status for probes.
    pub fn status_code(self) -> u16 {
        match self {
            Self::Healthy => 200,
            Self::Degraded => 207,
            Self::Unhealthy => 503,
        }
    }

    /// The worse of two statuses.
    pub fn worst(self, other: Self) -> Self {
        self.max(other)
    }
}

/// Per-dependency reachability.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DependencyChecks {
    /// Shared store reachable.
    pub store: bool,
    /// Event transport reachable.
    pub transport: bool,
    /// Cluster fan-out reachable.
    pub fanout: bool,
}

/// Fallback transport health.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FallbackHealth {
    /// Status against the configured thresholds.
    pub status: HealthStatus,
    /// All fallback connections.
    pub connections: usize,
    /// Server-push streams.
    pub sse: usize,
    /// Long-poll clients.
    pub long_poll: usize,
    /// Messages waiting in long-poll queues.
    pub queued_messages: usize,
    /// Bytes held by long-poll queues.
    pub buffered_bytes: usize,
}

/// Full health report.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HealthReport {
    /// Overall status.
    pub status: HealthStatus,
    /// HTTP status code for `status`.
    pub status_code: u16,
    /// Dependency checks.
    pub checks: DependencyChecks,
    /// Live socket connections on this node.
    pub connections: usize,
    /// Messages waiting for the next batch tick plus long-poll queues.
    pub queued_messages: usize,
    /// Whether game reads are being served from stale copies.
    pub game_reads_degraded: bool,
    /// Fallback transport.
    pub fallback: FallbackHealth,
}
