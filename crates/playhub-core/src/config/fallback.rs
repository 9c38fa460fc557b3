//! Fallback transport (server push and long polling) configuration.

use serde::{Deserialize, Serialize};

/// Fallback transport configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FallbackConfig {
    /// Interval between server-push heartbeats.
    #[serde(default = "default_heartbeat")]
    pub heartbeat_interval_seconds: u64,
    /// Bound of each long-poll queue; the oldest message is evicted when full.
    #[serde(default = "default_max_queue")]
    pub max_queue_size: usize,
    /// Default hold time of a poll request when the client does not supply one.
    #[serde(default = "default_poll_timeout")]
    pub default_poll_timeout_ms: u64,
    /// Upper bound on a client-supplied poll hold time.
    #[serde(default = "default_max_poll_timeout")]
    pub max_poll_timeout_ms: u64,
    /// Connections idle longer than this are swept.
    #[serde(default = "default_inactivity")]
    pub inactivity_timeout_seconds: u64,
    /// Interval between inactivity sweeps.
    #[serde(default = "default_sweep")]
    pub sweep_interval_seconds: u64,
    /// Total queued messages above which health reports degraded.
    #[serde(default = "default_degraded_queued")]
    pub degraded_queued_messages: usize,
    /// Connection count above which health reports degraded.
    #[serde(default = "default_degraded_connections")]
    pub degraded_connections: usize,
    /// Bytes held in queues above which health reports unhealthy.
    #[serde(default = "default_unhealthy_bytes")]
    pub unhealthy_buffered_bytes: usize,
}

impl Default for FallbackConfig {
    fn default() -> Self {
        Self {
            heartbeat_interval_seconds: default_heartbeat(),
            max_queue_size: default_max_queue(),
            default_poll_timeout_ms: default_poll_timeout(),
            max_poll_timeout_ms: default_max_poll_timeout(),
            inactivity_timeout_seconds: default_inactivity(),
            sweep_interval_seconds: default_sweep(),
            degraded_queued_messages: default_degraded_queued(),
            degraded_connections: default_degraded_connections(),
            unhealthy_buffered_bytes: default_unhealthy_bytes(),
        }
    }
}

fn default_heartbeat() -> u64 {
    30
}

fn default_max_queue() -> usize {
    100
}

fn default_poll_timeout() -> u64 {
    30_000
}

fn default_max_poll_timeout() -> u64 {
    55_000
}

fn default_inactivity() -> u64 {
    120
}

fn default_sweep() -> u64 {
    30
}

fn default_degraded_queued() -> usize {
    10_000
}

fn default_degraded_connections() -> usize {
    5_000
}

fn default_unhealthy_bytes() -> usize {
    256 * 1024 * 1024
}
