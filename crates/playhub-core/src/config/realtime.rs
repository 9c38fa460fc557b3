//! Live socket engine configuration.

use serde::{Deserialize, Serialize};

/// Real-time (WebSocket) engine configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RealtimeConfig {
    /// Per-connection outbound buffer size.
    #[serde(default = "default_channel_buffer")]
    pub channel_buffer_size: usize,
    /// Maximum channel subscriptions per connection.
    #[serde(default = "default_max_subscriptions")]
    pub max_subscriptions_per_connection: usize,
    /// Connections idle longer than this are swept.
    #[serde(default = "default_inactivity_timeout")]
    pub inactivity_timeout_seconds: u64,
    /// Interval between inactivity sweeps.
    #[serde(default = "default_sweep_interval")]
    pub sweep_interval_seconds: u64,
    /// Lifetime of a session recovery record.
    #[serde(default = "default_recovery_ttl")]
    pub recovery_ttl_seconds: u64,
    /// Lifetime of the store mirror of a live connection record.
    #[serde(default = "default_record_ttl")]
    pub connection_record_ttl_seconds: u64,
    /// Batching optimizer flush tick in milliseconds.
    #[serde(default = "default_batch_interval")]
    pub batch_interval_ms: u64,
    /// Queue length that triggers an immediate flush.
    #[serde(default = "default_batch_max_size")]
    pub batch_max_size: usize,
    /// Maximum chat message length in characters.
    #[serde(default = "default_max_message_length")]
    pub max_message_length: usize,
    /// Messages retained per history target.
    #[serde(default = "default_history_max")]
    pub history_max_messages: usize,
    /// History retention window in seconds.
    #[serde(default = "default_history_retention")]
    pub history_retention_seconds: u64,
    /// Redis pub/sub channel prefix used for cross-node fan-out.
    #[serde(default = "default_fanout_channel")]
    pub fanout_channel: String,
}

impl Default for RealtimeConfig {
    fn default() -> Self {
        Self {
            channel_buffer_size: default_channel_buffer(),
            max_subscriptions_per_connection: default_max_subscriptions(),
            inactivity_timeout_seconds: default_inactivity_timeout(),
            sweep_interval_seconds: default_sweep_interval(),
            recovery_ttl_seconds: default_recovery_ttl(),
            connection_record_ttl_seconds: default_record_ttl(),
            batch_interval_ms: default_batch_interval(),
            batch_max_size: default_batch_max_size(),
            max_message_length: default_max_message_length(),
            history_max_messages: default_history_max(),
            history_retention_seconds: default_history_retention(),
            fanout_channel: default_fanout_channel(),
        }
    }
}

fn default_channel_buffer() -> usize {
    256
}

fn default_max_subscriptions() -> usize {
    50
}

fn default_inactivity_timeout() -> u64 {
    300
}

fn default_sweep_interval() -> u64 {
    60
}

fn default_recovery_ttl() -> u64 {
    3600
}

fn default_record_ttl() -> u64 {
    86_400
}

fn default_batch_interval() -> u64 {
    25
}

fn default_batch_max_size() -> usize {
    50
}

fn default_max_message_length() -> usize {
    1000
}

fn default_history_max() -> usize {
    100
}

fn default_history_retention() -> u64 {
    86_400
}

fn default_fanout_channel() -> String {
    "playhub:fanout".to_string()
}
