//! Event broker and event log configuration.

use serde::{Deserialize, Serialize};

/// Event broker configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventsConfig {
    /// Transport used for cross-node fan-out: `"memory"` or `"redis"`.
    #[serde(default = "default_transport")]
    pub transport: String,
    /// Consumer group this node reads topics with. Defaults to the node id,
    /// which gives every node its own copy of each event.
    #[serde(default)]
    pub consumer_group: Option<String>,
    /// Approximate cap on each transport stream and global type stream.
    #[serde(default = "default_stream_max_len")]
    pub stream_max_len: usize,
    /// Take a snapshot every N versions.
    #[serde(default = "default_snapshot_every")]
    pub snapshot_every: u64,
    /// Buffer size of in-process topic channels.
    #[serde(default = "default_buffer")]
    pub channel_buffer_size: usize,
    /// Block timeout for stream reads in milliseconds.
    #[serde(default = "default_block_ms")]
    pub read_block_ms: u64,
}

impl Default for EventsConfig {
    fn default() -> Self {
        Self {
            transport: default_transport(),
            consumer_group: None,
            stream_max_len: default_stream_max_len(),
            snapshot_every: default_snapshot_every(),
            channel_buffer_size: default_buffer(),
            read_block_ms: default_block_ms(),
        }
    }
}

fn default_transport() -> String {
    "memory".to_string()
}

fn default_stream_max_len() -> usize {
    10_000
}

fn default_snapshot_every() -> u64 {
    10
}

fn default_buffer() -> usize {
    1024
}

fn default_block_ms() -> u64 {
    5000
}
