//! Game coordinator configuration.

use serde::{Deserialize, Serialize};

/// Game state coordinator configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GameConfig {
    /// Active players required for a game to run.
    #[serde(default = "default_min_players")]
    pub min_players: usize,
    /// Default roster size when a create request omits it.
    #[serde(default = "default_max_players")]
    pub default_max_players: usize,
    /// Default round count when a create request omits it.
    #[serde(default = "default_total_rounds")]
    pub default_total_rounds: u32,
    /// TTL of the cached aggregate in the shared store.
    #[serde(default = "default_cache_ttl")]
    pub cache_ttl_seconds: u64,
    /// Re-read attempts after a version conflict.
    #[serde(default = "default_conflict_retries")]
    pub max_conflict_retries: u32,
    /// Games kept as a local last-known copy for degraded reads.
    #[serde(default = "default_local_capacity")]
    pub local_cache_capacity: u64,
}

impl Default for GameConfig {
    fn default() -> Self {
        Self {
            min_players: default_min_players(),
            default_max_players: default_max_players(),
            default_total_rounds: default_total_rounds(),
            cache_ttl_seconds: default_cache_ttl(),
            max_conflict_retries: default_conflict_retries(),
            local_cache_capacity: default_local_capacity(),
        }
    }
}

fn default_min_players() -> usize {
    2
}

fn default_max_players() -> usize {
    8
}

fn default_total_rounds() -> u32 {
    5
}

fn default_cache_ttl() -> u64 {
    300
}

fn default_conflict_retries() -> u32 {
    3
}

fn default_local_capacity() -> u64 {
    10_000
}
