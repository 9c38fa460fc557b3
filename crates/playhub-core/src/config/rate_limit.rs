//! Rate limiter configuration.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// A single sliding-window rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateLimitRule {
    /// Admissions allowed within one window.
    pub limit: u32,
    /// Window length in milliseconds.
    pub window_ms: u64,
}

impl RateLimitRule {
    /// Create a rule.
    pub const fn new(limit: u32, window_ms: u64) -> Self {
        Self { limit, window_ms }
    }
}

/// Rate limiter configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitConfig {
    /// Whether admission control is enforced at all.
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Per-action overrides keyed by action name (`connection`, `game_join`,
    /// `game_action`, `chat_message`, `api`, `auth`).
    #[serde(default)]
    pub rules: HashMap<String, RateLimitRule>,
    /// Retry-after returned to blacklisted identities, in seconds.
    #[serde(default = "default_blacklist_retry")]
    pub blacklist_retry_after_seconds: u64,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            rules: HashMap::new(),
            blacklist_retry_after_seconds: default_blacklist_retry(),
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_blacklist_retry() -> u64 {
    3600
}
