//! Sliding-window rate limiter.
//!
//! Each `(action, identity)` pair owns a sorted set of admission tickets
//! scored by their epoch-millisecond timestamp. A check trims tickets that
//! fell out of the window, counts what is left and speculatively adds a new
//! ticket in one atomic pipeline. When the count already met the limit the
//! speculative ticket is removed again, so a denied request never occupies
//! quota.
//!
//! The limiter fails open: if the store cannot be reached the request is
//! admitted and the failure is logged.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use uuid::Uuid;

use playhub_core::config::{RateLimitConfig, RateLimitRule};
use playhub_core::error::AppError;
use playhub_core::result::AppResult;
use playhub_core::traits::store::{StateStore, StoreOp};
use playhub_store::{StoreManager, keys};

/// Rate-limited actions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RateLimitAction {
    /// Socket or fallback connection attempts, keyed by remote address.
    Connection,
    /// Joining a game.
    GameJoin,
    /// In-game actions.
    GameAction,
    /// Chat messages.
    ChatMessage,
    /// Generic HTTP API calls.
    Api,
    /// Authentication attempts.
    Auth,
}

impl RateLimitAction {
    /// Every action, in a stable order.
    pub const ALL: [Self; 6] = [
        Self::Connection,
        Self::GameJoin,
        Self::GameAction,
        Self::ChatMessage,
        Self::Api,
        Self::Auth,
    ];

    /// Key segment and configuration name.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Connection => "connection",
            Self::GameJoin => "game_join",
            Self::GameAction => "game_action",
            Self::ChatMessage => "chat_message",
            Self::Api => "api",
            Self::Auth => "auth",
        }
    }

    /// Built-in rule used when configuration does not override it.
    pub fn default_rule(&self) -> RateLimitRule {
        match self {
            Self::Connection => RateLimitRule::new(10, 60_000),
            Self::GameJoin => RateLimitRule::new(10, 60_000),
            Self::GameAction => RateLimitRule::new(60, 10_000),
            Self::ChatMessage => RateLimitRule::new(20, 60_000),
            Self::Api => RateLimitRule::new(100, 60_000),
            Self::Auth => RateLimitRule::new(5, 300_000),
        }
    }
}

impl fmt::Display for RateLimitAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RateLimitAction {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|a| a.as_str() == s)
            .ok_or_else(|| AppError::validation(format!("Unknown rate limit action '{s}'")))
    }
}

/// How a decision was reached.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Verdict {
    /// Counted against the sliding window.
    Counted,
    /// Identity is whitelisted.
    Whitelisted,
    /// Identity is blacklisted.
    Blacklisted,
    /// The store was unreachable and the request was admitted.
    FailOpen,
    /// Rate limiting is disabled.
    Disabled,
}

/// Outcome of one admission check.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateLimitDecision {
    /// Whether the request is admitted.
    pub allowed: bool,
    /// Admissions allowed per window.
    pub limit: u32,
    /// Tickets in the window, including this one when admitted.
    pub current: u32,
    /// Admissions left in the window.
    pub remaining: u32,
    /// When the window rolls past the current request.
    pub reset_at: DateTime<Utc>,
    /// Seconds to wait before retrying, set on denial.
    pub retry_after_secs: Option<u64>,
    /// How the decision was reached.
    pub verdict: Verdict,
}

impl RateLimitDecision {
    fn unlimited(verdict: Verdict) -> Self {
        Self {
            allowed: true,
            limit: u32::MAX,
            current: 0,
            remaining: u32::MAX,
            reset_at: Utc::now(),
            retry_after_secs: None,
            verdict,
        }
    }

    /// Turn a denial into an admission error.
    pub fn into_result(self, action: RateLimitAction) -> AppResult<Self> {
        if self.allowed {
            return Ok(self);
        }
        let retry = self.retry_after_secs.unwrap_or(1);
        Err(match self.verdict {
            Verdict::Blacklisted => AppError::blocked("Access is blocked", retry),
            _ => AppError::rate_limited(format!("Rate limit exceeded for {action}"), retry),
        })
    }
}

/// Sliding-window rate limiter over the shared store.
#[derive(Debug)]
pub struct RateLimiter {
    store: Arc<StoreManager>,
    rules: DashMap<RateLimitAction, RateLimitRule>,
    enabled: bool,
    blacklist_retry_after_secs: u64,
}

impl RateLimiter {
    /// Create a limiter. Unknown action names in `config.rules` are logged
    /// and ignored.
    pub fn new(store: Arc<StoreManager>, config: &RateLimitConfig) -> Self {
        let rules = DashMap::new();
        for action in RateLimitAction::ALL {
            rules.insert(action, action.default_rule());
        }
        for (name, rule) in &config.rules {
            match name.parse::<RateLimitAction>() {
                Ok(action) => {
                    rules.insert(action, *rule);
                }
                Err(_) => warn!(action = %name, "Ignoring rate limit rule for unknown action"),
            }
        }
        Self {
            store,
            rules,
            enabled: config.enabled,
            blacklist_retry_after_secs: config.blacklist_retry_after_seconds,
        }
    }

    /// Current rule for an action.
    pub fn rule(&self, action: RateLimitAction) -> RateLimitRule {
        self.rules
            .get(&action)
            .map(|r| *r.value())
            .unwrap_or_else(|| action.default_rule())
    }

    /// Override the rule for an action at runtime.
    pub fn set_rule(&self, action: RateLimitAction, rule: RateLimitRule) {
        info!(action = %action, limit = rule.limit, window_ms = rule.window_ms, "Rate limit rule updated");
        self.rules.insert(action, rule);
    }

    /// Standard sliding-window check.
    pub async fn check(&self, identity: &str, action: RateLimitAction) -> RateLimitDecision {
        if !self.enabled {
            return RateLimitDecision::unlimited(Verdict::Disabled);
        }
        let rule = self.rule(action);
        match self.check_window(identity, action, rule).await {
            Ok(decision) => decision,
            Err(e) => {
                warn!(identity = %identity, action = %action, error = %e, "Rate limiter store failure; admitting request");
                RateLimitDecision::unlimited(Verdict::FailOpen)
            }
        }
    }

    /// Blacklist, then whitelist, then the standard check.
    pub async fn check_enhanced(&self, identity: &str, action: RateLimitAction) -> RateLimitDecision {
        if !self.enabled {
            return RateLimitDecision::unlimited(Verdict::Disabled);
        }
        match self.store.sismember(&keys::rate_limit_blacklist(), identity).await {
            Ok(true) => {
                debug!(identity = %identity, action = %action, "Blacklisted identity rejected");
                return RateLimitDecision {
                    allowed: false,
                    limit: 0,
                    current: 0,
                    remaining: 0,
                    reset_at: Utc::now()
                        + chrono::Duration::seconds(self.blacklist_retry_after_secs as i64),
                    retry_after_secs: Some(self.blacklist_retry_after_secs),
                    verdict: Verdict::Blacklisted,
                };
            }
            Ok(false) => {}
            Err(e) => warn!(identity = %identity, error = %e, "Blacklist lookup failed"),
        }
        match self.store.sismember(&keys::rate_limit_whitelist(), identity).await {
            Ok(true) => return RateLimitDecision::unlimited(Verdict::Whitelisted),
            Ok(false) => {}
            Err(e) => warn!(identity = %identity, error = %e, "Whitelist lookup failed"),
        }
        self.check(identity, action).await
    }

    /// Check a batch concurrently. Results are in input order.
    pub async fn check_many(&self, requests: &[(String, RateLimitAction)]) -> Vec<RateLimitDecision> {
        join_all(
            requests
                .iter()
                .map(|(identity, action)| self.check(identity, *action)),
        )
        .await
    }

    /// [`RateLimiter::check_enhanced`] over a batch.
    pub async fn check_many_enhanced(
        &self,
        requests: &[(String, RateLimitAction)],
    ) -> Vec<RateLimitDecision> {
        join_all(
            requests
                .iter()
                .map(|(identity, action)| self.check_enhanced(identity, *action)),
        )
        .await
    }

    /// Clear the window of one identity and action.
    pub async fn reset(&self, identity: &str, action: RateLimitAction) -> AppResult<()> {
        self.store
            .delete(&keys::rate_limit(action.as_str(), identity))
            .await?;
        info!(identity = %identity, action = %action, "Rate limit window reset");
        Ok(())
    }

    /// Add an identity to the blacklist.
    pub async fn blacklist_add(&self, identity: &str) -> AppResult<bool> {
        let added = self.store.sadd(&keys::rate_limit_blacklist(), identity).await?;
        info!(identity = %identity, "Identity blacklisted");
        Ok(added)
    }

    /// Remove an identity from the blacklist.
    pub async fn blacklist_remove(&self, identity: &str) -> AppResult<bool> {
        self.store.srem(&keys::rate_limit_blacklist(), identity).await
    }

    /// Add an identity to the whitelist.
    pub async fn whitelist_add(&self, identity: &str) -> AppResult<bool> {
        let added = self.store.sadd(&keys::rate_limit_whitelist(), identity).await?;
        info!(identity = %identity, "Identity whitelisted");
        Ok(added)
    }

    /// Remove an identity from the whitelist.
    pub async fn whitelist_remove(&self, identity: &str) -> AppResult<bool> {
        self.store.srem(&keys::rate_limit_whitelist(), identity).await
    }

    async fn check_window(
        &self,
        identity: &str,
        action: RateLimitAction,
        rule: RateLimitRule,
    ) -> AppResult<RateLimitDecision> {
        let key = keys::rate_limit(action.as_str(), identity);
        let now = Utc::now();
        let now_ms = now.timestamp_millis();
        let window_start = now_ms - rule.window_ms as i64;
        let ticket = format!("{now_ms}-{}", Uuid::new_v4().simple());

        let replies = self
            .store
            .pipeline(vec![
                StoreOp::ZRemRangeByScore {
                    key: key.clone(),
                    min: f64::NEG_INFINITY,
                    max: window_start as f64,
                },
                StoreOp::ZCard { key: key.clone() },
                StoreOp::ZAdd {
                    key: key.clone(),
                    score: now_ms as f64,
                    member: ticket.clone(),
                },
                StoreOp::Expire {
                    key: key.clone(),
                    ttl: Duration::from_millis(rule.window_ms),
                },
            ])
            .await?;

        let before = replies
            .get(1)
            .map(|r| r.as_int())
            .unwrap_or_default()
            .max(0) as u32;
        let reset_at = now + chrono::Duration::milliseconds(rule.window_ms as i64);

        if before >= rule.limit {
            if let Err(e) = self.store.zrem(&key, &ticket).await {
                warn!(key = %key, error = %e, "Failed to roll back denied ticket");
            }
            debug!(identity = %identity, action = %action, count = before, limit = rule.limit, "Rate limit exceeded");
            return Ok(RateLimitDecision {
                allowed: false,
                limit: rule.limit,
                current: before,
                remaining: 0,
                reset_at,
                retry_after_secs: Some(rule.window_ms.div_ceil(1000).max(1)),
                verdict: Verdict::Counted,
            });
        }

        let current = before + 1;
        Ok(RateLimitDecision {
            allowed: true,
            limit: rule.limit,
            current,
            remaining: rule.limit.saturating_sub(current),
            reset_at,
            retry_after_secs: None,
            verdict: Verdict::Counted,
        })
    }
}
