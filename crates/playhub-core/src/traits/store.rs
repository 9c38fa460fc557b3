//! Shared state store trait for pluggable backends.

use std::time::Duration;

use async_trait::async_trait;

use crate::result::AppResult;

/// One operation inside an atomic [`StateStore::pipeline`] batch.
#[derive(Debug, Clone, PartialEq)]
pub enum StoreOp {
    /// Set a string value with an optional TTL.
    Set {
        /// Key.
        key: String,
        /// Value.
        value: String,
        /// Optional expiry.
        ttl: Option<Duration>,
    },
    /// Delete a key.
    Delete {
        /// Key.
        key: String,
    },
    /// Set the TTL of an existing key.
    Expire {
        /// Key.
        key: String,
        /// Expiry.
        ttl: Duration,
    },
    /// Add a member to a set.
    SAdd {
        /// Key.
        key: String,
        /// Member.
        member: String,
    },
    /// Remove a member from a set.
    SRem {
        /// Key.
        key: String,
        /// Member.
        member: String,
    },
    /// Add a member to a sorted set.
    ZAdd {
        /// Key.
        key: String,
        /// Score.
        score: f64,
        /// Member.
        member: String,
    },
    /// Remove a member from a sorted set.
    ZRem {
        /// Key.
        key: String,
        /// Member.
        member: String,
    },
    /// Remove sorted set members with `min <= score <= max`.
    ZRemRangeByScore {
        /// Key.
        key: String,
        /// Inclusive lower bound.
        min: f64,
        /// Inclusive upper bound.
        max: f64,
    },
    /// Count the members of a sorted set.
    ZCard {
        /// Key.
        key: String,
    },
    /// Append to the tail of a list.
    RPush {
        /// Key.
        key: String,
        /// Value.
        value: String,
    },
    /// Prepend to the head of a list.
    LPush {
        /// Key.
        key: String,
        /// Value.
        value: String,
    },
    /// Keep only the list elements between `start` and `stop` inclusive.
    LTrim {
        /// Key.
        key: String,
        /// Start index.
        start: isize,
        /// Stop index (negative counts from the tail).
        stop: isize,
    },
}

/// Result of one [`StoreOp`], in batch order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreReply {
    /// The operation has no meaningful return value.
    Ok,
    /// An integer result (counts, lengths).
    Int(i64),
    /// A boolean result (key existed, member added).
    Bool(bool),
}

impl StoreReply {
    /// Interpret the reply as a count.
    pub fn as_int(&self) -> i64 {
        match self {
            Self::Ok => 0,
            Self::Int(n) => *n,
            Self::Bool(b) => i64::from(*b),
        }
    }
}

/// Trait for shared state backends (Redis, in-memory).
///
/// All values are strings (JSON where structured). The provider is
/// responsible for key prefixing and TTL enforcement; expired keys must be
/// invisible to every read.
#[async_trait]
pub trait StateStore: Send + Sync + std::fmt::Debug + 'static {
    /// Get a value by key.
    async fn get(&self, key: &str) -> AppResult<Option<String>>;

    /// Set a value with an optional TTL.
    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> AppResult<()>;

    /// Set a value only if the key does not exist (NX).
    /// Returns `true` if the value was written.
    async fn set_nx(&self, key: &str, value: &str, ttl: Option<Duration>) -> AppResult<bool>;

    /// Delete a key. Returns `true` if it existed.
    async fn delete(&self, key: &str) -> AppResult<bool>;

    /// Check whether a key exists.
    async fn exists(&self, key: &str) -> AppResult<bool>;

    /// Set the TTL on an existing key.
    async fn expire(&self, key: &str, ttl: Duration) -> AppResult<bool>;

    /// Add a member to a set. Returns `true` if newly added.
    async fn sadd(&self, key: &str, member: &str) -> AppResult<bool>;

    /// Remove a member from a set. Returns `true` if it was present.
    async fn srem(&self, key: &str, member: &str) -> AppResult<bool>;

    /// Check set membership.
    async fn sismember(&self, key: &str, member: &str) -> AppResult<bool>;

    /// List set members.
    async fn smembers(&self, key: &str) -> AppResult<Vec<String>>;

    /// Add or update a sorted set member.
    async fn zadd(&self, key: &str, score: f64, member: &str) -> AppResult<()>;

    /// Remove a sorted set member.
    async fn zrem(&self, key: &str, member: &str) -> AppResult<bool>;

    /// Count sorted set members.
    async fn zcard(&self, key: &str) -> AppResult<u64>;

    /// Members by descending score, `start..=stop` (negative counts from the end).
    async fn zrevrange(&self, key: &str, start: isize, stop: isize) -> AppResult<Vec<String>>;

    /// Append to a list. Returns the new length.
    async fn rpush(&self, key: &str, value: &str) -> AppResult<u64>;

    /// Prepend to a list. Returns the new length.
    async fn lpush(&self, key: &str, value: &str) -> AppResult<u64>;

    /// List elements `start..=stop` (negative counts from the end).
    async fn lrange(&self, key: &str, start: isize, stop: isize) -> AppResult<Vec<String>>;

    /// Trim a list to `start..=stop`.
    async fn ltrim(&self, key: &str, start: isize, stop: isize) -> AppResult<()>;

    /// Append an entry to an append-only stream, capped at roughly `max_len`.
    /// Returns the entry id.
    async fn stream_append(&self, key: &str, payload: &str, max_len: usize) -> AppResult<String>;

    /// Number of entries in a stream.
    async fn stream_len(&self, key: &str) -> AppResult<u64>;

    /// Execute a batch atomically. Replies are returned in batch order.
    async fn pipeline(&self, ops: Vec<StoreOp>) -> AppResult<Vec<StoreReply>>;

    /// Check that the backend is reachable.
    async fn health_check(&self) -> AppResult<bool>;

    /// Short backend name for logs and health output.
    fn backend_name(&self) -> &'static str;
}
