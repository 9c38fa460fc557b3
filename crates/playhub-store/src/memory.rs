//! In-process state store.
//!
//! One mutex-guarded keyspace of typed values. Expiry is tracked on the
//! tokio clock so paused-time tests can drive TTLs deterministically.
//! Expired keys are purged lazily on access and are invisible to every read.

use std::collections::{BTreeSet, HashMap, VecDeque};
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use tokio::time::Instant;
use tracing::debug;

use playhub_core::error::AppError;
use playhub_core::result::AppResult;
use playhub_core::traits::store::{StateStore, StoreOp, StoreReply};

/// A typed value stored under one key.
#[derive(Debug)]
enum Value {
    Str(String),
    Set(BTreeSet<String>),
    ZSet(HashMap<String, f64>),
    List(VecDeque<String>),
    Stream(VecDeque<(String, String)>),
}

impl Value {
    fn type_name(&self) -> &'static str {
        match self {
            Self::Str(_) => "string",
            Self::Set(_) => "set",
            Self::ZSet(_) => "zset",
            Self::List(_) => "list",
            Self::Stream(_) => "stream",
        }
    }
}

#[derive(Debug)]
struct Entry {
    value: Value,
    expires_at: Option<Instant>,
}

#[derive(Debug, Default)]
struct Keyspace {
    entries: HashMap<String, Entry>,
    stream_seq: u64,
}

fn wrong_type(key: &str, found: &Value) -> AppError {
    AppError::store(format!(
        "WRONGTYPE key '{key}' holds a {}",
        found.type_name()
    ))
}

/// Resolve Redis-style inclusive `start..=stop` indices against a length.
fn normalize_range(len: usize, start: isize, stop: isize) -> Option<(usize, usize)> {
    let len = len as isize;
    if len == 0 {
        return None;
    }
    let s = if start < 0 { (len + start).max(0) } else { start };
    let e = if stop < 0 { len + stop } else { stop.min(len - 1) };
    if s > e || s >= len || e < 0 {
        None
    } else {
        Some((s as usize, e as usize))
    }
}

macro_rules! typed_mut {
    ($ks:expr, $key:expr, $variant:ident, $default:expr) => {{
        let entry = $ks.entries.entry($key.to_string()).or_insert_with(|| Entry {
            value: Value::$variant($default),
            expires_at: None,
        });
        match &mut entry.value {
            Value::$variant(inner) => inner,
            other => return Err(wrong_type($key, other)),
        }
    }};
}

impl Keyspace {
    /// Drop the key if its TTL has elapsed.
    fn purge(&mut self, key: &str, now: Instant) {
        let expired = self
            .entries
            .get(key)
            .and_then(|e| e.expires_at)
            .is_some_and(|at| at <= now);
        if expired {
            self.entries.remove(key);
        }
    }

    fn live(&mut self, key: &str, now: Instant) -> Option<&mut Entry> {
        self.purge(key, now);
        self.entries.get_mut(key)
    }

    /// Remove a collection key once it becomes empty, as Redis does.
    fn drop_if_empty(&mut self, key: &str) {
        let empty = match self.entries.get(key).map(|e| &e.value) {
            Some(Value::Set(s)) => s.is_empty(),
            Some(Value::ZSet(z)) => z.is_empty(),
            Some(Value::List(l)) => l.is_empty(),
            _ => false,
        };
        if empty {
            self.entries.remove(key);
        }
    }

    fn set(&mut self, key: &str, value: &str, ttl: Option<Duration>, now: Instant) {
        self.entries.insert(
            key.to_string(),
            Entry {
                value: Value::Str(value.to_string()),
                expires_at: ttl.map(|t| now + t),
            },
        );
    }

    fn delete(&mut self, key: &str, now: Instant) -> bool {
        self.purge(key, now);
        self.entries.remove(key).is_some()
    }

    fn expire(&mut self, key: &str, ttl: Duration, now: Instant) -> bool {
        match self.live(key, now) {
            Some(entry) => {
                entry.expires_at = Some(now + ttl);
                true
            }
            None => false,
        }
    }

    fn sadd(&mut self, key: &str, member: &str, now: Instant) -> AppResult<bool> {
        self.purge(key, now);
        let set = typed_mut!(self, key, Set, BTreeSet::new());
        Ok(set.insert(member.to_string()))
    }

    fn srem(&mut self, key: &str, member: &str, now: Instant) -> AppResult<bool> {
        let removed = match self.live(key, now) {
            Some(Entry {
                value: Value::Set(set),
                ..
            }) => set.remove(member),
            Some(other) => return Err(wrong_type(key, &other.value)),
            None => false,
        };
        self.drop_if_empty(key);
        Ok(removed)
    }

    fn zadd(&mut self, key: &str, score: f64, member: &str, now: Instant) -> AppResult<bool> {
        self.purge(key, now);
        let zset = typed_mut!(self, key, ZSet, HashMap::new());
        Ok(zset.insert(member.to_string(), score).is_none())
    }

    fn zrem(&mut self, key: &str, member: &str, now: Instant) -> AppResult<bool> {
        let removed = match self.live(key, now) {
            Some(Entry {
                value: Value::ZSet(zset),
                ..
            }) => zset.remove(member).is_some(),
            Some(other) => return Err(wrong_type(key, &other.value)),
            None => false,
        };
        self.drop_if_empty(key);
        Ok(removed)
    }

    fn zremrangebyscore(&mut self, key: &str, min: f64, max: f64, now: Instant) -> AppResult<i64> {
        let removed = match self.live(key, now) {
            Some(Entry {
                value: Value::ZSet(zset),
                ..
            }) => {
                let before = zset.len();
                zset.retain(|_, score| *score < min || *score > max);
                (before - zset.len()) as i64
            }
            Some(other) => return Err(wrong_type(key, &other.value)),
            None => 0,
        };
        self.drop_if_empty(key);
        Ok(removed)
    }

    fn zcard(&mut self, key: &str, now: Instant) -> AppResult<u64> {
        match self.live(key, now) {
            Some(Entry {
                value: Value::ZSet(zset),
                ..
            }) => Ok(zset.len() as u64),
            Some(other) => Err(wrong_type(key, &other.value)),
            None => Ok(0),
        }
    }

    fn push(&mut self, key: &str, value: &str, front: bool, now: Instant) -> AppResult<u64> {
        self.purge(key, now);
        let list = typed_mut!(self, key, List, VecDeque::new());
        if front {
            list.push_front(value.to_string());
        } else {
            list.push_back(value.to_string());
        }
        Ok(list.len() as u64)
    }

    fn ltrim(&mut self, key: &str, start: isize, stop: isize, now: Instant) -> AppResult<()> {
        match self.live(key, now) {
            Some(Entry {
                value: Value::List(list),
                ..
            }) => match normalize_range(list.len(), start, stop) {
                Some((s, e)) => {
                    list.truncate(e + 1);
                    list.drain(..s);
                }
                None => list.clear(),
            },
            Some(other) => return Err(wrong_type(key, &other.value)),
            None => {}
        }
        self.drop_if_empty(key);
        Ok(())
    }

    fn apply(&mut self, op: &StoreOp, now: Instant) -> AppResult<StoreReply> {
        let reply = match op {
            StoreOp::Set { key, value, ttl } => {
                self.set(key, value, *ttl, now);
                StoreReply::Ok
            }
            StoreOp::Delete { key } => StoreReply::Bool(self.delete(key, now)),
            StoreOp::Expire { key, ttl } => StoreReply::Bool(self.expire(key, *ttl, now)),
            StoreOp::SAdd { key, member } => StoreReply::Bool(self.sadd(key, member, now)?),
            StoreOp::SRem { key, member } => StoreReply::Bool(self.srem(key, member, now)?),
            StoreOp::ZAdd { key, score, member } => {
                StoreReply::Bool(self.zadd(key, *score, member, now)?)
            }
            StoreOp::ZRem { key, member } => StoreReply::Bool(self.zrem(key, member, now)?),
            StoreOp::ZRemRangeByScore { key, min, max } => {
                StoreReply::Int(self.zremrangebyscore(key, *min, *max, now)?)
            }
            StoreOp::ZCard { key } => StoreReply::Int(self.zcard(key, now)? as i64),
            StoreOp::RPush { key, value } => StoreReply::Int(self.push(key, value, false, now)? as i64),
            StoreOp::LPush { key, value } => StoreReply::Int(self.push(key, value, true, now)? as i64),
            StoreOp::LTrim { key, start, stop } => {
                self.ltrim(key, *start, *stop, now)?;
                StoreReply::Ok
            }
        };
        Ok(reply)
    }
}

/// In-memory state store.
#[derive(Debug, Default)]
pub struct MemoryStore {
    keyspace: Mutex<Keyspace>,
    unavailable: AtomicBool,
}

impl MemoryStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Simulate an outage: while set, every operation fails with a store error.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
        debug!(unavailable, "Memory store availability changed");
    }

    fn with<T>(&self, f: impl FnOnce(&mut Keyspace, Instant) -> AppResult<T>) -> AppResult<T> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(AppError::store("Memory store is unavailable"));
        }
        let mut guard = self.keyspace.lock().unwrap_or_else(|e| e.into_inner());
        f(&mut guard, Instant::now())
    }
}

#[async_trait]
impl StateStore for MemoryStore {
    async fn get(&self, key: &str) -> AppResult<Option<String>> {
        self.with(|ks, now| match ks.live(key, now) {
            Some(Entry {
                value: Value::Str(s),
                ..
            }) => Ok(Some(s.clone())),
            Some(other) => Err(wrong_type(key, &other.value)),
            None => Ok(None),
        })
    }

    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> AppResult<()> {
        self.with(|ks, now| {
            ks.set(key, value, ttl, now);
            Ok(())
        })
    }

    async fn set_nx(&self, key: &str, value: &str, ttl: Option<Duration>) -> AppResult<bool> {
        self.with(|ks, now| {
            if ks.live(key, now).is_some() {
                return Ok(false);
            }
            ks.set(key, value, ttl, now);
            Ok(true)
        })
    }

    async fn delete(&self, key: &str) -> AppResult<bool> {
        self.with(|ks, now| Ok(ks.delete(key, now)))
    }

    async fn exists(&self, key: &str) -> AppResult<bool> {
        self.with(|ks, now| Ok(ks.live(key, now).is_some()))
    }

    async fn expire(&self, key: &str, ttl: Duration) -> AppResult<bool> {
        self.with(|ks, now| Ok(ks.expire(key, ttl, now)))
    }

    async fn sadd(&self, key: &str, member: &str) -> AppResult<bool> {
        self.with(|ks, now| ks.sadd(key, member, now))
    }

    async fn srem(&self, key: &str, member: &str) -> AppResult<bool> {
        self.with(|ks, now| ks.srem(key, member, now))
    }

    async fn sismember(&self, key: &str, member: &str) -> AppResult<bool> {
        self.with(|ks, now| match ks.live(key, now) {
            Some(Entry {
                value: Value::Set(set),
                ..
            }) => Ok(set.contains(member)),
            Some(other) => Err(wrong_type(key, &other.value)),
            None => Ok(false),
        })
    }

    async fn smembers(&self, key: &str) -> AppResult<Vec<String>> {
        self.with(|ks, now| match ks.live(key, now) {
            Some(Entry {
                value: Value::Set(set),
                ..
            }) => Ok(set.iter().cloned().collect()),
            Some(other) => Err(wrong_type(key, &other.value)),
            None => Ok(Vec::new()),
        })
    }

    async fn zadd(&self, key: &str, score: f64, member: &str) -> AppResult<()> {
        self.with(|ks, now| ks.zadd(key, score, member, now).map(|_| ()))
    }

    async fn zrem(&self, key: &str, member: &str) -> AppResult<bool> {
        self.with(|ks, now| ks.zrem(key, member, now))
    }

    async fn zcard(&self, key: &str) -> AppResult<u64> {
        self.with(|ks, now| ks.zcard(key, now))
    }

    async fn zrevrange(&self, key: &str, start: isize, stop: isize) -> AppResult<Vec<String>> {
        self.with(|ks, now| match ks.live(key, now) {
            Some(Entry {
                value: Value::ZSet(zset),
                ..
            }) => {
                let mut members: Vec<(&String, f64)> =
                    zset.iter().map(|(m, s)| (m, *s)).collect();
                members.sort_by(|a, b| b.1.total_cmp(&a.1).then_with(|| b.0.cmp(a.0)));
                Ok(match normalize_range(members.len(), start, stop) {
                    Some((s, e)) => members[s..=e].iter().map(|(m, _)| (*m).clone()).collect(),
                    None => Vec::new(),
                })
            }
            Some(other) => Err(wrong_type(key, &other.value)),
            None => Ok(Vec::new()),
        })
    }

    async fn rpush(&self, key: &str, value: &str) -> AppResult<u64> {
        self.with(|ks, now| ks.push(key, value, false, now))
    }

    async fn lpush(&self, key: &str, value: &str) -> AppResult<u64> {
        self.with(|ks, now| ks.push(key, value, true, now))
    }

    async fn lrange(&self, key: &str, start: isize, stop: isize) -> AppResult<Vec<String>> {
        self.with(|ks, now| match ks.live(key, now) {
            Some(Entry {
                value: Value::List(list),
                ..
            }) => Ok(match normalize_range(list.len(), start, stop) {
                Some((s, e)) => list.range(s..=e).cloned().collect(),
                None => Vec::new(),
            }),
            Some(other) => Err(wrong_type(key, &other.value)),
            None => Ok(Vec::new()),
        })
    }

    async fn ltrim(&self, key: &str, start: isize, stop: isize) -> AppResult<()> {
        self.with(|ks, now| ks.ltrim(key, start, stop, now))
    }

    async fn stream_append(&self, key: &str, payload: &str, max_len: usize) -> AppResult<String> {
        self.with(|ks, now| {
            ks.purge(key, now);
            ks.stream_seq += 1;
            let id = format!("{}-{}", chrono::Utc::now().timestamp_millis(), ks.stream_seq);
            let stream = typed_mut!(ks, key, Stream, VecDeque::new());
            stream.push_back((id.clone(), payload.to_string()));
            while max_len > 0 && stream.len() > max_len {
                stream.pop_front();
            }
            Ok(id)
        })
    }

    async fn stream_len(&self, key: &str) -> AppResult<u64> {
        self.with(|ks, now| match ks.live(key, now) {
            Some(Entry {
                value: Value::Stream(stream),
                ..
            }) => Ok(stream.len() as u64),
            Some(other) => Err(wrong_type(key, &other.value)),
            None => Ok(0),
        })
    }

    async fn pipeline(&self, ops: Vec<StoreOp>) -> AppResult<Vec<StoreReply>> {
        // The keyspace lock is held for the whole batch.
        self.with(|ks, now| ops.iter().map(|op| ks.apply(op, now)).collect())
    }

    async fn health_check(&self) -> AppResult<bool> {
        self.with(|_, _| Ok(true))
    }

    fn backend_name(&self) -> &'static str {
        "memory"
    }
}
