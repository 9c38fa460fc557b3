//! Redis state store implementation.

use std::time::Duration;

use async_trait::async_trait;
use redis::AsyncCommands;
use tracing::debug;

use playhub_core::error::{AppError, ErrorKind};
use playhub_core::result::AppResult;
use playhub_core::traits::store::{StateStore, StoreOp, StoreReply};

use super::client::RedisClient;

/// Redis-backed state store.
#[derive(Debug, Clone)]
pub struct RedisStore {
    /// Redis client.
    client: RedisClient,
}

impl RedisStore {
    /// Create a new Redis store.
    pub fn new(client: RedisClient) -> Self {
        Self { client }
    }

    /// The underlying client, for transports that need dedicated connections.
    pub fn client(&self) -> &RedisClient {
        &self.client
    }

    /// Map a Redis error to an AppError.
    fn map_err(e: redis::RedisError) -> AppError {
        AppError::with_source(ErrorKind::Store, format!("Redis error: {e}"), e)
    }
}

/// Render a score bound the way Redis expects it.
fn score_arg(score: f64) -> String {
    if score == f64::NEG_INFINITY {
        "-inf".to_string()
    } else if score == f64::INFINITY {
        "+inf".to_string()
    } else {
        score.to_string()
    }
}

fn to_reply(value: redis::Value) -> StoreReply {
    match value {
        redis::Value::Int(n) => StoreReply::Int(n),
        redis::Value::Boolean(b) => StoreReply::Bool(b),
        _ => StoreReply::Ok,
    }
}

#[async_trait]
impl StateStore for RedisStore {
    async fn get(&self, key: &str) -> AppResult<Option<String>> {
        let full_key = self.client.prefixed_key(key);
        let mut conn = self.client.conn_mut();
        let result: Option<String> = conn.get(&full_key).await.map_err(Self::map_err)?;
        Ok(result)
    }

    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> AppResult<()> {
        let full_key = self.client.prefixed_key(key);
        let mut conn = self.client.conn_mut();
        let mut cmd = redis::cmd("SET");
        cmd.arg(&full_key).arg(value);
        if let Some(ttl) = ttl {
            cmd.arg("PX").arg(ttl.as_millis() as u64);
        }
        let _: () = cmd.query_async(&mut conn).await.map_err(Self::map_err)?;
        Ok(())
    }

    async fn set_nx(&self, key: &str, value: &str, ttl: Option<Duration>) -> AppResult<bool> {
        let full_key = self.client.prefixed_key(key);
        let mut conn = self.client.conn_mut();

        // SET key value [PX ttl] NX
        let mut cmd = redis::cmd("SET");
        cmd.arg(&full_key).arg(value);
        if let Some(ttl) = ttl {
            cmd.arg("PX").arg(ttl.as_millis() as u64);
        }
        cmd.arg("NX");
        let result: Option<String> = cmd.query_async(&mut conn).await.map_err(Self::map_err)?;

        Ok(result.is_some())
    }

    async fn delete(&self, key: &str) -> AppResult<bool> {
        let full_key = self.client.prefixed_key(key);
        let mut conn = self.client.conn_mut();
        let removed: i64 = conn.del(&full_key).await.map_err(Self::map_err)?;
        Ok(removed > 0)
    }

    async fn exists(&self, key: &str) -> AppResult<bool> {
        let full_key = self.client.prefixed_key(key);
        let mut conn = self.client.conn_mut();
        let result: bool = conn.exists(&full_key).await.map_err(Self::map_err)?;
        Ok(result)
    }

    async fn expire(&self, key: &str, ttl: Duration) -> AppResult<bool> {
        let full_key = self.client.prefixed_key(key);
        let mut conn = self.client.conn_mut();
        let result: bool = conn
            .pexpire(&full_key, ttl.as_millis() as i64)
            .await
            .map_err(Self::map_err)?;
        Ok(result)
    }

    async fn sadd(&self, key: &str, member: &str) -> AppResult<bool> {
        let full_key = self.client.prefixed_key(key);
        let mut conn = self.client.conn_mut();
        let added: i64 = conn.sadd(&full_key, member).await.map_err(Self::map_err)?;
        Ok(added > 0)
    }

    async fn srem(&self, key: &str, member: &str) -> AppResult<bool> {
        let full_key = self.client.prefixed_key(key);
        let mut conn = self.client.conn_mut();
        let removed: i64 = conn.srem(&full_key, member).await.map_err(Self::map_err)?;
        Ok(removed > 0)
    }

    async fn sismember(&self, key: &str, member: &str) -> AppResult<bool> {
        let full_key = self.client.prefixed_key(key);
        let mut conn = self.client.conn_mut();
        let result: bool = conn
            .sismember(&full_key, member)
            .await
            .map_err(Self::map_err)?;
        Ok(result)
    }

    async fn smembers(&self, key: &str) -> AppResult<Vec<String>> {
        let full_key = self.client.prefixed_key(key);
        let mut conn = self.client.conn_mut();
        let mut members: Vec<String> = conn.smembers(&full_key).await.map_err(Self::map_err)?;
        members.sort();
        Ok(members)
    }

    async fn zadd(&self, key: &str, score: f64, member: &str) -> AppResult<()> {
        let full_key = self.client.prefixed_key(key);
        let mut conn = self.client.conn_mut();
        let _: i64 = conn
            .zadd(&full_key, member, score)
            .await
            .map_err(Self::map_err)?;
        Ok(())
    }

    async fn zrem(&self, key: &str, member: &str) -> AppResult<bool> {
        let full_key = self.client.prefixed_key(key);
        let mut conn = self.client.conn_mut();
        let removed: i64 = conn.zrem(&full_key, member).await.map_err(Self::map_err)?;
        Ok(removed > 0)
    }

    async fn zcard(&self, key: &str) -> AppResult<u64> {
        let full_key = self.client.prefixed_key(key);
        let mut conn = self.client.conn_mut();
        let count: u64 = conn.zcard(&full_key).await.map_err(Self::map_err)?;
        Ok(count)
    }

    async fn zrevrange(&self, key: &str, start: isize, stop: isize) -> AppResult<Vec<String>> {
        let full_key = self.client.prefixed_key(key);
        let mut conn = self.client.conn_mut();
        let members: Vec<String> = conn
            .zrevrange(&full_key, start, stop)
            .await
            .map_err(Self::map_err)?;
        Ok(members)
    }

    async fn rpush(&self, key: &str, value: &str) -> AppResult<u64> {
        let full_key = self.client.prefixed_key(key);
        let mut conn = self.client.conn_mut();
        let len: u64 = conn.rpush(&full_key, value).await.map_err(Self::map_err)?;
        Ok(len)
    }

    async fn lpush(&self, key: &str, value: &str) -> AppResult<u64> {
        let full_key = self.client.prefixed_key(key);
        let mut conn = self.client.conn_mut();
        let len: u64 = conn.lpush(&full_key, value).await.map_err(Self::map_err)?;
        Ok(len)
    }

    async fn lrange(&self, key: &str, start: isize, stop: isize) -> AppResult<Vec<String>> {
        let full_key = self.client.prefixed_key(key);
        let mut conn = self.client.conn_mut();
        let values: Vec<String> = conn
            .lrange(&full_key, start, stop)
            .await
            .map_err(Self::map_err)?;
        Ok(values)
    }

    async fn ltrim(&self, key: &str, start: isize, stop: isize) -> AppResult<()> {
        let full_key = self.client.prefixed_key(key);
        let mut conn = self.client.conn_mut();
        let _: () = conn
            .ltrim(&full_key, start, stop)
            .await
            .map_err(Self::map_err)?;
        Ok(())
    }

    async fn stream_append(&self, key: &str, payload: &str, max_len: usize) -> AppResult<String> {
        let full_key = self.client.prefixed_key(key);
        let mut conn = self.client.conn_mut();
        let id: String = redis::cmd("XADD")
            .arg(&full_key)
            .arg("MAXLEN")
            .arg("~")
            .arg(max_len)
            .arg("*")
            .arg("payload")
            .arg(payload)
            .query_async(&mut conn)
            .await
            .map_err(Self::map_err)?;
        Ok(id)
    }

    async fn stream_len(&self, key: &str) -> AppResult<u64> {
        let full_key = self.client.prefixed_key(key);
        let mut conn = self.client.conn_mut();
        let len: u64 = redis::cmd("XLEN")
            .arg(&full_key)
            .query_async(&mut conn)
            .await
            .map_err(Self::map_err)?;
        Ok(len)
    }

    async fn pipeline(&self, ops: Vec<StoreOp>) -> AppResult<Vec<StoreReply>> {
        let mut pipe = redis::pipe();
        pipe.atomic();

        for op in &ops {
            match op {
                StoreOp::Set { key, value, ttl } => {
                    pipe.cmd("SET").arg(self.client.prefixed_key(key)).arg(value);
                    if let Some(ttl) = ttl {
                        pipe.arg("PX").arg(ttl.as_millis() as u64);
                    }
                }
                StoreOp::Delete { key } => {
                    pipe.cmd("DEL").arg(self.client.prefixed_key(key));
                }
                StoreOp::Expire { key, ttl } => {
                    pipe.cmd("PEXPIRE")
                        .arg(self.client.prefixed_key(key))
                        .arg(ttl.as_millis() as u64);
                }
                StoreOp::SAdd { key, member } => {
                    pipe.cmd("SADD").arg(self.client.prefixed_key(key)).arg(member);
                }
                StoreOp::SRem { key, member } => {
                    pipe.cmd("SREM").arg(self.client.prefixed_key(key)).arg(member);
                }
                StoreOp::ZAdd { key, score, member } => {
                    pipe.cmd("ZADD")
                        .arg(self.client.prefixed_key(key))
                        .arg(score_arg(*score))
                        .arg(member);
                }
                StoreOp::ZRem { key, member } => {
                    pipe.cmd("ZREM").arg(self.client.prefixed_key(key)).arg(member);
                }
                StoreOp::ZRemRangeByScore { key, min, max } => {
                    pipe.cmd("ZREMRANGEBYSCORE")
                        .arg(self.client.prefixed_key(key))
                        .arg(score_arg(*min))
                        .arg(score_arg(*max));
                }
                StoreOp::ZCard { key } => {
                    pipe.cmd("ZCARD").arg(self.client.prefixed_key(key));
                }
                StoreOp::RPush { key, value } => {
                    pipe.cmd("RPUSH").arg(self.client.prefixed_key(key)).arg(value);
                }
                StoreOp::LPush { key, value } => {
                    pipe.cmd("LPUSH").arg(self.client.prefixed_key(key)).arg(value);
                }
                StoreOp::LTrim { key, start, stop } => {
                    pipe.cmd("LTRIM")
                        .arg(self.client.prefixed_key(key))
                        .arg(*start)
                        .arg(*stop);
                }
            }
        }

        let mut conn = self.client.conn_mut();
        let values: Vec<redis::Value> = pipe.query_async(&mut conn).await.map_err(Self::map_err)?;
        debug!(ops = ops.len(), "Executed Redis pipeline");
        Ok(values.into_iter().map(to_reply).collect())
    }

    async fn health_check(&self) -> AppResult<bool> {
        let mut conn = self.client.conn_mut();
        let pong: String = redis::cmd("PING")
            .query_async(&mut conn)
            .await
            .map_err(Self::map_err)?;
        Ok(pong == "PONG")
    }

    fn backend_name(&self) -> &'static str {
        "redis"
    }
}
