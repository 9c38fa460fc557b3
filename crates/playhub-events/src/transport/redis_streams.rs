//! Redis Streams transport with consumer groups.
//!
//! Each topic is one stream (`bus:{topic}`). A node reads through its
//! consumer group with `XREADGROUP` on a dedicated connection and
//! acknowledges an entry with `XACK` once it has been handed to the broker.
//! Unacknowledged entries are re-read from the pending list on restart.

use std::time::Duration;

use async_trait::async_trait;
use redis::aio::MultiplexedConnection;
use redis::streams::StreamReadReply;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use playhub_core::config::EventsConfig;
use playhub_core::error::{AppError, ErrorKind};
use playhub_core::result::AppResult;
use playhub_store::keys;
use playhub_store::redis::RedisClient;

use super::{EventTransport, TransportEnvelope};

const READ_COUNT: usize = 100;

/// Redis Streams transport.
#[derive(Debug)]
pub struct RedisStreamsTransport {
    client: RedisClient,
    /// Consumer group this node reads with.
    group: String,
    /// Consumer name within the group.
    consumer: String,
    max_len: usize,
    block_ms: u64,
    buffer_size: usize,
    shutdown: CancellationToken,
}

impl RedisStreamsTransport {
    /// Create a transport.
    pub fn new(client: RedisClient, group: String, consumer: String, config: &EventsConfig) -> Self {
        Self {
            client,
            group,
            consumer,
            max_len: config.stream_max_len,
            block_ms: config.read_block_ms,
            buffer_size: config.channel_buffer_size,
            shutdown: CancellationToken::new(),
        }
    }

    fn map_err(e: redis::RedisError) -> AppError {
        AppError::with_source(ErrorKind::Transport, format!("Redis Streams error: {e}"), e)
    }

    async fn ensure_group(&self, conn: &mut MultiplexedConnection, stream: &str) -> AppResult<()> {
        let created: Result<(), redis::RedisError> = redis::cmd("XGROUP")
            .arg("CREATE")
            .arg(stream)
            .arg(&self.group)
            .arg("$")
            .arg("MKSTREAM")
            .query_async(conn)
            .await;
        match created {
            Ok(()) => {
                info!(stream = %stream, group = %self.group, "Created consumer group");
                Ok(())
            }
            Err(e) if e.code() == Some("BUSYGROUP") => Ok(()),
            Err(e) => Err(Self::map_err(e)),
        }
    }
}

/// Parse one stream entry into an envelope.
fn decode(entry: &redis::streams::StreamId) -> Option<TransportEnvelope> {
    let payload: String = entry.get("payload")?;
    match serde_json::from_str(&payload) {
        Ok(envelope) => Some(envelope),
        Err(e) => {
            warn!(id = %entry.id, error = %e, "Dropping undecodable stream entry");
            None
        }
    }
}

struct Reader {
    conn: MultiplexedConnection,
    stream: String,
    group: String,
    consumer: String,
    block_ms: u64,
    tx: mpsc::Sender<TransportEnvelope>,
}

impl Reader {
    async fn read(&mut self, cursor: &str) -> redis::RedisResult<Option<StreamReadReply>> {
        let mut cmd = redis::cmd("XREADGROUP");
        cmd.arg("GROUP")
            .arg(&self.group)
            .arg(&self.consumer)
            .arg("COUNT")
            .arg(READ_COUNT);
        if cursor == ">" {
            cmd.arg("BLOCK").arg(self.block_ms);
        }
        cmd.arg("STREAMS").arg(&self.stream).arg(cursor);
        cmd.query_async(&mut self.conn).await
    }

    async fn ack(&mut self, id: &str) -> redis::RedisResult<()> {
        let _: i64 = redis::cmd("XACK")
            .arg(&self.stream)
            .arg(&self.group)
            .arg(id)
            .query_async(&mut self.conn)
            .await?;
        Ok(())
    }

    /// Hand a batch to the broker. Returns whether the receiver is still
    /// open and how many entries were processed.
    async fn deliver(&mut self, reply: StreamReadReply) -> (bool, usize) {
        let mut processed = 0;
        for key in reply.keys {
            for entry in key.ids {
                if let Some(envelope) = decode(&entry) {
                    if self.tx.send(envelope).await.is_err() {
                        return (false, processed);
                    }
                }
                if let Err(e) = self.ack(&entry.id).await {
                    warn!(id = %entry.id, error = %e, "XACK failed; entry will be redelivered");
                }
                processed += 1;
            }
        }
        (true, processed)
    }

    async fn run(mut self, shutdown: CancellationToken) {
        // Drain this consumer's pending entries before reading new ones.
        let mut cursor = "0";
        loop {
            let result = tokio::select! {
                _ = shutdown.cancelled() => break,
                result = self.read(cursor) => result,
            };
            match result {
                Ok(Some(reply)) => {
                    let (open, processed) = self.deliver(reply).await;
                    if !open {
                        break;
                    }
                    if cursor == "0" && processed == 0 {
                        cursor = ">";
                    }
                }
                Ok(None) => {
                    cursor = ">";
                }
                Err(e) => {
                    error!(stream = %self.stream, error = %e, "XREADGROUP failed");
                    tokio::select! {
                        _ = shutdown.cancelled() => break,
                        _ = tokio::time::sleep(Duration::from_secs(1)) => {}
                    }
                }
            }
        }
        debug!(stream = %self.stream, "Stream reader stopped");
    }
}

#[async_trait]
impl EventTransport for RedisStreamsTransport {
    async fn publish(&self, topic: &str, envelope: &TransportEnvelope) -> AppResult<()> {
        let stream = self.client.prefixed_key(&keys::topic_stream(topic));
        let payload = serde_json::to_string(envelope)?;
        let mut conn = self.client.conn_mut();
        let _: String = redis::cmd("XADD")
            .arg(&stream)
            .arg("MAXLEN")
            .arg("~")
            .arg(self.max_len)
            .arg("*")
            .arg("payload")
            .arg(payload)
            .query_async(&mut conn)
            .await
            .map_err(Self::map_err)?;
        Ok(())
    }

    async fn subscribe(&self, topic: &str) -> AppResult<mpsc::Receiver<TransportEnvelope>> {
        let stream = self.client.prefixed_key(&keys::topic_stream(topic));
        let mut conn = self
            .client
            .dedicated()
            .await
            .map_err(|e| AppError::new(ErrorKind::Transport, e.message))?;
        self.ensure_group(&mut conn, &stream).await?;

        let (tx, rx) = mpsc::channel(self.buffer_size);
        let reader = Reader {
            conn,
            stream,
            group: self.group.clone(),
            consumer: self.consumer.clone(),
            block_ms: self.block_ms,
            tx,
        };
        tokio::spawn(reader.run(self.shutdown.clone()));
        info!(topic = %topic, group = %self.group, "Joined stream topic");
        Ok(rx)
    }

    async fn health_check(&self) -> AppResult<bool> {
        let mut conn = self.client.conn_mut();
        let pong: String = redis::cmd("PING")
            .query_async(&mut conn)
            .await
            .map_err(Self::map_err)?;
        Ok(pong == "PONG")
    }

    fn shutdown(&self) {
        self.shutdown.cancel();
    }

    fn name(&self) -> &'static str {
        "redis-streams"
    }
}
