//! Outbound batching optimizer.
//!
//! Messages addressed to a channel wait in that channel's queue until the
//! next tick or until the queue reaches its maximum size. A flush of one
//! message is a direct delivery; a flush of several wraps them in a single
//! `batch` envelope. Flushed deliveries leave on one ordered output channel
//! while the queue lock is held, so a channel's messages are never
//! reordered between an immediate flush and a tick.

use std::collections::HashMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};

use tokio::sync::mpsc;
use tracing::warn;

use crate::message::ServerMessage;

/// A flushed message bound for every subscriber of `channel`.
#[derive(Debug, Clone, PartialEq)]
pub struct Delivery {
    /// Target channel.
    pub channel: String,
    /// A single message or a `batch` envelope.
    pub message: ServerMessage,
}

/// Batching counters.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct BatchStats {
    /// Messages accepted.
    pub messages: u64,
    /// `batch` envelopes sent.
    pub batches: u64,
    /// Messages that travelled inside an envelope.
    pub batched_messages: u64,
    /// Messages delivered on their own.
    pub direct: u64,
}

impl BatchStats {
    /// Mean messages per envelope.
    pub fn messages_per_batch(&self) -> f64 {
        if self.batches == 0 {
            0.0
        } else {
            self.batched_messages as f64 / self.batches as f64
        }
    }

    /// Share of transport sends saved by batching, 0.0 to 1.0.
    pub fn efficiency(&self) -> f64 {
        let flushed = self.batched_messages + self.direct;
        if flushed == 0 {
            0.0
        } else {
            1.0 - (self.batches + self.direct) as f64 / flushed as f64
        }
    }
}

/// Per-channel outbound queues.
#[derive(Debug)]
pub struct BatchOptimizer {
    queues: Mutex<HashMap<String, Vec<ServerMessage>>>,
    output: mpsc::UnboundedSender<Delivery>,
    max_size: usize,
    messages: AtomicU64,
    batches: AtomicU64,
    batched_messages: AtomicU64,
    direct: AtomicU64,
}

impl BatchOptimizer {
    /// Create an optimizer and the receiver of its flushed deliveries.
    pub fn new(max_size: usize) -> (Self, mpsc::UnboundedReceiver<Delivery>) {
        let (output, rx) = mpsc::unbounded_channel();
        let optimizer = Self {
            queues: Mutex::new(HashMap::new()),
            output,
            max_size: max_size.max(1),
            messages: AtomicU64::new(0),
            batches: AtomicU64::new(0),
            batched_messages: AtomicU64::new(0),
            direct: AtomicU64::new(0),
        };
        (optimizer, rx)
    }

    /// Queue a message. A queue reaching the maximum size flushes at once.
    pub fn enqueue(&self, channel: &str, message: ServerMessage) {
        self.messages.fetch_add(1, Ordering::Relaxed);
        let Ok(mut queues) = self.queues.lock() else {
            warn!(channel, "Batch queue lock poisoned, dropping message");
            return;
        };
        let queue = queues.entry(channel.to_string()).or_default();
        queue.push(message);
        if queue.len() >= self.max_size {
            if let Some(messages) = queues.remove(channel) {
                self.emit(channel.to_string(), messages);
            }
        }
    }

    /// Flush every pending queue. Returns the number of deliveries emitted.
    pub fn flush(&self) -> usize {
        let Ok(mut queues) = self.queues.lock() else {
            return 0;
        };
        let mut emitted = 0;
        for (channel, messages) in queues.drain() {
            if !messages.is_empty() {
                self.emit(channel, messages);
                emitted += 1;
            }
        }
        emitted
    }

    /// Messages waiting for the next tick.
    pub fn pending(&self) -> usize {
        self.queues
            .lock()
            .map(|q| q.values().map(Vec::len).sum())
            .unwrap_or(0)
    }

    /// Counter snapshot.
    pub fn stats(&self) -> BatchStats {
        BatchStats {
            messages: self.messages.load(Ordering::Relaxed),
            batches: self.batches.load(Ordering::Relaxed),
            batched_messages: self.batched_messages.load(Ordering::Relaxed),
            direct: self.direct.load(Ordering::Relaxed),
        }
    }

    fn emit(&self, channel: String, mut messages: Vec<ServerMessage>) {
        let message = if messages.len() == 1 {
            self.direct.fetch_add(1, Ordering::Relaxed);
            messages.remove(0)
        } else {
            self.batches.fetch_add(1, Ordering::Relaxed);
            self.batched_messages
                .fetch_add(messages.len() as u64, Ordering::Relaxed);
            ServerMessage::Batch {
                channel: channel.clone(),
                count: messages.len(),
                messages,
            }
        };
        if self.output.send(Delivery { channel, message }).is_err() {
            warn!("Batch output closed, delivery dropped");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pong(n: i64) -> ServerMessage {
        ServerMessage::Pong {
            timestamp: n,
            server_time: n,
            latency_ms: 0.0,
            quality: 100,
        }
    }

    #[test]
    fn test_ten_messages_become_one_batch_in_order() {
        let (batcher, mut rx) = BatchOptimizer::new(50);
        for n in 0..10 {
            batcher.enqueue("room:lobby", pong(n));
        }
        assert!(rx.try_recv().is_err());
        assert_eq!(batcher.flush(), 1);

        let delivery = rx.try_recv().unwrap();
        assert_eq!(delivery.channel, "room:lobby");
        let ServerMessage::Batch { count, messages, .. } = delivery.message else {
            panic!("expected a batch envelope");
        };
        assert_eq!(count, 10);
        assert_eq!(messages, (0..10).map(pong).collect::<Vec<_>>());
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_single_message_is_sent_direct() {
        let (batcher, mut rx) = BatchOptimizer::new(50);
        batcher.enqueue("room:lobby", pong(1));
        batcher.flush();
        assert_eq!(rx.try_recv().unwrap().message, pong(1));
        assert_eq!(batcher.stats().direct, 1);
        assert_eq!(batcher.flush(), 0);
    }

    #[test]
    fn test_full_queue_flushes_immediately() {
        let (batcher, mut rx) = BatchOptimizer::new(3);
        for n in 0..4 {
            batcher.enqueue("room:lobby", pong(n));
        }
        let first = rx.try_recv().unwrap();
        assert!(matches!(first.message, ServerMessage::Batch { count: 3, .. }));
        assert_eq!(batcher.pending(), 1);

        batcher.flush();
        assert_eq!(rx.try_recv().unwrap().message, pong(3));

        let stats = batcher.stats();
        assert_eq!(stats.messages, 4);
        assert_eq!(stats.messages_per_batch(), 3.0);
        assert!((stats.efficiency() - 0.5).abs() < 1e-9);
    }
}
