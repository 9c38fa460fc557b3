//! Realtime engine metrics.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};

use crate::batching::BatchStats;
use crate::connection::ConnectionRecord;

/// Engine-level metrics counters.
#[derive(Debug, Default)]
pub struct EngineMetrics {
    /// Messages handed to local sockets and fallback clients
    pub messages_sent: AtomicU64,
    /// Inbound client messages
    pub messages_received: AtomicU64,
    /// Connections ever accepted
    pub connections_total: AtomicU64,
    /// Handshakes rejected by admission control
    pub connections_rejected: AtomicU64,
    /// Deliveries received from other nodes
    pub fanout_received: AtomicU64,
}

impl EngineMetrics {
    /// Create new zeroed metrics
    pub fn new() -> Self {
        Self::default()
    }

    /// Count `n` outbound messages.
    pub fn add_sent(&self, n: u64) {
        self.messages_sent.fetch_add(n, Ordering::Relaxed);
    }

    /// Count an inbound message.
    pub fn inc_received(&self) {
        self.messages_received.fetch_add(1, Ordering::Relaxed);
    }

    /// Count an accepted connection.
    pub fn inc_connections(&self) {
        self.connections_total.fetch_add(1, Ordering::Relaxed);
    }

    /// Count a rejected handshake.
    pub fn inc_rejected(&self) {
        self.connections_rejected.fetch_add(1, Ordering::Relaxed);
    }

    /// Count a delivery from another node.
    pub fn inc_fanout_received(&self) {
        self.fanout_received.fetch_add(1, Ordering::Relaxed);
    }

    /// Combine counters with live gauges into a snapshot.
    pub fn snapshot(
        &self,
        connections: &[ConnectionRecord],
        fallback_connections: usize,
        batching: BatchStats,
    ) -> MetricsSnapshot {
        let latencies: Vec<f64> = connections
            .iter()
            .filter_map(|c| c.stats.latency_ms)
            .collect();
        let mean_latency_ms = mean(&latencies);
        let qualities: Vec<f64> = connections
            .iter()
            .map(|c| f64::from(c.stats.quality))
            .collect();

        MetricsSnapshot {
            connections_active: connections.len(),
            connections_total: self.connections_total.load(Ordering::Relaxed),
            connections_rejected: self.connections_rejected.load(Ordering::Relaxed),
            fallback_connections,
            messages_sent: self.messages_sent.load(Ordering::Relaxed),
            messages_received: self.messages_received.load(Ordering::Relaxed),
            fanout_received: self.fanout_received.load(Ordering::Relaxed),
            batches: batching.batches,
            messages_per_batch: batching.messages_per_batch(),
            batch_efficiency: batching.efficiency(),
            mean_latency_ms,
            mean_quality: if qualities.is_empty() { 100.0 } else { mean(&qualities) },
        }
    }
}

fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        0.0
    } else {
        values.iter().sum::<f64>() / values.len() as f64
    }
}

/// Serializable metrics snapshot
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    /// Live socket connections on this node
    pub connections_active: usize,
    /// Connections ever accepted
    pub connections_total: u64,
    /// Handshakes rejected
    pub connections_rejected: u64,
    /// Open fallback connections
    pub fallback_connections: usize,
    /// Messages delivered to clients
    pub messages_sent: u64,
    /// Messages received from clients
    pub messages_received: u64,
    /// Deliveries received from other nodes
    pub fanout_received: u64,
    /// Batch envelopes sent
    pub batches: u64,
    /// Mean messages per batch envelope
    pub messages_per_batch: f64,
    /// Share of sends saved by batching
    pub batch_efficiency: f64,
    /// Mean smoothed latency over connections that reported one
    pub mean_latency_ms: f64,
    /// Mean connection quality
    pub mean_quality: f64,
}
