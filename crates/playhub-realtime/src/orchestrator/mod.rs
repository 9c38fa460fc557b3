//! Connection orchestrator.
//!
//! Owns the live sockets and ties the other components together: admission
//! (rate limiter, identity verification), registration and recovery,
//! inbound dispatch into the game coordinator, outbound delivery through the
//! batching optimizer, and teardown. Fallback clients reach the same paths
//! through the `fallback_*` operations.

mod dispatch;
mod handshake;

use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use playhub_core::config::RealtimeConfig;
use playhub_core::events::DomainEvent;
use playhub_core::result::AppResult;
use playhub_core::traits::identity::IdentityVerifier;
use playhub_core::types::{ConnectionId, GameId};
use playhub_game::{GameCoordinator, MutationContext};

use crate::batching::{BatchOptimizer, BatchStats, Delivery};
use crate::channel::{Channel, ChannelRegistry};
use crate::connection::{ConnectionHandle, ConnectionRegistry, ConnectionStatus, TrafficDirection};
use crate::fallback::FallbackService;
use crate::history::MessageHistory;
use crate::message::{PresenceState, ServerMessage};
use crate::metrics::{EngineMetrics, MetricsSnapshot};
use crate::rate_limit::RateLimiter;

pub use handshake::Accepted;

/// Components the orchestrator drives.
#[derive(Debug, Clone)]
pub struct OrchestratorDeps {
    /// Connection registry.
    pub registry: Arc<ConnectionRegistry>,
    /// Rate limiter.
    pub limiter: Arc<RateLimiter>,
    /// Identity verification.
    pub verifier: Arc<dyn IdentityVerifier>,
    /// Game coordinator.
    pub coordinator: Arc<GameCoordinator>,
    /// Chat history.
    pub history: MessageHistory,
    /// Fallback transports.
    pub fallback: Arc<FallbackService>,
}

/// Top-level owner of live connections.
#[derive(Debug)]
pub struct ConnectionOrchestrator {
    config: RealtimeConfig,
    registry: Arc<ConnectionRegistry>,
    limiter: Arc<RateLimiter>,
    verifier: Arc<dyn IdentityVerifier>,
    coordinator: Arc<GameCoordinator>,
    history: MessageHistory,
    fallback: Arc<FallbackService>,
    batcher: BatchOptimizer,
    channels: ChannelRegistry,
    sockets: DashMap<ConnectionId, Arc<ConnectionHandle>>,
    metrics: EngineMetrics,
}

impl ConnectionOrchestrator {
    /// Create an orchestrator. The receiver yields flushed deliveries in
    /// order; the engine hands them to [`Self::deliver_local`] and the
    /// cluster fan-out.
    pub fn new(config: RealtimeConfig, deps: OrchestratorDeps) -> (Self, mpsc::UnboundedReceiver<Delivery>) {
        let (batcher, deliveries) = BatchOptimizer::new(config.batch_max_size);
        let orchestrator = Self {
            config,
            registry: deps.registry,
            limiter: deps.limiter,
            verifier: deps.verifier,
            coordinator: deps.coordinator,
            history: deps.history,
            fallback: deps.fallback,
            batcher,
            channels: ChannelRegistry::new(),
            sockets: DashMap::new(),
            metrics: EngineMetrics::new(),
        };
        (orchestrator, deliveries)
    }

    /// Connection registry.
    pub fn registry(&self) -> &Arc<ConnectionRegistry> {
        &self.registry
    }

    /// Fallback service.
    pub fn fallback(&self) -> &Arc<FallbackService> {
        &self.fallback
    }

    /// Game coordinator.
    pub fn coordinator(&self) -> &Arc<GameCoordinator> {
        &self.coordinator
    }

    /// Rate limiter.
    pub fn limiter(&self) -> &Arc<RateLimiter> {
        &self.limiter
    }

    /// Chat history.
    pub fn history(&self) -> &MessageHistory {
        &self.history
    }

    /// Batching counters.
    pub fn batch_stats(&self) -> BatchStats {
        self.batcher.stats()
    }

    /// Flush every batching queue.
    pub fn flush(&self) -> usize {
        self.batcher.flush()
    }

    /// Messages waiting for the next batch tick.
    pub fn pending_messages(&self) -> usize {
        self.batcher.pending()
    }

    /// Live sockets on this node.
    pub fn socket_count(&self) -> usize {
        self.sockets.len()
    }

    /// Counters and gauges.
    pub fn metrics(&self) -> MetricsSnapshot {
        self.metrics.snapshot(
            &self.registry.snapshot(),
            self.fallback.connection_count(),
            self.batcher.stats(),
        )
    }

    /// Hand a delivery to every local subscriber, socket or fallback.
    /// Returns how many received it.
    pub fn deliver_local(&self, channel: &str, message: &ServerMessage) -> usize {
        let mut delivered = 0;
        let size = serde_json::to_string(message).map(|s| s.len()).unwrap_or(0);
        for id in self.channels.subscribers(channel) {
            if let Some(handle) = self.sockets.get(&id).map(|h| Arc::clone(h.value())) {
                if handle.send(message.clone()) {
                    self.registry
                        .record_traffic(id, TrafficDirection::Outbound, size);
                    delivered += 1;
                }
            }
        }
        let counts = self.fallback.broadcast(channel, message);
        delivered += counts.sse + counts.long_poll;
        self.metrics.add_sent(delivered as u64);
        debug!(channel, delivered, "Delivered to local subscribers");
        delivered
    }

    /// Count a delivery that arrived from another node and deliver it.
    pub fn deliver_remote(&self, channel: &str, message: &ServerMessage) -> usize {
        self.metrics.inc_fanout_received();
        self.deliver_local(channel, message)
    }

    /// Queue a message for every subscriber of `channel`, on every node.
    pub fn publish(&self, channel: &str, message: ServerMessage) {
        self.batcher.enqueue(channel, message);
    }

    fn publish_game_events(&self, game_id: GameId, events: &[DomainEvent]) {
        let channel = Channel::Game(game_id).to_string();
        for event in events {
            self.publish(&channel, ServerMessage::game_event(game_id, event));
        }
    }

    /// Send a message to one connection, socket or fallback.
    pub(crate) fn reply(&self, id: ConnectionId, message: ServerMessage) -> bool {
        let size = serde_json::to_string(&message).map(|s| s.len()).unwrap_or(0);
        let sent = match self.sockets.get(&id).map(|h| Arc::clone(h.value())) {
            Some(handle) => handle.send(message),
            None => self.fallback.send(id, message),
        };
        if sent {
            self.registry
                .record_traffic(id, TrafficDirection::Outbound, size);
            self.metrics.add_sent(1);
        }
        sent
    }

    /// Tear a connection down: drop subscriptions, mark the player
    /// disconnected in their game, deregister (archiving recovery data) and
    /// announce the presence change. The record reads as `Reconnecting`
    /// until it is archived. Idempotent.
    pub async fn disconnect(&self, id: ConnectionId) {
        if let Some(handle) = self.sockets.remove(&id).map(|(_, h)| h) {
            handle.mark_dead();
        }
        self.channels.unsubscribe_all(id);
        self.fallback.disconnect(id);

        // Only the caller that flips the status runs the teardown.
        if !self
            .registry
            .set_status(id, ConnectionStatus::Reconnecting)
            .await
        {
            return;
        }
        if let Some(record) = self.registry.get(id).await {
            if let Some(game_id) = record.game_id {
                let ctx = MutationContext::identity(record.identity_id.clone())
                    .with_session(record.session_id);
                match self
                    .coordinator
                    .disconnect_player(game_id, &record.identity_id, &ctx)
                    .await
                {
                    Ok(update) => self.publish_game_events(game_id, &update.events),
                    Err(e) => warn!(
                        conn_id = %id,
                        game_id = %game_id,
                        error = %e,
                        "Failed to mark player disconnected"
                    ),
                }
            }
        }

        let Some(recovery) = self.registry.remove(id).await else {
            return;
        };

        if self
            .registry
            .list_by_identity(&recovery.identity_id)
            .await
            .is_empty()
        {
            self.publish(
                &Channel::Presence.to_string(),
                ServerMessage::Presence {
                    identity_id: recovery.identity_id,
                    display_name: recovery.display_name,
                    state: PresenceState::Offline,
                },
            );
        }
    }

    /// Tear down local connections idle for longer than the configured
    /// inactivity timeout.
    pub async fn sweep_inactive(&self) -> usize {
        let threshold = std::time::Duration::from_secs(self.config.inactivity_timeout_seconds);
        let idle = self.registry.inactive(threshold);
        let count = idle.len();
        for id in idle {
            self.disconnect(id).await;
        }
        count
    }

    /// Forget a finished game on every local connection that played it.
    ///
    /// Only the game reference is dropped. The `game:{id}` subscription stays
    /// so the final events still queued in the batcher reach the players; it
    /// is released on the next join or on disconnect.
    pub async fn clear_game(&self, game_id: GameId) {
        for record in self.registry.snapshot() {
            if record.game_id == Some(game_id) {
                self.registry
                    .set_game_ref(record.connection_id, None)
                    .await;
            }
        }
    }

    /// Subscribe a connection to a channel on whichever transport holds it.
    async fn attach(&self, id: ConnectionId, channel: &str, ack: bool) -> AppResult<bool> {
        let added = if self.sockets.contains_key(&id) {
            let added = self.channels.subscribe(channel, id);
            if ack {
                self.reply(
                    id,
                    ServerMessage::Subscribed {
                        channel: channel.to_string(),
                    },
                );
            }
            added
        } else if ack {
            self.fallback.subscribe(id, channel)?
        } else {
            self.fallback.join(id, channel)?
        };
        self.registry.add_subscription(id, channel).await;
        Ok(added)
    }

    /// Unsubscribe a connection from a channel.
    async fn detach(&self, id: ConnectionId, channel: &str, ack: bool) -> bool {
        let removed = if self.sockets.contains_key(&id) {
            let removed = self.channels.unsubscribe(channel, id);
            if ack {
                self.reply(
                    id,
                    ServerMessage::Unsubscribed {
                        channel: channel.to_string(),
                    },
                );
            }
            removed
        } else if ack {
            self.fallback.unsubscribe(id, channel).unwrap_or(false)
        } else {
            self.fallback.leave(id, channel)
        };
        self.registry.remove_subscription(id, channel).await;
        removed
    }

    /// Close every connection on this node, sockets and fallback alike.
    /// Used at shutdown.
    pub async fn close_all(&self) {
        let mut ids: Vec<ConnectionId> = self
            .registry
            .snapshot()
            .iter()
            .map(|r| r.connection_id)
            .collect();
        ids.extend(self.sockets.iter().map(|e| *e.key()));
        ids.sort_unstable();
        ids.dedup();
        for id in ids {
            self.disconnect(id).await;
        }
    }
}

#[cfg(test)]
mod tests;
