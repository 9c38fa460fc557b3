//! Top-level real-time engine that ties together all subsystems.

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use playhub_core::config::AppConfig;
use playhub_core::result::AppResult;
use playhub_core::traits::identity::IdentityVerifier;
use playhub_core::types::GameId;
use playhub_events::{handler_fn, EventBroker};
use playhub_game::GameCoordinator;
use playhub_store::StoreManager;

use crate::batching::Delivery;
use crate::connection::ConnectionRegistry;
use crate::fallback::FallbackService;
use crate::fanout::{ClusterFanout, FanoutMessage};
use crate::health::{DependencyChecks, HealthReport, HealthStatus};
use crate::history::MessageHistory;
use crate::metrics::MetricsSnapshot;
use crate::orchestrator::{ConnectionOrchestrator, OrchestratorDeps};
use crate::rate_limit::RateLimiter;

/// Central real-time engine: the orchestrator plus its background tasks.
#[derive(Clone)]
pub struct RealtimeEngine {
    /// Connection orchestrator.
    pub orchestrator: Arc<ConnectionOrchestrator>,
    broker: Arc<EventBroker>,
    fanout: Arc<dyn ClusterFanout>,
    shutdown: CancellationToken,
}

impl std::fmt::Debug for RealtimeEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RealtimeEngine")
            .field("node_id", &self.broker.node_id())
            .field("fanout", &self.fanout.name())
            .finish()
    }
}

impl RealtimeEngine {
    /// Build every subsystem and start the background tasks.
    pub async fn start(
        config: &AppConfig,
        store: Arc<StoreManager>,
        broker: Arc<EventBroker>,
        coordinator: Arc<GameCoordinator>,
        verifier: Arc<dyn IdentityVerifier>,
        fanout: Arc<dyn ClusterFanout>,
    ) -> AppResult<Self> {
        let deps = OrchestratorDeps {
            registry: Arc::new(ConnectionRegistry::new(Arc::clone(&store), &config.realtime)),
            limiter: Arc::new(RateLimiter::new(Arc::clone(&store), &config.rate_limit)),
            verifier,
            coordinator,
            history: MessageHistory::new(Arc::clone(&store), &config.realtime),
            fallback: Arc::new(FallbackService::new(config.fallback.clone())),
        };
        let (orchestrator, deliveries) = ConnectionOrchestrator::new(config.realtime.clone(), deps);
        let engine = Self {
            orchestrator: Arc::new(orchestrator),
            broker,
            fanout,
            shutdown: CancellationToken::new(),
        };

        engine.spawn_delivery(deliveries);
        engine.spawn_fanout_listener().await?;
        engine.spawn_ticker(
            "batch flush",
            Duration::from_millis(config.realtime.batch_interval_ms.max(1)),
            |o| async move {
                o.flush();
            },
        );
        engine.spawn_ticker(
            "connection sweep",
            Duration::from_secs(config.realtime.sweep_interval_seconds.max(1)),
            |o| async move {
                let swept = o.sweep_inactive().await;
                if swept > 0 {
                    info!(swept, "Swept inactive connections");
                }
            },
        );
        let idle = Duration::from_secs(config.fallback.inactivity_timeout_seconds);
        engine.spawn_ticker(
            "fallback sweep",
            Duration::from_secs(config.fallback.sweep_interval_seconds.max(1)),
            move |o| async move {
                o.fallback().sweep_inactive(idle);
            },
        );
        engine.spawn_ticker(
            "fallback heartbeat",
            Duration::from_secs(config.fallback.heartbeat_interval_seconds.max(1)),
            |o| async move {
                o.fallback().heartbeat();
            },
        );
        engine.spawn_fallback_reaper();
        engine.watch_completed_games().await?;

        info!(
            node_id = %engine.broker.node_id(),
            fanout = engine.fanout.name(),
            "Real-time engine started"
        );
        Ok(engine)
    }

    /// Hand flushed deliveries to local subscribers, then to other nodes.
    fn spawn_delivery(&self, mut deliveries: tokio::sync::mpsc::UnboundedReceiver<Delivery>) {
        let orchestrator = Arc::clone(&self.orchestrator);
        let fanout = Arc::clone(&self.fanout);
        let origin = self.broker.node_id().to_string();
        let shutdown = self.shutdown.clone();
        tokio::spawn(async move {
            loop {
                let delivery = tokio::select! {
                    _ = shutdown.cancelled() => break,
                    delivery = deliveries.recv() => match delivery {
                        Some(d) => d,
                        None => break,
                    },
                };
                orchestrator.deliver_local(&delivery.channel, &delivery.message);
                let message = FanoutMessage {
                    origin: origin.clone(),
                    channel: delivery.channel,
                    message: delivery.message,
                };
                if let Err(e) = fanout.publish(&message).await {
                    warn!(channel = %message.channel, error = %e, "Cluster fan-out publish failed");
                }
            }
            debug!("Delivery task stopped");
        });
    }

    async fn spawn_fanout_listener(&self) -> AppResult<()> {
        let mut incoming = self.fanout.subscribe().await?;
        let orchestrator = Arc::clone(&self.orchestrator);
        let node_id = self.broker.node_id().to_string();
        let shutdown = self.shutdown.clone();
        tokio::spawn(async move {
            loop {
                let message = tokio::select! {
                    _ = shutdown.cancelled() => break,
                    message = incoming.recv() => match message {
                        Some(m) => m,
                        None => break,
                    },
                };
                if message.origin == node_id {
                    continue;
                }
                orchestrator.deliver_remote(&message.channel, &message.message);
            }
            debug!("Fan-out listener stopped");
        });
        Ok(())
    }

    fn spawn_ticker<F, Fut>(&self, name: &'static str, period: Duration, tick: F)
    where
        F: Fn(Arc<ConnectionOrchestrator>) -> Fut + Send + 'static,
        Fut: std::future::Future<Output = ()> + Send + 'static,
    {
        let orchestrator = Arc::clone(&self.orchestrator);
        let shutdown = self.shutdown.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = interval.tick() => tick(Arc::clone(&orchestrator)).await,
                }
            }
            debug!(task = name, "Background task stopped");
        });
    }

    /// Fallback connections closed by the transport itself (dropped stream,
    /// idle sweep) still need registry and game cleanup.
    fn spawn_fallback_reaper(&self) {
        let orchestrator = Arc::clone(&self.orchestrator);
        let mut closed = orchestrator.fallback().closed();
        let shutdown = self.shutdown.clone();
        tokio::spawn(async move {
            loop {
                let event = tokio::select! {
                    _ = shutdown.cancelled() => break,
                    event = closed.recv() => event,
                };
                match event {
                    Ok(event) => orchestrator.disconnect(event.connection_id).await,
                    Err(tokio::sync::broadcast::error::RecvError::Lagged(n)) => {
                        warn!(skipped = n, "Fallback close notifications lagged");
                    }
                    Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
                }
            }
        });
    }

    async fn watch_completed_games(&self) -> AppResult<()> {
        let orchestrator = Arc::clone(&self.orchestrator);
        let handler = handler_fn("realtime.clear_completed_game", move |event| {
            let orchestrator = Arc::clone(&orchestrator);
            async move {
                match event.aggregate_id.parse::<GameId>() {
                    Ok(game_id) => orchestrator.clear_game(game_id).await,
                    Err(_) => warn!(aggregate_id = %event.aggregate_id, "Completed event with bad game id"),
                }
                Ok(())
            }
        });
        self.broker
            .subscribe("game.completed", Arc::new(handler))
            .await
    }

    /// Dependency and load health.
    pub async fn health(&self) -> HealthReport {
        let broker = self.broker.health_check().await;
        let fanout = self.fanout.health_check().await.unwrap_or(false);
        let checks = DependencyChecks {
            store: broker.store,
            transport: broker.transport,
            fanout,
        };
        let fallback = self.orchestrator.fallback().health();
        let game_reads_degraded = self.orchestrator.coordinator().is_degraded();

        let mut status = if checks.store {
            HealthStatus::Healthy
        } else {
            HealthStatus::Unhealthy
        };
        if !checks.transport || !checks.fanout || game_reads_degraded {
            status = status.worst(HealthStatus::Degraded);
        }
        status = status.worst(fallback.status);

        HealthReport {
            status,
            status_code: status.status_code(),
            checks,
            connections: self.orchestrator.socket_count(),
            queued_messages: self.orchestrator.pending_messages() + fallback.queued_messages,
            game_reads_degraded,
            fallback,
        }
    }

    /// Counters and gauges.
    pub fn metrics(&self) -> MetricsSnapshot {
        self.orchestrator.metrics()
    }

    /// Stop background tasks, close every connection and stop the broker.
    pub async fn shutdown(&self) {
        info!("Shutting down real-time engine");
        self.shutdown.cancel();
        self.orchestrator.flush();
        self.orchestrator.close_all().await;
        self.broker.shutdown();
        info!("Real-time engine shut down");
    }
}
