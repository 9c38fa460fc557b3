//! Application builder: wires stores, broker, coordinator and the real-time
//! engine into an Axum app and serves it.

use std::future::IntoFuture;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use playhub_core::config::AppConfig;
use playhub_core::error::AppError;
use playhub_core::result::AppResult;
use playhub_core::traits::identity::IdentityVerifier;
use playhub_events::EventBroker;
use playhub_game::GameCoordinator;
use playhub_realtime::{JwtVerifier, RealtimeEngine};
use playhub_store::StoreManager;

use crate::router::build_router;
use crate::state::AppState;

/// Build every component from configuration and start the real-time engine.
pub async fn build_state(config: AppConfig) -> AppResult<AppState> {
    info!(provider = %config.store.provider, "Initializing shared state store");
    let store = Arc::new(StoreManager::new(&config.store).await?);

    info!(transport = %config.events.transport, "Initializing event broker");
    let transport = playhub_events::transport::from_config(&config.events, &config.node.id, &store)?;
    let broker = Arc::new(EventBroker::new(
        config.node.id.clone(),
        Arc::clone(&store),
        transport,
        config.events.stream_max_len,
    ));

    let games = Arc::new(GameCoordinator::new(
        Arc::clone(&broker),
        Arc::clone(&store),
        config.game.clone(),
        config.events.snapshot_every,
    ));

    let verifier: Arc<dyn IdentityVerifier> = Arc::new(JwtVerifier::new(&config.auth));
    let fanout = playhub_realtime::fanout::from_store(&store, &config.realtime)?;
    let realtime = RealtimeEngine::start(
        &config,
        store,
        broker,
        Arc::clone(&games),
        verifier,
        fanout,
    )
    .await?;

    Ok(AppState {
        config: Arc::new(config),
        realtime,
        games,
        started_at: Instant::now(),
    })
}

/// Runs the PlayHub server until a shutdown signal arrives.
///
/// After the signal, in-flight requests get `server.shutdown_grace_seconds`
/// to finish before the server returns anyway.
pub async fn run_server(config: AppConfig) -> AppResult<()> {
    let addr = format!("{}:{}", config.server.host, config.server.port);
    let node_id = config.node.id.clone();
    let grace = Duration::from_secs(config.server.shutdown_grace_seconds);
    let state = build_state(config).await?;
    let realtime = state.realtime.clone();
    let app = build_router(state);

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .map_err(|e| AppError::internal(format!("Failed to bind {addr}: {e}")))?;
    info!(%addr, node_id = %node_id, "PlayHub server listening");

    let draining = CancellationToken::new();
    let signal_draining = draining.clone();
    let server = axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(async move {
        shutdown_signal().await;
        info!("Shutdown signal received, closing connections");
        signal_draining.cancel();
        // Open sockets and streams end once the engine lets go of them.
        realtime.shutdown().await;
    });

    tokio::select! {
        result = server.into_future() => {
            result.map_err(|e| AppError::internal(format!("Server error: {e}")))?;
            info!("PlayHub server shut down gracefully");
        }
        _ = async {
            draining.cancelled().await;
            tokio::time::sleep(grace).await;
        } => {
            warn!(grace_secs = grace.as_secs(), "Shutdown grace period elapsed, exiting");
        }
    }
    Ok(())
}

/// Wait for Ctrl+C or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
