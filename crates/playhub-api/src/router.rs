//! Route definitions for the PlayHub HTTP API.
//!
//! JSON endpoints sit behind gzip compression; the socket upgrade and the
//! fallback transports are mounted outside it so streamed frames are not
//! held back by the encoder.

use axum::{
    Router, middleware as axum_middleware,
    routing::{delete, get, post},
};
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::trace::TraceLayer;

use crate::handlers;
use crate::middleware;
use crate::middleware::compression::build_compression_layer;
use crate::middleware::cors::build_cors_layer;
use crate::state::AppState;

/// Build the complete Axum router with all routes and middleware.
pub fn build_router(state: AppState) -> Router {
    let json_routes = Router::new()
        .merge(health_routes())
        .merge(game_routes())
        .merge(history_routes())
        .layer(build_compression_layer());

    let streaming_routes = Router::new()
        .route("/ws", get(handlers::ws::ws_handler))
        .merge(fallback_routes());

    let cors = build_cors_layer(&state.config.server);

    Router::new()
        .merge(json_routes)
        .merge(streaming_routes)
        .layer(RequestBodyLimitLayer::new(state.config.server.max_body_bytes))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .layer(axum_middleware::from_fn(middleware::logging::request_logging))
        .with_state(state)
}

/// Liveness, readiness and metrics
fn health_routes() -> Router<AppState> {
    Router::new()
        .route("/health", get(handlers::health::health))
        .route("/health/ready", get(handlers::health::readiness))
        .route("/metrics", get(handlers::metrics::metrics))
}

/// Game create and read
fn game_routes() -> Router<AppState> {
    Router::new()
        .route("/games", post(handlers::games::create_game))
        .route("/games/{id}", get(handlers::games::get_game))
}

/// Chat history
fn history_routes() -> Router<AppState> {
    Router::new().route("/history/{kind}/{target}", get(handlers::history::history))
}

/// Server-push and long-poll transports
fn fallback_routes() -> Router<AppState> {
    Router::new()
        .route("/fallback/sse", get(handlers::fallback::sse_connect))
        .route("/fallback/poll/connect", post(handlers::fallback::poll_connect))
        .route("/fallback/poll/{id}", get(handlers::fallback::poll))
        .route("/fallback/{id}/subscribe", post(handlers::fallback::subscribe))
        .route("/fallback/{id}/unsubscribe", post(handlers::fallback::unsubscribe))
        .route("/fallback/{id}/join", post(handlers::fallback::join))
        .route("/fallback/{id}/action", post(handlers::fallback::action))
        .route("/fallback/{id}", delete(handlers::fallback::disconnect))
}
