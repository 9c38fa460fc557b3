//! # playhub-api
//!
//! HTTP API layer for PlayHub built on Axum.
//!
//! Provides the WebSocket upgrade, server-push and long-poll fallback
//! endpoints, health and metrics surfaces, chat history and game
//! create/read, plus middleware (CORS, compression, request logging) and
//! error mapping.

pub mod app;
pub mod dto;
pub mod error;
pub mod extractors;
pub mod handlers;
pub mod middleware;
pub mod router;
pub mod state;

pub use app::{build_state, run_server};
pub use router::build_router;
pub use state::AppState;
