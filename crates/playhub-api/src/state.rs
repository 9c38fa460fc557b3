//! Application state shared across all handlers and middleware.

use std::sync::Arc;
use std::time::Instant;

use playhub_core::config::AppConfig;
use playhub_game::GameCoordinator;
use playhub_realtime::{ConnectionOrchestrator, RealtimeEngine};

/// Application state containing all shared dependencies.
///
/// Passed to every Axum handler via `State<AppState>`.
#[derive(Debug, Clone)]
pub struct AppState {
    /// Application configuration
    pub config: Arc<AppConfig>,
    /// Real-time engine: orchestrator plus background tasks
    pub realtime: RealtimeEngine,
    /// Game coordinator
    pub games: Arc<GameCoordinator>,
    /// Process start, for uptime
    pub started_at: Instant,
}

impl AppState {
    /// The connection orchestrator.
    pub fn orchestrator(&self) -> &Arc<ConnectionOrchestrator> {
        &self.realtime.orchestrator
    }
}
