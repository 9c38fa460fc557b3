//! Metrics surface.

use axum::Json;
use axum::extract::State;
use serde::Serialize;

use playhub_realtime::connection::RegistryStats;
use playhub_realtime::metrics::MetricsSnapshot;

use crate::dto::response::ApiResponse;
use crate::state::AppState;

/// Engine counters plus registry gauges.
#[derive(Debug, Clone, Serialize)]
pub struct MetricsResponse {
    /// Engine counters.
    #[serde(flatten)]
    pub engine: MetricsSnapshot,
    /// Registry gauges.
    pub registry: RegistryStats,
}

/// GET /metrics
pub async fn metrics(State(state): State<AppState>) -> Json<ApiResponse<MetricsResponse>> {
    Json(ApiResponse::ok(MetricsResponse {
        engine: state.realtime.metrics(),
        registry: state.orchestrator().registry().stats(),
    }))
}
