//! Health check handlers.

use axum::Json;
use axum::extract::State;
use axum::http::StatusCode;

use playhub_realtime::HealthReport;

use crate::dto::response::{ApiResponse, LivenessResponse};
use crate::state::AppState;

/// GET /health: liveness.
pub async fn health(State(state): State<AppState>) -> Json<ApiResponse<LivenessResponse>> {
    Json(ApiResponse::ok(LivenessResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        uptime_seconds: state.started_at.elapsed().as_secs(),
    }))
}

/// GET /health/ready: dependency and load health for orchestration probes.
/// Answers 200 healthy, 207 degraded, 503 unhealthy.
pub async fn readiness(State(state): State<AppState>) -> (StatusCode, Json<HealthReport>) {
    let report = state.realtime.health().await;
    let status = StatusCode::from_u16(report.status_code).unwrap_or(StatusCode::SERVICE_UNAVAILABLE);
    (status, Json(report))
}
