//! Game creation and lookup.

use axum::Json;
use axum::extract::{Path, State};
use axum::http::StatusCode;

use playhub_core::types::GameId;
use playhub_game::{GameView, MutationContext, NewGame};
use playhub_realtime::RateLimitAction;

use crate::dto::response::ApiResponse;
use crate::error::ApiResult;
use crate::extractors::AuthIdentity;
use crate::state::AppState;

/// POST /games
pub async fn create_game(
    State(state): State<AppState>,
    AuthIdentity(identity): AuthIdentity,
    Json(request): Json<NewGame>,
) -> ApiResult<(StatusCode, Json<ApiResponse<GameView>>)> {
    state
        .orchestrator()
        .limiter()
        .check_enhanced(&identity.id, RateLimitAction::Api)
        .await
        .into_result(RateLimitAction::Api)?;
    let game = state
        .games
        .create(request, &MutationContext::identity(identity.id.clone()))
        .await?;
    Ok((StatusCode::CREATED, Json(ApiResponse::ok(game.view()))))
}

/// GET /games/{id}
pub async fn get_game(
    State(state): State<AppState>,
    AuthIdentity(_identity): AuthIdentity,
    Path(id): Path<GameId>,
) -> ApiResult<Json<ApiResponse<GameView>>> {
    let game = state.games.get(id).await?;
    Ok(Json(ApiResponse::ok(game.view())))
}
