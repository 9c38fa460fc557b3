//! Chat history retrieval.

use axum::Json;
use axum::extract::{Path, Query, State};

use playhub_core::error::{AppError, ErrorKind};
use playhub_realtime::message::ChatMessage;

use crate::dto::request::HistoryQuery;
use crate::dto::response::ApiResponse;
use crate::error::ApiResult;
use crate::extractors::AuthIdentity;
use crate::state::AppState;

/// GET /history/{kind}/{target}?limit=: newest first.
///
/// Direct-message history (`user`) is readable only by its owner.
pub async fn history(
    State(state): State<AppState>,
    AuthIdentity(identity): AuthIdentity,
    Path((kind, target)): Path<(String, String)>,
    Query(query): Query<HistoryQuery>,
) -> ApiResult<Json<ApiResponse<Vec<ChatMessage>>>> {
    if kind == "user" && target != identity.id {
        return Err(AppError::new(
            ErrorKind::Blocked,
            "Cannot read another identity's messages",
        )
        .into());
    }
    let messages = state
        .orchestrator()
        .history()
        .history(&kind, &target, query.limit)
        .await?;
    Ok(Json(ApiResponse::ok(messages)))
}
