//! Server-push and long-poll endpoints for clients without sockets.

use std::time::Duration;

use axum::Json;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::sse::{Event, Sse};
use futures::{Stream, StreamExt};
use tracing::info;

use playhub_core::types::ConnectionId;
use playhub_realtime::message::ClientMessage;

use crate::dto::request::{ChannelRequest, FallbackConnectQuery, JoinRequest, PollQuery};
use crate::dto::response::{ApiResponse, ConnectResponse, PollResponse};
use crate::error::ApiResult;
use crate::extractors::{AuthIdentity, BearerToken, ClientAddr};
use crate::state::AppState;

/// GET /fallback/sse: open a server-push stream.
///
/// The first event is `hello` carrying the connection id for follow-up
/// calls. The stream ends when the connection is torn down.
pub async fn sse_connect(
    State(state): State<AppState>,
    ClientAddr(addr): ClientAddr,
    BearerToken(token): BearerToken,
    Query(query): Query<FallbackConnectQuery>,
) -> ApiResult<Sse<impl Stream<Item = Result<Event, axum::Error>>>> {
    let orchestrator = state.orchestrator();
    let identity = orchestrator.admit(token.as_deref(), &addr).await?;
    let (id, receiver) = orchestrator
        .fallback_connect_sse(identity, query.session_id, Some(addr))
        .await?;
    info!(conn_id = %id, "Server-push stream opened");

    let stream = futures::stream::unfold(receiver, |mut receiver| async move {
        receiver.recv().await.map(|message| (message, receiver))
    })
    .map(|message| Event::default().event(message.event_name()).json_data(&message));
    Ok(Sse::new(stream))
}

/// POST /fallback/poll/connect: open a long-poll connection.
pub async fn poll_connect(
    State(state): State<AppState>,
    ClientAddr(addr): ClientAddr,
    BearerToken(token): BearerToken,
    Query(query): Query<FallbackConnectQuery>,
) -> ApiResult<(StatusCode, Json<ApiResponse<ConnectResponse>>)> {
    let orchestrator = state.orchestrator();
    let identity = orchestrator.admit(token.as_deref(), &addr).await?;
    let connection_id = orchestrator
        .fallback_connect_long_poll(identity, query.session_id, Some(addr))
        .await?;
    Ok((
        StatusCode::CREATED,
        Json(ApiResponse::ok(ConnectResponse { connection_id })),
    ))
}

/// GET /fallback/poll/{id}?timeout_ms=: wait for messages.
pub async fn poll(
    State(state): State<AppState>,
    AuthIdentity(identity): AuthIdentity,
    Path(id): Path<ConnectionId>,
    Query(query): Query<PollQuery>,
) -> ApiResult<Json<ApiResponse<PollResponse>>> {
    let messages = state
        .orchestrator()
        .fallback_poll(id, &identity, query.timeout_ms.map(Duration::from_millis))
        .await?;
    Ok(Json(ApiResponse::ok(PollResponse { messages })))
}

/// POST /fallback/{id}/subscribe
pub async fn subscribe(
    State(state): State<AppState>,
    AuthIdentity(identity): AuthIdentity,
    Path(id): Path<ConnectionId>,
    Json(body): Json<ChannelRequest>,
) -> ApiResult<StatusCode> {
    let message = ClientMessage::Subscribe {
        channel: body.channel,
    };
    state
        .orchestrator()
        .fallback_message(id, &identity, message)
        .await?;
    Ok(StatusCode::ACCEPTED)
}

/// POST /fallback/{id}/unsubscribe
pub async fn unsubscribe(
    State(state): State<AppState>,
    AuthIdentity(identity): AuthIdentity,
    Path(id): Path<ConnectionId>,
    Json(body): Json<ChannelRequest>,
) -> ApiResult<StatusCode> {
    let message = ClientMessage::Unsubscribe {
        channel: body.channel,
    };
    state
        .orchestrator()
        .fallback_message(id, &identity, message)
        .await?;
    Ok(StatusCode::ACCEPTED)
}

/// POST /fallback/{id}/join
pub async fn join(
    State(state): State<AppState>,
    AuthIdentity(identity): AuthIdentity,
    Path(id): Path<ConnectionId>,
    Json(body): Json<JoinRequest>,
) -> ApiResult<StatusCode> {
    let message = ClientMessage::JoinGame {
        game_id: body.game_id,
    };
    state
        .orchestrator()
        .fallback_message(id, &identity, message)
        .await?;
    Ok(StatusCode::ACCEPTED)
}

/// POST /fallback/{id}/action: any inbound message, in socket wire format.
pub async fn action(
    State(state): State<AppState>,
    AuthIdentity(identity): AuthIdentity,
    Path(id): Path<ConnectionId>,
    Json(message): Json<ClientMessage>,
) -> ApiResult<StatusCode> {
    state
        .orchestrator()
        .fallback_message(id, &identity, message)
        .await?;
    Ok(StatusCode::ACCEPTED)
}

/// DELETE /fallback/{id}
pub async fn disconnect(
    State(state): State<AppState>,
    AuthIdentity(identity): AuthIdentity,
    Path(id): Path<ConnectionId>,
) -> ApiResult<StatusCode> {
    state
        .orchestrator()
        .fallback_disconnect(id, &identity)
        .await?;
    Ok(StatusCode::NO_CONTENT)
}
