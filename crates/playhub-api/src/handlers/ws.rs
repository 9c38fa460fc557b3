//! WebSocket upgrade handler.

use axum::extract::ws::{Message, WebSocket};
use axum::extract::{Query, State, WebSocketUpgrade};
use axum::response::Response;
use futures::{SinkExt, StreamExt};
use tracing::{debug, info, warn};

use playhub_core::traits::identity::Identity;
use playhub_core::types::SessionId;
use playhub_realtime::Accepted;
use playhub_realtime::message::ServerMessage;
use playhub_realtime::message::validator::MAX_FRAME_SIZE;

use crate::dto::request::WsQuery;
use crate::error::ApiResult;
use crate::extractors::{BearerToken, ClientAddr};
use crate::state::AppState;

/// GET /ws?token={jwt}&session_id={id}: WebSocket upgrade.
///
/// Admission (rate limit, then token verification) runs before the upgrade,
/// so rejected clients get a plain HTTP error.
pub async fn ws_handler(
    State(state): State<AppState>,
    ClientAddr(addr): ClientAddr,
    BearerToken(header_token): BearerToken,
    Query(query): Query<WsQuery>,
    ws: WebSocketUpgrade,
) -> ApiResult<Response> {
    let token = header_token.or(query.token);
    let identity = state
        .orchestrator()
        .admit(token.as_deref(), &addr)
        .await?;

    Ok(ws
        .max_message_size(MAX_FRAME_SIZE)
        .on_upgrade(move |socket| handle_ws_connection(state, identity, query.session_id, addr, socket)))
}

/// Handles an established WebSocket connection.
async fn handle_ws_connection(
    state: AppState,
    identity: Identity,
    session_id: Option<SessionId>,
    addr: String,
    mut socket: WebSocket,
) {
    let orchestrator = state.orchestrator().clone();
    let accepted = match orchestrator.connect(identity, session_id, Some(addr)).await {
        Ok(accepted) => accepted,
        Err(e) => {
            warn!(error = %e, "Socket registration failed");
            if let Ok(text) = serde_json::to_string(&ServerMessage::error(&e)) {
                let _ = socket.send(Message::Text(text.into())).await;
            }
            let _ = socket.send(Message::Close(None)).await;
            return;
        }
    };
    let Accepted {
        handle,
        mut receiver,
        record,
        recovered,
    } = accepted;
    let conn_id = handle.id;
    // The orchestrator holds the only other sender; once it lets go on
    // teardown the forwarder below sees the channel close.
    drop(handle);

    info!(
        conn_id = %conn_id,
        identity_id = %record.identity_id,
        session_id = %record.session_id,
        recovered,
        "WebSocket connection established"
    );

    let (mut ws_tx, mut ws_rx) = socket.split();

    let mut outbound_task = tokio::spawn(async move {
        while let Some(message) = receiver.recv().await {
            let text = match serde_json::to_string(&message) {
                Ok(text) => text,
                Err(e) => {
                    warn!(conn_id = %conn_id, error = %e, "Dropping unserializable message");
                    continue;
                }
            };
            if ws_tx.send(Message::Text(text.into())).await.is_err() {
                return;
            }
        }
        let _ = ws_tx.send(Message::Close(None)).await;
    });

    loop {
        let frame = tokio::select! {
            _ = &mut outbound_task => break,
            frame = ws_rx.next() => frame,
        };
        match frame {
            Some(Ok(Message::Text(text))) => {
                orchestrator.handle_inbound(conn_id, text.as_str()).await;
            }
            Some(Ok(Message::Binary(bytes))) => match std::str::from_utf8(&bytes) {
                Ok(text) => orchestrator.handle_inbound(conn_id, text).await,
                Err(_) => debug!(conn_id = %conn_id, "Ignoring non-UTF-8 binary frame"),
            },
            Some(Ok(Message::Ping(_))) | Some(Ok(Message::Pong(_))) => {
                orchestrator.registry().touch(conn_id);
            }
            Some(Ok(Message::Close(_))) | None => break,
            Some(Err(e)) => {
                warn!(conn_id = %conn_id, error = %e, "WebSocket error");
                break;
            }
        }
    }

    outbound_task.abort();
    orchestrator.disconnect(conn_id).await;

    info!(
        conn_id = %conn_id,
        identity_id = %record.identity_id,
        "WebSocket connection closed"
    );
}
