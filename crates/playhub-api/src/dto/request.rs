//! Request DTOs.

use serde::{Deserialize, Serialize};

use playhub_core::types::{GameId, SessionId};

/// Query parameters of the socket upgrade.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WsQuery {
    /// Access token; the `Authorization` header is preferred.
    #[serde(default)]
    pub token: Option<String>,
    /// Session to recover.
    #[serde(default)]
    pub session_id: Option<SessionId>,
}

/// Query parameters when opening a fallback connection.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FallbackConnectQuery {
    /// Session to recover.
    #[serde(default)]
    pub session_id: Option<SessionId>,
}

/// Long-poll query parameters.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PollQuery {
    /// How long to hold the request, in milliseconds.
    #[serde(default)]
    pub timeout_ms: Option<u64>,
}

/// Channel subscribe or unsubscribe body.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChannelRequest {
    /// Channel name.
    pub channel: String,
}

/// Game join body.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JoinRequest {
    /// Game to join.
    pub game_id: GameId,
}

/// History query parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoryQuery {
    /// Maximum messages to return.
    #[serde(default = "default_history_limit")]
    pub limit: usize,
}

fn default_history_limit() -> usize {
    50
}
