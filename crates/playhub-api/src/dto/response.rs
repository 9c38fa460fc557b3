//! Response DTOs.

use serde::{Deserialize, Serialize};

use playhub_core::types::ConnectionId;
use playhub_realtime::message::ServerMessage;

/// Standard success response wrapper.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiResponse<T: Serialize> {
    /// Whether the request was successful.
    pub success: bool,
    /// Response data.
    pub data: T,
}

impl<T: Serialize> ApiResponse<T> {
    /// Creates a successful response.
    pub fn ok(data: T) -> Self {
        Self {
            success: true,
            data,
        }
    }
}

/// Liveness response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LivenessResponse {
    /// Always `"ok"`.
    pub status: String,
    /// Crate version.
    pub version: String,
    /// Seconds since start.
    pub uptime_seconds: u64,
}

/// A fallback connection was opened.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectResponse {
    /// Connection id for the follow-up calls.
    pub connection_id: ConnectionId,
}

/// Long-poll result; empty when the hold timed out.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PollResponse {
    /// Messages in delivery order.
    pub messages: Vec<ServerMessage>,
}
