//! Inbound and outbound message type definitions.
//!
//! Both directions are JSON objects tagged by `type`. The same outbound
//! messages travel over sockets, server-push streams and long-poll
//! responses; fallback transports use the tag as the event name.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use playhub_core::events::DomainEvent;
use playhub_core::types::{ConnectionId, GameAction, GameId, SessionId};
use playhub_game::GameView;

/// Messages sent by the client to the server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    /// Join a game.
    JoinGame {
        /// Game to join.
        game_id: GameId,
    },
    /// Leave the current game.
    LeaveGame {
        /// Game to leave; defaults to the connection's active game.
        #[serde(default)]
        game_id: Option<GameId>,
    },
    /// Perform a game action.
    GameAction {
        /// Target game.
        game_id: GameId,
        /// The action.
        action: GameAction,
    },
    /// Send a chat message to a channel.
    SendMessage {
        /// Target channel.
        channel: String,
        /// Message text.
        text: String,
    },
    /// Subscribe to a channel.
    Subscribe {
        /// Channel name.
        channel: String,
    },
    /// Unsubscribe from a channel.
    Unsubscribe {
        /// Channel name.
        channel: String,
    },
    /// Latency probe.
    Ping {
        /// Client send time in epoch milliseconds.
        timestamp: i64,
    },
}

/// Presence state broadcast on connect and disconnect.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PresenceState {
    /// At least one live connection.
    Online,
    /// Connection closed.
    Offline,
}

/// A persisted chat message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    /// Message id.
    pub id: Uuid,
    /// Channel the message was sent to.
    pub channel: String,
    /// Sender identity.
    pub identity_id: String,
    /// Sender display name.
    pub display_name: String,
    /// Message text.
    pub text: String,
    /// Send time.
    pub sent_at: DateTime<Utc>,
}

/// Messages sent by the server to the client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    /// Handshake completed.
    Connected {
        /// Connection id.
        connection_id: ConnectionId,
        /// Session id; present it on reconnect to recover.
        session_id: SessionId,
        /// Verified identity.
        identity_id: String,
        /// Whether a previous session was recovered.
        recovered: bool,
    },
    /// Subscription confirmed.
    Subscribed {
        /// Channel name.
        channel: String,
    },
    /// Unsubscription confirmed.
    Unsubscribed {
        /// Channel name.
        channel: String,
    },
    /// Current state of a game, sent on join and on recovery.
    GameState {
        /// Client view of the game.
        game: GameView,
    },
    /// The connection left a game.
    GameLeft {
        /// Game left.
        game_id: GameId,
    },
    /// A domain event of a game the client is in.
    GameEvent {
        /// Game id.
        game_id: GameId,
        /// Event type, e.g. `game.action_applied`.
        event_type: String,
        /// Aggregate version after the event.
        version: u64,
        /// Event payload.
        data: serde_json::Value,
    },
    /// Chat message delivery.
    Chat(ChatMessage),
    /// Another identity came online or went offline.
    Presence {
        /// Identity id.
        identity_id: String,
        /// Display name.
        display_name: String,
        /// New state.
        state: PresenceState,
    },
    /// Reply to a ping.
    Pong {
        /// Echoed client timestamp.
        timestamp: i64,
        /// Server time in epoch milliseconds.
        server_time: i64,
        /// Smoothed latency estimate.
        latency_ms: f64,
        /// Connection quality score, 0 to 100.
        quality: u8,
    },
    /// Several messages for one channel, in enqueue order.
    Batch {
        /// Channel the messages were addressed to.
        channel: String,
        /// Number of messages.
        count: usize,
        /// The messages.
        messages: Vec<ServerMessage>,
    },
    /// Server-push stream opened.
    Hello {
        /// Connection id to use for subscribe and action calls.
        connection_id: ConnectionId,
        /// Heartbeat interval in seconds.
        heartbeat_interval_secs: u64,
    },
    /// Server-push keepalive.
    Heartbeat {
        /// Server time.
        timestamp: DateTime<Utc>,
    },
    /// Error reply.
    Error {
        /// Machine-readable reason.
        code: String,
        /// Human-readable description.
        message: String,
        /// Seconds to wait before retrying, for admission errors.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        retry_after_secs: Option<u64>,
    },
}

impl ServerMessage {
    /// The `type` tag, used as the event name on fallback transports.
    pub fn event_name(&self) -> &'static str {
        match self {
            Self::Connected { .. } => "connected",
            Self::Subscribed { .. } => "subscribed",
            Self::Unsubscribed { .. } => "unsubscribed",
            Self::GameState { .. } => "game_state",
            Self::GameLeft { .. } => "game_left",
            Self::GameEvent { .. } => "game_event",
            Self::Chat(_) => "chat",
            Self::Presence { .. } => "presence",
            Self::Pong { .. } => "pong",
            Self::Batch { .. } => "batch",
            Self::Hello { .. } => "hello",
            Self::Heartbeat { .. } => "heartbeat",
            Self::Error { .. } => "error",
        }
    }

    /// Wrap a game domain event.
    pub fn game_event(game_id: GameId, event: &DomainEvent) -> Self {
        Self::GameEvent {
            game_id,
            event_type: event.event_type.clone(),
            version: event.version(),
            data: serde_json::to_value(&event.payload).unwrap_or(serde_json::Value::Null),
        }
    }

    /// Error reply from an application error.
    pub fn error(err: &playhub_core::AppError) -> Self {
        Self::Error {
            code: err.code(),
            message: err.message.clone(),
            retry_after_secs: err.retry_after_secs,
        }
    }
}
