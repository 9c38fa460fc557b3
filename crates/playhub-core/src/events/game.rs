//! Game event payloads.

use serde::{Deserialize, Serialize};

use crate::types::{ActionEffect, GameAction, GameKind, GameSettings, GameStatus, GameSummary, Ranking};

/// Union of all domain event payloads, one variant per event type.
///
/// Every variant carries what replay needs to re-derive aggregate state
/// without re-running game rules.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum EventPayload {
    /// A game was created (always version 1).
    #[serde(rename = "game.created")]
    GameCreated {
        /// Game kind.
        kind: GameKind,
        /// Settings.
        settings: GameSettings,
        /// Creating identity.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        created_by: Option<String>,
    },
    /// A new player joined.
    #[serde(rename = "game.player_joined")]
    PlayerJoined {
        /// Player identity.
        identity_id: String,
        /// Display name.
        display_name: String,
        /// Game status after the join.
        status: GameStatus,
    },
    /// A player that had left or disconnected became active again.
    #[serde(rename = "game.player_rejoined")]
    PlayerRejoined {
        /// Player identity.
        identity_id: String,
        /// Game status after the rejoin.
        status: GameStatus,
    },
    /// A player left a game that had started; they stay on the roster.
    #[serde(rename = "game.player_left")]
    PlayerLeft {
        /// Player identity.
        identity_id: String,
        /// Game status after the departure.
        status: GameStatus,
    },
    /// A player's connection dropped; they keep their seat and can rejoin.
    #[serde(rename = "game.player_disconnected")]
    PlayerDisconnected {
        /// Player identity.
        identity_id: String,
        /// Game status after the disconnect.
        status: GameStatus,
    },
    /// A player was taken off the roster of a waiting game.
    #[serde(rename = "game.player_removed")]
    PlayerRemoved {
        /// Player identity.
        identity_id: String,
        /// Game status after the removal.
        status: GameStatus,
    },
    /// A player action was accepted.
    #[serde(rename = "game.action_applied")]
    ActionApplied {
        /// Acting player.
        identity_id: String,
        /// The action.
        action: GameAction,
        /// What the action did.
        effect: ActionEffect,
        /// Public summary after the action.
        summary: GameSummary,
    },
    /// The game reached a terminal state.
    #[serde(rename = "game.completed")]
    GameCompleted {
        /// Seconds between start and completion.
        duration_secs: i64,
        /// Final ranking, score descending, ties by join order.
        rankings: Vec<Ranking>,
        /// Why the game ended.
        reason: CompletionReason,
    },
}

/// Why a game completed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CompletionReason {
    /// The last round finished.
    RoundLimit,
    /// No active players remain.
    NoActivePlayers,
}

impl EventPayload {
    /// Dot-namespaced event type string.
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::GameCreated { .. } => "game.created",
            Self::PlayerJoined { .. } => "game.player_joined",
            Self::PlayerRejoined { .. } => "game.player_rejoined",
            Self::PlayerLeft { .. } => "game.player_left",
            Self::PlayerDisconnected { .. } => "game.player_disconnected",
            Self::PlayerRemoved { .. } => "game.player_removed",
            Self::ActionApplied { .. } => "game.action_applied",
            Self::GameCompleted { .. } => "game.completed",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_serde_tag_matches_event_type() {
        let payload = EventPayload::PlayerLeft {
            identity_id: "u1".into(),
            status: GameStatus::Paused,
        };
        let value = serde_json::to_value(&payload).unwrap();
        assert_eq!(value["type"], payload.event_type());
        assert_eq!(value["data"]["status"], "paused");
    }
}
