//! Game value types shared between the coordinator, the event model and
//! the realtime layer.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use super::id::GameId;

/// Supported game variants.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GameKind {
    /// Question rounds; players score by answering correctly.
    Trivia,
    /// Players advance along a track; finishing order scores.
    Race,
    /// Players place shared pieces; hints cost points.
    Puzzle,
}

impl std::fmt::Display for GameKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Trivia => write!(f, "trivia"),
            Self::Race => write!(f, "race"),
            Self::Puzzle => write!(f, "puzzle"),
        }
    }
}

/// Game lifecycle status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GameStatus {
    /// Created, not enough active players yet.
    Waiting,
    /// Running.
    Active,
    /// Dropped below the minimum active player count.
    Paused,
    /// Terminal.
    Completed,
}

/// Status of one player within a game.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlayerStatus {
    /// Participating.
    Active,
    /// Lost the connection but has not left.
    Disconnected,
    /// Left the game.
    Left,
}

/// Difficulty level; scales score awards.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Difficulty {
    /// x1.
    Easy,
    /// x2.
    #[default]
    Medium,
    /// x3.
    Hard,
}

impl Difficulty {
    /// Score multiplier.
    pub fn multiplier(&self) -> i64 {
        match self {
            Self::Easy => 1,
            Self::Medium => 2,
            Self::Hard => 3,
        }
    }
}

/// Game configuration chosen at creation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GameSettings {
    /// Roster limit (players that have not left).
    pub max_players: usize,
    /// Difficulty.
    #[serde(default)]
    pub difficulty: Difficulty,
    /// Rounds before the game completes.
    pub total_rounds: u32,
    /// Free-form game parameters (`track_length`, `pieces`, ...).
    #[serde(default)]
    pub params: BTreeMap<String, serde_json::Value>,
}

impl GameSettings {
    /// Read an unsigned integer parameter with a fallback.
    pub fn param_u32(&self, name: &str, default: u32) -> u32 {
        self.params
            .get(name)
            .and_then(serde_json::Value::as_u64)
            .and_then(|v| u32::try_from(v).ok())
            .unwrap_or(default)
    }
}

/// Game-specific state, one variant per [`GameKind`].
///
/// Maps are ordered so serialized state is deterministic, which keeps replayed
/// and cached copies byte-comparable.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum GameState {
    /// Trivia state.
    Trivia {
        /// Index of the question currently open.
        question: u32,
        /// Players that answered the open question.
        answered: BTreeMap<String, bool>,
    },
    /// Race state.
    Race {
        /// Distance to the finish line.
        track_length: u32,
        /// Position per player.
        positions: BTreeMap<String, u32>,
        /// Players in the order they finished this round.
        finish_order: Vec<String>,
    },
    /// Puzzle state.
    Puzzle {
        /// Pieces in the current puzzle.
        pieces: u32,
        /// Placed piece index to the player that placed it.
        placed: BTreeMap<u32, String>,
        /// Hints used per player.
        hints_used: BTreeMap<String, u32>,
    },
}

impl GameState {
    /// Fresh state for a new game.
    pub fn initial(kind: GameKind, settings: &GameSettings) -> Self {
        match kind {
            GameKind::Trivia => Self::Trivia {
                question: 0,
                answered: BTreeMap::new(),
            },
            GameKind::Race => Self::Race {
                track_length: settings.param_u32("track_length", 100),
                positions: BTreeMap::new(),
                finish_order: Vec::new(),
            },
            GameKind::Puzzle => Self::Puzzle {
                pieces: settings.param_u32("pieces", 16),
                placed: BTreeMap::new(),
                hints_used: BTreeMap::new(),
            },
        }
    }

    /// The kind this state belongs to.
    pub fn kind(&self) -> GameKind {
        match self {
            Self::Trivia { .. } => GameKind::Trivia,
            Self::Race { .. } => GameKind::Race,
            Self::Puzzle { .. } => GameKind::Puzzle,
        }
    }
}

/// A player action, tagged by `type`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum GameAction {
    /// Move every kind to the next round.
    AdvanceRound,
    /// Trivia: answer the open question.
    Answer {
        /// Question index being answered.
        question: u32,
        /// Whether the answer was correct, as judged by the rules engine.
        correct: bool,
    },
    /// Race: move forward.
    Move {
        /// Distance covered.
        distance: u32,
    },
    /// Puzzle: place a piece.
    PlacePiece {
        /// Piece index.
        piece: u32,
    },
    /// Puzzle: reveal a hint.
    UseHint,
}

impl GameAction {
    /// Action name as it appears on the wire.
    pub fn name(&self) -> &'static str {
        match self {
            Self::AdvanceRound => "advance_round",
            Self::Answer { .. } => "answer",
            Self::Move { .. } => "move",
            Self::PlacePiece { .. } => "place_piece",
            Self::UseHint => "use_hint",
        }
    }
}

/// Result of applying an action, recorded on the event so replay never
/// re-runs the rules.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActionEffect {
    /// Change to the acting player's score.
    pub score_delta: i64,
    /// Replacement progress blob for the acting player, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub progress: Option<serde_json::Value>,
    /// Whether the round ends with this action.
    #[serde(default)]
    pub advance_round: bool,
    /// Game-specific state after the action.
    pub state: GameState,
}

/// One player's public score line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlayerScore {
    /// Identity id.
    pub identity_id: String,
    /// Display name.
    pub display_name: String,
    /// Current score.
    pub score: i64,
    /// Player status.
    pub status: PlayerStatus,
}

/// Redacted view of a game carried on events: no private game state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GameSummary {
    /// Game id.
    pub game_id: GameId,
    /// Status.
    pub status: GameStatus,
    /// Current round.
    pub round: u32,
    /// Total rounds.
    pub total_rounds: u32,
    /// Scores in join order.
    pub scores: Vec<PlayerScore>,
}

/// One line of the final ranking.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ranking {
    /// 1-based rank.
    pub rank: u32,
    /// Identity id.
    pub identity_id: String,
    /// Display name.
    pub display_name: String,
    /// Final score.
    pub score: i64,
}
