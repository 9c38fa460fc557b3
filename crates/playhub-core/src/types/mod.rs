//! Shared value types used across PlayHub crates.

pub mod game;
pub mod id;

pub use game::{
    ActionEffect, Difficulty, GameAction, GameKind, GameSettings, GameState, GameStatus,
    GameSummary, PlayerScore, PlayerStatus, Ranking,
};
pub use id::{ConnectionId, EventId, GameId, SessionId};
