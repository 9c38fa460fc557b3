//! # playhub-game
//!
//! The game aggregate and its coordinator. Games are event sourced: every
//! mutation is one domain event, and state is rebuilt from the latest
//! snapshot plus the events after it. The shared store holds a short-lived
//! cached copy that serves most reads.

pub mod aggregate;
pub mod coordinator;
pub mod rules;

pub use aggregate::{Game, GameView, Player};
pub use coordinator::{GameCoordinator, GameUpdate, MutationContext, NewGame};
