//! Wire messages and their validation.

pub mod types;
pub mod validator;

pub use types::{ChatMessage, ClientMessage, PresenceState, ServerMessage};
