//! Channel type definitions and parsing.

use std::fmt;

use playhub_core::types::GameId;

/// Typed channel identifiers.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Channel {
    /// Personal identity channel; every connection is subscribed to its own.
    User(String),
    /// Participants of one game.
    Game(GameId),
    /// Named chat room.
    Room(String),
    /// Global presence feed.
    Presence,
    /// Everyone.
    Broadcast,
}

impl Channel {
    /// Parses a channel string into a typed channel.
    pub fn parse(channel: &str) -> Option<Self> {
        match channel.split_once(':')? {
            ("user", id) if !id.is_empty() => Some(Self::User(id.to_string())),
            ("game", id) => id.parse().ok().map(Self::Game),
            ("room", name) if !name.is_empty() => Some(Self::Room(name.to_string())),
            ("presence", "global") => Some(Self::Presence),
            ("broadcast", "all") => Some(Self::Broadcast),
            _ => None,
        }
    }

    /// Whether `identity_id` may subscribe. Personal channels belong to
    /// their owner only.
    pub fn permits(&self, identity_id: &str) -> bool {
        match self {
            Self::User(owner) => owner == identity_id,
            _ => true,
        }
    }

    /// History kind and target (`history:{kind}:{target}`).
    pub fn history_key(&self) -> (&'static str, String) {
        match self {
            Self::User(id) => ("user", id.clone()),
            Self::Game(id) => ("game", id.to_string()),
            Self::Room(name) => ("room", name.clone()),
            Self::Presence => ("presence", "global".to_string()),
            Self::Broadcast => ("broadcast", "all".to_string()),
        }
    }
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::User(id) => write!(f, "user:{id}"),
            Self::Game(id) => write!(f, "game:{id}"),
            Self::Room(name) => write!(f, "room:{name}"),
            Self::Presence => f.write_str("presence:global"),
            Self::Broadcast => f.write_str("broadcast:all"),
        }
    }
}
