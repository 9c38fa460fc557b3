//! Subscription patterns over event types.

use super::topic_of;

/// Either an exact event type or a namespace wildcard (`game.*`).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum EventPattern {
    /// Matches one event type.
    Exact(String),
    /// Matches every type in a namespace.
    Namespace(String),
}

impl EventPattern {
    /// Parse a pattern string.
    pub fn parse(pattern: &str) -> Self {
        match pattern.strip_suffix(".*") {
            Some(ns) => Self::Namespace(ns.to_string()),
            None => Self::Exact(pattern.to_string()),
        }
    }

    /// Whether an event type matches.
    pub fn matches(&self, event_type: &str) -> bool {
        match self {
            Self::Exact(t) => t == event_type,
            Self::Namespace(ns) => topic_of(event_type) == ns,
        }
    }

    /// Transport topic this pattern listens on.
    pub fn topic(&self) -> &str {
        match self {
            Self::Exact(t) => topic_of(t),
            Self::Namespace(ns) => ns,
        }
    }
}

impl std::fmt::Display for EventPattern {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Exact(t) => write!(f, "{t}"),
            Self::Namespace(ns) => write!(f, "{ns}.*"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_namespace_wildcard() {
        let p = EventPattern::parse("game.*");
        assert!(p.matches("game.completed"));
        assert!(!p.matches("gamey.completed"));
        assert_eq!(p.topic(), "game");
    }

    #[test]
    fn test_exact() {
        let p = EventPattern::parse("game.completed");
        assert!(p.matches("game.completed"));
        assert!(!p.matches("game.player_left"));
        assert_eq!(p.topic(), "game");
    }
}
