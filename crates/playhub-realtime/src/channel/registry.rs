//! Channel registry: which local connections are subscribed to which
//! channels. Process-local; cross-node delivery goes through the fan-out.

use std::collections::HashSet;

use dashmap::DashMap;

use playhub_core::types::ConnectionId;

/// Registry of local channel subscriptions.
#[derive(Debug, Default)]
pub struct ChannelRegistry {
    /// Channel name → subscribed connections.
    channels: DashMap<String, HashSet<ConnectionId>>,
    /// Connection → subscribed channel names (reverse index).
    by_connection: DashMap<ConnectionId, HashSet<String>>,
}

impl ChannelRegistry {
    /// Creates a new channel registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Subscribes a connection to a channel. Returns `false` if it already was.
    pub fn subscribe(&self, channel: &str, conn_id: ConnectionId) -> bool {
        self.channels
            .entry(channel.to_string())
            .or_default()
            .insert(conn_id);
        self.by_connection
            .entry(conn_id)
            .or_default()
            .insert(channel.to_string())
    }

    /// Unsubscribes a connection from a channel. Returns `false` if it was not subscribed.
    pub fn unsubscribe(&self, channel: &str, conn_id: ConnectionId) -> bool {
        self.detach(channel, conn_id);
        self.by_connection
            .get_mut(&conn_id)
            .map(|mut channels| channels.remove(channel))
            .unwrap_or(false)
    }

    /// Unsubscribes a connection from all channels and returns what it held.
    pub fn unsubscribe_all(&self, conn_id: ConnectionId) -> HashSet<String> {
        let channels = self
            .by_connection
            .remove(&conn_id)
            .map(|(_, channels)| channels)
            .unwrap_or_default();
        for channel in &channels {
            self.detach(channel, conn_id);
        }
        channels
    }

    fn detach(&self, channel: &str, conn_id: ConnectionId) {
        if let Some(mut subscribers) = self.channels.get_mut(channel) {
            subscribers.remove(&conn_id);
            if subscribers.is_empty() {
                drop(subscribers);
                self.channels.remove_if(channel, |_, s| s.is_empty());
            }
        }
    }

    /// Returns all subscriber connection ids for a channel.
    pub fn subscribers(&self, channel: &str) -> Vec<ConnectionId> {
        self.channels
            .get(channel)
            .map(|s| s.iter().copied().collect())
            .unwrap_or_default()
    }

    /// Returns the subscription count for a connection.
    pub fn subscription_count(&self, conn_id: ConnectionId) -> usize {
        self.by_connection
            .get(&conn_id)
            .map(|c| c.len())
            .unwrap_or(0)
    }

    /// Returns total number of active channels.
    pub fn channel_count(&self) -> usize {
        self.channels.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_subscribe_and_cleanup() {
        let registry = ChannelRegistry::new();
        let a = ConnectionId::new();
        let b = ConnectionId::new();
        assert!(registry.subscribe("room:lobby", a));
        assert!(!registry.subscribe("room:lobby", a));
        registry.subscribe("room:lobby", b);
        registry.subscribe("user:a", a);
        assert_eq!(registry.subscribers("room:lobby").len(), 2);
        assert_eq!(registry.subscription_count(a), 2);

        assert!(registry.unsubscribe("room:lobby", b));
        assert!(!registry.unsubscribe("room:lobby", b));

        let held = registry.unsubscribe_all(a);
        assert_eq!(held.len(), 2);
        assert_eq!(registry.channel_count(), 0);
        assert!(registry.unsubscribe_all(a).is_empty());
    }
}
