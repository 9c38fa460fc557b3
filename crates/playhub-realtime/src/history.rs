//! Chat message history, newest first, bounded by count and age.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tracing::warn;

use playhub_core::config::RealtimeConfig;
use playhub_core::error::AppError;
use playhub_core::result::AppResult;
use playhub_core::traits::store::{StateStore, StoreOp};
use playhub_store::{StoreManager, keys};

use crate::channel::Channel;
use crate::message::ChatMessage;

/// Store-backed message history.
#[derive(Debug, Clone)]
pub struct MessageHistory {
    store: Arc<StoreManager>,
    max_messages: usize,
    retention: Duration,
    max_age: chrono::Duration,
}

impl MessageHistory {
    /// Create a history over the shared store.
    pub fn new(store: Arc<StoreManager>, config: &RealtimeConfig) -> Self {
        Self {
            store,
            max_messages: config.history_max_messages.max(1),
            retention: Duration::from_secs(config.history_retention_seconds),
            max_age: chrono::Duration::seconds(config.history_retention_seconds as i64),
        }
    }

    /// Persist a message under its channel's history list.
    pub async fn record(&self, message: &ChatMessage) -> AppResult<()> {
        let channel = Channel::parse(&message.channel)
            .ok_or_else(|| AppError::validation(format!("Unknown channel '{}'", message.channel)))?;
        let (kind, target) = channel.history_key();
        let key = keys::history(kind, &target);
        self.store
            .pipeline(vec![
                StoreOp::LPush {
                    key: key.clone(),
                    value: serde_json::to_string(message)?,
                },
                StoreOp::LTrim {
                    key: key.clone(),
                    start: 0,
                    stop: self.max_messages as isize - 1,
                },
                StoreOp::Expire {
                    key,
                    ttl: self.retention,
                },
            ])
            .await?;
        Ok(())
    }

    /// Up to `limit` messages for `kind`/`target`, newest first.
    pub async fn history(&self, kind: &str, target: &str, limit: usize) -> AppResult<Vec<ChatMessage>> {
        let limit = limit.clamp(1, self.max_messages);
        let raw = self
            .store
            .lrange(&keys::history(kind, target), 0, limit as isize - 1)
            .await?;
        let cutoff = Utc::now() - self.max_age;
        Ok(raw
            .iter()
            .filter_map(|entry| match serde_json::from_str::<ChatMessage>(entry) {
                Ok(message) => Some(message),
                Err(e) => {
                    warn!(kind, target, error = %e, "Skipping unreadable history entry");
                    None
                }
            })
            .filter(|message| message.sent_at >= cutoff)
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn message(text: &str) -> ChatMessage {
        ChatMessage {
            id: Uuid::new_v4(),
            channel: "room:lobby".into(),
            identity_id: "alice".into(),
            display_name: "Alice".into(),
            text: text.into(),
            sent_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_newest_first_and_capped() {
        let config = RealtimeConfig {
            history_max_messages: 3,
            ..Default::default()
        };
        let history = MessageHistory::new(Arc::new(StoreManager::memory()), &config);
        for text in ["one", "two", "three", "four"] {
            history.record(&message(text)).await.unwrap();
        }
        let texts: Vec<String> = history
            .history("room", "lobby", 10)
            .await
            .unwrap()
            .into_iter()
            .map(|m| m.text)
            .collect();
        assert_eq!(texts, ["four", "three", "two"]);
        assert_eq!(history.history("room", "lobby", 1).await.unwrap().len(), 1);
        assert!(history.history("room", "other", 10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_old_messages_are_filtered() {
        let history = MessageHistory::new(Arc::new(StoreManager::memory()), &RealtimeConfig::default());
        let mut old = message("old");
        old.sent_at = Utc::now() - chrono::Duration::days(2);
        history.record(&old).await.unwrap();
        history.record(&message("new")).await.unwrap();
        let found = history.history("room", "lobby", 10).await.unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].text, "new");
    }

    #[tokio::test]
    async fn test_unknown_channel_is_rejected() {
        let history = MessageHistory::new(Arc::new(StoreManager::memory()), &RealtimeConfig::default());
        let mut bad = message("x");
        bad.channel = "nowhere".into();
        assert!(history.record(&bad).await.is_err());
    }
}
