//! Inbound message dispatch.

use chrono::Utc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use playhub_core::error::AppError;
use playhub_core::result::AppResult;
use playhub_core::types::{ConnectionId, GameAction, GameId};
use playhub_game::{Game, MutationContext};

use crate::channel::Channel;
use crate::connection::{ConnectionRecord, TrafficDirection};
use crate::message::validator::{parse_inbound, validate_channel_name, validate_chat_text};
use crate::message::{ChatMessage, ClientMessage, ServerMessage};
use crate::rate_limit::RateLimitAction;

use super::ConnectionOrchestrator;

fn context(record: &ConnectionRecord) -> MutationContext {
    MutationContext::identity(record.identity_id.clone()).with_session(record.session_id)
}

impl ConnectionOrchestrator {
    /// Handle one raw socket frame. Failures are answered with an error
    /// message on the same connection and never close it.
    pub async fn handle_inbound(&self, id: ConnectionId, raw: &str) {
        self.registry
            .record_traffic(id, TrafficDirection::Inbound, raw.len());
        self.metrics.inc_received();

        let result = match parse_inbound(raw) {
            Ok(message) => self.dispatch(id, message).await,
            Err(e) => Err(e),
        };
        if let Err(e) = result {
            debug!(conn_id = %id, code = %e.code(), error = %e, "Inbound message rejected");
            self.reply(id, ServerMessage::error(&e));
        }
    }

    pub(crate) async fn dispatch(&self, id: ConnectionId, message: ClientMessage) -> AppResult<()> {
        let record = self
            .registry
            .get(id)
            .await
            .ok_or_else(|| AppError::not_found(format!("Connection {id} not found")))?;

        match message {
            ClientMessage::JoinGame { game_id } => self.join_game(&record, game_id).await,
            ClientMessage::LeaveGame { game_id } => self.leave_game(&record, game_id).await,
            ClientMessage::GameAction { game_id, action } => {
                self.game_action(&record, game_id, action).await
            }
            ClientMessage::SendMessage { channel, text } => {
                self.send_chat(&record, channel, text).await
            }
            ClientMessage::Subscribe { channel } => self.subscribe(&record, &channel).await,
            ClientMessage::Unsubscribe { channel } => {
                self.detach(id, &channel, true).await;
                Ok(())
            }
            ClientMessage::Ping { timestamp } => {
                self.ping(id, timestamp);
                Ok(())
            }
        }
    }

    async fn limit(&self, identity_id: &str, action: RateLimitAction) -> AppResult<()> {
        self.limiter
            .check_enhanced(identity_id, action)
            .await
            .into_result(action)
            .map(|_| ())
    }

    /// Seat the connection in a game, subscribe it to the game channel and
    /// push the current state. Shared by `join_game` and recovery.
    pub(crate) async fn enter_game(&self, record: &ConnectionRecord, game_id: GameId) -> AppResult<Game> {
        let update = self
            .coordinator
            .add_player(game_id, &record.identity_id, &record.display_name, &context(record))
            .await?;
        let id = record.connection_id;
        self.registry.set_game_ref(id, Some(game_id)).await;
        self.attach(id, &Channel::Game(game_id).to_string(), false)
            .await?;
        self.reply(
            id,
            ServerMessage::GameState {
                game: update.game.view(),
            },
        );
        self.publish_game_events(game_id, &update.events);
        Ok(update.game)
    }

    async fn forget_game(&self, id: ConnectionId, game_id: GameId) {
        self.registry.set_game_ref(id, None).await;
        self.detach(id, &Channel::Game(game_id).to_string(), false)
            .await;
    }

    /// Drop `game:` subscriptions left over from completed games, other than
    /// `keep`.
    async fn release_finished_games(&self, record: &ConnectionRecord, keep: GameId) {
        let keep = Channel::Game(keep).to_string();
        for channel in &record.subscriptions {
            let stale = matches!(
                Channel::parse(channel),
                Some(Channel::Game(g)) if Some(g) != record.game_id
            );
            if stale && *channel != keep {
                self.detach(record.connection_id, channel, false).await;
            }
        }
    }

    async fn join_game(&self, record: &ConnectionRecord, game_id: GameId) -> AppResult<()> {
        self.limit(&record.identity_id, RateLimitAction::GameJoin)
            .await?;

        if let Some(current) = record.game_id.filter(|g| *g != game_id) {
            if let Err(e) = self
                .coordinator
                .remove_player(current, &record.identity_id, &context(record))
                .await
                .map(|update| self.publish_game_events(current, &update.events))
            {
                debug!(game_id = %current, error = %e, "Leaving previous game failed");
            }
            self.forget_game(record.connection_id, current).await;
            self.reply(record.connection_id, ServerMessage::GameLeft { game_id: current });
        }
        self.release_finished_games(record, game_id).await;

        let game = self.enter_game(record, game_id).await?;
        info!(
            conn_id = %record.connection_id,
            identity_id = %record.identity_id,
            game_id = %game_id,
            status = ?game.status,
            "Joined game"
        );
        Ok(())
    }

    async fn leave_game(&self, record: &ConnectionRecord, game_id: Option<GameId>) -> AppResult<()> {
        let game_id = game_id
            .or(record.game_id)
            .ok_or_else(|| AppError::validation("Not in a game"))?;
        let update = self
            .coordinator
            .remove_player(game_id, &record.identity_id, &context(record))
            .await?;
        self.forget_game(record.connection_id, game_id).await;
        self.reply(record.connection_id, ServerMessage::GameLeft { game_id });
        self.publish_game_events(game_id, &update.events);
        Ok(())
    }

    async fn game_action(
        &self,
        record: &ConnectionRecord,
        game_id: GameId,
        action: GameAction,
    ) -> AppResult<()> {
        self.limit(&record.identity_id, RateLimitAction::GameAction)
            .await?;
        let update = self
            .coordinator
            .apply_action(game_id, &record.identity_id, action, &context(record))
            .await?;
        self.publish_game_events(game_id, &update.events);
        Ok(())
    }

    async fn send_chat(&self, record: &ConnectionRecord, channel: String, text: String) -> AppResult<()> {
        self.limit(&record.identity_id, RateLimitAction::ChatMessage)
            .await?;
        validate_chat_text(&text, self.config.max_message_length)?;
        validate_channel_name(&channel)?;
        let parsed = Channel::parse(&channel)
            .ok_or_else(|| AppError::validation(format!("Unknown channel '{channel}'")))?;
        let direct = matches!(parsed, Channel::User(_));
        if !direct && !record.subscriptions.contains(&channel) {
            return Err(AppError::validation(format!(
                "Not subscribed to channel '{channel}'"
            )));
        }

        let message = ChatMessage {
            id: Uuid::now_v7(),
            channel: channel.clone(),
            identity_id: record.identity_id.clone(),
            display_name: record.display_name.clone(),
            text,
            sent_at: Utc::now(),
        };
        if let Err(e) = self.history.record(&message).await {
            warn!(channel = %channel, error = %e, "Failed to record chat history");
        }
        self.publish(&channel, ServerMessage::Chat(message));
        Ok(())
    }

    async fn subscribe(&self, record: &ConnectionRecord, channel: &str) -> AppResult<()> {
        validate_channel_name(channel)?;
        let parsed = Channel::parse(channel)
            .ok_or_else(|| AppError::validation(format!("Unknown channel '{channel}'")))?;
        if !parsed.permits(&record.identity_id) {
            return Err(AppError::validation(format!(
                "Not allowed to subscribe to '{channel}'"
            )));
        }
        if !record.subscriptions.contains(channel)
            && record.subscriptions.len() >= self.config.max_subscriptions_per_connection
        {
            return Err(AppError::validation(format!(
                "Subscription limit of {} reached",
                self.config.max_subscriptions_per_connection
            )));
        }
        self.attach(record.connection_id, channel, true).await?;
        Ok(())
    }

    fn ping(&self, id: ConnectionId, timestamp: i64) {
        let server_time = Utc::now().timestamp_millis();
        let sample = server_time.saturating_sub(timestamp).max(0) as f64;
        let (latency_ms, quality) = self
            .registry
            .record_latency(id, sample)
            .unwrap_or((sample, 0));
        self.reply(
            id,
            ServerMessage::Pong {
                timestamp,
                server_time,
                latency_ms,
                quality,
            },
        );
    }
}
