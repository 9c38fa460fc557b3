//! The game aggregate.
//!
//! [`Game::apply`] is the only way state changes: it is pure and
//! deterministic, so a game rebuilt from its event log equals the copy the
//! coordinator cached at the same version.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use playhub_core::error::AppError;
use playhub_core::events::{DomainEvent, EventPayload};
use playhub_core::result::AppResult;
use playhub_core::types::{
    ActionEffect, GameId, GameKind, GameSettings, GameState, GameStatus, GameSummary,
    PlayerScore, PlayerStatus, Ranking,
};

/// One seat in a game.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Player {
    /// Identity id.
    pub identity_id: String,
    /// Display name.
    pub display_name: String,
    /// When the player first joined.
    pub joined_at: DateTime<Utc>,
    /// Player status.
    pub status: PlayerStatus,
    /// Score.
    pub score: i64,
    /// Game-specific progress, private to the player.
    #[serde(default)]
    pub progress: serde_json::Value,
}

/// Game aggregate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Game {
    /// Game id.
    pub id: GameId,
    /// Game kind.
    pub kind: GameKind,
    /// Lifecycle status.
    pub status: GameStatus,
    /// Players in join order.
    pub players: Vec<Player>,
    /// Current round, 0 until the game first starts.
    pub current_round: u32,
    /// Settings chosen at creation.
    pub settings: GameSettings,
    /// Game-specific state.
    pub state: GameState,
    /// Version of the last applied event.
    pub version: u64,
    /// Creating identity.
    pub created_by: Option<String>,
    /// Creation time.
    pub created_at: DateTime<Utc>,
    /// First time the game became active.
    pub started_at: Option<DateTime<Utc>>,
    /// Completion time.
    pub completed_at: Option<DateTime<Utc>>,
    /// Time of the last applied event.
    pub updated_at: DateTime<Utc>,
}

/// What clients see of a game: no private player progress.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GameView {
    /// Game id.
    pub id: GameId,
    /// Game kind.
    pub kind: GameKind,
    /// Status.
    pub status: GameStatus,
    /// Current round.
    pub round: u32,
    /// Total rounds.
    pub total_rounds: u32,
    /// Roster limit.
    pub max_players: usize,
    /// Public score lines in join order.
    pub players: Vec<PlayerScore>,
    /// Game-specific shared state.
    pub state: GameState,
    /// Version.
    pub version: u64,
    /// Start time.
    pub started_at: Option<DateTime<Utc>>,
    /// Last update.
    pub updated_at: DateTime<Utc>,
}

impl Game {
    /// Build a game from its creation event.
    pub fn from_created(event: &DomainEvent) -> AppResult<Self> {
        let EventPayload::GameCreated {
            kind,
            settings,
            created_by,
        } = &event.payload
        else {
            return Err(AppError::internal(format!(
                "Event log of '{}' does not start with game.created",
                event.aggregate_id
            )));
        };
        let id = event
            .aggregate_id
            .parse::<GameId>()
            .map_err(|e| AppError::internal(format!("Invalid game id in event log: {e}")))?;
        let ts = event.metadata.timestamp;
        Ok(Self {
            id,
            kind: *kind,
            status: GameStatus::Waiting,
            players: Vec::new(),
            current_round: 0,
            settings: settings.clone(),
            state: GameState::initial(*kind, settings),
            version: event.version(),
            created_by: created_by.clone(),
            created_at: ts,
            started_at: None,
            completed_at: None,
            updated_at: ts,
        })
    }

    /// Rebuild from a full, ordered event log.
    pub fn replay(events: &[DomainEvent]) -> AppResult<Option<Self>> {
        let Some((first, rest)) = events.split_first() else {
            return Ok(None);
        };
        let mut game = Self::from_created(first)?;
        for event in rest {
            game.apply(event)?;
        }
        Ok(Some(game))
    }

    /// Apply the next event. Events must arrive in version order.
    pub fn apply(&mut self, event: &DomainEvent) -> AppResult<()> {
        if event.version() != self.version + 1 {
            return Err(AppError::conflict(format!(
                "Event version {} cannot follow version {} of game {}",
                event.version(),
                self.version,
                self.id
            )));
        }
        let ts = event.metadata.timestamp;

        match &event.payload {
            EventPayload::GameCreated { .. } => {
                return Err(AppError::internal(format!(
                    "Duplicate game.created for game {}",
                    self.id
                )));
            }
            EventPayload::PlayerJoined {
                identity_id,
                display_name,
                status,
            } => {
                self.players.push(Player {
                    identity_id: identity_id.clone(),
                    display_name: display_name.clone(),
                    joined_at: ts,
                    status: PlayerStatus::Active,
                    score: 0,
                    progress: serde_json::Value::Null,
                });
                self.set_status(*status, ts);
            }
            EventPayload::PlayerRejoined {
                identity_id,
                status,
            } => {
                self.set_player_status(identity_id, PlayerStatus::Active);
                self.set_status(*status, ts);
            }
            EventPayload::PlayerLeft {
                identity_id,
                status,
            } => {
                self.set_player_status(identity_id, PlayerStatus::Left);
                self.set_status(*status, ts);
            }
            EventPayload::PlayerDisconnected {
                identity_id,
                status,
            } => {
                self.set_player_status(identity_id, PlayerStatus::Disconnected);
                self.set_status(*status, ts);
            }
            EventPayload::PlayerRemoved {
                identity_id,
                status,
            } => {
                self.players.retain(|p| &p.identity_id != identity_id);
                self.set_status(*status, ts);
            }
            EventPayload::ActionApplied {
                identity_id,
                effect,
                ..
            } => {
                self.apply_effect(identity_id, effect);
            }
            EventPayload::GameCompleted { .. } => {
                self.status = GameStatus::Completed;
                self.current_round = self.current_round.min(self.settings.total_rounds);
                self.completed_at = Some(ts);
            }
        }

        self.version = event.version();
        self.updated_at = ts;
        Ok(())
    }

    /// Apply an action's effect. Shared by [`Game::apply`] and the
    /// coordinator's preview of the post-action summary.
    pub(crate) fn apply_effect(&mut self, identity_id: &str, effect: &ActionEffect) {
        if let Some(player) = self.player_mut(identity_id) {
            player.score += effect.score_delta;
            if let Some(progress) = &effect.progress {
                player.progress = progress.clone();
            }
        }
        self.state = effect.state.clone();
        if effect.advance_round {
            self.current_round += 1;
        }
    }

    fn set_status(&mut self, status: GameStatus, ts: DateTime<Utc>) {
        if status == GameStatus::Active && self.started_at.is_none() {
            self.started_at = Some(ts);
            self.current_round = 1;
        }
        self.status = status;
    }

    fn set_player_status(&mut self, identity_id: &str, status: PlayerStatus) {
        if let Some(player) = self.player_mut(identity_id) {
            player.status = status;
        }
    }

    /// Look up a player.
    pub fn player(&self, identity_id: &str) -> Option<&Player> {
        self.players.iter().find(|p| p.identity_id == identity_id)
    }

    fn player_mut(&mut self, identity_id: &str) -> Option<&mut Player> {
        self.players.iter_mut().find(|p| p.identity_id == identity_id)
    }

    /// Players currently active.
    pub fn active_players(&self) -> impl Iterator<Item = &Player> {
        self.players
            .iter()
            .filter(|p| p.status == PlayerStatus::Active)
    }

    /// Number of active players.
    pub fn active_count(&self) -> usize {
        self.active_players().count()
    }

    /// Seats taken: every player that has not left.
    pub fn seated_count(&self) -> usize {
        self.players
            .iter()
            .filter(|p| p.status != PlayerStatus::Left)
            .count()
    }

    /// Status the game should have given `active` active players.
    pub fn status_for(&self, active: usize, min_players: usize) -> GameStatus {
        match self.status {
            GameStatus::Completed => GameStatus::Completed,
            GameStatus::Waiting if active >= min_players => GameStatus::Active,
            GameStatus::Waiting => GameStatus::Waiting,
            GameStatus::Active | GameStatus::Paused if active >= min_players => GameStatus::Active,
            GameStatus::Active | GameStatus::Paused => GameStatus::Paused,
        }
    }

    /// Whether the final round has been played.
    pub fn round_limit_reached(&self) -> bool {
        self.started_at.is_some() && self.current_round > self.settings.total_rounds
    }

    /// Whether a started game has no active players left.
    pub fn abandoned(&self) -> bool {
        self.started_at.is_some()
            && self.status != GameStatus::Completed
            && self.active_count() == 0
    }

    /// Final ranking: score descending, ties keep join order.
    pub fn rankings(&self) -> Vec<Ranking> {
        let mut ordered: Vec<&Player> = self.players.iter().collect();
        // Stable sort keeps join order among equal scores.
        ordered.sort_by(|a, b| b.score.cmp(&a.score));
        ordered
            .into_iter()
            .enumerate()
            .map(|(i, p)| Ranking {
                rank: i as u32 + 1,
                identity_id: p.identity_id.clone(),
                display_name: p.display_name.clone(),
                score: p.score,
            })
            .collect()
    }

    fn scores(&self) -> Vec<PlayerScore> {
        self.players
            .iter()
            .map(|p| PlayerScore {
                identity_id: p.identity_id.clone(),
                display_name: p.display_name.clone(),
                score: p.score,
                status: p.status,
            })
            .collect()
    }

    /// Redacted summary carried on events.
    pub fn summary(&self) -> GameSummary {
        GameSummary {
            game_id: self.id,
            status: self.status,
            round: self.current_round.min(self.settings.total_rounds),
            total_rounds: self.settings.total_rounds,
            scores: self.scores(),
        }
    }

    /// Client view.
    pub fn view(&self) -> GameView {
        GameView {
            id: self.id,
            kind: self.kind,
            status: self.status,
            round: self.current_round.min(self.settings.total_rounds),
            total_rounds: self.settings.total_rounds,
            max_players: self.settings.max_players,
            players: self.scores(),
            state: self.state.clone(),
            version: self.version,
            started_at: self.started_at,
            updated_at: self.updated_at,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use playhub_core::events::{AggregateRef, EventMetadata};
    use uuid::Uuid;

    fn event(id: GameId, version: u64, payload: EventPayload) -> DomainEvent {
        DomainEvent::new(
            &AggregateRef::game(id),
            payload,
            EventMetadata {
                identity_id: None,
                session_id: None,
                timestamp: Utc::now(),
                version,
                correlation_id: Uuid::new_v4(),
                causation_id: None,
            },
        )
    }

    fn created(id: GameId) -> DomainEvent {
        event(
            id,
            1,
            EventPayload::GameCreated {
                kind: GameKind::Trivia,
                settings: GameSettings {
                    max_players: 4,
                    difficulty: Default::default(),
                    total_rounds: 2,
                    params: Default::default(),
                },
                created_by: None,
            },
        )
    }

    fn joined(id: GameId, v: u64, who: &str, status: GameStatus) -> DomainEvent {
        event(
            id,
            v,
            EventPayload::PlayerJoined {
                identity_id: who.into(),
                display_name: who.to_uppercase(),
                status,
            },
        )
    }

    #[test]
    fn test_replay_builds_roster_and_start() {
        let id = GameId::new();
        let events = vec![
            created(id),
            joined(id, 2, "a", GameStatus::Waiting),
            joined(id, 3, "b", GameStatus::Active),
        ];
        let game = Game::replay(&events).unwrap().unwrap();
        assert_eq!(game.version, 3);
        assert_eq!(game.status, GameStatus::Active);
        assert_eq!(game.current_round, 1);
        assert!(game.started_at.is_some());
        assert_eq!(game.players.len(), 2);
    }

    #[test]
    fn test_out_of_order_event_is_rejected() {
        let id = GameId::new();
        let mut game = Game::from_created(&created(id)).unwrap();
        let err = game
            .apply(&joined(id, 3, "a", GameStatus::Waiting))
            .unwrap_err();
        assert_eq!(err.kind, playhub_core::error::ErrorKind::Conflict);
        assert_eq!(game.version, 1);
    }

    #[test]
    fn test_rankings_break_ties_by_join_order() {
        let id = GameId::new();
        let mut game = Game::replay(&[
            created(id),
            joined(id, 2, "a", GameStatus::Waiting),
            joined(id, 3, "b", GameStatus::Active),
            joined(id, 4, "c", GameStatus::Active),
        ])
        .unwrap()
        .unwrap();
        game.players[0].score = 5;
        game.players[1].score = 9;
        game.players[2].score = 5;
        let ranking: Vec<_> = game
            .rankings()
            .into_iter()
            .map(|r| (r.rank, r.identity_id))
            .collect();
        assert_eq!(
            ranking,
            vec![(1, "b".to_string()), (2, "a".to_string()), (3, "c".to_string())]
        );
    }

    #[test]
    fn test_status_machine() {
        let id = GameId::new();
        let mut game = Game::from_created(&created(id)).unwrap();
        assert_eq!(game.status_for(1, 2), GameStatus::Waiting);
        assert_eq!(game.status_for(2, 2), GameStatus::Active);
        game.status = GameStatus::Active;
        assert_eq!(game.status_for(1, 2), GameStatus::Paused);
        game.status = GameStatus::Paused;
        assert_eq!(game.status_for(3, 2), GameStatus::Active);
        game.status = GameStatus::Completed;
        assert_eq!(game.status_for(3, 2), GameStatus::Completed);
    }

    #[test]
    fn test_view_hides_progress() {
        let id = GameId::new();
        let game = Game::replay(&[created(id), joined(id, 2, "a", GameStatus::Waiting)])
            .unwrap()
            .unwrap();
        let json = serde_json::to_value(game.view()).unwrap();
        assert!(json["players"][0].get("progress").is_none());
        assert_eq!(json["players"][0]["display_name"], "A");
    }
}
