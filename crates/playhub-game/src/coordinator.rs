//! Game state coordinator.
//!
//! Writers are serialized per game by an in-process async mutex, and across
//! processes by the event log's version claim. A claim conflict means
//! another node advanced the game first: the coordinator re-reads from the
//! log and re-decides, up to `game.max_conflict_retries` times.
//!
//! Reads prefer the shared store cache, then the latest snapshot plus the
//! events after it, then a full replay. When the store is unreachable the
//! last copy this process saw is served and the coordinator reports
//! degraded.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use dashmap::DashMap;
use moka::future::Cache;
use serde::Deserialize;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};
use uuid::Uuid;

use playhub_core::config::GameConfig;
use playhub_core::error::{AppError, ErrorKind};
use playhub_core::events::{
    AggregateRef, CompletionReason, DomainEvent, EventPayload, MetadataOverrides,
};
use playhub_core::result::AppResult;
use playhub_core::types::{
    Difficulty, GameAction, GameId, GameKind, GameSettings, GameStatus, PlayerStatus, SessionId,
};
use playhub_events::EventBroker;
use playhub_store::{StoreManager, keys};

use crate::aggregate::Game;
use crate::rules;

/// Request to create a game.
#[derive(Debug, Clone, Deserialize)]
pub struct NewGame {
    /// Game kind.
    pub kind: GameKind,
    /// Roster limit; defaults to `game.default_max_players`.
    #[serde(default)]
    pub max_players: Option<usize>,
    /// Difficulty.
    #[serde(default)]
    pub difficulty: Difficulty,
    /// Rounds; defaults to `game.default_total_rounds`.
    #[serde(default)]
    pub total_rounds: Option<u32>,
    /// Free-form parameters.
    #[serde(default)]
    pub params: std::collections::BTreeMap<String, serde_json::Value>,
}

/// Who is mutating, for event metadata.
#[derive(Debug, Clone, Default)]
pub struct MutationContext {
    /// Acting identity.
    pub identity_id: Option<String>,
    /// Acting session.
    pub session_id: Option<SessionId>,
    /// Correlation id of the originating request.
    pub correlation_id: Option<Uuid>,
}

impl MutationContext {
    /// Context for an identity.
    pub fn identity(identity_id: impl Into<String>) -> Self {
        Self {
            identity_id: Some(identity_id.into()),
            ..Self::default()
        }
    }

    /// Attach a session.
    pub fn with_session(mut self, session_id: SessionId) -> Self {
        self.session_id = Some(session_id);
        self
    }
}

/// Result of a mutation: the game after it and the events it produced, in
/// order. An empty event list means the call was a no-op.
#[derive(Debug, Clone)]
pub struct GameUpdate {
    /// The game after the mutation.
    pub game: Game,
    /// Published events.
    pub events: Vec<DomainEvent>,
}

/// Game state coordinator.
pub struct GameCoordinator {
    broker: Arc<EventBroker>,
    store: Arc<StoreManager>,
    config: GameConfig,
    snapshot_every: u64,
    /// Per-game write locks; present only while a mutation holds or awaits one.
    locks: DashMap<GameId, Arc<Mutex<()>>>,
    /// Last copy seen per game, served when the store is unreachable.
    last_known: Cache<GameId, Game>,
    degraded: AtomicBool,
}

impl std::fmt::Debug for GameCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GameCoordinator")
            .field("active_locks", &self.locks.len())
            .field("degraded", &self.degraded.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}

impl GameCoordinator {
    /// Create a coordinator.
    pub fn new(
        broker: Arc<EventBroker>,
        store: Arc<StoreManager>,
        config: GameConfig,
        snapshot_every: u64,
    ) -> Self {
        let last_known = Cache::builder()
            .max_capacity(config.local_cache_capacity)
            .build();
        Self {
            broker,
            store,
            config,
            snapshot_every: snapshot_every.max(1),
            locks: DashMap::new(),
            last_known,
            degraded: AtomicBool::new(false),
        }
    }

    /// Whether the last read had to fall back to a local copy.
    pub fn is_degraded(&self) -> bool {
        self.degraded.load(Ordering::Relaxed)
    }

    /// Create a game. Emits `game.created` at version 1.
    pub async fn create(&self, request: NewGame, ctx: &MutationContext) -> AppResult<Game> {
        let max_players = request
            .max_players
            .unwrap_or(self.config.default_max_players);
        let total_rounds = request
            .total_rounds
            .unwrap_or(self.config.default_total_rounds);
        if max_players < self.config.min_players || max_players > 100 {
            return Err(AppError::validation(format!(
                "max_players must be between {} and 100",
                self.config.min_players
            )));
        }
        if total_rounds == 0 {
            return Err(AppError::validation("total_rounds must be at least 1"));
        }

        let id = GameId::new();
        let payload = EventPayload::GameCreated {
            kind: request.kind,
            settings: GameSettings {
                max_players,
                difficulty: request.difficulty,
                total_rounds,
                params: request.params,
            },
            created_by: ctx.identity_id.clone(),
        };
        let event = self
            .broker
            .publish(&AggregateRef::game(id), payload, overrides(ctx, 1))
            .await?;
        let game = Game::from_created(&event)?;
        self.remember(&game).await;
        info!(game_id = %id, kind = %game.kind, max_players, "Game created");
        Ok(game)
    }

    /// Add a player, or re-activate one that left or disconnected.
    pub async fn add_player(
        &self,
        game_id: GameId,
        identity_id: &str,
        display_name: &str,
        ctx: &MutationContext,
    ) -> AppResult<GameUpdate> {
        let min = self.config.min_players;
        self.mutate(game_id, ctx, |game| {
            if game.status == GameStatus::Completed {
                return Err(AppError::conflict("Game is completed"));
            }
            match game.player(identity_id).map(|p| p.status) {
                Some(PlayerStatus::Active) => Ok(None),
                Some(previous) => {
                    if previous == PlayerStatus::Left
                        && game.seated_count() >= game.settings.max_players
                    {
                        return Err(AppError::conflict("Game is full"));
                    }
                    Ok(Some(EventPayload::PlayerRejoined {
                        identity_id: identity_id.to_string(),
                        status: game.status_for(game.active_count() + 1, min),
                    }))
                }
                None => {
                    if game.seated_count() >= game.settings.max_players {
                        return Err(AppError::conflict("Game is full"));
                    }
                    Ok(Some(EventPayload::PlayerJoined {
                        identity_id: identity_id.to_string(),
                        display_name: display_name.to_string(),
                        status: game.status_for(game.active_count() + 1, min),
                    }))
                }
            }
        })
        .await
    }

    /// Remove a player: deleted from a waiting game, marked left otherwise.
    pub async fn remove_player(
        &self,
        game_id: GameId,
        identity_id: &str,
        ctx: &MutationContext,
    ) -> AppResult<GameUpdate> {
        let min = self.config.min_players;
        let update = self
            .mutate(game_id, ctx, |game| {
                if game.status == GameStatus::Completed {
                    return Err(AppError::conflict("Game is completed"));
                }
                let Some(player) = game.player(identity_id) else {
                    return Err(AppError::not_found(format!(
                        "Player '{identity_id}' is not in game {game_id}"
                    )));
                };
                let remaining = game.active_count()
                    - usize::from(player.status == PlayerStatus::Active);
                let status = game.status_for(remaining, min);
                if game.status == GameStatus::Waiting {
                    return Ok(Some(EventPayload::PlayerRemoved {
                        identity_id: identity_id.to_string(),
                        status,
                    }));
                }
                if player.status == PlayerStatus::Left {
                    return Ok(None);
                }
                Ok(Some(EventPayload::PlayerLeft {
                    identity_id: identity_id.to_string(),
                    status,
                }))
            })
            .await?;
        self.complete_if_abandoned(game_id, update, ctx).await
    }

    /// Mark a player's connection as lost. They keep their seat and
    /// [`GameCoordinator::add_player`] re-activates them.
    pub async fn disconnect_player(
        &self,
        game_id: GameId,
        identity_id: &str,
        ctx: &MutationContext,
    ) -> AppResult<GameUpdate> {
        let min = self.config.min_players;
        let update = self
            .mutate(game_id, ctx, |game| {
                match game.player(identity_id).map(|p| p.status) {
                    Some(PlayerStatus::Active) if game.status != GameStatus::Completed => {
                        Ok(Some(EventPayload::PlayerDisconnected {
                            identity_id: identity_id.to_string(),
                            status: game.status_for(game.active_count() - 1, min),
                        }))
                    }
                    _ => Ok(None),
                }
            })
            .await?;
        self.complete_if_abandoned(game_id, update, ctx).await
    }

    /// Apply a player action. Completes the game when the last round ends.
    pub async fn apply_action(
        &self,
        game_id: GameId,
        identity_id: &str,
        action: GameAction,
        ctx: &MutationContext,
    ) -> AppResult<GameUpdate> {
        let mut update = self
            .mutate(game_id, ctx, |game| {
                if game.status != GameStatus::Active {
                    return Err(AppError::conflict(format!(
                        "Game is not active (status: {:?})",
                        game.status
                    )));
                }
                match game.player(identity_id) {
                    Some(p) if p.status == PlayerStatus::Active => {}
                    _ => return Err(AppError::conflict("Player is not active in this game")),
                }
                let effect = rules::evaluate(game, identity_id, &action)?;
                let mut preview = game.clone();
                preview.apply_effect(identity_id, &effect);
                Ok(Some(EventPayload::ActionApplied {
                    identity_id: identity_id.to_string(),
                    action: action.clone(),
                    effect,
                    summary: preview.summary(),
                }))
            })
            .await?;

        if update.game.round_limit_reached() {
            let completed = self
                .complete(game_id, CompletionReason::RoundLimit, ctx)
                .await?;
            update.game = completed.game;
            update.events.extend(completed.events);
        }
        Ok(update)
    }

    /// Read a game.
    pub async fn get(&self, game_id: GameId) -> AppResult<Game> {
        match self.load(game_id).await {
            Ok(game) => {
                self.degraded.store(false, Ordering::Relaxed);
                self.last_known.insert(game_id, game.clone()).await;
                Ok(game)
            }
            Err(e) if e.kind.is_infrastructure() => match self.last_known.get(&game_id).await {
                Some(game) => {
                    self.degraded.store(true, Ordering::Relaxed);
                    warn!(game_id = %game_id, version = game.version, error = %e, "Serving last known game state");
                    Ok(game)
                }
                None => Err(e),
            },
            Err(e) => Err(e),
        }
    }

    async fn complete_if_abandoned(
        &self,
        game_id: GameId,
        mut update: GameUpdate,
        ctx: &MutationContext,
    ) -> AppResult<GameUpdate> {
        if update.game.abandoned() {
            let completed = self
                .complete(game_id, CompletionReason::NoActivePlayers, ctx)
                .await?;
            update.game = completed.game;
            update.events.extend(completed.events);
        }
        Ok(update)
    }

    async fn complete(
        &self,
        game_id: GameId,
        reason: CompletionReason,
        ctx: &MutationContext,
    ) -> AppResult<GameUpdate> {
        let update = self
            .mutate(game_id, ctx, |game| {
                if game.status == GameStatus::Completed {
                    return Ok(None);
                }
                let end = chrono::Utc::now();
                let start = game.started_at.unwrap_or(game.created_at);
                Ok(Some(EventPayload::GameCompleted {
                    duration_secs: (end - start).num_seconds().max(0),
                    rankings: game.rankings(),
                    reason,
                }))
            })
            .await?;
        info!(game_id = %game_id, ?reason, "Game completed");
        Ok(update)
    }

    fn lock_for(&self, game_id: GameId) -> Arc<Mutex<()>> {
        Arc::clone(
            self.locks
                .entry(game_id)
                .or_insert_with(|| Arc::new(Mutex::new(())))
                .value(),
        )
    }

    /// Run one mutation: decide on the current state, publish the event,
    /// apply it. `decide` returning `None` is a no-op.
    async fn mutate<F>(
        &self,
        game_id: GameId,
        ctx: &MutationContext,
        decide: F,
    ) -> AppResult<GameUpdate>
    where
        F: Fn(&Game) -> AppResult<Option<EventPayload>>,
    {
        let lock = self.lock_for(game_id);
        let result = {
            let _guard = lock.lock().await;
            self.mutate_locked(game_id, ctx, decide).await
        };
        self.release_lock(game_id, &lock);
        result
    }

    /// Drop the lock entry once no other caller holds or waits on it, so the
    /// map only tracks games with writes in flight.
    fn release_lock(&self, game_id: GameId, lock: &Arc<Mutex<()>>) {
        // One reference in the map, one held by the caller.
        self.locks.remove_if(&game_id, |_, entry| {
            Arc::ptr_eq(entry, lock) && Arc::strong_count(entry) == 2
        });
    }

    async fn mutate_locked<F>(
        &self,
        game_id: GameId,
        ctx: &MutationContext,
        decide: F,
    ) -> AppResult<GameUpdate>
    where
        F: Fn(&Game) -> AppResult<Option<EventPayload>>,
    {
        let mut attempt = 0;
        let mut game = self.load(game_id).await?;
        loop {
            let Some(payload) = decide(&game)? else {
                return Ok(GameUpdate {
                    game,
                    events: Vec::new(),
                });
            };
            let version = game.version + 1;
            match self
                .broker
                .publish(&AggregateRef::game(game_id), payload, overrides(ctx, version))
                .await
            {
                Ok(event) => {
                    game.apply(&event)?;
                    self.remember(&game).await;
                    return Ok(GameUpdate {
                        game,
                        events: vec![event],
                    });
                }
                Err(e) if e.kind == ErrorKind::Conflict && attempt < self.config.max_conflict_retries => {
                    attempt += 1;
                    warn!(game_id = %game_id, version, attempt, "Version conflict; re-reading from the event log");
                    game = self.rebuild(game_id).await?;
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Cache, then snapshot + replay.
    async fn load(&self, game_id: GameId) -> AppResult<Game> {
        match self.store.get_json::<Game>(&keys::game(game_id)).await {
            Ok(Some(game)) => return Ok(game),
            Ok(None) => {}
            Err(e) if e.kind == ErrorKind::Serialization => {
                warn!(game_id = %game_id, error = %e, "Discarding unreadable cached game");
            }
            Err(e) => return Err(e),
        }
        let game = self.rebuild(game_id).await?;
        self.cache(&game).await;
        Ok(game)
    }

    /// Rebuild from the latest snapshot and the events after it, or from
    /// the full log when no snapshot exists.
    async fn rebuild(&self, game_id: GameId) -> AppResult<Game> {
        let aggregate_id = game_id.to_string();
        let snapshot = match self.broker.get_snapshot(&aggregate_id).await? {
            Some(snapshot) => match snapshot.state_as::<Game>() {
                Ok(game) => Some(game),
                Err(e) => {
                    warn!(game_id = %game_id, version = snapshot.version, error = %e, "Ignoring unreadable snapshot");
                    None
                }
            },
            None => None,
        };

        let game = match snapshot {
            Some(mut game) => {
                for event in self.broker.replay(&aggregate_id, game.version).await? {
                    game.apply(&event)?;
                }
                game
            }
            None => {
                let events = self.broker.replay(&aggregate_id, 0).await?;
                Game::replay(&events)?
                    .ok_or_else(|| AppError::not_found(format!("Game {game_id} not found")))?
            }
        };
        debug!(game_id = %game_id, version = game.version, "Game rebuilt from event log");
        Ok(game)
    }

    /// Cache and snapshot after a successful write. Both are best-effort:
    /// the event log already holds the truth.
    async fn remember(&self, game: &Game) {
        self.last_known.insert(game.id, game.clone()).await;
        self.cache(game).await;
        if game.version % self.snapshot_every == 0 {
            if let Err(e) = self
                .broker
                .snapshot(&game.id.to_string(), game.version, game)
                .await
            {
                warn!(game_id = %game.id, version = game.version, error = %e, "Snapshot failed");
            }
        }
    }

    async fn cache(&self, game: &Game) {
        let ttl = Duration::from_secs(self.config.cache_ttl_seconds);
        if let Err(e) = self.store.set_json(&keys::game(game.id), game, Some(ttl)).await {
            warn!(game_id = %game.id, error = %e, "Failed to cache game");
        }
    }
}

fn overrides(ctx: &MutationContext, version: u64) -> MetadataOverrides {
    MetadataOverrides {
        version: Some(version),
        identity_id: ctx.identity_id.clone(),
        session_id: ctx.session_id,
        correlation_id: ctx.correlation_id,
        causation_id: None,
    }
}
