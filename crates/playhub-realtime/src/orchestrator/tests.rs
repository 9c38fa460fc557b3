use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;

use playhub_core::config::{FallbackConfig, GameConfig, RateLimitConfig, RateLimitRule, RealtimeConfig};
use playhub_core::error::ErrorKind;
use playhub_core::result::AppResult;
use playhub_core::traits::identity::{Identity, IdentityVerifier};
use playhub_core::types::{Difficulty, GameAction, GameId, GameKind, PlayerStatus};
use playhub_events::transport::MemoryTransport;
use playhub_events::EventBroker;
use playhub_game::{GameCoordinator, MutationContext, NewGame};
use playhub_store::StoreManager;

use super::*;
use crate::connection::ConnectionLifecycleEvent;
use crate::message::ClientMessage;
use crate::rate_limit::RateLimitAction;

/// Accepts any token except "bad"; the token is the identity id.
#[derive(Debug)]
struct TokenIsIdentity;

#[async_trait]
impl IdentityVerifier for TokenIsIdentity {
    async fn verify(&self, token: &str) -> AppResult<Option<Identity>> {
        if token == "bad" {
            return Ok(None);
        }
        Ok(Some(Identity::new(token, token.to_uppercase())))
    }
}

struct Harness {
    orchestrator: ConnectionOrchestrator,
    deliveries: mpsc::UnboundedReceiver<Delivery>,
}

impl Harness {
    fn new(config: RealtimeConfig) -> Self {
        let store = Arc::new(StoreManager::memory());
        let broker = Arc::new(EventBroker::new(
            "test-node",
            Arc::clone(&store),
            Arc::new(MemoryTransport::new(64)),
            1000,
        ));
        let coordinator = Arc::new(GameCoordinator::new(
            broker,
            Arc::clone(&store),
            GameConfig::default(),
            10,
        ));
        let deps = OrchestratorDeps {
            registry: Arc::new(ConnectionRegistry::new(Arc::clone(&store), &config)),
            limiter: Arc::new(RateLimiter::new(Arc::clone(&store), &RateLimitConfig::default())),
            verifier: Arc::new(TokenIsIdentity),
            coordinator,
            history: MessageHistory::new(Arc::clone(&store), &config),
            fallback: Arc::new(FallbackService::new(FallbackConfig::default())),
        };
        let (orchestrator, deliveries) = ConnectionOrchestrator::new(config, deps);
        Self {
            orchestrator,
            deliveries,
        }
    }

    async fn connect(&self, token: &str) -> Accepted {
        let identity = self
            .orchestrator
            .admit(Some(token), "127.0.0.1")
            .await
            .unwrap();
        self.orchestrator
            .connect(identity, None, Some("127.0.0.1".into()))
            .await
            .unwrap()
    }

    /// Flush the batcher and deliver everything it emitted.
    fn pump(&mut self) {
        self.orchestrator.flush();
        while let Ok(delivery) = self.deliveries.try_recv() {
            self.orchestrator
                .deliver_local(&delivery.channel, &delivery.message);
        }
    }

    async fn send(&self, accepted: &Accepted, message: serde_json::Value) {
        self.orchestrator
            .handle_inbound(accepted.handle.id, &message.to_string())
            .await;
    }

    async fn create_game(&self, max_players: usize) -> GameId {
        self.orchestrator
            .coordinator()
            .create(
                NewGame {
                    kind: GameKind::Race,
                    max_players: Some(max_players),
                    difficulty: Difficulty::Easy,
                    total_rounds: Some(3),
                    params: Default::default(),
                },
                &MutationContext::identity("host"),
            )
            .await
            .unwrap()
            .id
    }
}

/// Everything queued for a socket, with batches unpacked.
fn drain(rx: &mut mpsc::Receiver<ServerMessage>) -> Vec<ServerMessage> {
    let mut out = Vec::new();
    while let Ok(message) = rx.try_recv() {
        match message {
            ServerMessage::Batch { messages, .. } => out.extend(messages),
            other => out.push(other),
        }
    }
    out
}

fn game_events(messages: &[ServerMessage]) -> Vec<String> {
    messages
        .iter()
        .filter_map(|m| match m {
            ServerMessage::GameEvent { event_type, .. } => Some(event_type.clone()),
            _ => None,
        })
        .collect()
}

#[tokio::test]
async fn test_handshake_registers_and_greets() {
    let h = Harness::new(RealtimeConfig::default());
    let mut alice = h.connect("alice").await;

    assert_eq!(alice.record.identity_id, "alice");
    assert!(!alice.recovered);
    assert!(alice.record.subscriptions.contains("user:alice"));

    let messages = drain(&mut alice.receiver);
    assert!(matches!(
        &messages[0],
        ServerMessage::Connected { identity_id, recovered: false, .. } if identity_id == "alice"
    ));
    assert_eq!(h.orchestrator.socket_count(), 1);
    assert_eq!(h.orchestrator.metrics().connections_total, 1);
}

#[tokio::test]
async fn test_handshake_rejects_bad_token() {
    let h = Harness::new(RealtimeConfig::default());
    let err = h
        .orchestrator
        .admit(Some("bad"), "127.0.0.1")
        .await
        .unwrap_err();
    assert_eq!(err.kind, ErrorKind::Authentication);

    let err = h.orchestrator.admit(None, "127.0.0.1").await.unwrap_err();
    assert_eq!(err.kind, ErrorKind::Authentication);
    assert_eq!(h.orchestrator.metrics().connections_rejected, 2);
    assert_eq!(h.orchestrator.registry().len(), 0);
}

#[tokio::test]
async fn test_handshake_rate_limited_per_address() {
    let h = Harness::new(RealtimeConfig::default());
    h.orchestrator
        .limiter()
        .set_rule(RateLimitAction::Connection, RateLimitRule::new(1, 60_000));

    h.orchestrator.admit(Some("alice"), "10.0.0.1").await.unwrap();
    let err = h
        .orchestrator
        .admit(Some("alice"), "10.0.0.1")
        .await
        .unwrap_err();
    assert_eq!(err.kind, ErrorKind::RateLimited);
    assert!(err.retry_after_secs.is_some());

    h.orchestrator.admit(Some("alice"), "10.0.0.2").await.unwrap();
}

#[tokio::test]
async fn test_join_and_action_broadcast_to_game_channel() {
    let mut h = Harness::new(RealtimeConfig::default());
    let game_id = h.create_game(2).await;
    let mut alice = h.connect("alice").await;
    let mut bob = h.connect("bob").await;

    h.send(&alice, serde_json::json!({ "type": "join_game", "game_id": game_id }))
        .await;
    h.send(&bob, serde_json::json!({ "type": "join_game", "game_id": game_id }))
        .await;
    h.pump();
    drain(&mut alice.receiver);
    let bob_messages = drain(&mut bob.receiver);
    assert!(bob_messages
        .iter()
        .any(|m| matches!(m, ServerMessage::GameState { game } if game.id == game_id)));

    h.send(
        &alice,
        serde_json::json!({
            "type": "game_action",
            "game_id": game_id,
            "action": { "type": "move", "distance": 3 }
        }),
    )
    .await;
    h.pump();

    let bob_events = game_events(&drain(&mut bob.receiver));
    assert_eq!(bob_events, vec!["game.action_applied".to_string()]);
    let alice_events = game_events(&drain(&mut alice.receiver));
    assert_eq!(alice_events, vec!["game.action_applied".to_string()]);

    let record = h
        .orchestrator
        .registry()
        .get(alice.handle.id)
        .await
        .unwrap();
    assert_eq!(record.game_id, Some(game_id));
}

#[tokio::test]
async fn test_invalid_input_answers_with_error() {
    let h = Harness::new(RealtimeConfig::default());
    let mut alice = h.connect("alice").await;
    drain(&mut alice.receiver);

    h.orchestrator
        .handle_inbound(alice.handle.id, "{not json")
        .await;
    h.send(&alice, serde_json::json!({ "type": "leave_game" }))
        .await;

    let messages = drain(&mut alice.receiver);
    assert_eq!(messages.len(), 2);
    assert!(messages
        .iter()
        .all(|m| matches!(m, ServerMessage::Error { code, .. } if code == "VALIDATION")));
    assert_eq!(h.orchestrator.socket_count(), 1);
}

#[tokio::test]
async fn test_chat_requires_subscription_and_is_recorded() {
    let mut h = Harness::new(RealtimeConfig::default());
    let mut alice = h.connect("alice").await;
    let mut bob = h.connect("bob").await;

    h.send(&alice, serde_json::json!({ "type": "send_message", "channel": "room:lobby", "text": "hi" }))
        .await;
    assert!(matches!(
        drain(&mut alice.receiver).last(),
        Some(ServerMessage::Error { .. })
    ));

    for accepted in [&alice, &bob] {
        h.send(accepted, serde_json::json!({ "type": "subscribe", "channel": "room:lobby" }))
            .await;
    }
    h.send(&alice, serde_json::json!({ "type": "send_message", "channel": "room:lobby", "text": "hi" }))
        .await;
    h.pump();

    let chats: Vec<_> = drain(&mut bob.receiver)
        .into_iter()
        .filter_map(|m| match m {
            ServerMessage::Chat(chat) => Some(chat),
            _ => None,
        })
        .collect();
    assert_eq!(chats.len(), 1);
    assert_eq!(chats[0].identity_id, "alice");
    assert_eq!(chats[0].text, "hi");

    let history = h
        .orchestrator
        .history()
        .history("room", "lobby", 10)
        .await
        .unwrap();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].display_name, "ALICE");
}

#[tokio::test]
async fn test_direct_message_reaches_user_channel() {
    let mut h = Harness::new(RealtimeConfig::default());
    let alice = h.connect("alice").await;
    let mut bob = h.connect("bob").await;
    drain(&mut bob.receiver);

    h.send(&alice, serde_json::json!({ "type": "send_message", "channel": "user:bob", "text": "psst" }))
        .await;
    h.pump();
    assert!(drain(&mut bob.receiver)
        .iter()
        .any(|m| matches!(m, ServerMessage::Chat(chat) if chat.text == "psst")));
}

#[tokio::test]
async fn test_subscribe_rules() {
    let config = RealtimeConfig {
        max_subscriptions_per_connection: 2,
        ..Default::default()
    };
    let h = Harness::new(config);
    let mut alice = h.connect("alice").await;
    drain(&mut alice.receiver);

    h.send(&alice, serde_json::json!({ "type": "subscribe", "channel": "user:bob" }))
        .await;
    assert!(matches!(
        drain(&mut alice.receiver).as_slice(),
        [ServerMessage::Error { .. }]
    ));

    h.send(&alice, serde_json::json!({ "type": "subscribe", "channel": "room:one" }))
        .await;
    h.send(&alice, serde_json::json!({ "type": "subscribe", "channel": "room:two" }))
        .await;
    let messages = drain(&mut alice.receiver);
    assert!(matches!(&messages[0], ServerMessage::Subscribed { channel } if channel == "room:one"));
    assert!(matches!(&messages[1], ServerMessage::Error { .. }));

    h.send(&alice, serde_json::json!({ "type": "unsubscribe", "channel": "room:one" }))
        .await;
    assert!(matches!(
        drain(&mut alice.receiver).as_slice(),
        [ServerMessage::Unsubscribed { .. }]
    ));
}

#[tokio::test]
async fn test_ping_replies_with_quality() {
    let h = Harness::new(RealtimeConfig::default());
    let mut alice = h.connect("alice").await;
    drain(&mut alice.receiver);

    let sent = chrono::Utc::now().timestamp_millis();
    h.send(&alice, serde_json::json!({ "type": "ping", "timestamp": sent }))
        .await;
    match drain(&mut alice.receiver).as_slice() {
        [ServerMessage::Pong {
            timestamp, quality, ..
        }] => {
            assert_eq!(*timestamp, sent);
            assert!(*quality > 0);
        }
        other => panic!("unexpected reply: {other:?}"),
    }
}

#[tokio::test]
async fn test_ping_with_extreme_timestamps_still_answers() {
    let h = Harness::new(RealtimeConfig::default());
    let mut alice = h.connect("alice").await;
    drain(&mut alice.receiver);

    for timestamp in [i64::MIN, i64::MAX, -1] {
        h.send(&alice, serde_json::json!({ "type": "ping", "timestamp": timestamp }))
            .await;
        match drain(&mut alice.receiver).as_slice() {
            [ServerMessage::Pong {
                timestamp: echoed,
                latency_ms,
                ..
            }] => {
                assert_eq!(*echoed, timestamp);
                assert!(latency_ms.is_finite() && *latency_ms >= 0.0);
            }
            other => panic!("unexpected reply: {other:?}"),
        }
    }
}

#[tokio::test]
async fn test_completed_game_events_reach_players_before_release() {
    let mut h = Harness::new(RealtimeConfig::default());
    let game_id = h.create_game(2).await;
    let mut alice = h.connect("alice").await;
    let mut bob = h.connect("bob").await;
    for who in [&alice, &bob] {
        h.send(who, serde_json::json!({ "type": "join_game", "game_id": game_id }))
            .await;
    }
    h.pump();
    drain(&mut alice.receiver);
    drain(&mut bob.receiver);

    // The game completes after three rounds; the completion watcher may run
    // before the batcher flushes the final events.
    for _ in 0..3 {
        h.send(&alice, serde_json::json!({
            "type": "game_action",
            "game_id": game_id,
            "action": { "type": "advance_round" }
        }))
        .await;
    }
    h.orchestrator.clear_game(game_id).await;
    h.pump();

    let bob_events = game_events(&drain(&mut bob.receiver));
    assert_eq!(bob_events.last().map(String::as_str), Some("game.completed"));
    let record = h.orchestrator.registry().get(bob.handle.id).await.unwrap();
    assert_eq!(record.game_id, None);

    // Joining the next game releases the finished game's channel.
    let next = h.create_game(2).await;
    h.send(&bob, serde_json::json!({ "type": "join_game", "game_id": next }))
        .await;
    let record = h.orchestrator.registry().get(bob.handle.id).await.unwrap();
    assert_eq!(record.game_id, Some(next));
    assert!(!record.subscriptions.contains(&format!("game:{game_id}")));
    assert!(record.subscriptions.contains(&format!("game:{next}")));
}

#[tokio::test]
async fn test_disconnect_is_idempotent_and_announces_offline() {
    let mut h = Harness::new(RealtimeConfig::default());
    let mut watcher = h.connect("watcher").await;
    h.send(&watcher, serde_json::json!({ "type": "subscribe", "channel": "presence:global" }))
        .await;
    let alice = h.connect("alice").await;
    h.pump();
    drain(&mut watcher.receiver);

    h.orchestrator.disconnect(alice.handle.id).await;
    h.orchestrator.disconnect(alice.handle.id).await;
    h.pump();

    let offline: Vec<_> = drain(&mut watcher.receiver)
        .into_iter()
        .filter(|m| {
            matches!(m, ServerMessage::Presence { identity_id, state: PresenceState::Offline, .. } if identity_id == "alice")
        })
        .collect();
    assert_eq!(offline.len(), 1);
    assert!(!alice.handle.is_alive());
    assert_eq!(h.orchestrator.socket_count(), 1);
}

#[tokio::test]
async fn test_disconnect_passes_through_reconnecting() {
    let mut h = Harness::new(RealtimeConfig::default());
    let game_id = h.create_game(4).await;
    let alice = h.connect("alice").await;
    h.send(&alice, serde_json::json!({ "type": "join_game", "game_id": game_id }))
        .await;
    let id = alice.handle.id;
    let mut lifecycle = h.orchestrator.registry().subscribe_lifecycle();

    h.orchestrator.disconnect(id).await;
    h.orchestrator.disconnect(id).await;

    let mut events = Vec::new();
    while let Ok(event) = lifecycle.try_recv() {
        events.push(event);
    }
    assert_eq!(events.len(), 2, "{events:?}");
    assert_eq!(
        events[0],
        ConnectionLifecycleEvent::StatusChanged {
            connection_id: id,
            from: ConnectionStatus::Connected,
            to: ConnectionStatus::Reconnecting,
        }
    );
    assert!(matches!(
        &events[1],
        ConnectionLifecycleEvent::Disconnected { connection_id, .. } if *connection_id == id
    ));

    let stats = h.orchestrator.registry().stats();
    assert_eq!(stats.total, 0);
    assert_eq!(stats.reconnecting, 0);
    let game = h.orchestrator.coordinator().get(game_id).await.unwrap();
    let seat = game.players.iter().find(|p| p.identity_id == "alice").unwrap();
    assert_eq!(seat.status, PlayerStatus::Disconnected);
}

#[tokio::test]
async fn test_reconnect_recovers_session_and_game() {
    let mut h = Harness::new(RealtimeConfig::default());
    let game_id = h.create_game(4).await;
    let alice = h.connect("alice").await;
    h.send(&alice, serde_json::json!({ "type": "subscribe", "channel": "room:lobby" }))
        .await;
    h.send(&alice, serde_json::json!({ "type": "join_game", "game_id": game_id }))
        .await;
    let session_id = alice.record.session_id;
    h.orchestrator.disconnect(alice.handle.id).await;
    h.pump();

    let identity = h.orchestrator.admit(Some("alice"), "127.0.0.1").await.unwrap();
    let mut again = h
        .orchestrator
        .connect(identity, Some(session_id), None)
        .await
        .unwrap();
    assert!(again.recovered);
    assert_eq!(again.record.session_id, session_id);
    assert_eq!(again.record.game_id, Some(game_id));
    assert!(again.record.subscriptions.contains("room:lobby"));

    let messages = drain(&mut again.receiver);
    assert!(matches!(&messages[0], ServerMessage::Connected { recovered: true, .. }));
    assert!(messages
        .iter()
        .any(|m| matches!(m, ServerMessage::GameState { game } if game.id == game_id)));

    // The recovery record is single use.
    assert!(h.orchestrator.registry().recover(session_id).await.is_none());
}

#[tokio::test]
async fn test_recovery_ignores_other_identity() {
    let h = Harness::new(RealtimeConfig::default());
    let alice = h.connect("alice").await;
    let session_id = alice.record.session_id;
    h.orchestrator.disconnect(alice.handle.id).await;

    let mallory = h.orchestrator.admit(Some("mallory"), "127.0.0.1").await.unwrap();
    let accepted = h
        .orchestrator
        .connect(mallory, Some(session_id), None)
        .await
        .unwrap();
    assert!(!accepted.recovered);
    assert_ne!(accepted.record.session_id, session_id);
}

#[tokio::test]
async fn test_long_poll_client_shares_dispatch() {
    let mut h = Harness::new(RealtimeConfig::default());
    let alice_identity = Identity::new("alice", "ALICE");
    let id = h
        .orchestrator
        .fallback_connect_long_poll(alice_identity.clone(), None, None)
        .await
        .unwrap();

    h.orchestrator
        .fallback_message(
            id,
            &alice_identity,
            ClientMessage::Subscribe {
                channel: "room:lobby".into(),
            },
        )
        .await
        .unwrap();

    let bob = h.connect("bob").await;
    h.send(&bob, serde_json::json!({ "type": "subscribe", "channel": "room:lobby" }))
        .await;
    h.send(&bob, serde_json::json!({ "type": "send_message", "channel": "room:lobby", "text": "yo" }))
        .await;
    h.pump();

    let messages = h
        .orchestrator
        .fallback_poll(id, &alice_identity, Some(Duration::from_millis(10)))
        .await
        .unwrap();
    let names: Vec<_> = messages.iter().map(|m| m.event_name()).collect();
    assert_eq!(names[0], "hello");
    assert!(names.contains(&"connected"));
    assert!(names.contains(&"subscribed"));
    assert!(messages
        .iter()
        .any(|m| matches!(m, ServerMessage::Chat(chat) if chat.text == "yo")));

    let err = h
        .orchestrator
        .fallback_poll(id, &Identity::new("bob", "BOB"), None)
        .await
        .unwrap_err();
    assert_eq!(err.kind, ErrorKind::Authentication);

    h.orchestrator
        .fallback_disconnect(id, &alice_identity)
        .await
        .unwrap();
    assert!(h.orchestrator.registry().get(id).await.is_none());
    assert_eq!(h.orchestrator.fallback().connection_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_sweep_removes_idle_connections() {
    let config = RealtimeConfig {
        inactivity_timeout_seconds: 30,
        ..Default::default()
    };
    let h = Harness::new(config);
    let idle = h.connect("idle").await;
    tokio::time::advance(Duration::from_secs(20)).await;
    let busy = h.connect("busy").await;
    tokio::time::advance(Duration::from_secs(15)).await;

    assert_eq!(h.orchestrator.sweep_inactive().await, 1);
    assert!(!idle.handle.is_alive());
    assert!(busy.handle.is_alive());
    assert_eq!(h.orchestrator.socket_count(), 1);
}
