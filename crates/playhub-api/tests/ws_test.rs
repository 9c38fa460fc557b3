//! Integration tests for the WebSocket transport over a live listener.

mod helpers;

use std::net::SocketAddr;
use std::time::Duration;

use axum::http::StatusCode;
use futures::{SinkExt, StreamExt};
use serde_json::{Value, json};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};

use helpers::TestApp;

type Client = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Serve the app on an ephemeral port.
async fn serve(app: &TestApp) -> SocketAddr {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("Failed to bind");
    let addr = listener.local_addr().expect("local addr");
    let router = app.router.clone();
    tokio::spawn(async move {
        let _ = axum::serve(
            listener,
            router.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .await;
    });
    addr
}

async fn open(addr: SocketAddr, query: &str) -> Client {
    let (client, _) = connect_async(format!("ws://{addr}/ws?{query}"))
        .await
        .expect("Failed to connect");
    client
}

async fn send(client: &mut Client, message: Value) {
    client
        .send(Message::Text(message.to_string().into()))
        .await
        .expect("Failed to send");
}

/// Read frames until a message of `kind` arrives, unwrapping batches.
async fn next_of(client: &mut Client, kind: &str) -> Value {
    let read = async {
        while let Some(frame) = client.next().await {
            let frame = frame.expect("socket error");
            let Ok(text) = frame.to_text() else {
                continue;
            };
            let Ok(value) = serde_json::from_str::<Value>(text) else {
                continue;
            };
            if let Some(found) = helpers::flatten(&[value])
                .into_iter()
                .find(|m| m["type"] == kind)
            {
                return found;
            }
        }
        panic!("socket closed before {kind}");
    };
    tokio::time::timeout(Duration::from_secs(5), read)
        .await
        .unwrap_or_else(|_| panic!("timed out waiting for {kind}"))
}

#[tokio::test]
async fn test_ws_upgrade_without_token() {
    let app = TestApp::new().await;

    let response = app.request("GET", "/ws", None, None).await;

    assert!(
        response.status == StatusCode::UNAUTHORIZED
            || response.status == StatusCode::BAD_REQUEST
            || response.status == StatusCode::UPGRADE_REQUIRED,
        "Expected 401, 400, or 426, got {}",
        response.status
    );
}

#[tokio::test]
async fn test_ws_handshake_and_ping() {
    let app = TestApp::new().await;
    let addr = serve(&app).await;
    let token = app.token("alice");

    let mut client = open(addr, &format!("token={token}")).await;
    let connected = next_of(&mut client, "connected").await;
    assert_eq!(connected["identity_id"], "alice");
    assert_eq!(connected["recovered"], false);

    send(&mut client, json!({ "type": "ping", "timestamp": 0 })).await;
    let pong = next_of(&mut client, "pong").await;
    assert_eq!(pong["timestamp"], 0);
    assert!(pong["quality"].as_u64().is_some());
}

#[tokio::test]
async fn test_ws_malformed_frame_gets_error() {
    let app = TestApp::new().await;
    let addr = serve(&app).await;
    let token = app.token("alice");

    let mut client = open(addr, &format!("token={token}")).await;
    next_of(&mut client, "connected").await;

    client
        .send(Message::Text("{not json".into()))
        .await
        .expect("send");
    let error = next_of(&mut client, "error").await;
    assert_eq!(error["code"], "VALIDATION");

    // The connection survives a bad frame.
    send(&mut client, json!({ "type": "ping", "timestamp": 1 })).await;
    next_of(&mut client, "pong").await;
}

#[tokio::test]
async fn test_ws_game_broadcast_between_players() {
    let app = TestApp::new().await;
    let addr = serve(&app).await;
    let alice_token = app.token("alice");
    let bob_token = app.token("bob");
    let game_id = app.create_game(&alice_token, 4).await;

    let mut alice = open(addr, &format!("token={alice_token}")).await;
    next_of(&mut alice, "connected").await;
    let mut bob = open(addr, &format!("token={bob_token}")).await;
    next_of(&mut bob, "connected").await;

    send(&mut alice, json!({ "type": "join_game", "game_id": game_id })).await;
    next_of(&mut alice, "game_state").await;
    send(&mut bob, json!({ "type": "join_game", "game_id": game_id })).await;
    let state = next_of(&mut bob, "game_state").await;
    assert_eq!(state["game"]["players"].as_array().map(Vec::len), Some(2));

    let joined = next_of(&mut alice, "game_event").await;
    assert_eq!(joined["game_id"], game_id.as_str());
}

#[tokio::test]
async fn test_ws_session_recovery() {
    let app = TestApp::new().await;
    let addr = serve(&app).await;
    let token = app.token("alice");
    let game_id = app.create_game(&token, 4).await;

    let mut first = open(addr, &format!("token={token}")).await;
    let connected = next_of(&mut first, "connected").await;
    let session_id = connected["session_id"]
        .as_str()
        .expect("session id")
        .to_string();
    send(&mut first, json!({ "type": "subscribe", "channel": "room:lobby" })).await;
    next_of(&mut first, "subscribed").await;
    send(&mut first, json!({ "type": "join_game", "game_id": game_id })).await;
    next_of(&mut first, "game_state").await;

    first.close(None).await.expect("close");
    drop(first);

    // Teardown happens once the server reads the close frame. Attempts
    // stay under the default per-address connection limit.
    let mut recovered = None;
    for _ in 0..5 {
        tokio::time::sleep(Duration::from_millis(200)).await;
        let mut client = open(addr, &format!("token={token}&session_id={session_id}")).await;
        let connected = next_of(&mut client, "connected").await;
        if connected["recovered"] == true {
            assert_eq!(connected["session_id"], session_id.as_str());
            recovered = Some(client);
            break;
        }
    }
    let mut client = recovered.expect("session was not recovered");

    let state = next_of(&mut client, "game_state").await;
    assert_eq!(state["game"]["id"], game_id.as_str());
}
