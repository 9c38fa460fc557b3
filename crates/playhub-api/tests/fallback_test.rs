//! Integration tests for the long-poll fallback transport.

mod helpers;

use axum::http::StatusCode;
use serde_json::{Value, json};

use helpers::TestApp;

/// Open a long-poll connection and return its id.
async fn connect(app: &TestApp, token: &str) -> String {
    let response = app
        .request("POST", "/fallback/poll/connect", None, Some(token))
        .await;
    assert_eq!(
        response.status,
        StatusCode::CREATED,
        "Connect failed: {:?}",
        response.body
    );
    response.body["data"]["connection_id"]
        .as_str()
        .expect("No connection_id")
        .to_string()
}

/// Poll until a message of `kind` arrives or a few polls come back empty.
async fn poll_for(app: &TestApp, id: &str, token: &str, kind: &str) -> Option<Value> {
    for _ in 0..10 {
        let response = app
            .request(
                "GET",
                &format!("/fallback/poll/{id}?timeout_ms=500"),
                None,
                Some(token),
            )
            .await;
        assert_eq!(response.status, StatusCode::OK, "{:?}", response.body);
        let messages = response.body["data"]["messages"]
            .as_array()
            .cloned()
            .unwrap_or_default();
        if let Some(found) = helpers::flatten(&messages)
            .into_iter()
            .find(|m| m["type"] == kind)
        {
            return Some(found);
        }
    }
    None
}

#[tokio::test]
async fn test_long_poll_connect_greets() {
    let app = TestApp::new().await;
    let token = app.token("alice");
    let id = connect(&app, &token).await;

    let connected = poll_for(&app, &id, &token, "connected")
        .await
        .expect("connected message");
    assert_eq!(connected["connection_id"], id.as_str());
    assert_eq!(connected["identity_id"], "alice");
    assert_eq!(connected["recovered"], false);
}

#[tokio::test]
async fn test_long_poll_chat_round_trip() {
    let app = TestApp::new().await;
    let token = app.token("alice");
    let id = connect(&app, &token).await;

    let response = app
        .request(
            "POST",
            &format!("/fallback/{id}/subscribe"),
            Some(json!({ "channel": "room:lobby" })),
            Some(&token),
        )
        .await;
    assert_eq!(response.status, StatusCode::ACCEPTED);

    let response = app
        .request(
            "POST",
            &format!("/fallback/{id}/action"),
            Some(json!({ "type": "send_message", "channel": "room:lobby", "text": "hello" })),
            Some(&token),
        )
        .await;
    assert_eq!(response.status, StatusCode::ACCEPTED);

    let chat = poll_for(&app, &id, &token, "chat")
        .await
        .expect("chat delivery");
    assert_eq!(chat["text"], "hello");
    assert_eq!(chat["display_name"], "ALICE");

    let history = app
        .request("GET", "/history/room/lobby", None, Some(&token))
        .await;
    assert_eq!(history.status, StatusCode::OK);
    assert_eq!(history.body["data"][0]["text"], "hello");
}

#[tokio::test]
async fn test_long_poll_join_game() {
    let app = TestApp::new().await;
    let token = app.token("alice");
    let game_id = app.create_game(&token, 4).await;
    let id = connect(&app, &token).await;

    let response = app
        .request(
            "POST",
            &format!("/fallback/{id}/join"),
            Some(json!({ "game_id": game_id })),
            Some(&token),
        )
        .await;
    assert_eq!(response.status, StatusCode::ACCEPTED);

    let state = poll_for(&app, &id, &token, "game_state")
        .await
        .expect("game_state message");
    assert_eq!(state["game"]["id"], game_id.as_str());
    assert_eq!(state["game"]["players"][0]["identity_id"], "alice");
}

#[tokio::test]
async fn test_connection_belongs_to_its_identity() {
    let app = TestApp::new().await;
    let alice = app.token("alice");
    let bob = app.token("bob");
    let id = connect(&app, &alice).await;

    let response = app
        .request("GET", &format!("/fallback/poll/{id}?timeout_ms=10"), None, Some(&bob))
        .await;
    assert_eq!(response.status, StatusCode::UNAUTHORIZED);

    let response = app
        .request("DELETE", &format!("/fallback/{id}"), None, Some(&bob))
        .await;
    assert_eq!(response.status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_disconnect_removes_connection() {
    let app = TestApp::new().await;
    let token = app.token("alice");
    let id = connect(&app, &token).await;

    let response = app
        .request("DELETE", &format!("/fallback/{id}"), None, Some(&token))
        .await;
    assert_eq!(response.status, StatusCode::NO_CONTENT);

    let response = app
        .request("GET", &format!("/fallback/poll/{id}?timeout_ms=10"), None, Some(&token))
        .await;
    assert_eq!(response.status, StatusCode::NOT_FOUND);

    let metrics = app.request("GET", "/metrics", None, None).await;
    assert_eq!(metrics.body["data"]["fallback_connections"], 0);
}

#[tokio::test]
async fn test_invalid_action_is_rejected_synchronously() {
    let app = TestApp::new().await;
    let token = app.token("alice");
    let id = connect(&app, &token).await;

    let response = app
        .request(
            "POST",
            &format!("/fallback/{id}/subscribe"),
            Some(json!({ "channel": "user:bob" })),
            Some(&token),
        )
        .await;
    assert_eq!(response.status, StatusCode::BAD_REQUEST);
}
