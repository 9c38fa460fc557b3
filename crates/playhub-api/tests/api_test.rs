//! Integration tests for the JSON endpoints: health, metrics, games and
//! history.

mod helpers;

use axum::http::StatusCode;
use serde_json::json;

use playhub_core::config::RateLimitRule;

#[tokio::test]
async fn test_health_check() {
    let app = helpers::TestApp::new().await;

    let response = app.request("GET", "/health", None, None).await;

    assert_eq!(response.status, StatusCode::OK);
    assert_eq!(response.body["data"]["status"], "ok");
}

#[tokio::test]
async fn test_readiness_on_memory_stack() {
    let app = helpers::TestApp::new().await;

    let response = app.request("GET", "/health/ready", None, None).await;

    assert_eq!(response.status, StatusCode::OK);
    assert_eq!(response.body["status"], "healthy");
    assert_eq!(response.body["checks"]["store"], true);
    assert_eq!(response.body["checks"]["transport"], true);
    assert_eq!(response.body["connections"], 0);
}

#[tokio::test]
async fn test_metrics_include_registry_stats() {
    let app = helpers::TestApp::new().await;

    let response = app.request("GET", "/metrics", None, None).await;

    assert_eq!(response.status, StatusCode::OK);
    assert_eq!(response.body["data"]["connections_active"], 0);
    assert_eq!(response.body["data"]["registry"]["total"], 0);
}

#[tokio::test]
async fn test_games_require_token() {
    let app = helpers::TestApp::new().await;

    let response = app
        .request("POST", "/games", Some(json!({ "kind": "race" })), None)
        .await;
    assert_eq!(response.status, StatusCode::UNAUTHORIZED);
    assert_eq!(response.body["error"], "AUTHENTICATION");

    let response = app
        .request("POST", "/games", Some(json!({ "kind": "race" })), Some("not-a-jwt"))
        .await;
    assert_eq!(response.status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_create_and_get_game() {
    let app = helpers::TestApp::new().await;
    let token = app.token("host");

    let id = app.create_game(&token, 4).await;

    let response = app
        .request("GET", &format!("/games/{id}"), None, Some(&token))
        .await;
    assert_eq!(response.status, StatusCode::OK);
    let game = &response.body["data"];
    assert_eq!(game["kind"], "race");
    assert_eq!(game["status"], "waiting");
    assert_eq!(game["max_players"], 4);
    assert_eq!(game["total_rounds"], 3);
    assert_eq!(game["players"].as_array().map(Vec::len), Some(0));
}

#[tokio::test]
async fn test_unknown_game_is_not_found() {
    let app = helpers::TestApp::new().await;
    let token = app.token("host");

    let response = app
        .request(
            "GET",
            "/games/7d3b1c52-4a51-4f4e-9c57-0a8f3d9b2e11",
            None,
            Some(&token),
        )
        .await;
    assert_eq!(response.status, StatusCode::NOT_FOUND);
    assert_eq!(response.body["error"], "NOT_FOUND");
}

#[tokio::test]
async fn test_invalid_game_request_is_rejected() {
    let app = helpers::TestApp::new().await;
    let token = app.token("host");

    let response = app
        .request(
            "POST",
            "/games",
            Some(json!({ "kind": "race", "max_players": 1 })),
            Some(&token),
        )
        .await;
    assert_eq!(response.status, StatusCode::BAD_REQUEST);
    assert_eq!(response.body["error"], "VALIDATION");
}

#[tokio::test]
async fn test_direct_message_history_is_private() {
    let app = helpers::TestApp::new().await;
    let token = app.token("alice");

    let own = app
        .request("GET", "/history/user/alice", None, Some(&token))
        .await;
    assert_eq!(own.status, StatusCode::OK);
    assert_eq!(own.body["data"], json!([]));

    let other = app
        .request("GET", "/history/user/bob", None, Some(&token))
        .await;
    assert_eq!(other.status, StatusCode::FORBIDDEN);
    assert!(other.retry_after.is_none());
}

#[tokio::test]
async fn test_connection_rate_limit_sets_retry_after() {
    let mut config = playhub_core::config::AppConfig::default();
    config
        .rate_limit
        .rules
        .insert("connection".into(), RateLimitRule::new(1, 60_000));
    let app = helpers::TestApp::with_config(config).await;
    let token = app.token("alice");

    let first = app
        .request("POST", "/fallback/poll/connect", None, Some(&token))
        .await;
    assert_eq!(first.status, StatusCode::CREATED);

    let second = app
        .request("POST", "/fallback/poll/connect", None, Some(&token))
        .await;
    assert_eq!(second.status, StatusCode::TOO_MANY_REQUESTS);
    assert_eq!(second.body["error"], "RATE_LIMITED");
    let retry: u64 = second
        .retry_after
        .as_deref()
        .and_then(|v| v.parse().ok())
        .expect("Retry-After header");
    assert!((1..=60).contains(&retry));
}
