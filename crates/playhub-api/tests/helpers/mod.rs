//! Shared test helpers for API integration tests.

#![allow(dead_code)]

use std::time::{SystemTime, UNIX_EPOCH};

use axum::Router;
use axum::body::Body;
use axum::http::{Request, StatusCode};
use jsonwebtoken::{EncodingKey, Header};
use serde_json::{Value, json};
use tower::ServiceExt;

use playhub_api::{AppState, build_router, build_state};
use playhub_core::config::AppConfig;

/// Test application context
pub struct TestApp {
    /// The Axum router for making test requests
    pub router: Router,
    /// Shared state, for shutdown and direct inspection
    pub state: AppState,
    /// Application config
    pub config: AppConfig,
}

impl TestApp {
    /// Create a new test application on the in-memory stack
    pub async fn new() -> Self {
        let mut config = AppConfig::default();
        config.node.id = "test-node".to_string();
        config.realtime.batch_interval_ms = 5;
        Self::with_config(config).await
    }

    /// Create a test application from an explicit config
    pub async fn with_config(config: AppConfig) -> Self {
        let state = build_state(config.clone())
            .await
            .expect("Failed to build state");
        let router = build_router(state.clone());
        Self {
            router,
            state,
            config,
        }
    }

    /// Sign a token for `sub` with the configured secret
    pub fn token(&self, sub: &str) -> String {
        let exp = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("clock before epoch")
            .as_secs()
            + 3600;
        jsonwebtoken::encode(
            &Header::default(),
            &json!({ "sub": sub, "name": sub.to_uppercase(), "exp": exp }),
            &EncodingKey::from_secret(self.config.auth.jwt_secret.as_bytes()),
        )
        .expect("Failed to sign token")
    }

    /// Make an HTTP request to the test app
    pub async fn request(
        &self,
        method: &str,
        path: &str,
        body: Option<Value>,
        token: Option<&str>,
    ) -> TestResponse {
        let body_str = body
            .map(|b| serde_json::to_string(&b).expect("Failed to serialize body"))
            .unwrap_or_default();

        let mut req = Request::builder()
            .method(method)
            .uri(path)
            .header("Content-Type", "application/json");

        if let Some(token) = token {
            req = req.header("Authorization", format!("Bearer {}", token));
        }

        let req = req
            .body(Body::from(body_str))
            .expect("Failed to build request");

        let response = self
            .router
            .clone()
            .oneshot(req)
            .await
            .expect("Failed to send request");

        let status = response.status();
        let retry_after = response
            .headers()
            .get("retry-after")
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let body_bytes = axum::body::to_bytes(response.into_body(), 1024 * 1024)
            .await
            .expect("Failed to read body");

        let body: Value = serde_json::from_slice(&body_bytes).unwrap_or(Value::Null);

        TestResponse {
            status,
            body,
            retry_after,
        }
    }

    /// Create a race game as `host` and return its id
    pub async fn create_game(&self, token: &str, max_players: usize) -> String {
        let response = self
            .request(
                "POST",
                "/games",
                Some(json!({ "kind": "race", "max_players": max_players, "total_rounds": 3 })),
                Some(token),
            )
            .await;
        assert_eq!(
            response.status,
            StatusCode::CREATED,
            "Create failed: {:?}",
            response.body
        );
        response.body["data"]["id"]
            .as_str()
            .expect("No game id in response")
            .to_string()
    }
}

/// Response from a test request
#[derive(Debug)]
pub struct TestResponse {
    /// HTTP status code
    pub status: StatusCode,
    /// Parsed JSON body
    pub body: Value,
    /// `Retry-After` header, if any
    pub retry_after: Option<String>,
}

/// Flatten `batch` envelopes into their inner messages.
pub fn flatten(messages: &[Value]) -> Vec<Value> {
    let mut out = Vec::new();
    for message in messages {
        if message["type"] == "batch" {
            if let Some(inner) = message["messages"].as_array() {
                out.extend(flatten(inner));
            }
        } else {
            out.push(message.clone());
        }
    }
    out
}
