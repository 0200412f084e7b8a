#![allow(dead_code)]

use axum::Router;
use axum::body::Body;
use axum::http::{Request, StatusCode};
use keeper_broker::AppState;
use keeper_broker::config::{BlobBackend, KeeperConfig, PasswordConfig};
use serde_json::Value;
use tower::ServiceExt;

pub const SIGNING_KEY: &str = "integration-signing-key";
pub const DATA_KEY_HEX: &str = "000102030405060708090a0b0c0d0e0f101112131415161718191a1b1c1d1e1f";

/// Memory-backed configuration with cheap password hashing.
pub fn config() -> KeeperConfig {
    let mut config = KeeperConfig::default();
    config.security.signing_key = SIGNING_KEY.into();
    config.security.data_encryption_key = DATA_KEY_HEX.into();
    config.security.token_ttl_secs = 600;
    config.security.password = PasswordConfig {
        memory_kib: 8,
        iterations: 1,
        parallelism: 1,
    };
    config.blob.backend = BlobBackend::Memory;
    config
}

pub async fn state_with(config: &KeeperConfig) -> AppState {
    keeper_broker::build_state(config).await.expect("state")
}

pub async fn app() -> (Router, AppState) {
    let state = state_with(&config()).await;
    (keeper_broker::http::router(state.clone()), state)
}

pub fn post_json(path: &str, body: &Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(path)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

pub async fn send(app: &Router, request: Request<Body>) -> (StatusCode, Value) {
    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let body = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap_or_else(|_| {
            Value::String(String::from_utf8_lossy(&bytes).into_owned())
        })
    };
    (status, body)
}

pub async fn call(app: &Router, path: &str, body: Value) -> (StatusCode, Value) {
    send(app, post_json(path, &body)).await
}

/// Registers `login` and returns its session token.
pub async fn register(app: &Router, login: &str) -> String {
    let (status, body) = call(
        app,
        "/v1/auth/register",
        serde_json::json!({ "login": login, "password": "s3cret-pass" }),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED, "register failed: {body}");
    body["token"].as_str().expect("token").to_string()
}

pub fn in_one_hour() -> String {
    let at = time::OffsetDateTime::now_utc() + time::Duration::hours(1);
    at.format(&time::format_description::well_known::Rfc3339)
        .unwrap()
}
