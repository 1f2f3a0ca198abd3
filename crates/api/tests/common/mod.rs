//! Common test utilities for integration tests.
//!
//! Builds an in-process router around a scripted executor so the full
//! request path can be driven with `tower::ServiceExt::oneshot`.

// Not every helper is used by every test binary.
#![allow(dead_code)]

use axum::{
    body::Body,
    http::{Request, Response},
    Router,
};
use chrono::Utc;
use domain::services::WebhookExecutor;
use form_webhook_api::{
    app::{create_app, AppState},
    config::{
        Config, DeliveryConfig, LogFormat, LoggingConfig, RateLimitConfig, RetryConfig,
        SecurityConfig, ServerConfig,
    },
};
use serde_json::Value;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

pub const TEST_SECRET: &str = "test-secret";
pub const SIGNATURE_HEADER: &str = "x-webhook-signature";
pub const TIMESTAMP_HEADER: &str = "x-webhook-timestamp";
pub const WEBHOOK_PATH: &str = "/api/v1/webhooks/forms";

/// Configuration with fast retries, no inbound limit and no forwarding.
pub fn test_config() -> Config {
    Config {
        server: ServerConfig {
            host: "127.0.0.1".to_string(),
            port: 0,
            request_timeout_secs: 30,
            max_body_size: 1024 * 1024,
        },
        logging: LoggingConfig {
            level: "debug".to_string(),
            format: LogFormat::Pretty,
        },
        security: SecurityConfig {
            webhook_secret: TEST_SECRET.to_string(),
            signature_header: SIGNATURE_HEADER.to_string(),
            timestamp_header: TIMESTAMP_HEADER.to_string(),
            timestamp_tolerance_secs: 300,
            replay_ttl_floor_secs: 300,
            replay_cleanup_interval_secs: 60,
            inbound_rate_limit_per_minute: 0,
        },
        retry: RetryConfig {
            initial_retry_interval_secs: 1,
            max_retry_interval_secs: 60,
            exponential_backoff_multiplier: 2.0,
            jitter_percentage: 0.0,
            max_retry_duration_secs: 3600,
            max_total_attempts: 3,
            failure_rate_disable_threshold: 100.0,
            failure_rate_evaluation_window_secs: 3600,
            process_interval_secs: 30,
            record_retention_secs: 86_400,
            record_cleanup_interval_secs: 600,
        },
        rate_limit: RateLimitConfig {
            requests_per_second: 50.0,
        },
        delivery: DeliveryConfig::default(),
    }
}

/// Same as [`test_config`] but forwarding verified events to `url`.
pub fn forwarding_config(url: &str) -> Config {
    let mut config = test_config();
    config.delivery.forward_url = Some(url.to_string());
    config
}

pub fn test_state(config: Config, executor: Arc<dyn WebhookExecutor>) -> AppState {
    AppState::with_executor(config, executor).expect("Failed to build test state")
}

pub fn test_app(state: AppState) -> Router {
    create_app(state)
}

/// POST a body signed with [`TEST_SECRET`] and stamped with the current time.
pub fn signed_request(body: &str) -> Request<Body> {
    signed_request_at(body, Utc::now().timestamp())
}

/// POST a body signed with [`TEST_SECRET`] and the given epoch timestamp.
pub fn signed_request_at(body: &str, timestamp: i64) -> Request<Body> {
    let signature = shared::crypto::sign_payload(TEST_SECRET, body.as_bytes())
        .expect("Failed to sign payload");
    Request::builder()
        .method("POST")
        .uri(WEBHOOK_PATH)
        .header("Content-Type", "application/json")
        .header(SIGNATURE_HEADER, signature)
        .header(TIMESTAMP_HEADER, timestamp.to_string())
        .body(Body::from(body.to_string()))
        .unwrap()
}

/// POST with an arbitrary signature header value.
pub fn request_with_signature(body: &str, signature: &str) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(WEBHOOK_PATH)
        .header("Content-Type", "application/json")
        .header(SIGNATURE_HEADER, signature)
        .header(TIMESTAMP_HEADER, Utc::now().timestamp().to_string())
        .body(Body::from(body.to_string()))
        .unwrap()
}

pub fn unsigned_request(body: &str) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(WEBHOOK_PATH)
        .header("Content-Type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

pub fn get_request(uri: &str) -> Request<Body> {
    Request::builder()
        .method("GET")
        .uri(uri)
        .body(Body::empty())
        .unwrap()
}

/// A form payload in the provider's envelope shape.
pub fn form_payload(event_id: &str, form_id: &str) -> String {
    serde_json::json!({
        "event_id": event_id,
        "event_type": "form_response",
        "form_response": {
            "form_id": form_id,
            "submitted_at": "2024-01-01T00:00:00Z",
            "answers": [{ "type": "text", "text": "hello" }]
        }
    })
    .to_string()
}

/// Parse a JSON response body.
pub async fn parse_response_body(response: Response<Body>) -> Value {
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    serde_json::from_slice(&body).unwrap_or(Value::Null)
}

/// Poll `condition` until it holds or `timeout` elapses.
///
/// Forwarding runs in a spawned task, so tests observe its effects by polling.
pub async fn wait_for<F, Fut>(timeout: Duration, mut condition: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        if condition().await {
            return true;
        }
        if tokio::time::Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}
