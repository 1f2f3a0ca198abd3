//! Integration tests for the inbound form webhook endpoint.
//!
//! Requests go through the full router: inbound limiter, verification,
//! acknowledgement and background forwarding into the retry manager.

mod common;

use axum::http::StatusCode;
use chrono::Utc;
use common::*;
use domain::models::{PermanentFailureReason, RetryStatus};
use domain::services::{
    ExecutionResult, ExecutorError, MockResponse, MockWebhookExecutor, WebhookExecutor,
};
use form_webhook_api::{app::AppState, config::Config};
use std::sync::Arc;
use std::time::Duration;
use tower::ServiceExt;
use wiremock::matchers::{header_exists, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const FORWARD_URL: &str = "https://internal.example.com/form-events";

fn mock_executor(status: u16) -> Arc<MockWebhookExecutor> {
    Arc::new(MockWebhookExecutor::with_status(status))
}

fn state_with(config: Config, executor: &Arc<MockWebhookExecutor>) -> AppState {
    test_state(config, Arc::clone(executor) as Arc<dyn WebhookExecutor>)
}

// ============================================================================
// Verification
// ============================================================================

#[tokio::test]
async fn test_valid_signature_is_accepted() {
    let state = test_state(test_config(), mock_executor(200));
    let app = test_app(state);

    let response = app
        .oneshot(signed_request(&form_payload("evt_valid", "frm_1")))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let body = parse_response_body(response).await;
    assert_eq!(body["status"], "accepted");
    assert_eq!(body["event_id"], "evt_valid");
    assert_eq!(body["form_id"], "frm_1");
    assert_eq!(body["forwarded"], false);
}

#[tokio::test]
async fn test_replayed_request_is_rejected() {
    let state = test_state(test_config(), mock_executor(200));
    let app = test_app(state);
    let payload = form_payload("evt_replay", "frm_1");
    let timestamp = Utc::now().timestamp();

    let first = app
        .clone()
        .oneshot(signed_request_at(&payload, timestamp))
        .await
        .unwrap();
    assert_eq!(first.status(), StatusCode::OK);

    let second = app
        .oneshot(signed_request_at(&payload, timestamp))
        .await
        .unwrap();
    assert_eq!(second.status(), StatusCode::UNAUTHORIZED);
    let body = parse_response_body(second).await;
    assert_eq!(body["error"], "replay_detected");
}

#[tokio::test]
async fn test_wrong_signature_is_rejected() {
    let app = test_app(test_state(test_config(), mock_executor(200)));
    let payload = form_payload("evt_bad", "frm_1");
    let signature = shared::crypto::sign_payload("some-other-secret", payload.as_bytes()).unwrap();

    let response = app
        .oneshot(request_with_signature(&payload, &signature))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    let body = parse_response_body(response).await;
    assert_eq!(body["error"], "signature_mismatch");
}

#[tokio::test]
async fn test_tampered_body_is_rejected() {
    let app = test_app(test_state(test_config(), mock_executor(200)));
    let signature = shared::crypto::sign_payload(
        TEST_SECRET,
        form_payload("evt_original", "frm_1").as_bytes(),
    )
    .unwrap();

    let response = app
        .oneshot(request_with_signature(
            &form_payload("evt_tampered", "frm_1"),
            &signature,
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    let body = parse_response_body(response).await;
    assert_eq!(body["error"], "signature_mismatch");
}

#[tokio::test]
async fn test_missing_signature_is_rejected() {
    let app = test_app(test_state(test_config(), mock_executor(200)));

    let response = app
        .oneshot(unsigned_request(&form_payload("evt_unsigned", "frm_1")))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    let body = parse_response_body(response).await;
    assert_eq!(body["error"], "missing_signature");
    assert!(body["message"].is_string());
}

#[tokio::test]
async fn test_unsupported_algorithm_is_rejected() {
    let app = test_app(test_state(test_config(), mock_executor(200)));

    let response = app
        .oneshot(request_with_signature(
            &form_payload("evt_sha1", "frm_1"),
            "sha1=c29tZXRoaW5n",
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    let body = parse_response_body(response).await;
    assert_eq!(body["error"], "unsupported_algorithm");
}

#[tokio::test]
async fn test_malformed_signature_is_rejected() {
    let app = test_app(test_state(test_config(), mock_executor(200)));

    let response = app
        .oneshot(request_with_signature(
            &form_payload("evt_malformed", "frm_1"),
            "sha256=***not-base64***",
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    let body = parse_response_body(response).await;
    assert_eq!(body["error"], "malformed_signature");
}

#[tokio::test]
async fn test_stale_timestamp_is_rejected() {
    let app = test_app(test_state(test_config(), mock_executor(200)));
    let stale = Utc::now().timestamp() - 3600;

    let response = app
        .oneshot(signed_request_at(&form_payload("evt_stale", "frm_1"), stale))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    let body = parse_response_body(response).await;
    assert_eq!(body["error"], "timestamp_out_of_tolerance");
}

#[tokio::test]
async fn test_rejection_does_not_consume_replay_slot() {
    let state = test_state(test_config(), mock_executor(200));
    let app = test_app(state.clone());
    let stale = Utc::now().timestamp() - 3600;

    let response = app
        .oneshot(signed_request_at(&form_payload("evt_stale", "frm_1"), stale))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    assert!(state.verifier.replay_store().is_empty());
}

#[tokio::test]
async fn test_empty_secret_fails_closed() {
    let mut config = test_config();
    config.security.webhook_secret = String::new();
    let executor = mock_executor(200);
    let state = state_with(config, &executor);
    let app = test_app(state.clone());

    let response = app
        .oneshot(signed_request(&form_payload("evt_nosecret", "frm_1")))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    let body = parse_response_body(response).await;
    assert_eq!(body["error"], "internal_error");
    assert!(state.verifier.replay_store().is_empty());
    assert_eq!(executor.call_count(), 0);
}

// ============================================================================
// Forwarding and retry scheduling
// ============================================================================

#[tokio::test]
async fn test_forward_failure_schedules_retry() {
    let executor = mock_executor(503);
    let state = state_with(forwarding_config(FORWARD_URL), &executor);
    let app = test_app(state.clone());

    let response = app
        .oneshot(signed_request(&form_payload("evt_503", "frm_retry")))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(parse_response_body(response).await["forwarded"], true);

    let manager = Arc::clone(&state.retry_manager);
    assert!(
        wait_for(Duration::from_secs(2), || {
            let manager = Arc::clone(&manager);
            async move { manager.get_retry_record("evt_503").is_some() }
        })
        .await
    );

    let record = state.retry_manager.get_retry_record("evt_503").unwrap();
    assert_eq!(record.retry_status, RetryStatus::Pending);
    assert_eq!(record.form_id, "frm_retry");
    assert_eq!(record.webhook_url, FORWARD_URL);
    assert_eq!(record.initial_status_code, Some(503));
    assert_eq!(record.total_attempts, 0);
    assert!(record.next_retry_time.is_some());
    assert_eq!(state.retry_manager.queued_webhook_ids(), vec!["evt_503"]);

    let calls = executor.calls();
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].webhook_id, "evt_503");
    assert_eq!(calls[0].webhook_url, FORWARD_URL);
}

#[tokio::test]
async fn test_forward_success_leaves_no_record() {
    let executor = mock_executor(200);
    let state = state_with(forwarding_config(FORWARD_URL), &executor);
    let app = test_app(state.clone());

    let response = app
        .oneshot(signed_request(&form_payload("evt_ok", "frm_1")))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let probe = Arc::clone(&executor);
    assert!(
        wait_for(Duration::from_secs(2), || {
            let probe = Arc::clone(&probe);
            async move { probe.call_count() == 1 }
        })
        .await
    );

    // Give the background task a moment to finish after the call returns.
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(state.retry_manager.get_retry_record("evt_ok").is_none());
    assert_eq!(state.retry_manager.queue_len(), 0);
}

#[tokio::test]
async fn test_forward_gone_disables_without_queueing() {
    let executor = mock_executor(410);
    let state = state_with(forwarding_config(FORWARD_URL), &executor);
    let app = test_app(state.clone());

    app.oneshot(signed_request(&form_payload("evt_gone", "frm_1")))
        .await
        .unwrap();

    let manager = Arc::clone(&state.retry_manager);
    assert!(
        wait_for(Duration::from_secs(2), || {
            let manager = Arc::clone(&manager);
            async move { manager.get_retry_record("evt_gone").is_some() }
        })
        .await
    );

    let record = state.retry_manager.get_retry_record("evt_gone").unwrap();
    assert_eq!(record.retry_status, RetryStatus::PermanentlyDisabled);
    assert_eq!(
        record.permanent_failure_reason,
        Some(PermanentFailureReason::Http410Gone)
    );
    assert!(record.next_retry_time.is_none());
    assert_eq!(state.retry_manager.queue_len(), 0);
}

#[tokio::test]
async fn test_transport_error_schedules_retry_without_status() {
    let executor = Arc::new(MockWebhookExecutor::scripted(
        vec![MockResponse::Fail(ExecutorError::Transport(
            "connection refused".to_string(),
        ))],
        MockResponse::Respond(ExecutionResult::from_status(200)),
    ));
    let state = state_with(forwarding_config(FORWARD_URL), &executor);
    let app = test_app(state.clone());

    app.oneshot(signed_request(&form_payload("evt_refused", "frm_1")))
        .await
        .unwrap();

    let manager = Arc::clone(&state.retry_manager);
    assert!(
        wait_for(Duration::from_secs(2), || {
            let manager = Arc::clone(&manager);
            async move { manager.get_retry_record("evt_refused").is_some() }
        })
        .await
    );

    let record = state.retry_manager.get_retry_record("evt_refused").unwrap();
    assert_eq!(record.initial_status_code, None);
    assert!(record.initial_failure_reason.contains("connection refused"));
}

#[tokio::test]
async fn test_scheduled_retry_succeeds_on_next_drain() {
    let executor = Arc::new(MockWebhookExecutor::scripted(
        vec![MockResponse::Respond(ExecutionResult::from_status(500))],
        MockResponse::Respond(ExecutionResult::from_status(200)),
    ));
    let state = state_with(forwarding_config(FORWARD_URL), &executor);
    let app = test_app(state.clone());

    app.oneshot(signed_request(&form_payload("evt_later", "frm_1")))
        .await
        .unwrap();

    let manager = Arc::clone(&state.retry_manager);
    assert!(
        wait_for(Duration::from_secs(2), || {
            let manager = Arc::clone(&manager);
            async move { manager.queue_len() == 1 }
        })
        .await
    );

    // Not due yet.
    let summary = state.retry_manager.process_retry_queue().await;
    assert_eq!(summary.processed, 0);

    // Initial retry interval in the test config is one second.
    tokio::time::sleep(Duration::from_millis(1100)).await;
    let summary = state.retry_manager.process_retry_queue().await;
    assert_eq!(summary.processed, 1);
    assert_eq!(summary.successful, 1);

    let record = state.retry_manager.get_retry_record("evt_later").unwrap();
    assert_eq!(record.retry_status, RetryStatus::Success);
    assert_eq!(record.total_attempts, 1);
    assert_eq!(state.retry_manager.queue_len(), 0);
    assert_eq!(executor.call_count(), 2);
}

#[tokio::test]
async fn test_forwarding_end_to_end_over_http() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/form-events"))
        .and(header_exists("x-webhook-id"))
        .respond_with(ResponseTemplate::new(503))
        .expect(1)
        .mount(&server)
        .await;

    let config = forwarding_config(&format!("{}/form-events", server.uri()));
    let state = AppState::from_config(config).unwrap();
    let app = test_app(state.clone());

    let response = app
        .oneshot(signed_request(&form_payload("evt_http", "frm_http")))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let manager = Arc::clone(&state.retry_manager);
    assert!(
        wait_for(Duration::from_secs(5), || {
            let manager = Arc::clone(&manager);
            async move { manager.get_retry_record("evt_http").is_some() }
        })
        .await
    );

    let record = state.retry_manager.get_retry_record("evt_http").unwrap();
    assert_eq!(record.initial_status_code, Some(503));
    assert_eq!(record.form_id, "frm_http");
}

// ============================================================================
// Inbound rate limiting
// ============================================================================

#[tokio::test]
async fn test_inbound_rate_limit_returns_429() {
    let mut config = test_config();
    config.security.inbound_rate_limit_per_minute = 2;
    let app = test_app(test_state(config, mock_executor(200)));

    for i in 0..2 {
        let response = app
            .clone()
            .oneshot(signed_request(&form_payload(&format!("evt_rl_{}", i), "frm_1")))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    let response = app
        .oneshot(signed_request(&form_payload("evt_rl_2", "frm_1")))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
    let retry_after: u64 = response
        .headers()
        .get("retry-after")
        .unwrap()
        .to_str()
        .unwrap()
        .parse()
        .unwrap();
    assert!(retry_after >= 1);
    let body = parse_response_body(response).await;
    assert_eq!(body["error"], "rate_limited");
}

#[tokio::test]
async fn test_inbound_rate_limit_does_not_apply_to_health() {
    let mut config = test_config();
    config.security.inbound_rate_limit_per_minute = 1;
    let app = test_app(test_state(config, mock_executor(200)));

    for _ in 0..3 {
        let response = app
            .clone()
            .oneshot(get_request("/api/health/live"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }
}
