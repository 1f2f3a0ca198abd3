//! Health check endpoint handlers.

use axum::{extract::State, http::StatusCode, Json};
use domain::models::{RateLimitStatus, RetryStatistics};
use serde::Serialize;

use crate::app::AppState;

/// Health check response.
#[derive(Debug, Serialize)]
#[serde(rename_all = "snake_case")]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub retry_queue: RetryQueueHealth,
    pub rate_limit: RateLimitStatus,
    pub replay_store: ReplayStoreHealth,
    pub forwarding_enabled: bool,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "snake_case")]
pub struct RetryQueueHealth {
    #[serde(flatten)]
    pub statistics: RetryStatistics,
    pub processing: bool,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "snake_case")]
pub struct ReplayStoreHealth {
    pub entries: usize,
}

/// Simple status response for liveness/readiness probes.
#[derive(Debug, Serialize)]
pub struct StatusResponse {
    pub status: String,
}

/// Full health check endpoint.
///
/// Reports retry queue counters, outbound rate compliance and replay store size.
/// Degraded when the outbound rate has drifted above the configured ceiling.
pub async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    let rate_limit = state.rate_limiter.get_rate_limit_status().await;
    let status = if rate_limit.is_compliant {
        "healthy"
    } else {
        "degraded"
    };

    Json(HealthResponse {
        status: status.to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        retry_queue: RetryQueueHealth {
            statistics: state.retry_manager.get_retry_statistics(),
            processing: state.retry_manager.is_processing(),
        },
        rate_limit,
        replay_store: ReplayStoreHealth {
            entries: state.verifier.replay_store().len(),
        },
        forwarding_enabled: state.config.delivery.forward_url().is_some(),
    })
}

/// Liveness probe endpoint.
///
/// Returns 200 OK if the process is running.
pub async fn live() -> Json<StatusResponse> {
    Json(StatusResponse {
        status: "alive".to_string(),
    })
}

/// Readiness probe endpoint.
///
/// Not ready until a webhook secret is configured. Without one the verifier
/// fails every webhook as misconfigured.
pub async fn ready(State(state): State<AppState>) -> Result<Json<StatusResponse>, StatusCode> {
    if state.verifier.config().secret.is_empty() {
        return Err(StatusCode::SERVICE_UNAVAILABLE);
    }

    Ok(Json(StatusResponse {
        status: "ready".to_string(),
    }))
}
