//! Read-only retry queue endpoints.

use axum::{
    extract::{Path, State},
    Json,
};
use domain::models::{RateLimitStatus, RetryStatistics, WebhookRetryRecord};
use serde::Serialize;

use crate::app::AppState;
use crate::error::ApiError;

#[derive(Debug, Serialize)]
pub struct RetryQueueResponse {
    pub statistics: RetryStatistics,
    pub queued_webhook_ids: Vec<String>,
    pub processing: bool,
    pub rate_limit: RateLimitStatus,
}

/// GET /api/v1/retries
pub async fn list_retries(State(state): State<AppState>) -> Json<RetryQueueResponse> {
    let manager = &state.retry_manager;
    Json(RetryQueueResponse {
        statistics: manager.get_retry_statistics(),
        queued_webhook_ids: manager.queued_webhook_ids(),
        processing: manager.is_processing(),
        rate_limit: state.rate_limiter.get_rate_limit_status().await,
    })
}

/// GET /api/v1/retries/:webhook_id
pub async fn get_retry(
    State(state): State<AppState>,
    Path(webhook_id): Path<String>,
) -> Result<Json<WebhookRetryRecord>, ApiError> {
    state
        .retry_manager
        .get_retry_record(&webhook_id)
        .map(Json)
        .ok_or_else(|| ApiError::NotFound(format!("No retry record for {}", webhook_id)))
}
