//! Inbound form webhook handler.
//!
//! POST /api/v1/webhooks/forms
//!
//! The raw body is verified before it is parsed. Once verified the request is
//! acknowledged with 200; forwarding and any retry scheduling happen in the
//! background.

use axum::{body::Bytes, extract::State, http::HeaderMap, Json};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::app::AppState;
use crate::error::ApiError;
use crate::middleware::metrics::{record_webhook_forward, record_webhook_verification};
use shared::crypto::payload_fingerprint;

/// Form id used when the payload does not carry one.
pub const UNKNOWN_FORM_ID: &str = "unknown";

/// Fields the gateway reads from a verified payload. Everything else is
/// passed through untouched.
#[derive(Debug, Default, Deserialize)]
struct FormEventEnvelope {
    event_id: Option<String>,
    form_response: Option<FormResponse>,
}

#[derive(Debug, Default, Deserialize)]
struct FormResponse {
    form_id: Option<String>,
}

/// Identity of a verified form event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FormEvent {
    pub event_id: String,
    pub form_id: String,
}

impl FormEvent {
    /// Extract ids from a JSON body, generating an event id when absent.
    pub fn from_body(body: &[u8]) -> Self {
        let envelope: FormEventEnvelope = serde_json::from_slice(body).unwrap_or_default();

        let event_id = envelope
            .event_id
            .filter(|id| !id.is_empty())
            .unwrap_or_else(|| format!("evt_{}", Uuid::new_v4().simple()));
        let form_id = envelope
            .form_response
            .and_then(|r| r.form_id)
            .filter(|id| !id.is_empty())
            .unwrap_or_else(|| UNKNOWN_FORM_ID.to_string());

        Self { event_id, form_id }
    }
}

#[derive(Debug, Serialize)]
pub struct WebhookAccepted {
    pub status: &'static str,
    pub event_id: String,
    pub form_id: String,
    /// Whether the event was handed to the forwarder.
    pub forwarded: bool,
}

/// Verify and acknowledge a form provider webhook.
pub async fn receive_form_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<WebhookAccepted>, ApiError> {
    if let Err(err) = state.verifier.verify(&body, &headers) {
        record_webhook_verification(err.code());
        return Err(err.into());
    }
    record_webhook_verification("accepted");

    let event = FormEvent::from_body(&body);
    info!(
        event_id = %event.event_id,
        form_id = %event.form_id,
        fingerprint = %payload_fingerprint(&body),
        "Form webhook accepted"
    );

    let forwarded = match state.config.delivery.forward_url() {
        Some(url) => {
            tokio::spawn(forward_event(state.clone(), url.to_string(), event.clone()));
            true
        }
        None => false,
    };

    Ok(Json(WebhookAccepted {
        status: "accepted",
        event_id: event.event_id,
        form_id: event.form_id,
        forwarded,
    }))
}

/// Deliver a verified event once; hand failures to the retry manager.
pub async fn forward_event(state: AppState, url: String, event: FormEvent) {
    state.rate_limiter.enforce_rate_limit().await;

    let (reason, status_code) = match state
        .executor
        .execute(&url, &event.event_id, &event.form_id)
        .await
    {
        Ok(result) if result.success => {
            record_webhook_forward("success");
            debug!(
                event_id = %event.event_id,
                status_code = result.status_code,
                "Form event forwarded"
            );
            return;
        }
        Ok(result) => {
            let reason = result
                .error_message
                .unwrap_or_else(|| format!("HTTP {}", result.status_code));
            (reason, Some(result.status_code))
        }
        Err(err) => (err.to_string(), None),
    };

    record_webhook_forward("failed");
    warn!(
        event_id = %event.event_id,
        form_id = %event.form_id,
        status_code = ?status_code,
        error = %reason,
        "Form event forwarding failed, scheduling retry"
    );

    state.retry_manager.schedule_webhook_retry(
        &event.event_id,
        &event.form_id,
        &url,
        &reason,
        status_code,
    );
}
