//! HTTP delivery of verified form events.
//!
//! Posts a small JSON envelope to the configured endpoint, signed with
//! HMAC-SHA256 in the same `sha256=<base64>` format the gateway accepts.

use chrono::Utc;
use domain::services::{ExecutionResult, ExecutorError, WebhookExecutor};
use reqwest::Client;
use serde::Serialize;
use shared::crypto;
use std::time::Duration;
use tracing::debug;

pub const SIGNATURE_HEADER: &str = "X-Webhook-Signature";
pub const TIMESTAMP_HEADER: &str = "X-Webhook-Timestamp";
pub const WEBHOOK_ID_HEADER: &str = "X-Webhook-Id";

/// Response bodies are kept for diagnostics up to this many bytes.
const MAX_RESPONSE_BODY: usize = 1024;

/// Body sent to the forwarding endpoint.
#[derive(Debug, Clone, Serialize)]
pub struct ForwardPayload<'a> {
    pub webhook_id: &'a str,
    pub form_id: &'a str,
}

/// [`WebhookExecutor`] backed by reqwest.
#[derive(Debug, Clone)]
pub struct HttpWebhookExecutor {
    client: Client,
    signing_secret: Option<String>,
    timeout: Duration,
}

impl HttpWebhookExecutor {
    pub fn new(timeout: Duration, signing_secret: Option<String>) -> Result<Self, reqwest::Error> {
        let client = Client::builder()
            .timeout(timeout)
            .user_agent(concat!("form-webhook-gateway/", env!("CARGO_PKG_VERSION")))
            .build()?;

        Ok(Self {
            client,
            signing_secret: signing_secret.filter(|s| !s.is_empty()),
            timeout,
        })
    }

    fn map_error(&self, err: reqwest::Error) -> ExecutorError {
        if err.is_timeout() {
            ExecutorError::Timeout(self.timeout)
        } else {
            ExecutorError::Transport(err.to_string())
        }
    }
}

#[async_trait::async_trait]
impl WebhookExecutor for HttpWebhookExecutor {
    async fn execute(
        &self,
        webhook_url: &str,
        webhook_id: &str,
        form_id: &str,
    ) -> Result<ExecutionResult, ExecutorError> {
        let body = serde_json::to_vec(&ForwardPayload {
            webhook_id,
            form_id,
        })
        .map_err(|e| ExecutorError::Other(format!("failed to encode payload: {}", e)))?;

        let mut request = self
            .client
            .post(webhook_url)
            .header(reqwest::header::CONTENT_TYPE, "application/json")
            .header(WEBHOOK_ID_HEADER, webhook_id)
            .header(TIMESTAMP_HEADER, Utc::now().timestamp().to_string());

        if let Some(secret) = &self.signing_secret {
            let signature = crypto::sign_payload(secret, &body)
                .map_err(|e| ExecutorError::Other(format!("failed to sign payload: {}", e)))?;
            request = request.header(SIGNATURE_HEADER, signature);
        }

        let response = request
            .body(body)
            .send()
            .await
            .map_err(|e| self.map_error(e))?;

        let status_code = response.status().as_u16();
        let text = response.text().await.map_err(|e| self.map_error(e))?;

        debug!(
            webhook_id = %webhook_id,
            status_code = status_code,
            "Forwarded webhook event"
        );

        let mut result = ExecutionResult::from_status(status_code);
        if !text.is_empty() {
            result = result.with_body(truncate(text, MAX_RESPONSE_BODY));
        }
        Ok(result)
    }
}

fn truncate(mut text: String, max: usize) -> String {
    if text.len() > max {
        let mut end = max;
        while !text.is_char_boundary(end) {
            end -= 1;
        }
        text.truncate(end);
    }
    text
}
