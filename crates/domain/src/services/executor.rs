//! Outbound delivery seam used by the retry manager.
//!
//! The executor is the only network boundary of the retry machinery. The
//! HTTP implementation lives in the api crate; tests use
//! [`MockWebhookExecutor`].

use serde::Serialize;
use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Duration;
use thiserror::Error;

/// Response observed from a delivery attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub struct ExecutionResult {
    pub status_code: u16,
    pub success: bool,
    pub error_message: Option<String>,
    pub response_body: Option<String>,
}

impl ExecutionResult {
    /// Build a result from a status code; 2xx counts as success.
    pub fn from_status(status_code: u16) -> Self {
        let success = (200..300).contains(&status_code);
        Self {
            status_code,
            success,
            error_message: (!success).then(|| format!("HTTP {}", status_code)),
            response_body: None,
        }
    }

    pub fn with_body(mut self, body: impl Into<String>) -> Self {
        self.response_body = Some(body.into());
        self
    }
}

/// Failures that prevented a response from being observed.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ExecutorError {
    #[error("request timed out after {0:?}")]
    Timeout(Duration),

    #[error("transport error: {0}")]
    Transport(String),

    #[error("executor panicked: {0}")]
    Panicked(String),

    #[error("{0}")]
    Other(String),
}

/// Performs one delivery of a webhook-driven side effect.
#[async_trait::async_trait]
pub trait WebhookExecutor: Send + Sync {
    async fn execute(
        &self,
        webhook_url: &str,
        webhook_id: &str,
        form_id: &str,
    ) -> Result<ExecutionResult, ExecutorError>;
}

/// One scripted reaction of [`MockWebhookExecutor`].
#[derive(Debug, Clone)]
pub enum MockResponse {
    Respond(ExecutionResult),
    Fail(ExecutorError),
    Panic(String),
}

/// A recorded executor invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutorCall {
    pub webhook_url: String,
    pub webhook_id: String,
    pub form_id: String,
}

/// Scripted executor for tests.
///
/// Pops responses from the script in order and falls back to the default
/// response when the script is exhausted.
#[derive(Debug)]
pub struct MockWebhookExecutor {
    script: Mutex<VecDeque<MockResponse>>,
    fallback: MockResponse,
    delay: Option<Duration>,
    calls: Mutex<Vec<ExecutorCall>>,
}

impl MockWebhookExecutor {
    /// Always responds with `status_code`.
    pub fn with_status(status_code: u16) -> Self {
        Self::scripted(
            Vec::new(),
            MockResponse::Respond(ExecutionResult::from_status(status_code)),
        )
    }

    pub fn scripted(script: Vec<MockResponse>, fallback: MockResponse) -> Self {
        Self {
            script: Mutex::new(script.into()),
            fallback,
            delay: None,
            calls: Mutex::new(Vec::new()),
        }
    }

    /// Sleep before answering, to simulate slow endpoints.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn calls(&self) -> Vec<ExecutorCall> {
        self.calls.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap_or_else(|e| e.into_inner()).len()
    }
}

#[async_trait::async_trait]
impl WebhookExecutor for MockWebhookExecutor {
    async fn execute(
        &self,
        webhook_url: &str,
        webhook_id: &str,
        form_id: &str,
    ) -> Result<ExecutionResult, ExecutorError> {
        self.calls
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(ExecutorCall {
                webhook_url: webhook_url.to_string(),
                webhook_id: webhook_id.to_string(),
                form_id: form_id.to_string(),
            });

        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        let next = self
            .script
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .pop_front()
            .unwrap_or_else(|| self.fallback.clone());

        match next {
            MockResponse::Respond(result) => Ok(result),
            MockResponse::Fail(error) => Err(error),
            MockResponse::Panic(message) => panic!("{}", message),
        }
    }
}
