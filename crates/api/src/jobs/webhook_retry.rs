//! Webhook retry background job.
//!
//! Drains due records from the retry queue on every tick.

use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use domain::models::ProcessingStatus;
use domain::services::RetryManager;

use super::scheduler::{Job, JobFrequency};

pub struct WebhookRetryJob {
    manager: Arc<RetryManager>,
    interval: Duration,
}

impl WebhookRetryJob {
    pub fn new(manager: Arc<RetryManager>, interval: Duration) -> Self {
        Self { manager, interval }
    }
}

#[async_trait::async_trait]
impl Job for WebhookRetryJob {
    fn name(&self) -> &'static str {
        "webhook_retry"
    }

    fn frequency(&self) -> JobFrequency {
        JobFrequency::from(self.interval)
    }

    async fn execute(&self) -> Result<(), String> {
        let summary = self.manager.process_retry_queue().await;

        if summary.status == ProcessingStatus::AlreadyProcessing {
            debug!("Previous retry drain still running, skipping tick");
            return Ok(());
        }

        for error in &summary.errors {
            warn!(error = %error, "Webhook retry attempt errored");
        }

        Ok(())
    }
}
