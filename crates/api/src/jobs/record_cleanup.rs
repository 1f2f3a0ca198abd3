//! Retry record cleanup background job.
//!
//! Finished retry chains stay queryable through the retry API for the
//! retention window, then are dropped so the record map stays bounded.

use std::sync::Arc;
use std::time::Duration;
use tracing::info;

use domain::services::RetryManager;

use super::scheduler::{Job, JobFrequency};

pub struct RetryRecordCleanupJob {
    manager: Arc<RetryManager>,
    interval: Duration,
    retention: Duration,
}

impl RetryRecordCleanupJob {
    pub fn new(manager: Arc<RetryManager>, interval: Duration, retention: Duration) -> Self {
        Self {
            manager,
            interval,
            retention,
        }
    }
}

#[async_trait::async_trait]
impl Job for RetryRecordCleanupJob {
    fn name(&self) -> &'static str {
        "retry_record_cleanup"
    }

    fn frequency(&self) -> JobFrequency {
        JobFrequency::from(self.interval)
    }

    async fn execute(&self) -> Result<(), String> {
        let removed = self.manager.purge_finished_records(self.retention);
        if removed > 0 {
            info!(
                removed = removed,
                retention_secs = self.retention.as_secs(),
                "Cleaned up finished retry records"
            );
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration as ChronoDuration;
    use domain::models::{RetryStatus, WebhookRetryPolicyConfig};
    use domain::services::{ManualClock, MockWebhookExecutor};

    const URL: &str = "https://a.example";

    fn manager(clock: Arc<ManualClock>) -> Arc<RetryManager> {
        Arc::new(
            RetryManager::new(
                WebhookRetryPolicyConfig::default(),
                Arc::new(MockWebhookExecutor::with_status(200)),
            )
            .unwrap()
            .with_clock(clock)
            .with_rng_seed(7),
        )
    }

    #[test]
    fn test_job_name_and_frequency() {
        let clock = Arc::new(ManualClock::new(chrono::Utc::now()));
        let job = RetryRecordCleanupJob::new(
            manager(clock),
            Duration::from_secs(600),
            Duration::from_secs(86_400),
        );

        assert_eq!(job.name(), "retry_record_cleanup");
        assert_eq!(job.frequency(), JobFrequency::Minutes(10));
    }

    #[tokio::test]
    async fn test_execute_drops_expired_finished_records() {
        let clock = Arc::new(ManualClock::new(chrono::Utc::now()));
        let manager = manager(clock.clone());
        manager.schedule_webhook_retry("wh_gone", "frm_1", URL, "HTTP 410", Some(410));
        manager.schedule_webhook_retry("wh_waiting", "frm_1", URL, "timeout", None);
        assert_eq!(
            manager.get_retry_record("wh_gone").unwrap().retry_status,
            RetryStatus::PermanentlyDisabled
        );

        let job = RetryRecordCleanupJob::new(
            Arc::clone(&manager),
            Duration::from_secs(600),
            Duration::from_secs(3600),
        );

        // Still inside the retention window.
        job.execute().await.unwrap();
        assert!(manager.get_retry_record("wh_gone").is_some());

        clock.advance(ChronoDuration::hours(2));
        job.execute().await.unwrap();

        assert!(manager.get_retry_record("wh_gone").is_none());
        let waiting = manager.get_retry_record("wh_waiting").unwrap();
        assert_eq!(waiting.retry_status, RetryStatus::Pending);
        assert_eq!(manager.queue_len(), 1);
    }
}
