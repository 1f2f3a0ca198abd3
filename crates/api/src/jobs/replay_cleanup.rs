//! Replay store cleanup background job.
//!
//! Expired signatures are otherwise only dropped when the store hits its cap.

use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

use domain::services::ReplayStore;

use super::scheduler::{Job, JobFrequency};

pub struct ReplayStoreCleanupJob {
    store: Arc<ReplayStore>,
    interval: Duration,
}

impl ReplayStoreCleanupJob {
    pub fn new(store: Arc<ReplayStore>, interval: Duration) -> Self {
        Self { store, interval }
    }
}

#[async_trait::async_trait]
impl Job for ReplayStoreCleanupJob {
    fn name(&self) -> &'static str {
        "replay_store_cleanup"
    }

    fn frequency(&self) -> JobFrequency {
        JobFrequency::from(self.interval)
    }

    async fn execute(&self) -> Result<(), String> {
        let purged = self.store.purge_expired(Utc::now());
        if purged > 0 {
            debug!(
                purged = purged,
                remaining = self.store.len(),
                "Purged expired replay entries"
            );
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration as ChronoDuration;

    #[tokio::test]
    async fn test_execute_purges_only_expired() {
        let store = Arc::new(ReplayStore::new());
        let now = Utc::now();
        let ttl = ChronoDuration::minutes(5);
        assert!(store.check_and_record("sha256=old", now - ChronoDuration::minutes(10), ttl));
        assert!(store.check_and_record("sha256=fresh", now, ttl));

        let job = ReplayStoreCleanupJob::new(Arc::clone(&store), Duration::from_secs(60));
        job.execute().await.unwrap();

        assert_eq!(store.len(), 1);
        assert!(store.contains("sha256=fresh", now));
    }

    #[test]
    fn test_job_name_and_frequency() {
        let job =
            ReplayStoreCleanupJob::new(Arc::new(ReplayStore::new()), Duration::from_secs(120));
        assert_eq!(job.name(), "replay_store_cleanup");
        assert_eq!(job.frequency(), JobFrequency::Minutes(2));
    }
}
