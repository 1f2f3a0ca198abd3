//! Background job scheduler and job implementations.

mod record_cleanup;
mod replay_cleanup;
mod scheduler;
mod webhook_retry;

pub use record_cleanup::RetryRecordCleanupJob;
pub use replay_cleanup::ReplayStoreCleanupJob;
pub use scheduler::{Job, JobFrequency, JobScheduler};
pub use webhook_retry::WebhookRetryJob;
