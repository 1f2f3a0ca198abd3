//! Domain models for the form webhook gateway.

pub mod rate_limit;
pub mod retry_policy;
pub mod retry_queue;
pub mod retry_record;

pub use rate_limit::RateLimitStatus;
pub use retry_policy::{PolicyError, WebhookRetryPolicyConfig, MAX_POLICY_DURATION};
pub use retry_queue::{ProcessingStatus, RetryQueueSummary, RetryStatistics};
pub use retry_record::{PermanentFailureReason, RetryAttempt, RetryStatus, WebhookRetryRecord};
