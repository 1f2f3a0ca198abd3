//! Domain services for the form webhook gateway.
//!
//! Inbound verification, outbound rate limiting and the retry state machine.

pub mod clock;
pub mod executor;
pub mod metrics;
pub mod rate_limit;
pub mod replay_store;
pub mod retry_manager;
pub mod security;

pub use clock::{Clock, ManualClock, SystemClock};
pub use executor::{
    ExecutionResult, ExecutorCall, ExecutorError, MockResponse, MockWebhookExecutor,
    WebhookExecutor,
};
pub use metrics::{InMemoryRetryMetrics, RecorderRetryMetrics, RetryMetricEvent, RetryMetrics};
pub use rate_limit::{RateLimitError, RateLimitValidator, RATE_WINDOW};
pub use replay_store::ReplayStore;
pub use retry_manager::{RetryError, RetryManager};
pub use security::{
    SecurityVerifier, VerificationError, VerifierConfig, DEFAULT_REPLAY_TTL_FLOOR,
    DEFAULT_SIGNATURE_HEADER, DEFAULT_TIMESTAMP_HEADER, DEFAULT_TIMESTAMP_TOLERANCE,
};
