//! Webhook retry manager.
//!
//! Owns the in-memory retry records and the retry queue, drains due records
//! through the injected [`WebhookExecutor`], and decides when a chain is
//! finished:
//!
//! ```text
//! PENDING --success--> SUCCESS
//! PENDING --HTTP 410--> PERMANENTLY_DISABLED[HTTP_410_GONE]
//! PENDING --age > max_retry_duration--> PERMANENTLY_DISABLED[MAX_RETRY_DURATION_EXCEEDED]
//! PENDING --attempts >= max_total_attempts--> MAX_RETRIES_EXCEEDED
//!                                          or PERMANENTLY_DISABLED[HUNDRED_PERCENT_FAILURE_RATE]
//! PENDING --other failure--> PENDING (next_retry_time pushed back)
//! ```

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::collections::{BTreeSet, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::task::JoinError;
use tracing::{debug, info, warn};

use super::clock::{Clock, SystemClock};
use super::executor::{ExecutionResult, ExecutorError, WebhookExecutor};
use super::metrics::{RecorderRetryMetrics, RetryMetricEvent, RetryMetrics};
use super::rate_limit::RateLimitValidator;
use crate::models::{
    PermanentFailureReason, PolicyError, RetryQueueSummary, RetryStatistics, RetryStatus,
    WebhookRetryPolicyConfig, WebhookRetryRecord,
};

/// Exponent cap for backoff; any multiplier >= 1 has saturated long before.
const MAX_BACKOFF_EXPONENT: u32 = 64;

/// HTTP status that permanently disables a webhook.
const HTTP_GONE: u16 = 410;

/// Errors returned to callers managing retry records.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RetryError {
    #[error("Retry record not found: {0}")]
    NotFound(String),

    #[error("Retry record {0} is still pending")]
    NotTerminal(String),
}

/// Records and queue, guarded together so queue membership always equals
/// the set of pending records.
#[derive(Debug, Default)]
struct RetryState {
    records: HashMap<String, WebhookRetryRecord>,
    queue: BTreeSet<String>,
}

/// Snapshot of what is needed to attempt one delivery.
#[derive(Debug, Clone)]
struct DueDelivery {
    webhook_id: String,
    form_id: String,
    webhook_url: String,
}

/// Clears the single-flight flag when a drain ends, including on panic.
struct ProcessingGuard<'a>(&'a AtomicBool);

impl<'a> ProcessingGuard<'a> {
    fn acquire(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| Self(flag))
    }
}

impl Drop for ProcessingGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// Schedules, backs off and retires failing webhook deliveries.
pub struct RetryManager {
    policy: WebhookRetryPolicyConfig,
    state: Mutex<RetryState>,
    processing: AtomicBool,
    executor: Arc<dyn WebhookExecutor>,
    metrics: Arc<dyn RetryMetrics>,
    rate_limiter: Option<Arc<RateLimitValidator>>,
    clock: Arc<dyn Clock>,
    rng: Mutex<StdRng>,
}

impl RetryManager {
    /// Create a manager with the system clock, an entropy-seeded RNG and the
    /// global metrics recorder.
    pub fn new(
        policy: WebhookRetryPolicyConfig,
        executor: Arc<dyn WebhookExecutor>,
    ) -> Result<Self, PolicyError> {
        policy.validate()?;
        Ok(Self {
            policy,
            state: Mutex::new(RetryState::default()),
            processing: AtomicBool::new(false),
            executor,
            metrics: Arc::new(RecorderRetryMetrics),
            rate_limiter: None,
            clock: Arc::new(SystemClock),
            rng: Mutex::new(StdRng::from_entropy()),
        })
    }

    pub fn with_metrics(mut self, metrics: Arc<dyn RetryMetrics>) -> Self {
        self.metrics = metrics;
        self
    }

    /// Every attempt waits on this limiter before calling the executor.
    pub fn with_rate_limiter(mut self, rate_limiter: Arc<RateLimitValidator>) -> Self {
        self.rate_limiter = Some(rate_limiter);
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Deterministic jitter for reproducible schedules.
    pub fn with_rng_seed(mut self, seed: u64) -> Self {
        self.rng = Mutex::new(StdRng::seed_from_u64(seed));
        self
    }

    pub fn policy(&self) -> &WebhookRetryPolicyConfig {
        &self.policy
    }

    // ========================================================================
    // Scheduling
    // ========================================================================

    /// Start a retry chain for a delivery that just failed.
    ///
    /// An initial 410 creates the record already disabled; it is never
    /// queued and never executed. Scheduling an id that is still pending
    /// returns the existing record untouched.
    pub fn schedule_webhook_retry(
        &self,
        webhook_id: &str,
        form_id: &str,
        webhook_url: &str,
        initial_failure_reason: &str,
        initial_status_code: Option<u16>,
    ) -> WebhookRetryRecord {
        let now = self.clock.now();
        let disabled = initial_status_code == Some(HTTP_GONE);

        let record = {
            let mut state = self.lock_state();

            if let Some(existing) = state.records.get(webhook_id) {
                if existing.retry_status == RetryStatus::Pending {
                    debug!(webhook_id = %webhook_id, "Retry already scheduled");
                    return existing.clone();
                }
            }

            let next_retry_time = now + to_chrono(self.policy.initial_retry_interval);
            let mut record = WebhookRetryRecord::pending(
                webhook_id,
                form_id,
                webhook_url,
                initial_failure_reason,
                initial_status_code,
                now,
                next_retry_time,
            );

            if disabled {
                record.finish(
                    RetryStatus::PermanentlyDisabled,
                    Some(PermanentFailureReason::Http410Gone),
                );
                state.queue.remove(webhook_id);
            } else {
                state.queue.insert(webhook_id.to_string());
            }

            state
                .records
                .insert(webhook_id.to_string(), record.clone());
            record
        };

        if disabled {
            warn!(
                webhook_id = %webhook_id,
                form_id = %form_id,
                webhook_url = %webhook_url,
                "Webhook endpoint gone (410), retry chain disabled"
            );
        } else {
            info!(
                webhook_id = %webhook_id,
                form_id = %form_id,
                reason = %initial_failure_reason,
                status_code = ?initial_status_code,
                next_retry_time = ?record.next_retry_time,
                "Webhook retry scheduled"
            );
        }

        self.metrics.record(RetryMetricEvent::Scheduled {
            webhook_id: webhook_id.to_string(),
            disabled,
        });

        record
    }

    // ========================================================================
    // Queue Processing
    // ========================================================================

    /// Attempt every queued record whose retry time has arrived.
    ///
    /// Only one drain runs at a time; an overlapping call returns a summary
    /// with `AlreadyProcessing` status without touching any record.
    pub async fn process_retry_queue(&self) -> RetryQueueSummary {
        let started = Instant::now();

        let _guard = match ProcessingGuard::acquire(&self.processing) {
            Some(guard) => guard,
            None => {
                debug!("Retry queue already being processed");
                let summary = RetryQueueSummary::already_processing();
                self.metrics.record(RetryMetricEvent::QueueProcessed {
                    summary: summary.clone(),
                    queue_size: self.queue_len(),
                    duration: started.elapsed(),
                });
                return summary;
            }
        };

        let now = self.clock.now();
        let due = self.collect_due(now);
        let mut summary = RetryQueueSummary::completed();

        for delivery in due {
            summary.processed += 1;

            if let Some(limiter) = &self.rate_limiter {
                limiter.enforce_rate_limit().await;
            }

            let outcome = self.execute_isolated(&delivery).await;
            if let Some(event) = self.apply_outcome(&delivery, outcome, &mut summary) {
                self.metrics.record(event);
            }
        }

        let queue_size = self.queue_len();
        if summary.processed > 0 {
            info!(
                processed = summary.processed,
                successful = summary.successful,
                failed = summary.failed,
                disabled = summary.disabled,
                errors = summary.errors.len(),
                queue_size = queue_size,
                "Processed webhook retry queue"
            );
        }

        self.metrics.record(RetryMetricEvent::QueueProcessed {
            summary: summary.clone(),
            queue_size,
            duration: started.elapsed(),
        });

        summary
    }

    fn collect_due(&self, now: DateTime<Utc>) -> Vec<DueDelivery> {
        let state = self.lock_state();
        state
            .queue
            .iter()
            .filter_map(|id| state.records.get(id))
            .filter(|record| record.is_due(now))
            .map(|record| DueDelivery {
                webhook_id: record.webhook_id.clone(),
                form_id: record.form_id.clone(),
                webhook_url: record.webhook_url.clone(),
            })
            .collect()
    }

    /// Run the executor in its own task so a panic becomes a failed attempt.
    async fn execute_isolated(
        &self,
        delivery: &DueDelivery,
    ) -> Result<ExecutionResult, ExecutorError> {
        let executor = Arc::clone(&self.executor);
        let DueDelivery {
            webhook_id,
            form_id,
            webhook_url,
        } = delivery.clone();

        let handle = tokio::spawn(async move {
            executor
                .execute(&webhook_url, &webhook_id, &form_id)
                .await
        });

        match handle.await {
            Ok(result) => result,
            Err(join_error) => Err(join_error_to_executor_error(join_error)),
        }
    }

    /// Fold one attempt into its record. Returns the metric to emit.
    fn apply_outcome(
        &self,
        delivery: &DueDelivery,
        outcome: Result<ExecutionResult, ExecutorError>,
        summary: &mut RetryQueueSummary,
    ) -> Option<RetryMetricEvent> {
        let now = self.clock.now();
        let webhook_id = delivery.webhook_id.as_str();

        let mut state = self.lock_state();
        let RetryState { records, queue } = &mut *state;

        let record = match records.get_mut(webhook_id) {
            Some(record) if !record.is_terminal() => record,
            _ => {
                summary
                    .errors
                    .push(format!("{}: record removed during processing", webhook_id));
                queue.remove(webhook_id);
                return None;
            }
        };

        let (status_code, error_message) = match outcome {
            Ok(result) if result.success => {
                record.record_success(now, result.status_code);
                queue.remove(webhook_id);
                summary.successful += 1;
                info!(
                    webhook_id = %webhook_id,
                    status_code = result.status_code,
                    attempts = record.total_attempts,
                    "Webhook retry succeeded"
                );
                return Some(RetryMetricEvent::Succeeded {
                    webhook_id: webhook_id.to_string(),
                    attempts: record.total_attempts,
                });
            }
            Ok(result) => {
                let message = result
                    .error_message
                    .unwrap_or_else(|| format!("HTTP {}", result.status_code));
                (Some(result.status_code), message)
            }
            Err(error) => {
                let message = error.to_string();
                summary.errors.push(format!("{}: {}", webhook_id, message));
                (None, message)
            }
        };

        record.record_failure(now, status_code, Some(error_message.clone()));
        summary.failed += 1;

        match self.classify_failure(record, status_code, now) {
            Some((status, reason)) => {
                record.finish(status, Some(reason));
                queue.remove(webhook_id);
                summary.disabled += 1;
                warn!(
                    webhook_id = %webhook_id,
                    form_id = %record.form_id,
                    status = %status,
                    reason = %reason,
                    attempts = record.total_attempts,
                    last_error = %error_message,
                    "Webhook retry chain terminated"
                );
            }
            None => {
                let backoff = self.calculate_backoff(record.total_attempts);
                let next_retry_time = now + to_chrono(backoff);
                record.next_retry_time = Some(next_retry_time);
                warn!(
                    webhook_id = %webhook_id,
                    status_code = ?status_code,
                    error = %error_message,
                    attempts = record.total_attempts,
                    next_retry_time = %next_retry_time,
                    "Webhook retry attempt failed"
                );
            }
        }

        Some(RetryMetricEvent::AttemptFailed {
            webhook_id: webhook_id.to_string(),
            status_code,
            outcome: record.retry_status,
        })
    }

    /// Decide whether a failed record is finished. Checks run in order:
    /// 410, retry duration, then attempt count with failure-rate refinement.
    fn classify_failure(
        &self,
        record: &WebhookRetryRecord,
        status_code: Option<u16>,
        now: DateTime<Utc>,
    ) -> Option<(RetryStatus, PermanentFailureReason)> {
        if status_code == Some(HTTP_GONE) {
            return Some((
                RetryStatus::PermanentlyDisabled,
                PermanentFailureReason::Http410Gone,
            ));
        }

        if record.age(now) > to_chrono(self.policy.max_retry_duration) {
            return Some((
                RetryStatus::PermanentlyDisabled,
                PermanentFailureReason::MaxRetryDurationExceeded,
            ));
        }

        if record.total_attempts >= self.policy.max_total_attempts {
            let window = to_chrono(self.policy.failure_rate_evaluation_window);
            let failure_rate = if window > ChronoDuration::zero() {
                record.failure_rate_within(window, now)
            } else {
                None
            };

            return match failure_rate {
                Some(rate) if rate >= self.policy.failure_rate_disable_threshold => Some((
                    RetryStatus::PermanentlyDisabled,
                    PermanentFailureReason::HundredPercentFailureRate,
                )),
                _ => Some((
                    RetryStatus::MaxRetriesExceeded,
                    PermanentFailureReason::MaxAttemptsExceeded,
                )),
            };
        }

        None
    }

    // ========================================================================
    // Backoff
    // ========================================================================

    /// Delay before the next attempt, without jitter.
    ///
    /// `min(max_retry_interval, initial * multiplier^(attempt_count - 1))`,
    /// constant time in `attempt_count`.
    pub fn backoff_without_jitter(&self, attempt_count: u32) -> Duration {
        let initial = self.policy.initial_retry_interval.as_secs_f64();
        let max = self.policy.max_retry_interval.as_secs_f64();
        let exponent = attempt_count.saturating_sub(1).min(MAX_BACKOFF_EXPONENT);
        let interval = initial * self.policy.exponential_backoff_multiplier.powi(exponent as i32);
        Duration::try_from_secs_f64(interval.min(max)).unwrap_or(self.policy.max_retry_interval)
    }

    /// Delay before the next attempt with jitter applied, clamped to
    /// `[initial_retry_interval, max_retry_interval]`.
    pub fn calculate_backoff(&self, attempt_count: u32) -> Duration {
        let base = self.backoff_without_jitter(attempt_count).as_secs_f64();
        let jitter = self.policy.jitter_percentage / 100.0;

        let factor = if jitter > 0.0 {
            let mut rng = self.rng.lock().unwrap_or_else(|e| e.into_inner());
            1.0 + rng.gen_range(-jitter..=jitter)
        } else {
            1.0
        };

        let initial = self.policy.initial_retry_interval.as_secs_f64();
        let max = self.policy.max_retry_interval.as_secs_f64();
        Duration::try_from_secs_f64((base * factor).clamp(initial, max))
            .unwrap_or(self.policy.max_retry_interval)
    }

    // ========================================================================
    // Record Access
    // ========================================================================

    pub fn get_retry_record(&self, webhook_id: &str) -> Option<WebhookRetryRecord> {
        self.lock_state().records.get(webhook_id).cloned()
    }

    /// Remove a finished record. Pending records must run to completion.
    pub fn remove_retry_record(&self, webhook_id: &str) -> Result<WebhookRetryRecord, RetryError> {
        let mut state = self.lock_state();
        match state.records.get(webhook_id) {
            None => Err(RetryError::NotFound(webhook_id.to_string())),
            Some(record) if !record.is_terminal() => {
                Err(RetryError::NotTerminal(webhook_id.to_string()))
            }
            Some(_) => state
                .records
                .remove(webhook_id)
                .ok_or_else(|| RetryError::NotFound(webhook_id.to_string())),
        }
    }

    /// Drop finished records whose last activity is older than `retention`.
    ///
    /// Pending records are never purged. Returns how many records were removed.
    pub fn purge_finished_records(&self, retention: Duration) -> usize {
        let cutoff = self.clock.now() - to_chrono(retention);
        let mut state = self.lock_state();
        let before = state.records.len();
        state
            .records
            .retain(|_, record| !record.is_terminal() || record.last_activity() > cutoff);
        let removed = before - state.records.len();
        if removed > 0 {
            debug!(removed, remaining = state.records.len(), "Purged finished retry records");
        }
        removed
    }

    /// Ids currently waiting for a retry, in queue order.
    pub fn queued_webhook_ids(&self) -> Vec<String> {
        self.lock_state().queue.iter().cloned().collect()
    }

    pub fn queue_len(&self) -> usize {
        self.lock_state().queue.len()
    }

    pub fn is_processing(&self) -> bool {
        self.processing.load(Ordering::Acquire)
    }

    pub fn get_retry_statistics(&self) -> RetryStatistics {
        let state = self.lock_state();
        let mut stats = RetryStatistics {
            total_records: state.records.len(),
            queue_size: state.queue.len(),
            ..Default::default()
        };

        for record in state.records.values() {
            match record.retry_status {
                RetryStatus::Pending => stats.pending += 1,
                RetryStatus::Success => stats.success += 1,
                RetryStatus::MaxRetriesExceeded => stats.max_retries_exceeded += 1,
                RetryStatus::PermanentlyDisabled => stats.permanently_disabled += 1,
            }
        }

        stats
    }

    /// Drop every record and empty the queue.
    pub fn reset(&self) {
        let mut state = self.lock_state();
        state.records.clear();
        state.queue.clear();
    }

    fn lock_state(&self) -> std::sync::MutexGuard<'_, RetryState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl std::fmt::Debug for RetryManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RetryManager")
            .field("policy", &self.policy)
            .field("queue_size", &self.queue_len())
            .field("processing", &self.is_processing())
            .field("rate_limited", &self.rate_limiter.is_some())
            .finish_non_exhaustive()
    }
}

fn to_chrono(duration: Duration) -> ChronoDuration {
    ChronoDuration::from_std(duration).unwrap_or_else(|_| ChronoDuration::days(365 * 100))
}

fn join_error_to_executor_error(error: JoinError) -> ExecutorError {
    if !error.is_panic() {
        return ExecutorError::Other(format!("executor task failed: {}", error));
    }

    let payload = error.into_panic();
    let message = payload
        .downcast_ref::<&str>()
        .map(|s| s.to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic".to_string());
    ExecutorError::Panicked(message)
}
