//! Webhook retry record domain model.

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

// ============================================================================
// Retry Status
// ============================================================================

/// Lifecycle state of a retry chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RetryStatus {
    Pending,
    Success,
    MaxRetriesExceeded,
    PermanentlyDisabled,
}

impl RetryStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RetryStatus::Pending => "PENDING",
            RetryStatus::Success => "SUCCESS",
            RetryStatus::MaxRetriesExceeded => "MAX_RETRIES_EXCEEDED",
            RetryStatus::PermanentlyDisabled => "PERMANENTLY_DISABLED",
        }
    }

    /// Terminal records are never mutated again.
    pub fn is_terminal(&self) -> bool {
        !matches!(self, RetryStatus::Pending)
    }

    /// Check if transition to target state is valid.
    pub fn can_transition_to(&self, target: RetryStatus) -> bool {
        matches!(
            (self, target),
            (RetryStatus::Pending, RetryStatus::Pending)
                | (RetryStatus::Pending, RetryStatus::Success)
                | (RetryStatus::Pending, RetryStatus::MaxRetriesExceeded)
                | (RetryStatus::Pending, RetryStatus::PermanentlyDisabled)
        )
    }
}

impl fmt::Display for RetryStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// ============================================================================
// Permanent Failure Reason
// ============================================================================

/// Why a retry chain was given up on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PermanentFailureReason {
    #[serde(rename = "HTTP_410_GONE")]
    Http410Gone,
    MaxRetryDurationExceeded,
    HundredPercentFailureRate,
    MaxAttemptsExceeded,
}

impl PermanentFailureReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            PermanentFailureReason::Http410Gone => "HTTP_410_GONE",
            PermanentFailureReason::MaxRetryDurationExceeded => "MAX_RETRY_DURATION_EXCEEDED",
            PermanentFailureReason::HundredPercentFailureRate => "HUNDRED_PERCENT_FAILURE_RATE",
            PermanentFailureReason::MaxAttemptsExceeded => "MAX_ATTEMPTS_EXCEEDED",
        }
    }
}

impl fmt::Display for PermanentFailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// ============================================================================
// Retry Record
// ============================================================================

/// A single delivery attempt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct RetryAttempt {
    pub timestamp: DateTime<Utc>,
    /// Absent when the executor failed before receiving a response.
    pub status_code: Option<u16>,
    pub success: bool,
    pub error_message: Option<String>,
}

/// Retry state for one logical webhook delivery.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct WebhookRetryRecord {
    pub webhook_id: String,
    pub form_id: String,
    pub webhook_url: String,
    pub initial_failure_time: DateTime<Utc>,
    pub initial_failure_reason: String,
    pub initial_status_code: Option<u16>,
    pub next_retry_time: Option<DateTime<Utc>>,
    pub retry_status: RetryStatus,
    pub permanent_failure_reason: Option<PermanentFailureReason>,
    pub total_attempts: u32,
    pub successful_attempts: u32,
    pub failed_attempts: u32,
    /// Append-only attempt history.
    pub attempts: Vec<RetryAttempt>,
}

impl WebhookRetryRecord {
    /// Create a pending record whose first retry is due at `next_retry_time`.
    pub fn pending(
        webhook_id: impl Into<String>,
        form_id: impl Into<String>,
        webhook_url: impl Into<String>,
        initial_failure_reason: impl Into<String>,
        initial_status_code: Option<u16>,
        now: DateTime<Utc>,
        next_retry_time: DateTime<Utc>,
    ) -> Self {
        Self {
            webhook_id: webhook_id.into(),
            form_id: form_id.into(),
            webhook_url: webhook_url.into(),
            initial_failure_time: now,
            initial_failure_reason: initial_failure_reason.into(),
            initial_status_code,
            next_retry_time: Some(next_retry_time),
            retry_status: RetryStatus::Pending,
            permanent_failure_reason: None,
            total_attempts: 0,
            successful_attempts: 0,
            failed_attempts: 0,
            attempts: Vec::new(),
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.retry_status.is_terminal()
    }

    /// Whether the record is pending and its retry time has arrived.
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.retry_status == RetryStatus::Pending
            && self.next_retry_time.map(|t| t <= now).unwrap_or(false)
    }

    /// Time elapsed since the initial failure.
    pub fn age(&self, now: DateTime<Utc>) -> ChronoDuration {
        now - self.initial_failure_time
    }

    /// Most recent attempt time, or the initial failure when none ran yet.
    pub fn last_activity(&self) -> DateTime<Utc> {
        self.attempts
            .last()
            .map(|a| a.timestamp)
            .unwrap_or(self.initial_failure_time)
    }

    /// Append a successful attempt and mark the chain complete.
    ///
    /// Returns `false` and leaves the record untouched when it is already terminal.
    pub fn record_success(&mut self, timestamp: DateTime<Utc>, status_code: u16) -> bool {
        if !self.retry_status.can_transition_to(RetryStatus::Success) {
            return false;
        }
        self.attempts.push(RetryAttempt {
            timestamp,
            status_code: Some(status_code),
            success: true,
            error_message: None,
        });
        self.total_attempts += 1;
        self.successful_attempts += 1;
        self.finish(RetryStatus::Success, None)
    }

    /// Append a failed attempt. The status is left for the caller to decide.
    pub fn record_failure(
        &mut self,
        timestamp: DateTime<Utc>,
        status_code: Option<u16>,
        error_message: Option<String>,
    ) {
        self.attempts.push(RetryAttempt {
            timestamp,
            status_code,
            success: false,
            error_message,
        });
        self.total_attempts += 1;
        self.failed_attempts += 1;
    }

    /// Move the record into a terminal state.
    ///
    /// Returns `false` without changes when `status` is not terminal or the
    /// record has already finished.
    pub fn finish(&mut self, status: RetryStatus, reason: Option<PermanentFailureReason>) -> bool {
        if !status.is_terminal() || !self.retry_status.can_transition_to(status) {
            return false;
        }
        self.retry_status = status;
        self.permanent_failure_reason = reason;
        self.next_retry_time = None;
        true
    }

    /// Failure rate in percent over attempts newer than `window`.
    ///
    /// Returns `None` when no attempt falls inside the window.
    pub fn failure_rate_within(&self, window: ChronoDuration, now: DateTime<Utc>) -> Option<f64> {
        let cutoff = now - window;
        let (failed, total) = self
            .attempts
            .iter()
            .rev()
            .take_while(|a| a.timestamp > cutoff)
            .fold((0u32, 0u32), |(failed, total), a| {
                (failed + u32::from(!a.success), total + 1)
            });

        if total == 0 {
            None
        } else {
            Some(f64::from(failed) * 100.0 / f64::from(total))
        }
    }
}
