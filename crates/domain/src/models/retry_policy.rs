//! Retry policy configuration for failed webhook deliveries.

use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

/// Errors raised when a retry policy is internally inconsistent.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum PolicyError {
    #[error("{0} must be greater than zero")]
    NonPositive(&'static str),

    #[error("initial_retry_interval ({initial:?}) cannot exceed max_retry_interval ({max:?})")]
    IntervalOrder { initial: Duration, max: Duration },

    #[error("exponential_backoff_multiplier must be at least 1.0, got {0}")]
    Multiplier(f64),

    #[error("{field} must be between 0 and 100, got {value}")]
    Percentage { field: &'static str, value: f64 },

    #[error("{field} cannot exceed {max:?}, got {value:?}")]
    TooLong {
        field: &'static str,
        value: Duration,
        max: Duration,
    },
}

/// Upper bound for every interval and duration in a policy.
pub const MAX_POLICY_DURATION: Duration = Duration::from_secs(365 * 24 * 3600);

/// Immutable retry policy.
///
/// Defaults: first retry after one minute, doubling up to one hour, ±10%
/// jitter, give up after 24 hours or 10 attempts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct WebhookRetryPolicyConfig {
    /// Delay before the first retry and lower bound of every delay.
    pub initial_retry_interval: Duration,
    /// Upper bound of every delay.
    pub max_retry_interval: Duration,
    pub exponential_backoff_multiplier: f64,
    /// Symmetric jitter applied to each delay, in percent.
    pub jitter_percentage: f64,
    /// Age (measured from the initial failure) after which a record is disabled.
    pub max_retry_duration: Duration,
    pub max_total_attempts: u32,
    /// Failure rate (percent) at or above which an exhausted record is
    /// classified as permanently failing.
    pub failure_rate_disable_threshold: f64,
    /// Attempts older than this are ignored when computing the failure rate.
    /// A zero window disables failure-rate classification.
    pub failure_rate_evaluation_window: Duration,
}

impl Default for WebhookRetryPolicyConfig {
    fn default() -> Self {
        Self {
            initial_retry_interval: Duration::from_secs(60),
            max_retry_interval: Duration::from_secs(3600),
            exponential_backoff_multiplier: 2.0,
            jitter_percentage: 10.0,
            max_retry_duration: Duration::from_secs(24 * 3600),
            max_total_attempts: 10,
            failure_rate_disable_threshold: 100.0,
            failure_rate_evaluation_window: Duration::from_secs(24 * 3600),
        }
    }
}

impl WebhookRetryPolicyConfig {
    /// Check the policy for values that would make backoff meaningless.
    pub fn validate(&self) -> Result<(), PolicyError> {
        if self.initial_retry_interval.is_zero() {
            return Err(PolicyError::NonPositive("initial_retry_interval"));
        }
        if self.max_retry_interval.is_zero() {
            return Err(PolicyError::NonPositive("max_retry_interval"));
        }
        for (field, value) in [
            ("max_retry_interval", self.max_retry_interval),
            ("max_retry_duration", self.max_retry_duration),
            (
                "failure_rate_evaluation_window",
                self.failure_rate_evaluation_window,
            ),
        ] {
            if value > MAX_POLICY_DURATION {
                return Err(PolicyError::TooLong {
                    field,
                    value,
                    max: MAX_POLICY_DURATION,
                });
            }
        }
        if self.initial_retry_interval > self.max_retry_interval {
            return Err(PolicyError::IntervalOrder {
                initial: self.initial_retry_interval,
                max: self.max_retry_interval,
            });
        }
        if !self.exponential_backoff_multiplier.is_finite()
            || self.exponential_backoff_multiplier < 1.0
        {
            return Err(PolicyError::Multiplier(self.exponential_backoff_multiplier));
        }
        if !(0.0..=100.0).contains(&self.jitter_percentage) {
            return Err(PolicyError::Percentage {
                field: "jitter_percentage",
                value: self.jitter_percentage,
            });
        }
        if self.max_retry_duration.is_zero() {
            return Err(PolicyError::NonPositive("max_retry_duration"));
        }
        if self.max_total_attempts == 0 {
            return Err(PolicyError::NonPositive("max_total_attempts"));
        }
        if !(0.0..=100.0).contains(&self.failure_rate_disable_threshold) {
            return Err(PolicyError::Percentage {
                field: "failure_rate_disable_threshold",
                value: self.failure_rate_disable_threshold,
            });
        }
        Ok(())
    }
}
