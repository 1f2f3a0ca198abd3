//! Metrics emitted by the retry manager.

use metrics::{counter, gauge, histogram};
use std::sync::Mutex;
use std::time::Duration;

use crate::models::{RetryQueueSummary, RetryStatus};

/// Retry lifecycle event.
#[derive(Debug, Clone, PartialEq)]
pub enum RetryMetricEvent {
    /// A retry chain was created. `disabled` is set for an initial 410.
    Scheduled { webhook_id: String, disabled: bool },
    /// An attempt failed; `outcome` is the record status afterwards.
    AttemptFailed {
        webhook_id: String,
        status_code: Option<u16>,
        outcome: RetryStatus,
    },
    Succeeded { webhook_id: String, attempts: u32 },
    QueueProcessed {
        summary: RetryQueueSummary,
        queue_size: usize,
        duration: Duration,
    },
}

impl RetryMetricEvent {
    pub fn name(&self) -> &'static str {
        match self {
            RetryMetricEvent::Scheduled { .. } => "webhook_retry_scheduled",
            RetryMetricEvent::AttemptFailed { .. } => "webhook_retry_failed",
            RetryMetricEvent::Succeeded { .. } => "webhook_retry_success",
            RetryMetricEvent::QueueProcessed { .. } => "webhook_retry_queue_processed",
        }
    }
}

/// Sink for retry metrics.
pub trait RetryMetrics: Send + Sync {
    fn record(&self, event: RetryMetricEvent);
}

/// Forwards events to the global `metrics` recorder (Prometheus in the server).
#[derive(Debug, Default, Clone, Copy)]
pub struct RecorderRetryMetrics;

impl RetryMetrics for RecorderRetryMetrics {
    fn record(&self, event: RetryMetricEvent) {
        match event {
            RetryMetricEvent::Scheduled { disabled, .. } => {
                counter!(
                    "webhook_retry_scheduled_total",
                    "disabled" => disabled.to_string()
                )
                .increment(1);
            }
            RetryMetricEvent::AttemptFailed {
                status_code,
                outcome,
                ..
            } => {
                let status = status_code
                    .map(|c| c.to_string())
                    .unwrap_or_else(|| "none".to_string());
                counter!(
                    "webhook_retry_failed_total",
                    "status_code" => status,
                    "outcome" => outcome.as_str()
                )
                .increment(1);
            }
            RetryMetricEvent::Succeeded { attempts, .. } => {
                counter!("webhook_retry_success_total").increment(1);
                histogram!("webhook_retry_attempts_to_success").record(f64::from(attempts));
            }
            RetryMetricEvent::QueueProcessed {
                summary,
                queue_size,
                duration,
            } => {
                counter!(
                    "webhook_retry_queue_runs_total",
                    "status" => format!("{:?}", summary.status).to_lowercase()
                )
                .increment(1);
                counter!("webhook_retry_processed_total").increment(u64::from(summary.processed));
                gauge!("webhook_retry_queue_size").set(queue_size as f64);
                histogram!("webhook_retry_queue_duration_seconds").record(duration.as_secs_f64());
            }
        }
    }
}

/// Keeps every event in memory; used by tests and diagnostics.
#[derive(Debug, Default)]
pub struct InMemoryRetryMetrics {
    events: Mutex<Vec<RetryMetricEvent>>,
}

impl InMemoryRetryMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<RetryMetricEvent> {
        self.events.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    /// Number of recorded events with the given name.
    pub fn count(&self, name: &str) -> usize {
        self.events
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .filter(|e| e.name() == name)
            .count()
    }
}

impl RetryMetrics for InMemoryRetryMetrics {
    fn record(&self, event: RetryMetricEvent) {
        self.events
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_names() {
        let event = RetryMetricEvent::Succeeded {
            webhook_id: "wh".into(),
            attempts: 2,
        };
        assert_eq!(event.name(), "webhook_retry_success");
    }

    #[test]
    fn test_in_memory_counts_by_name() {
        let metrics = InMemoryRetryMetrics::new();
        metrics.record(RetryMetricEvent::Scheduled {
            webhook_id: "a".into(),
            disabled: false,
        });
        metrics.record(RetryMetricEvent::Scheduled {
            webhook_id: "b".into(),
            disabled: true,
        });
        assert_eq!(metrics.count("webhook_retry_scheduled"), 2);
        assert_eq!(metrics.count("webhook_retry_success"), 0);
    }

    #[test]
    fn test_recorder_without_installed_recorder_is_noop() {
        RecorderRetryMetrics.record(RetryMetricEvent::Succeeded {
            webhook_id: "wh".into(),
            attempts: 1,
        });
    }
}
