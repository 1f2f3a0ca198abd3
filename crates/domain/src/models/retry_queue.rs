//! Results reported by retry queue processing.

use serde::Serialize;

/// Outcome of a `process_retry_queue` call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ProcessingStatus {
    Completed,
    /// Another drain was running; nothing was touched.
    AlreadyProcessing,
}

/// Counters for a single queue drain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub struct RetryQueueSummary {
    pub status: ProcessingStatus,
    /// Records attempted in this run.
    pub processed: u32,
    pub successful: u32,
    /// Failed attempts, including ones that ended the chain.
    pub failed: u32,
    /// Records that reached MAX_RETRIES_EXCEEDED or PERMANENTLY_DISABLED.
    pub disabled: u32,
    /// Executor errors and anomalies, one line per record.
    pub errors: Vec<String>,
}

impl RetryQueueSummary {
    pub fn completed() -> Self {
        Self {
            status: ProcessingStatus::Completed,
            processed: 0,
            successful: 0,
            failed: 0,
            disabled: 0,
            errors: Vec::new(),
        }
    }

    pub fn already_processing() -> Self {
        Self {
            status: ProcessingStatus::AlreadyProcessing,
            ..Self::completed()
        }
    }
}

/// Snapshot of the retry store.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub struct RetryStatistics {
    pub total_records: usize,
    pub queue_size: usize,
    pub pending: usize,
    pub success: usize,
    pub max_retries_exceeded: usize,
    pub permanently_disabled: usize,
}
