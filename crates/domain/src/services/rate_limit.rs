//! Outbound rate limiting.
//!
//! Every outbound call reserves the next free slot, spaced `1 / rps` apart,
//! then sleeps until that slot. Slots are handed out under a FIFO mutex so
//! concurrent callers proceed in arrival order and none is starved.

use std::collections::VecDeque;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::debug;

use crate::models::RateLimitStatus;

/// Reporting window for the observed call rate.
pub const RATE_WINDOW: Duration = Duration::from_secs(60);

#[derive(Debug, Error, Clone, PartialEq)]
pub enum RateLimitError {
    #[error("requests_per_second must be positive and finite, got {0}")]
    InvalidRate(f64),
}

#[derive(Debug, Default)]
struct LimiterState {
    /// Earliest instant the next caller may proceed.
    next_slot: Option<Instant>,
    /// Slots handed out within the reporting window.
    calls: VecDeque<Instant>,
}

impl LimiterState {
    fn prune(&mut self, now: Instant) {
        while let Some(front) = self.calls.front() {
            if now.saturating_duration_since(*front) >= RATE_WINDOW {
                self.calls.pop_front();
            } else {
                break;
            }
        }
    }
}

/// Sliding-window gate for calls to the form provider's API.
#[derive(Debug)]
pub struct RateLimitValidator {
    requests_per_second: f64,
    min_interval: Duration,
    state: Mutex<LimiterState>,
}

impl RateLimitValidator {
    pub fn new(requests_per_second: f64) -> Result<Self, RateLimitError> {
        if !requests_per_second.is_finite() || requests_per_second <= 0.0 {
            return Err(RateLimitError::InvalidRate(requests_per_second));
        }
        // Rates so small that the spacing overflows a Duration are rejected too.
        let min_interval = Duration::try_from_secs_f64(1.0 / requests_per_second)
            .map_err(|_| RateLimitError::InvalidRate(requests_per_second))?;

        Ok(Self {
            requests_per_second,
            min_interval,
            state: Mutex::new(LimiterState::default()),
        })
    }

    pub fn requests_per_second(&self) -> f64 {
        self.requests_per_second
    }

    /// Minimum spacing between two calls.
    pub fn min_interval(&self) -> Duration {
        self.min_interval
    }

    /// Wait until a call may be issued without exceeding the configured rate.
    pub async fn enforce_rate_limit(&self) {
        let slot = {
            let mut state = self.state.lock().await;
            let now = Instant::now();
            let slot = match state.next_slot {
                Some(next) if next > now => next,
                _ => now,
            };
            state.next_slot = Some(slot + self.min_interval);
            state.prune(now);
            state.calls.push_back(slot);
            slot
        };

        let now = Instant::now();
        if slot <= now {
            return;
        }

        debug!(
            wait_ms = (slot - now).as_millis() as u64,
            requests_per_second = self.requests_per_second,
            "Rate limit delaying outbound call"
        );
        tokio::time::sleep_until(slot).await;
    }

    /// Observed rate over the last 60 seconds against the configured ceiling.
    pub async fn get_rate_limit_status(&self) -> RateLimitStatus {
        let mut state = self.state.lock().await;
        let now = Instant::now();
        state.prune(now);
        let calls = state.calls.iter().filter(|slot| **slot <= now).count();
        RateLimitStatus::from_rates(
            self.requests_per_second,
            calls as f64 / RATE_WINDOW.as_secs_f64(),
        )
    }

    /// Number of calls currently in the reporting window.
    pub async fn window_len(&self) -> usize {
        let mut state = self.state.lock().await;
        state.prune(Instant::now());
        state.calls.len()
    }

    pub async fn reset(&self) {
        let mut state = self.state.lock().await;
        *state = LimiterState::default();
    }
}
