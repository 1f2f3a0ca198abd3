//! Replay protection for inbound webhooks.
//!
//! Remembers signatures of accepted requests until their TTL elapses.
//! In-memory only; entries are lost on restart.

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use std::collections::HashMap;
use std::sync::Mutex;
use tracing::debug;

/// Above this many entries an insert first purges expired ones.
const MAX_ENTRIES_BEFORE_PURGE: usize = 10_000;

#[derive(Debug, Clone, Copy)]
struct ReplayEntry {
    accepted_at: DateTime<Utc>,
    expires_at: DateTime<Utc>,
}

/// Store of consumed signatures with per-entry expiry.
#[derive(Debug, Default)]
pub struct ReplayStore {
    seen: Mutex<HashMap<String, ReplayEntry>>,
}

impl ReplayStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record `signature` unless it was already accepted and is unexpired.
    ///
    /// Returns `true` if the signature is new (process it), `false` on replay.
    /// Lookup and insert happen under one lock.
    pub fn check_and_record(&self, signature: &str, now: DateTime<Utc>, ttl: ChronoDuration) -> bool {
        let mut seen = self.seen.lock().unwrap_or_else(|e| e.into_inner());

        if seen.len() >= MAX_ENTRIES_BEFORE_PURGE {
            seen.retain(|_, entry| entry.expires_at > now);
        }

        if let Some(entry) = seen.get(signature) {
            if entry.expires_at > now {
                debug!(
                    accepted_at = %entry.accepted_at,
                    expires_at = %entry.expires_at,
                    "Replay store hit"
                );
                return false;
            }
        }

        seen.insert(
            signature.to_string(),
            ReplayEntry {
                accepted_at: now,
                expires_at: now + ttl,
            },
        );
        true
    }

    /// Whether `signature` is currently remembered.
    pub fn contains(&self, signature: &str, now: DateTime<Utc>) -> bool {
        self.seen
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(signature)
            .map(|entry| entry.expires_at > now)
            .unwrap_or(false)
    }

    /// Drop expired entries and return how many were removed.
    pub fn purge_expired(&self, now: DateTime<Utc>) -> usize {
        let mut seen = self.seen.lock().unwrap_or_else(|e| e.into_inner());
        let before = seen.len();
        seen.retain(|_, entry| entry.expires_at > now);
        before - seen.len()
    }

    pub fn len(&self) -> usize {
        self.seen.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn reset(&self) {
        self.seen.lock().unwrap_or_else(|e| e.into_inner()).clear();
    }
}
