//! Inbound webhook verification.
//!
//! A request is accepted only if, in order:
//! 1. the signature header is present and in canonical `sha256=<base64>` form
//! 2. the HMAC-SHA256 of the raw body matches (constant-time comparison)
//! 3. the optional timestamp header is within tolerance of now
//! 4. the signature has not been consumed before (replay store)

use chrono::Duration as ChronoDuration;
use http::HeaderMap;
use shared::crypto::{self, CryptoError};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, warn};

use super::clock::{Clock, SystemClock};
use super::replay_store::ReplayStore;

pub const DEFAULT_SIGNATURE_HEADER: &str = "x-webhook-signature";
pub const DEFAULT_TIMESTAMP_HEADER: &str = "x-webhook-timestamp";
pub const DEFAULT_TIMESTAMP_TOLERANCE: Duration = Duration::from_secs(300);

/// Replay TTL for requests that carry no timestamp header.
pub const DEFAULT_REPLAY_TTL_FLOOR: Duration = Duration::from_secs(300);

/// Reasons an inbound webhook is rejected.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum VerificationError {
    #[error("missing signature")]
    MissingSignature,

    #[error("unsupported signature algorithm: {0}")]
    UnsupportedAlgorithm(String),

    #[error("malformed signature: {0}")]
    MalformedSignature(String),

    #[error("signature mismatch")]
    SignatureMismatch,

    #[error("invalid timestamp: {0}")]
    InvalidTimestamp(String),

    #[error("timestamp outside tolerance: skew {skew_secs}s exceeds {tolerance_secs}s")]
    TimestampOutOfTolerance { skew_secs: i64, tolerance_secs: u64 },

    #[error("replay detected")]
    ReplayDetected,

    #[error("verifier misconfigured: {0}")]
    Configuration(String),
}

impl VerificationError {
    /// Stable machine-readable reason code.
    pub fn code(&self) -> &'static str {
        match self {
            VerificationError::MissingSignature => "missing_signature",
            VerificationError::UnsupportedAlgorithm(_) => "unsupported_algorithm",
            VerificationError::MalformedSignature(_) => "malformed_signature",
            VerificationError::SignatureMismatch => "signature_mismatch",
            VerificationError::InvalidTimestamp(_) => "invalid_timestamp",
            VerificationError::TimestampOutOfTolerance { .. } => "timestamp_out_of_tolerance",
            VerificationError::ReplayDetected => "replay_detected",
            VerificationError::Configuration(_) => "verifier_misconfigured",
        }
    }
}

impl From<CryptoError> for VerificationError {
    fn from(err: CryptoError) -> Self {
        match err {
            CryptoError::Empty => VerificationError::MissingSignature,
            CryptoError::UnsupportedAlgorithm(alg) => VerificationError::UnsupportedAlgorithm(alg),
            CryptoError::InvalidKey(msg) => VerificationError::Configuration(msg),
            other => VerificationError::MalformedSignature(other.to_string()),
        }
    }
}

/// Verifier settings.
#[derive(Debug, Clone)]
pub struct VerifierConfig {
    /// Shared HMAC secret.
    pub secret: String,
    pub signature_header: String,
    pub timestamp_header: String,
    pub timestamp_tolerance: Duration,
    pub replay_ttl_floor: Duration,
}

impl VerifierConfig {
    pub fn new(secret: impl Into<String>) -> Self {
        Self {
            secret: secret.into(),
            signature_header: DEFAULT_SIGNATURE_HEADER.to_string(),
            timestamp_header: DEFAULT_TIMESTAMP_HEADER.to_string(),
            timestamp_tolerance: DEFAULT_TIMESTAMP_TOLERANCE,
            replay_ttl_floor: DEFAULT_REPLAY_TTL_FLOOR,
        }
    }
}

/// Signature, timestamp and replay verifier for inbound webhooks.
pub struct SecurityVerifier {
    config: VerifierConfig,
    replay_store: Arc<ReplayStore>,
    clock: Arc<dyn Clock>,
}

impl SecurityVerifier {
    pub fn new(config: VerifierConfig, replay_store: Arc<ReplayStore>) -> Self {
        Self::with_clock(config, replay_store, Arc::new(SystemClock))
    }

    pub fn with_clock(
        config: VerifierConfig,
        replay_store: Arc<ReplayStore>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            config,
            replay_store,
            clock,
        }
    }

    pub fn config(&self) -> &VerifierConfig {
        &self.config
    }

    pub fn replay_store(&self) -> &Arc<ReplayStore> {
        &self.replay_store
    }

    /// Verify using the configured timestamp tolerance.
    pub fn verify(&self, payload: &[u8], headers: &HeaderMap) -> Result<(), VerificationError> {
        self.verify_webhook_request(payload, headers, self.config.timestamp_tolerance)
    }

    /// Verify an inbound request carried in an HTTP header map.
    pub fn verify_webhook_request(
        &self,
        payload: &[u8],
        headers: &HeaderMap,
        timestamp_tolerance: Duration,
    ) -> Result<(), VerificationError> {
        let mut signatures = headers.get_all(self.config.signature_header.as_str()).iter();
        let signature = match (signatures.next(), signatures.next()) {
            (None, _) => None,
            (Some(value), None) => match value.to_str() {
                Ok(value) => Some(value),
                Err(_) => {
                    return self.reject(
                        payload,
                        VerificationError::MalformedSignature(
                            "non-ASCII header value".to_string(),
                        ),
                    )
                }
            },
            (Some(_), Some(_)) => {
                return self.reject(
                    payload,
                    VerificationError::MalformedSignature(
                        "multiple signature headers".to_string(),
                    ),
                )
            }
        };

        let timestamp = match headers.get(self.config.timestamp_header.as_str()) {
            Some(value) => match value.to_str() {
                Ok(value) => Some(value),
                Err(_) => {
                    return self.reject(
                        payload,
                        VerificationError::InvalidTimestamp("non-ASCII header value".to_string()),
                    )
                }
            },
            None => None,
        };

        self.verify_parts(payload, signature, timestamp, timestamp_tolerance)
    }

    /// Verify a request whose headers arrive as a plain string map.
    ///
    /// Header names are matched case-insensitively.
    pub fn verify_with_header_map(
        &self,
        payload: &[u8],
        headers: &HashMap<String, String>,
        timestamp_tolerance: Duration,
    ) -> Result<(), VerificationError> {
        let lookup = |name: &str| {
            headers
                .iter()
                .find(|(key, _)| key.eq_ignore_ascii_case(name))
                .map(|(_, value)| value.as_str())
        };

        self.verify_parts(
            payload,
            lookup(&self.config.signature_header),
            lookup(&self.config.timestamp_header),
            timestamp_tolerance,
        )
    }

    fn verify_parts(
        &self,
        payload: &[u8],
        signature_header: Option<&str>,
        timestamp_header: Option<&str>,
        timestamp_tolerance: Duration,
    ) -> Result<(), VerificationError> {
        if self.config.secret.is_empty() {
            return self.reject(
                payload,
                VerificationError::Configuration("empty webhook secret".to_string()),
            );
        }

        let signature_header = match signature_header {
            Some(value) if !value.is_empty() => value,
            _ => return self.reject(payload, VerificationError::MissingSignature),
        };

        let decoded = match crypto::parse_signature_header(signature_header) {
            Ok(decoded) => decoded,
            Err(e) => return self.reject(payload, e.into()),
        };

        match crypto::verify_signature(&self.config.secret, payload, &decoded) {
            Ok(true) => {}
            Ok(false) => return self.reject(payload, VerificationError::SignatureMismatch),
            Err(e) => return self.reject(payload, e.into()),
        }

        let now = self.clock.now();

        if let Some(raw) = timestamp_header {
            let timestamp: i64 = match raw.parse() {
                Ok(ts) => ts,
                Err(_) => {
                    return self.reject(
                        payload,
                        VerificationError::InvalidTimestamp(format!("not epoch seconds: {raw:?}")),
                    )
                }
            };

            let skew_secs = now.timestamp().saturating_sub(timestamp);
            if skew_secs.unsigned_abs() > timestamp_tolerance.as_secs() {
                return self.reject(
                    payload,
                    VerificationError::TimestampOutOfTolerance {
                        skew_secs,
                        tolerance_secs: timestamp_tolerance.as_secs(),
                    },
                );
            }
        }

        let ttl = if timestamp_header.is_some() {
            timestamp_tolerance
        } else {
            self.config.replay_ttl_floor
        };
        let ttl = ChronoDuration::from_std(ttl).unwrap_or_else(|_| ChronoDuration::days(1));

        if !self.replay_store.check_and_record(signature_header, now, ttl) {
            return self.reject(payload, VerificationError::ReplayDetected);
        }

        debug!(
            payload = %crypto::payload_fingerprint(payload),
            has_timestamp = timestamp_header.is_some(),
            "Webhook request verified"
        );
        Ok(())
    }

    fn reject(&self, payload: &[u8], error: VerificationError) -> Result<(), VerificationError> {
        warn!(
            reason = error.code(),
            payload = %crypto::payload_fingerprint(payload),
            error = %error,
            "Webhook request rejected"
        );
        Err(error)
    }
}

impl std::fmt::Debug for SecurityVerifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SecurityVerifier")
            .field("signature_header", &self.config.signature_header)
            .field("timestamp_header", &self.config.timestamp_header)
            .field("timestamp_tolerance", &self.config.timestamp_tolerance)
            .field("replay_entries", &self.replay_store.len())
            .finish_non_exhaustive()
    }
}
