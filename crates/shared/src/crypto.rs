//! Cryptographic utilities for webhook payload signing and verification.
//!
//! Signatures are carried as `sha256=<base64 HMAC-SHA256>`. Parsing is strict:
//! any deviation from the canonical form is rejected rather than normalized.

use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use hmac::{Hmac, Mac};
use sha2::{Digest, Sha256};
use thiserror::Error;

/// Prefix of every signature header value.
pub const SIGNATURE_PREFIX: &str = "sha256=";

/// Length in bytes of a decoded HMAC-SHA256 signature.
pub const SIGNATURE_LEN: usize = 32;

type HmacSha256 = Hmac<Sha256>;

/// Errors produced while parsing or computing signatures.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CryptoError {
    #[error("Signature is empty")]
    Empty,

    #[error("Unsupported signature algorithm: {0}")]
    UnsupportedAlgorithm(String),

    #[error("Signature is missing the sha256= prefix")]
    MissingPrefix,

    #[error("Signature is not canonical base64: {0}")]
    InvalidEncoding(String),

    #[error("Signature has wrong length: expected {SIGNATURE_LEN} bytes, got {0}")]
    InvalidLength(usize),

    #[error("Invalid HMAC key: {0}")]
    InvalidKey(String),
}

/// Computes the raw HMAC-SHA256 of `payload` keyed with `secret`.
pub fn compute_hmac(secret: &[u8], payload: &[u8]) -> Result<Vec<u8>, CryptoError> {
    let mut mac =
        HmacSha256::new_from_slice(secret).map_err(|e| CryptoError::InvalidKey(e.to_string()))?;
    mac.update(payload);
    Ok(mac.finalize().into_bytes().to_vec())
}

/// Signs `payload` and returns the full header value (`sha256=<base64>`).
pub fn sign_payload(secret: &str, payload: &[u8]) -> Result<String, CryptoError> {
    let digest = compute_hmac(secret.as_bytes(), payload)?;
    Ok(format!("{}{}", SIGNATURE_PREFIX, BASE64.encode(digest)))
}

/// Parses a signature header value into the decoded HMAC bytes.
///
/// Rejects other algorithm prefixes, case variants, double prefixes,
/// whitespace, URL-encoding, non-canonical padding and wrong lengths.
pub fn parse_signature_header(value: &str) -> Result<Vec<u8>, CryptoError> {
    if value.is_empty() {
        return Err(CryptoError::Empty);
    }

    let encoded = match value.strip_prefix(SIGNATURE_PREFIX) {
        Some(rest) => rest,
        None => return Err(classify_prefix(value)),
    };

    if encoded.is_empty() {
        return Err(CryptoError::InvalidLength(0));
    }

    // The standard engine already rejects these, but checking up front keeps
    // the error message specific.
    if encoded.chars().any(|c| c.is_whitespace()) {
        return Err(CryptoError::InvalidEncoding(
            "embedded whitespace".to_string(),
        ));
    }

    let decoded = BASE64
        .decode(encoded)
        .map_err(|e| CryptoError::InvalidEncoding(e.to_string()))?;

    if decoded.len() != SIGNATURE_LEN {
        return Err(CryptoError::InvalidLength(decoded.len()));
    }

    Ok(decoded)
}

/// Verifies decoded signature bytes against `payload` in constant time.
pub fn verify_signature(
    secret: &str,
    payload: &[u8],
    signature: &[u8],
) -> Result<bool, CryptoError> {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .map_err(|e| CryptoError::InvalidKey(e.to_string()))?;
    mac.update(payload);
    Ok(mac.verify_slice(signature).is_ok())
}

/// Computes SHA-256 of the input and returns it as a hex string.
pub fn sha256_hex(input: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(input);
    hex::encode(hasher.finalize())
}

/// Short payload fingerprint for log fields (first 12 hex chars of SHA-256).
pub fn payload_fingerprint(payload: &[u8]) -> String {
    let mut digest = sha256_hex(payload);
    digest.truncate(12);
    digest
}

fn classify_prefix(value: &str) -> CryptoError {
    match value.split_once('=') {
        Some((algorithm, _))
            if !algorithm.is_empty()
                && algorithm.chars().all(|c| c.is_ascii_alphanumeric() || c == '-') =>
        {
            CryptoError::UnsupportedAlgorithm(algorithm.to_string())
        }
        _ => CryptoError::MissingPrefix,
    }
}
