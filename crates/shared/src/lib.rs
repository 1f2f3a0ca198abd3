//! Shared utilities for the form webhook gateway.
//!
//! This crate provides functionality used across the other crates:
//! - HMAC-SHA256 signature computation and strict `sha256=` header parsing
//! - Payload fingerprinting for logs

pub mod crypto;
