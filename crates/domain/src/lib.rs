//! Domain layer for the form webhook gateway.
//!
//! This crate contains:
//! - Retry records, retry policy and rate limit models
//! - The signature/replay verifier, retry manager and rate limit validator
//! - The executor and metrics seams those services are built against

pub mod models;
pub mod services;
