//! Form webhook gateway HTTP service.
//!
//! Verifies inbound form webhooks, forwards accepted events, and retries
//! failed deliveries in the background.

pub mod app;
pub mod config;
pub mod error;
pub mod jobs;
pub mod middleware;
pub mod routes;
pub mod services;
