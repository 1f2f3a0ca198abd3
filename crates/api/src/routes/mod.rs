//! HTTP route handlers.

pub mod health;
pub mod retries;
pub mod webhooks;
