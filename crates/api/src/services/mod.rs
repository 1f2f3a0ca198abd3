//! Outbound services.

pub mod webhook_delivery;

pub use webhook_delivery::HttpWebhookExecutor;
