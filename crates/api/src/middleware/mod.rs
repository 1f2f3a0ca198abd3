//! HTTP middleware components.

pub mod logging;
pub mod metrics;
pub mod rate_limit;

pub use metrics::{init_metrics, metrics_handler, metrics_middleware};
pub use rate_limit::{inbound_rate_limit_middleware, InboundRateLimiter};
