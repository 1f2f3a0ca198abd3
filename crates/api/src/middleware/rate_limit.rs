//! Inbound rate limiting for the webhook endpoint.
//!
//! A single GCRA limiter shared by every caller of the route. Form providers
//! deliver from a small pool of addresses, so per-client keys buy nothing.

use axum::{
    body::Body,
    extract::State,
    http::Request,
    middleware::Next,
    response::{IntoResponse, Response},
};
use governor::{
    clock::{Clock, DefaultClock},
    state::{InMemoryState, NotKeyed},
    Quota, RateLimiter as GovRateLimiter,
};
use std::num::NonZeroU32;
use tracing::warn;

use crate::app::AppState;
use crate::error::ApiError;

type DirectRateLimiter = GovRateLimiter<NotKeyed, InMemoryState, DefaultClock>;

/// Requests-per-minute gate in front of the webhook route.
pub struct InboundRateLimiter {
    limiter: DirectRateLimiter,
    clock: DefaultClock,
    per_minute: NonZeroU32,
}

impl InboundRateLimiter {
    /// Returns `None` when `per_minute` is 0, meaning no limit.
    pub fn new(per_minute: u32) -> Option<Self> {
        let per_minute = NonZeroU32::new(per_minute)?;
        Some(Self {
            limiter: GovRateLimiter::direct(Quota::per_minute(per_minute)),
            clock: DefaultClock::default(),
            per_minute,
        })
    }

    pub fn per_minute(&self) -> u32 {
        self.per_minute.get()
    }

    /// `Err` carries the Retry-After value in whole seconds, at least 1.
    pub fn check(&self) -> Result<(), u64> {
        self.limiter.check().map_err(|not_until| {
            let wait = not_until.wait_time_from(self.clock.now());
            wait.as_secs().max(1)
        })
    }
}

impl std::fmt::Debug for InboundRateLimiter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InboundRateLimiter")
            .field("per_minute", &self.per_minute)
            .finish()
    }
}

/// Rejects with 429 and `Retry-After` once the route's quota is spent.
pub async fn inbound_rate_limit_middleware(
    State(state): State<AppState>,
    req: Request<Body>,
    next: Next,
) -> Response {
    if let Some(limiter) = &state.inbound_limiter {
        if let Err(retry_after_secs) = limiter.check() {
            warn!(
                path = %req.uri().path(),
                limit_per_minute = limiter.per_minute(),
                retry_after_secs = retry_after_secs,
                "Inbound webhook rate limit exceeded"
            );
            return ApiError::RateLimited { retry_after_secs }.into_response();
        }
    }

    next.run(req).await
}
