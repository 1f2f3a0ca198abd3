use axum::{
    extract::DefaultBodyLimit,
    middleware,
    routing::{get, post},
    Router,
};
use domain::services::{
    RateLimitValidator, ReplayStore, RetryManager, SecurityVerifier, WebhookExecutor,
};
use std::sync::Arc;
use std::time::Duration;
use tower_http::{timeout::TimeoutLayer, trace::TraceLayer};

use crate::config::Config;
use crate::error::StartupError;
use crate::middleware::{
    inbound_rate_limit_middleware, metrics_handler, metrics_middleware, InboundRateLimiter,
};
use crate::routes::{health, retries, webhooks};
use crate::services::HttpWebhookExecutor;

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub verifier: Arc<SecurityVerifier>,
    pub retry_manager: Arc<RetryManager>,
    /// Outbound limiter shared by forwarding and retries.
    pub rate_limiter: Arc<RateLimitValidator>,
    pub executor: Arc<dyn WebhookExecutor>,
    pub inbound_limiter: Option<Arc<InboundRateLimiter>>,
}

impl AppState {
    /// Wire the services with the HTTP executor from `delivery` config.
    pub fn from_config(config: Config) -> Result<Self, StartupError> {
        let executor = HttpWebhookExecutor::new(
            config.delivery.timeout(),
            config.delivery.signing_secret.clone(),
        )?;
        Self::with_executor(config, Arc::new(executor))
    }

    /// Wire the services around a caller-provided executor.
    pub fn with_executor(
        config: Config,
        executor: Arc<dyn WebhookExecutor>,
    ) -> Result<Self, StartupError> {
        let replay_store = Arc::new(ReplayStore::new());
        let verifier = Arc::new(SecurityVerifier::new(config.verifier_config(), replay_store));

        let rate_limiter = Arc::new(RateLimitValidator::new(
            config.rate_limit.requests_per_second,
        )?);

        let retry_manager = Arc::new(
            RetryManager::new(config.retry_policy(), Arc::clone(&executor))?
                .with_rate_limiter(Arc::clone(&rate_limiter)),
        );

        let inbound_limiter =
            InboundRateLimiter::new(config.security.inbound_rate_limit_per_minute).map(Arc::new);

        Ok(Self {
            config: Arc::new(config),
            verifier,
            retry_manager,
            rate_limiter,
            executor,
            inbound_limiter,
        })
    }
}

pub fn create_app(state: AppState) -> Router {
    let config = Arc::clone(&state.config);

    // Inbound webhooks from the form provider
    let webhook_routes = Router::new()
        .route("/api/v1/webhooks/forms", post(webhooks::receive_form_webhook))
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            inbound_rate_limit_middleware,
        ));

    // Read-only view of the retry queue
    let retry_routes = Router::new()
        .route("/api/v1/retries", get(retries::list_retries))
        .route("/api/v1/retries/:webhook_id", get(retries::get_retry));

    Router::new()
        .route("/api/health", get(health::health_check))
        .route("/api/health/live", get(health::live))
        .route("/api/health/ready", get(health::ready))
        .route("/metrics", get(metrics_handler))
        .merge(webhook_routes)
        .merge(retry_routes)
        .layer(middleware::from_fn(metrics_middleware))
        .layer(DefaultBodyLimit::max(config.server.max_body_size))
        .layer(TimeoutLayer::new(Duration::from_secs(
            config.server.request_timeout_secs,
        )))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
