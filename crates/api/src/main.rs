use anyhow::{Context, Result};
use std::time::Duration;
use tracing::info;

use form_webhook_api::app::{create_app, AppState};
use form_webhook_api::config::Config;
use form_webhook_api::jobs::{
    JobScheduler, ReplayStoreCleanupJob, RetryRecordCleanupJob, WebhookRetryJob,
};
use form_webhook_api::middleware::{init_metrics, logging::init_logging};

/// How long background jobs get to finish after the server stops.
const JOB_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(10);

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present
    dotenvy::dotenv().ok();

    let config = Config::load().context("failed to load configuration")?;

    init_logging(&config.logging).context("failed to initialize logging")?;
    init_metrics().context("failed to initialize metrics")?;

    info!("Starting Form Webhook Gateway v{}", env!("CARGO_PKG_VERSION"));

    let state = AppState::from_config(config.clone()).context("failed to build application")?;

    let mut scheduler = JobScheduler::new();
    scheduler.register(WebhookRetryJob::new(
        state.retry_manager.clone(),
        config.retry.process_interval(),
    ));
    scheduler.register(RetryRecordCleanupJob::new(
        state.retry_manager.clone(),
        config.retry.record_cleanup_interval(),
        config.retry.record_retention(),
    ));
    scheduler.register(ReplayStoreCleanupJob::new(
        state.verifier.replay_store().clone(),
        config.security.replay_cleanup_interval(),
    ));
    scheduler.start();

    match config.delivery.forward_url() {
        Some(url) => info!(forward_url = %url, "Forwarding verified events"),
        None => info!("Forwarding disabled, events are verified and acknowledged only"),
    }

    let app = create_app(state);

    let addr = config.socket_addr().context("invalid server address")?;
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!("Server listening on {}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    scheduler.shutdown();
    scheduler.wait_for_shutdown(JOB_SHUTDOWN_TIMEOUT).await;
    info!("Server stopped");

    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}
