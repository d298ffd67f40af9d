//! fleetsync server entry point
//!
//! Loads configuration from the environment, builds the coordinator,
//! starts the housekeeping job and serves the Axum router until Ctrl-C.

use std::sync::Arc;

use fleetsync_api::jobs::{housekeeping_task, HousekeepingConfig};
use fleetsync_api::telemetry::{init_tracing, TelemetryConfig};
use fleetsync_api::{create_router, ApiConfig, ApiError, ApiResult, AppState, Coordinator};
use fleetsync_core::SyncConfig;
use tokio::sync::watch;

#[tokio::main]
async fn main() -> ApiResult<()> {
    let telemetry_config = TelemetryConfig::default();
    init_tracing(&telemetry_config)?;

    let sync_config = SyncConfig::from_env();
    let coordinator = Arc::new(Coordinator::new(sync_config)?);

    let api_config = ApiConfig::from_env()?;
    let addr = api_config.bind_addr()?;

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let housekeeping_config = HousekeepingConfig::from_env();
    let housekeeping = tokio::spawn(housekeeping_task(
        Arc::clone(&coordinator),
        housekeeping_config,
        shutdown_rx,
    ));

    let app = create_router(AppState::new(coordinator, api_config));

    tracing::info!(
        %addr,
        service = %telemetry_config.service_name,
        version = %telemetry_config.service_version,
        "Starting fleetsync server"
    );

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(|e| ApiError::internal_error(format!("Failed to bind {}: {}", addr, e)))?;

    let server = axum::serve(listener, app);
    tokio::select! {
        result = server => {
            result.map_err(|e| ApiError::internal_error(format!("Server error: {}", e)))?;
        }
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("Shutdown signal received");
        }
    }

    let _ = shutdown_tx.send(true);
    match housekeeping.await {
        Ok(metrics) => {
            let totals = metrics.snapshot();
            tracing::info!(
                passes = totals.passes,
                agents_aged_out = totals.agents_aged_out,
                command_entries_purged = totals.command_entries_purged,
                "Housekeeping stopped"
            );
        }
        Err(e) => tracing::warn!(error = %e, "Housekeeping task did not shut down cleanly"),
    }

    Ok(())
}
