use std::sync::Arc;

use axum::Router;
use fleetsync_api::{create_router, ApiConfig, AppState, Coordinator};
use fleetsync_core::SyncConfig;
use fleetsync_test_utils::fixtures::test_config;

pub fn test_coordinator() -> Arc<Coordinator> {
    test_coordinator_with(test_config())
}

pub fn test_coordinator_with(config: SyncConfig) -> Arc<Coordinator> {
    Arc::new(Coordinator::new(config).expect("test config must be valid"))
}

/// Full router over `coordinator`, CORS open as in development.
pub fn test_app(coordinator: Arc<Coordinator>) -> Router {
    create_router(AppState::new(coordinator, ApiConfig::default()))
}
