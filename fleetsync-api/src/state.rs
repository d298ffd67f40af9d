//! Shared application state for Axum routers.

use std::sync::Arc;

use crate::config::ApiConfig;
use crate::coordinator::Coordinator;
use crate::health::SyncHealthAggregator;

/// Application-wide state shared across all routes.
#[derive(Debug, Clone)]
pub struct AppState {
    /// The synchronization core. All mutations go through it so events
    /// are published alongside the state change.
    pub coordinator: Arc<Coordinator>,
    pub health: SyncHealthAggregator,
    pub api_config: Arc<ApiConfig>,
    pub start_time: std::time::Instant,
}

impl AppState {
    pub fn new(coordinator: Arc<Coordinator>, api_config: ApiConfig) -> Self {
        Self {
            health: SyncHealthAggregator::new(coordinator.clone()),
            coordinator,
            api_config: Arc::new(api_config),
            start_time: std::time::Instant::now(),
        }
    }
}

crate::impl_from_ref! {
    Arc<Coordinator> => coordinator,
    SyncHealthAggregator => health,
    Arc<ApiConfig> => api_config,
    std::time::Instant => start_time,
}
