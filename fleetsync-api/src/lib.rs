//! fleetsync API - Coordinator and HTTP/SSE surface
//!
//! This crate wires the fleetsync components into one [`Coordinator`] and
//! exposes it over HTTP: REST endpoints (Axum) for heartbeats, commands and
//! conflicts, plus a Server-Sent Events stream of state changes.
//!
//! Every mutation goes through the coordinator, which publishes the
//! matching [`fleetsync_events::SyncEvent`] after the state change lands.

pub mod config;
pub mod coordinator;
pub mod error;
pub mod health;
pub mod jobs;
pub mod macros;
#[cfg(feature = "openapi")]
pub mod openapi;
pub mod routes;
pub mod state;
pub mod telemetry;
pub mod types;

// Re-export commonly used types
pub use config::ApiConfig;
pub use coordinator::Coordinator;
pub use error::{ApiError, ApiResult, ErrorCode};
pub use health::{alerts_for, AlertKind, SyncAlert, SyncHealthAggregator, SyncHealthSnapshot};
#[cfg(feature = "openapi")]
pub use openapi::ApiDoc;
pub use routes::create_router;
pub use state::AppState;
pub use types::*;
