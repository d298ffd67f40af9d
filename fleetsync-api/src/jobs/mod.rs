//! Background Jobs for the fleetsync coordinator
//!
//! - `housekeeping`: ages out silent agents and purges finished command state
//!
//! # Usage
//!
//! ```ignore
//! use fleetsync_api::jobs::{housekeeping_task, HousekeepingConfig};
//! use tokio::sync::watch;
//!
//! let (shutdown_tx, shutdown_rx) = watch::channel(false);
//! let config = HousekeepingConfig::from_sync_config(coordinator.config());
//! let handle = tokio::spawn(housekeeping_task(Arc::clone(&coordinator), config, shutdown_rx));
//!
//! // On shutdown
//! let _ = shutdown_tx.send(true);
//! let metrics = handle.await?;
//! ```

pub mod housekeeping;

pub use housekeeping::{
    housekeeping_task, HousekeepingConfig, HousekeepingMetrics, HousekeepingSnapshot,
};
