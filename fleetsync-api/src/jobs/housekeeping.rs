//! Housekeeping Background Task
//!
//! Periodically drops state that would otherwise grow without bound:
//!
//! - Agents whose last heartbeat is older than `agent_retention`
//! - Buffered command responses nobody claimed within `response_retention`
//! - Lifecycle records of finished commands past `response_retention`
//!
//! Liveness itself needs no timer (status is recomputed on read), and the
//! broadcaster runs its own keepalive task.
//!
//! # Configuration
//!
//! ```rust
//! use fleetsync_api::jobs::HousekeepingConfig;
//! use std::time::Duration;
//!
//! let config = HousekeepingConfig {
//!     interval: Duration::from_secs(60),
//!     log_removals: true,
//! };
//! ```

use crate::coordinator::Coordinator;
use chrono::Utc;
use fleetsync_core::SyncConfig;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::{interval, MissedTickBehavior};

// ============================================================================
// CONFIGURATION
// ============================================================================

/// Configuration for the housekeeping background task.
#[derive(Debug, Clone)]
pub struct HousekeepingConfig {
    /// How often to run a pass (default: 60 seconds)
    pub interval: Duration,

    /// Whether to log each pass that removed something at info level
    pub log_removals: bool,
}

impl Default for HousekeepingConfig {
    fn default() -> Self {
        Self::from_sync_config(&SyncConfig::default())
    }
}

impl HousekeepingConfig {
    pub fn from_sync_config(config: &SyncConfig) -> Self {
        Self {
            interval: config.housekeeping_interval,
            log_removals: true,
        }
    }

    /// Create configuration from environment variables.
    ///
    /// Environment variables:
    /// - `FLEETSYNC_HOUSEKEEPING_INTERVAL_SECS`: Pass interval (default: 60)
    /// - `FLEETSYNC_HOUSEKEEPING_LOG_REMOVALS`: "true" or "false" (default: true)
    pub fn from_env() -> Self {
        let defaults = Self::default();
        let interval = std::env::var("FLEETSYNC_HOUSEKEEPING_INTERVAL_SECS")
            .ok()
            .and_then(|s| s.parse().ok())
            .filter(|secs: &u64| *secs > 0)
            .map(Duration::from_secs)
            .unwrap_or(defaults.interval);
        let log_removals = std::env::var("FLEETSYNC_HOUSEKEEPING_LOG_REMOVALS")
            .map(|s| s.to_lowercase() != "false")
            .unwrap_or(defaults.log_removals);
        Self {
            interval,
            log_removals,
        }
    }
}

// ============================================================================
// METRICS
// ============================================================================

/// Counters for housekeeping activity.
#[derive(Debug, Default)]
pub struct HousekeepingMetrics {
    /// Total agents aged out since startup
    pub agents_aged_out: AtomicU64,

    /// Total dispatcher entries purged since startup
    pub command_entries_purged: AtomicU64,

    /// Total passes completed
    pub passes: AtomicU64,
}

impl HousekeepingMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self) -> HousekeepingSnapshot {
        HousekeepingSnapshot {
            agents_aged_out: self.agents_aged_out.load(Ordering::Relaxed),
            command_entries_purged: self.command_entries_purged.load(Ordering::Relaxed),
            passes: self.passes.load(Ordering::Relaxed),
        }
    }
}

/// Snapshot of housekeeping metrics at a point in time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HousekeepingSnapshot {
    pub agents_aged_out: u64,
    pub command_entries_purged: u64,
    pub passes: u64,
}

// ============================================================================
// BACKGROUND TASK
// ============================================================================

/// Background task that runs housekeeping passes until shutdown.
///
/// ```ignore
/// let (shutdown_tx, shutdown_rx) = watch::channel(false);
/// let handle = tokio::spawn(housekeeping_task(coordinator, config, shutdown_rx));
///
/// // Later, trigger shutdown
/// let _ = shutdown_tx.send(true);
/// let metrics = handle.await?;
/// ```
pub async fn housekeeping_task(
    coordinator: Arc<Coordinator>,
    config: HousekeepingConfig,
    mut shutdown_rx: watch::Receiver<bool>,
) -> Arc<HousekeepingMetrics> {
    let metrics = Arc::new(HousekeepingMetrics::new());

    let mut ticker = interval(config.interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    tracing::info!(
        interval_secs = config.interval.as_secs(),
        "Housekeeping task started"
    );

    loop {
        tokio::select! {
            changed = shutdown_rx.changed() => {
                // A dropped sender also means shutdown.
                if changed.is_err() || *shutdown_rx.borrow() {
                    tracing::info!("Housekeeping task shutting down");
                    break;
                }
            }

            _ = ticker.tick() => {
                run_pass(&coordinator, &config, &metrics);
            }
        }
    }

    let snapshot = metrics.snapshot();
    tracing::info!(
        agents_aged_out = snapshot.agents_aged_out,
        command_entries_purged = snapshot.command_entries_purged,
        passes = snapshot.passes,
        "Housekeeping task completed"
    );

    metrics
}

/// Perform one housekeeping pass.
fn run_pass(coordinator: &Coordinator, config: &HousekeepingConfig, metrics: &HousekeepingMetrics) {
    metrics.passes.fetch_add(1, Ordering::Relaxed);

    let (agents, commands) = coordinator.housekeep(Utc::now());
    metrics
        .agents_aged_out
        .fetch_add(agents as u64, Ordering::Relaxed);
    metrics
        .command_entries_purged
        .fetch_add(commands as u64, Ordering::Relaxed);

    if config.log_removals && (agents > 0 || commands > 0) {
        tracing::info!(agents, commands, "Housekeeping pass removed stale state");
    } else {
        tracing::trace!("Housekeeping pass completed with nothing to remove");
    }
}
