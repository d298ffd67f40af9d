//! Configuration types

use crate::*;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Tunables of the coordination core.
///
/// Every threshold is injected here rather than hard-coded so operators can
/// tune for their network characteristics.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct SyncConfig {
    // Liveness
    /// Age of the last heartbeat at which an agent counts as offline
    #[cfg_attr(feature = "openapi", schema(value_type = u64))]
    pub liveness_threshold: Duration,
    /// Agents unseen for longer than this are aged out by housekeeping
    #[cfg_attr(feature = "openapi", schema(value_type = u64))]
    pub agent_retention: Duration,

    // Conflicts
    /// Maximum number of records kept in the conflict log
    pub conflict_log_capacity: usize,
    /// Timestamps closer than this are too ambiguous for "newest wins"
    #[cfg_attr(feature = "openapi", schema(value_type = u64))]
    pub timestamp_tolerance: Duration,

    // Dispatch
    /// Timeout used when a caller does not supply one
    #[cfg_attr(feature = "openapi", schema(value_type = u64))]
    pub default_command_timeout: Duration,
    /// How long unclaimed responses and finished commands are kept
    #[cfg_attr(feature = "openapi", schema(value_type = u64))]
    pub response_retention: Duration,

    // Broadcast
    /// Interval between keepalive frames while subscribers are connected
    #[cfg_attr(feature = "openapi", schema(value_type = u64))]
    pub keepalive_interval: Duration,
    /// A subscriber without a successful write for this long is evicted
    #[cfg_attr(feature = "openapi", schema(value_type = u64))]
    pub subscriber_stale_after: Duration,
    /// Frames buffered per subscriber before a write counts as failed
    pub subscriber_buffer: usize,

    // Housekeeping
    /// Interval of the background housekeeping task
    #[cfg_attr(feature = "openapi", schema(value_type = u64))]
    pub housekeeping_interval: Duration,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            liveness_threshold: Duration::from_millis(DEFAULT_LIVENESS_THRESHOLD_MS),
            agent_retention: Duration::from_secs(7 * 24 * 3600),
            conflict_log_capacity: DEFAULT_CONFLICT_LOG_CAPACITY,
            timestamp_tolerance: Duration::from_millis(1000),
            default_command_timeout: Duration::from_millis(DEFAULT_COMMAND_TIMEOUT_MS),
            response_retention: Duration::from_secs(300),
            keepalive_interval: Duration::from_secs(10),
            subscriber_stale_after: Duration::from_secs(30),
            subscriber_buffer: 256,
            housekeeping_interval: Duration::from_secs(60),
        }
    }
}

/// Default liveness threshold (2 minutes).
pub const DEFAULT_LIVENESS_THRESHOLD_MS: u64 = 120_000;

/// Default conflict log capacity.
pub const DEFAULT_CONFLICT_LOG_CAPACITY: usize = 1000;

/// Default command response timeout (30 seconds).
pub const DEFAULT_COMMAND_TIMEOUT_MS: u64 = 30_000;

impl SyncConfig {
    /// Create a SyncConfig from environment variables, falling back to the
    /// default for every variable that is missing or unparseable.
    ///
    /// Environment variables:
    /// - `FLEETSYNC_LIVENESS_THRESHOLD_MS` (default: 120000)
    /// - `FLEETSYNC_AGENT_RETENTION_SECS` (default: 604800)
    /// - `FLEETSYNC_CONFLICT_LOG_CAPACITY` (default: 1000)
    /// - `FLEETSYNC_TIMESTAMP_TOLERANCE_MS` (default: 1000)
    /// - `FLEETSYNC_COMMAND_TIMEOUT_MS` (default: 30000)
    /// - `FLEETSYNC_RESPONSE_RETENTION_SECS` (default: 300)
    /// - `FLEETSYNC_KEEPALIVE_INTERVAL_MS` (default: 10000)
    /// - `FLEETSYNC_SUBSCRIBER_STALE_MS` (default: 30000)
    /// - `FLEETSYNC_SUBSCRIBER_BUFFER` (default: 256)
    /// - `FLEETSYNC_HOUSEKEEPING_INTERVAL_SECS` (default: 60)
    pub fn from_env() -> Self {
        let defaults = Self::default();

        Self {
            liveness_threshold: env_millis("FLEETSYNC_LIVENESS_THRESHOLD_MS")
                .unwrap_or(defaults.liveness_threshold),
            agent_retention: env_secs("FLEETSYNC_AGENT_RETENTION_SECS")
                .unwrap_or(defaults.agent_retention),
            conflict_log_capacity: env_parse("FLEETSYNC_CONFLICT_LOG_CAPACITY")
                .unwrap_or(defaults.conflict_log_capacity),
            timestamp_tolerance: env_millis("FLEETSYNC_TIMESTAMP_TOLERANCE_MS")
                .unwrap_or(defaults.timestamp_tolerance),
            default_command_timeout: env_millis("FLEETSYNC_COMMAND_TIMEOUT_MS")
                .unwrap_or(defaults.default_command_timeout),
            response_retention: env_secs("FLEETSYNC_RESPONSE_RETENTION_SECS")
                .unwrap_or(defaults.response_retention),
            keepalive_interval: env_millis("FLEETSYNC_KEEPALIVE_INTERVAL_MS")
                .unwrap_or(defaults.keepalive_interval),
            subscriber_stale_after: env_millis("FLEETSYNC_SUBSCRIBER_STALE_MS")
                .unwrap_or(defaults.subscriber_stale_after),
            subscriber_buffer: env_parse("FLEETSYNC_SUBSCRIBER_BUFFER")
                .unwrap_or(defaults.subscriber_buffer),
            housekeeping_interval: env_secs("FLEETSYNC_HOUSEKEEPING_INTERVAL_SECS")
                .unwrap_or(defaults.housekeeping_interval),
        }
    }

    /// Validate the configuration.
    ///
    /// Validates:
    /// - All durations are positive
    /// - All capacities are positive
    /// - `subscriber_stale_after` exceeds `keepalive_interval`, otherwise a
    ///   healthy subscriber would be evicted between two keepalives
    pub fn validate(&self) -> FleetResult<()> {
        let durations = [
            ("liveness_threshold", self.liveness_threshold),
            ("agent_retention", self.agent_retention),
            ("timestamp_tolerance", self.timestamp_tolerance),
            ("default_command_timeout", self.default_command_timeout),
            ("response_retention", self.response_retention),
            ("keepalive_interval", self.keepalive_interval),
            ("subscriber_stale_after", self.subscriber_stale_after),
            ("housekeeping_interval", self.housekeeping_interval),
        ];
        for (field, value) in durations {
            if value.is_zero() {
                return Err(invalid(field, format!("{:?}", value), "must be positive"));
            }
        }

        if self.conflict_log_capacity == 0 {
            return Err(invalid(
                "conflict_log_capacity",
                self.conflict_log_capacity.to_string(),
                "must be greater than 0",
            ));
        }

        if self.subscriber_buffer == 0 {
            return Err(invalid(
                "subscriber_buffer",
                self.subscriber_buffer.to_string(),
                "must be greater than 0",
            ));
        }

        if self.subscriber_stale_after <= self.keepalive_interval {
            return Err(invalid(
                "subscriber_stale_after",
                format!("{:?}", self.subscriber_stale_after),
                "must be longer than keepalive_interval",
            ));
        }

        Ok(())
    }
}

fn invalid(field: &str, value: String, reason: &str) -> FleetError {
    FleetError::Config(ConfigError::InvalidValue {
        field: field.to_string(),
        value,
        reason: reason.to_string(),
    })
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|s| s.parse().ok())
}

fn env_millis(key: &str) -> Option<Duration> {
    env_parse::<u64>(key).map(Duration::from_millis)
}

fn env_secs(key: &str) -> Option<Duration> {
    env_parse::<u64>(key).map(Duration::from_secs)
}

// =============================================================================
// TESTS
// =============================================================================
