//! fleetsync Core - Shared Types
//!
//! Pure data structures shared by the coordination crates: identifiers,
//! the error taxonomy, configuration, and health classification.
//! This crate contains no coordination logic.

mod config;
mod enums;
mod error;
mod health;
mod identity;

pub use config::{
    SyncConfig, DEFAULT_COMMAND_TIMEOUT_MS, DEFAULT_CONFLICT_LOG_CAPACITY,
    DEFAULT_LIVENESS_THRESHOLD_MS,
};
pub use enums::{CommandState, ConflictType, EnumParseError, LivenessStatus, Resolution};
pub use error::{
    AgentError, BroadcastError, ConfigError, ConflictError, DispatchError, FleetError,
    FleetResult, StorageError,
};
pub use health::{
    classify_fleet_health, AlertSeverity, FleetHealth, CRITICAL_ONLINE_FRACTION,
    WARNING_ONLINE_FRACTION,
};
pub use identity::{
    compute_checksum, duration_millis, AgentId, CommandId, ConflictId, SubscriberId, Timestamp,
};
