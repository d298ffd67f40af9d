//! Error types for fleetsync operations
//!
//! Every failure the coordination core can report is recoverable at the
//! core boundary: one bad agent, conflict, or subscriber never affects
//! another.

use crate::{AgentId, CommandId, ConflictId, SubscriberId};
use thiserror::Error;

/// Storage layer errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StorageError {
    #[error("Storage lock poisoned: {resource}")]
    LockPoisoned { resource: String },
}

/// Agent liveness errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum AgentError {
    #[error("Agent not registered: {agent_id}")]
    NotFound { agent_id: AgentId },
}

/// Command dispatch errors.
///
/// `Timeout` means the agent never answered (a connectivity or liveness
/// problem); `AgentFailure` means the agent answered and reported that the
/// command failed. Callers must be able to tell the two apart.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum DispatchError {
    #[error("Command not found: {command_id}")]
    NotFound { command_id: CommandId },

    #[error("Command {command_id} timed out after {timeout_ms}ms")]
    Timeout {
        command_id: CommandId,
        timeout_ms: u64,
    },

    #[error("Command {command_id} failed on agent: {message}")]
    AgentFailure {
        command_id: CommandId,
        message: String,
    },

    #[error("Command {command_id} already has a caller awaiting its response")]
    AlreadyAwaited { command_id: CommandId },

    #[error("Wait for command {command_id} was cancelled")]
    Cancelled { command_id: CommandId },
}

impl DispatchError {
    /// True when the failure points at the agent being unreachable rather
    /// than at the agent rejecting the command.
    pub fn is_connectivity_failure(&self) -> bool {
        matches!(self, DispatchError::Timeout { .. })
    }
}

/// Conflict resolution errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConflictError {
    #[error("No conflict policy applies to {path} ({conflict_type})")]
    PolicyMissing {
        path: String,
        conflict_type: String,
    },

    #[error("Resolved data for conflict {conflict_id} failed validation: {reason}")]
    ValidationFailure {
        conflict_id: ConflictId,
        reason: String,
    },

    #[error("Merge failed for conflict {conflict_id}: {reason}")]
    MergeFailed {
        conflict_id: ConflictId,
        reason: String,
    },

    #[error("Conflict {conflict_id} is already resolved")]
    AlreadyResolved { conflict_id: ConflictId },

    #[error("Invalid path pattern {pattern:?}: {reason}")]
    InvalidPattern { pattern: String, reason: String },

    #[error("A conflict needs at least two sources, got {count}")]
    InsufficientSources { count: usize },

    #[error("A policy for {pattern} ({conflict_type}) is already registered")]
    DuplicatePolicy {
        pattern: String,
        conflict_type: String,
    },

    #[error("Conflict not found: {conflict_id}")]
    NotFound { conflict_id: ConflictId },
}

/// Broadcast transport errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum BroadcastError {
    #[error("Write to subscriber {subscriber_id} failed: {reason}")]
    TransportFailure {
        subscriber_id: SubscriberId,
        reason: String,
    },
}

/// Configuration errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Invalid value for {field}: {value} - {reason}")]
    InvalidValue {
        field: String,
        value: String,
        reason: String,
    },
}

/// Master error type for all fleetsync errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum FleetError {
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Agent error: {0}")]
    Agent(#[from] AgentError),

    #[error("Dispatch error: {0}")]
    Dispatch(#[from] DispatchError),

    #[error("Conflict error: {0}")]
    Conflict(#[from] ConflictError),

    #[error("Broadcast error: {0}")]
    Broadcast(#[from] BroadcastError),

    #[error("Config error: {0}")]
    Config(#[from] ConfigError),
}

/// Result type alias for fleetsync operations.
pub type FleetResult<T> = Result<T, FleetError>;

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dispatch_timeout_display() {
        let err = DispatchError::Timeout {
            command_id: CommandId::new("cmd-2"),
            timeout_ms: 100,
        };
        let msg = format!("{}", err);
        assert!(msg.contains("cmd-2"));
        assert!(msg.contains("100ms"));
    }

    #[test]
    fn test_timeout_is_distinguishable_from_agent_failure() {
        let timeout = DispatchError::Timeout {
            command_id: CommandId::new("cmd-1"),
            timeout_ms: 5000,
        };
        let failure = DispatchError::AgentFailure {
            command_id: CommandId::new("cmd-1"),
            message: "display offline".to_string(),
        };
        assert!(timeout.is_connectivity_failure());
        assert!(!failure.is_connectivity_failure());
        assert_ne!(timeout, failure);
    }

    #[test]
    fn test_conflict_error_display_policy_missing() {
        let err = ConflictError::PolicyMissing {
            path: "dashboards.main".to_string(),
            conflict_type: "data_mismatch".to_string(),
        };
        let msg = format!("{}", err);
        assert!(msg.contains("dashboards.main"));
        assert!(msg.contains("data_mismatch"));
    }

    #[test]
    fn test_config_error_display_invalid_value() {
        let err = ConfigError::InvalidValue {
            field: "liveness_threshold".to_string(),
            value: "0ns".to_string(),
            reason: "must be positive".to_string(),
        };
        let msg = format!("{}", err);
        assert!(msg.contains("liveness_threshold"));
        assert!(msg.contains("must be positive"));
    }

    #[test]
    fn test_fleet_error_from_variants() {
        let storage = FleetError::from(StorageError::LockPoisoned {
            resource: "conflict_log".to_string(),
        });
        assert!(matches!(storage, FleetError::Storage(_)));

        let agent = FleetError::from(AgentError::NotFound {
            agent_id: AgentId::new("a"),
        });
        assert!(matches!(agent, FleetError::Agent(_)));

        let dispatch = FleetError::from(DispatchError::Cancelled {
            command_id: CommandId::new("c"),
        });
        assert!(matches!(dispatch, FleetError::Dispatch(_)));

        let conflict = FleetError::from(ConflictError::InsufficientSources { count: 1 });
        assert!(matches!(conflict, FleetError::Conflict(_)));

        let broadcast = FleetError::from(BroadcastError::TransportFailure {
            subscriber_id: SubscriberId::now_v7(),
            reason: "closed".to_string(),
        });
        assert!(matches!(broadcast, FleetError::Broadcast(_)));
    }
}
