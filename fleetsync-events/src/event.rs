//! Sync event types
//!
//! Every state change a dashboard cares about is published as one of
//! these. A new subscriber first receives a `Snapshot` so it never starts
//! without baseline state.

use fleetsync_agents::{AgentStatusView, LivenessSummary};
use fleetsync_conflict::ConflictRecord;
use fleetsync_core::{
    AgentId, CommandId, CommandState, ConflictId, LivenessStatus, Resolution, Timestamp,
};
use serde::{Deserialize, Serialize};

/// State-change notification broadcast to subscribers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
#[serde(tag = "type")]
pub enum SyncEvent {
    // ========================================================================
    // BASELINE
    // ========================================================================
    /// Full current state, sent once when a subscriber connects.
    Snapshot {
        agents: Vec<AgentStatusView>,
        summary: LivenessSummary,
        unresolved_conflicts: Vec<ConflictRecord>,
        #[cfg_attr(feature = "openapi", schema(value_type = String, format = "date-time"))]
        at: Timestamp,
    },

    // ========================================================================
    // AGENT EVENTS
    // ========================================================================
    /// An agent moved to a different liveness status.
    AgentStatusChanged {
        agent_id: AgentId,
        status: LivenessStatus,
        previous: Option<LivenessStatus>,
        #[cfg_attr(feature = "openapi", schema(value_type = String, format = "date-time"))]
        at: Timestamp,
    },

    /// An agent heartbeat was received without a status change.
    AgentHeartbeat {
        agent_id: AgentId,
        status: LivenessStatus,
        #[cfg_attr(feature = "openapi", schema(value_type = String, format = "date-time"))]
        at: Timestamp,
    },

    /// An agent reported an error.
    AgentError {
        agent_id: AgentId,
        message: String,
        #[cfg_attr(feature = "openapi", schema(value_type = String, format = "date-time"))]
        at: Timestamp,
    },

    // ========================================================================
    // COMMAND EVENTS
    // ========================================================================
    CommandEnqueued {
        command_id: CommandId,
        agent_id: AgentId,
        command_type: String,
    },

    /// A command reached a terminal state.
    CommandFinished {
        command_id: CommandId,
        state: CommandState,
        success: bool,
    },

    // ========================================================================
    // CONFLICT EVENTS
    // ========================================================================
    ConflictDetected { conflict: ConflictRecord },

    ConflictResolved {
        conflict_id: ConflictId,
        path: String,
        resolution: Resolution,
        resolved_by: Option<String>,
    },
}

impl SyncEvent {
    /// Get the event type name for logging and for the SSE `event:` field.
    pub fn event_type(&self) -> &'static str {
        match self {
            SyncEvent::Snapshot { .. } => "Snapshot",
            SyncEvent::AgentStatusChanged { .. } => "AgentStatusChanged",
            SyncEvent::AgentHeartbeat { .. } => "AgentHeartbeat",
            SyncEvent::AgentError { .. } => "AgentError",
            SyncEvent::CommandEnqueued { .. } => "CommandEnqueued",
            SyncEvent::CommandFinished { .. } => "CommandFinished",
            SyncEvent::ConflictDetected { .. } => "ConflictDetected",
            SyncEvent::ConflictResolved { .. } => "ConflictResolved",
        }
    }

    /// The agent this event concerns, if any.
    pub fn agent_id(&self) -> Option<&AgentId> {
        match self {
            SyncEvent::AgentStatusChanged { agent_id, .. }
            | SyncEvent::AgentHeartbeat { agent_id, .. }
            | SyncEvent::AgentError { agent_id, .. }
            | SyncEvent::CommandEnqueued { agent_id, .. } => Some(agent_id),
            _ => None,
        }
    }
}
