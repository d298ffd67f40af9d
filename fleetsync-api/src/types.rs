//! Request and response bodies of the HTTP surface.
//!
//! Core types (`PendingCommand`, `ConflictRecord`, ...) are served as-is;
//! the types here only cover what the wire needs on top of them.

use fleetsync_agents::{PendingCommand, SubmitOutcome};
use fleetsync_conflict::{ConflictRecord, ConflictSource, ResolutionOutcome};
use fleetsync_core::{
    AgentId, CommandId, CommandState, ConflictId, ConflictType, LivenessStatus, Timestamp,
};
use serde::{Deserialize, Serialize};

// ============================================================================
// AGENTS
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct HeartbeatRequest {
    pub agent_id: AgentId,
    /// When the agent took the reading. Defaults to arrival time.
    #[serde(default)]
    #[cfg_attr(feature = "openapi", schema(value_type = Option<String>, format = "date-time"))]
    pub timestamp: Option<Timestamp>,
    pub status: LivenessStatus,
    #[serde(default)]
    #[cfg_attr(feature = "openapi", schema(value_type = Option<Object>))]
    pub metrics: Option<serde_json::Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct HeartbeatResponse {
    pub agent_id: AgentId,
    pub status: LivenessStatus,
    pub previous: Option<LivenessStatus>,
    pub changed: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct ReportErrorRequest {
    pub message: String,
    #[serde(default)]
    #[cfg_attr(feature = "openapi", schema(value_type = Option<String>, format = "date-time"))]
    pub timestamp: Option<Timestamp>,
}

// ============================================================================
// COMMANDS
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct IssueCommandRequest {
    pub command_type: String,
    #[serde(default)]
    #[cfg_attr(feature = "openapi", schema(value_type = Object))]
    pub payload: serde_json::Value,
    /// Block until the agent answers or the timeout expires.
    #[serde(default)]
    pub wait: bool,
    /// Wait timeout; the configured default applies when absent.
    #[serde(default)]
    pub timeout_ms: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct IssueCommandResponse {
    pub command_id: CommandId,
    pub state: CommandState,
    #[serde(skip_serializing_if = "Option::is_none")]
    #[cfg_attr(feature = "openapi", schema(value_type = Option<Object>))]
    pub result: Option<serde_json::Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct PollCommandsResponse {
    pub agent_id: AgentId,
    pub commands: Vec<PendingCommand>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct SubmitResponseRequest {
    pub success: bool,
    #[serde(default)]
    #[cfg_attr(feature = "openapi", schema(value_type = Option<Object>))]
    pub data: Option<serde_json::Value>,
    #[serde(default)]
    pub error: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct SubmitResponseResponse {
    pub command_id: CommandId,
    pub outcome: SubmitOutcome,
}

// ============================================================================
// CONFLICTS
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct DetectConflictsRequest {
    pub path: String,
    pub a: ConflictSource,
    pub b: ConflictSource,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct ReportConflictRequest {
    pub path: String,
    pub conflict_type: ConflictType,
    pub sources: Vec<ConflictSource>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct ConflictListResponse {
    pub conflicts: Vec<ConflictRecord>,
}

/// Resolve either a logged conflict by id or a record supplied inline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct ResolveConflictRequest {
    #[serde(default)]
    pub conflict_id: Option<ConflictId>,
    #[serde(default)]
    pub record: Option<ConflictRecord>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct ResolveConflictResponse {
    pub record: ConflictRecord,
    pub outcome: ResolutionOutcome,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct ResolveBatchRequest {
    /// Logged conflicts to resolve.
    #[serde(default)]
    pub conflict_ids: Vec<ConflictId>,
    /// Records supplied inline.
    #[serde(default)]
    pub records: Vec<ConflictRecord>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListConflictsQuery {
    pub limit: Option<usize>,
    #[serde(default)]
    pub unresolved_only: bool,
}

/// Default page size of `GET /v1/conflicts`.
pub const DEFAULT_CONFLICT_PAGE: usize = 100;
