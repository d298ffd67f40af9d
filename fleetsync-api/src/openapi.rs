//! OpenAPI document for the fleetsync HTTP surface
//!
//! Generated with utoipa from the handler annotations in `routes` and the
//! `ToSchema` derives on the domain types.

use axum::{response::IntoResponse, Json};
use utoipa::OpenApi;

use crate::error::{ApiError, ErrorCode};
use crate::health::{AlertKind, SyncAlert, SyncHealthSnapshot};
use crate::routes::health::{HealthResponse, HealthStatus};
use crate::routes::{agents, commands, conflicts, events, health};
use crate::types::*;

use fleetsync_agents::{
    AgentStatusView, CommandStatus, DispatchStats, LivenessSummary, PendingCommand, SubmitOutcome,
};
use fleetsync_conflict::{
    BatchError, BatchOutcome, ConflictRecord, ConflictSource, ConflictStats, ResolutionOutcome,
    SourceOrigin,
};
use fleetsync_core::{
    AgentId, AlertSeverity, CommandId, CommandState, ConflictId, ConflictType, FleetHealth,
    LivenessStatus, Resolution,
};
use fleetsync_events::SyncEvent;

#[derive(OpenApi)]
#[openapi(
    info(
        title = "fleetsync API",
        version = "0.4.0",
        description = "Center-side coordination for edge agents: liveness, command dispatch, conflict resolution and state-change events",
        license(name = "MIT", url = "https://opensource.org/licenses/MIT"),
    ),
    servers(
        (url = "http://localhost:3000", description = "Local Development")
    ),
    tags(
        (name = "Agents", description = "Heartbeats, error reports and liveness"),
        (name = "Commands", description = "Command issue, agent polling and responses"),
        (name = "Conflicts", description = "Conflict detection, policy resolution and the conflict log"),
        (name = "Events", description = "Server-Sent Events stream of state changes"),
        (name = "Health", description = "Process and fleet health")
    ),
    paths(
        agents::heartbeat,
        agents::report_error,
        agents::agent_status,
        agents::issue_command,
        agents::poll_commands,
        commands::submit_response,
        commands::command_status,
        conflicts::detect_conflicts,
        conflicts::report_conflict,
        conflicts::resolve_conflict,
        conflicts::resolve_batch,
        conflicts::conflict_stats,
        conflicts::list_conflicts,
        conflicts::get_conflict,
        events::subscribe,
        health::ping,
        health::liveness,
        health::fleet_health,
    ),
    components(schemas(
        ApiError,
        ErrorCode,
        HeartbeatRequest,
        HeartbeatResponse,
        ReportErrorRequest,
        IssueCommandRequest,
        IssueCommandResponse,
        PollCommandsResponse,
        SubmitResponseRequest,
        SubmitResponseResponse,
        DetectConflictsRequest,
        ReportConflictRequest,
        ConflictListResponse,
        ResolveConflictRequest,
        ResolveConflictResponse,
        ResolveBatchRequest,
        AgentId,
        CommandId,
        ConflictId,
        LivenessStatus,
        CommandState,
        ConflictType,
        Resolution,
        FleetHealth,
        AlertSeverity,
        AgentStatusView,
        LivenessSummary,
        PendingCommand,
        CommandStatus,
        SubmitOutcome,
        DispatchStats,
        ConflictRecord,
        ConflictSource,
        SourceOrigin,
        ResolutionOutcome,
        BatchOutcome,
        BatchError,
        ConflictStats,
        SyncEvent,
        SyncAlert,
        AlertKind,
        SyncHealthSnapshot,
        HealthResponse,
        HealthStatus,
    ))
)]
pub struct ApiDoc;

impl ApiDoc {
    /// Generate the OpenAPI document as pretty-printed JSON.
    pub fn to_json() -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(&Self::openapi())
    }
}

/// GET /openapi.json
pub async fn openapi_json() -> impl IntoResponse {
    Json(ApiDoc::openapi())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_openapi_generation() -> Result<(), String> {
        let openapi = ApiDoc::openapi();
        assert_eq!(openapi.info.title, "fleetsync API");

        let tags = openapi
            .tags
            .as_ref()
            .ok_or_else(|| "OpenAPI tags missing".to_string())?;
        assert_eq!(tags.len(), 5);
        Ok(())
    }

    #[test]
    fn test_openapi_paths_exist() {
        let openapi = ApiDoc::openapi();
        let paths = &openapi.paths.paths;

        assert!(paths.contains_key("/v1/agents/heartbeat"));
        assert!(paths.contains_key("/v1/agents/{agent_id}/commands"));
        assert!(paths.contains_key("/v1/commands/{command_id}/response"));
        assert!(paths.contains_key("/v1/conflicts/resolve"));
        assert!(paths.contains_key("/v1/events"));
        assert!(paths.contains_key("/v1/health"));
    }

    #[test]
    fn test_openapi_json_serialization() -> Result<(), String> {
        let json = ApiDoc::to_json().map_err(|e| format!("Failed to serialize OpenAPI: {}", e))?;
        serde_json::from_str::<serde_json::Value>(&json)
            .map_err(|e| format!("Generated JSON invalid: {}", e))?;
        assert!(json.contains("SyncEvent"));
        Ok(())
    }
}
