//! Agent REST API Routes
//!
//! Heartbeat ingress, explicit error reports, status lookups, and the
//! command queue endpoints (issue from the coordinator side, poll from the
//! agent side).

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use chrono::Utc;
use fleetsync_agents::Heartbeat;
use fleetsync_core::{AgentId, CommandState};
use std::sync::Arc;
use std::time::Duration;

use crate::{
    coordinator::Coordinator,
    error::{ApiError, ApiResult},
    state::AppState,
    types::{
        HeartbeatRequest, HeartbeatResponse, IssueCommandRequest, IssueCommandResponse,
        PollCommandsResponse, ReportErrorRequest,
    },
};

// ============================================================================
// ROUTE HANDLERS
// ============================================================================

/// POST /v1/agents/heartbeat - Record an agent heartbeat
#[cfg_attr(feature = "openapi", utoipa::path(
    post,
    path = "/v1/agents/heartbeat",
    tag = "Agents",
    request_body = HeartbeatRequest,
    responses(
        (status = 200, description = "Heartbeat recorded", body = HeartbeatResponse),
        (status = 400, description = "Invalid request", body = ApiError),
    ),
))]
pub async fn heartbeat(
    State(coordinator): State<Arc<Coordinator>>,
    Json(req): Json<HeartbeatRequest>,
) -> ApiResult<impl IntoResponse> {
    if req.agent_id.as_str().trim().is_empty() {
        return Err(ApiError::validation_failed("agent_id must not be empty"));
    }

    let agent_id = req.agent_id.clone();
    let outcome = coordinator.heartbeat(Heartbeat {
        agent_id: req.agent_id,
        timestamp: req.timestamp.unwrap_or_else(Utc::now),
        status: req.status,
        metrics: req.metrics,
    });

    Ok(Json(HeartbeatResponse {
        agent_id,
        status: outcome.status,
        previous: outcome.previous,
        changed: outcome.changed(),
    }))
}

/// POST /v1/agents/{agent_id}/error - Report an agent error
#[cfg_attr(feature = "openapi", utoipa::path(
    post,
    path = "/v1/agents/{agent_id}/error",
    tag = "Agents",
    params(("agent_id" = String, Path, description = "Agent identifier")),
    request_body = ReportErrorRequest,
    responses(
        (status = 200, description = "Error recorded", body = HeartbeatResponse),
        (status = 400, description = "Invalid request", body = ApiError),
    ),
))]
pub async fn report_error(
    State(coordinator): State<Arc<Coordinator>>,
    Path(agent_id): Path<AgentId>,
    Json(req): Json<ReportErrorRequest>,
) -> ApiResult<impl IntoResponse> {
    if req.message.trim().is_empty() {
        return Err(ApiError::validation_failed("message must not be empty"));
    }

    let outcome = coordinator.report_error(
        &agent_id,
        req.message,
        req.timestamp.unwrap_or_else(Utc::now),
    );

    Ok(Json(HeartbeatResponse {
        agent_id,
        status: outcome.status,
        previous: outcome.previous,
        changed: outcome.changed(),
    }))
}

/// GET /v1/agents/{agent_id}/status - Current liveness of one agent
#[cfg_attr(feature = "openapi", utoipa::path(
    get,
    path = "/v1/agents/{agent_id}/status",
    tag = "Agents",
    params(("agent_id" = String, Path, description = "Agent identifier")),
    responses(
        (status = 200, description = "Agent status", body = fleetsync_agents::AgentStatusView),
        (status = 404, description = "Agent not found", body = ApiError),
    ),
))]
pub async fn agent_status(
    State(coordinator): State<Arc<Coordinator>>,
    Path(agent_id): Path<AgentId>,
) -> ApiResult<impl IntoResponse> {
    let view = coordinator.agent_status(&agent_id)?;
    Ok(Json(view))
}

/// POST /v1/agents/{agent_id}/commands - Issue a command to an agent
///
/// Without `wait` the command is queued and `202 Accepted` is returned at
/// once. With `wait` the call blocks until the agent answers: a timeout is
/// `504 TIMEOUT`, an agent-reported failure is `502 AGENT_FAILURE`.
#[cfg_attr(feature = "openapi", utoipa::path(
    post,
    path = "/v1/agents/{agent_id}/commands",
    tag = "Commands",
    params(("agent_id" = String, Path, description = "Agent identifier")),
    request_body = IssueCommandRequest,
    responses(
        (status = 200, description = "Agent answered", body = IssueCommandResponse),
        (status = 202, description = "Command queued", body = IssueCommandResponse),
        (status = 502, description = "Agent reported failure", body = ApiError),
        (status = 504, description = "Agent did not answer in time", body = ApiError),
    ),
))]
pub async fn issue_command(
    State(coordinator): State<Arc<Coordinator>>,
    Path(agent_id): Path<AgentId>,
    Json(req): Json<IssueCommandRequest>,
) -> ApiResult<impl IntoResponse> {
    if req.command_type.trim().is_empty() {
        return Err(ApiError::validation_failed("command_type must not be empty"));
    }

    if !req.wait {
        let command_id = coordinator.enqueue(&agent_id, req.command_type, req.payload);
        return Ok((
            StatusCode::ACCEPTED,
            Json(IssueCommandResponse {
                command_id,
                state: CommandState::Enqueued,
                result: None,
            }),
        ));
    }

    let timeout = req.timeout_ms.map(Duration::from_millis);
    let (command_id, result) = coordinator
        .issue(&agent_id, req.command_type, req.payload, timeout)
        .await;
    let value = result?;

    Ok((
        StatusCode::OK,
        Json(IssueCommandResponse {
            command_id,
            state: CommandState::Responded,
            result: Some(value),
        }),
    ))
}

/// GET /v1/agents/{agent_id}/commands - Agent poll: drain queued commands
#[cfg_attr(feature = "openapi", utoipa::path(
    get,
    path = "/v1/agents/{agent_id}/commands",
    tag = "Commands",
    params(("agent_id" = String, Path, description = "Agent identifier")),
    responses(
        (status = 200, description = "Queued commands, oldest first", body = PollCommandsResponse),
    ),
))]
pub async fn poll_commands(
    State(coordinator): State<Arc<Coordinator>>,
    Path(agent_id): Path<AgentId>,
) -> ApiResult<impl IntoResponse> {
    let commands = coordinator.poll(&agent_id);
    Ok(Json(PollCommandsResponse { agent_id, commands }))
}

// ============================================================================
// ROUTER
// ============================================================================

pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/heartbeat", post(heartbeat))
        .route("/:agent_id/error", post(report_error))
        .route("/:agent_id/status", get(agent_status))
        .route("/:agent_id/commands", post(issue_command).get(poll_commands))
        .with_state(state)
}
