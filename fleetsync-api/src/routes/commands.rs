//! Command REST API Routes
//!
//! Response ingress from agents and lifecycle lookups.

use axum::{
    extract::{Path, State},
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use chrono::Utc;
use fleetsync_agents::CommandResponse;
use fleetsync_core::CommandId;
use std::sync::Arc;

use crate::{
    coordinator::Coordinator,
    error::{ApiError, ApiResult},
    state::AppState,
    types::{SubmitResponseRequest, SubmitResponseResponse},
};

/// POST /v1/commands/{command_id}/response - Agent posts a command result
///
/// Always `200`: a response for an unknown or already finished command is
/// reported as `discarded` rather than as an error, since the agent cannot
/// do anything about it.
#[cfg_attr(feature = "openapi", utoipa::path(
    post,
    path = "/v1/commands/{command_id}/response",
    tag = "Commands",
    params(("command_id" = String, Path, description = "Command identifier")),
    request_body = SubmitResponseRequest,
    responses(
        (status = 200, description = "Response accepted", body = SubmitResponseResponse),
        (status = 400, description = "Invalid request", body = ApiError),
    ),
))]
pub async fn submit_response(
    State(coordinator): State<Arc<Coordinator>>,
    Path(command_id): Path<CommandId>,
    Json(req): Json<SubmitResponseRequest>,
) -> ApiResult<impl IntoResponse> {
    if !req.success && req.error.is_none() {
        return Err(ApiError::validation_failed(
            "a failed response must carry an error message",
        ));
    }

    let outcome = coordinator.submit_response(CommandResponse {
        command_id: command_id.clone(),
        success: req.success,
        data: req.data,
        error: req.error,
        received_at: Utc::now(),
    });

    Ok(Json(SubmitResponseResponse {
        command_id,
        outcome,
    }))
}

/// GET /v1/commands/{command_id} - Lifecycle state of a command
#[cfg_attr(feature = "openapi", utoipa::path(
    get,
    path = "/v1/commands/{command_id}",
    tag = "Commands",
    params(("command_id" = String, Path, description = "Command identifier")),
    responses(
        (status = 200, description = "Command state", body = fleetsync_agents::CommandStatus),
        (status = 404, description = "Command not found", body = ApiError),
    ),
))]
pub async fn command_status(
    State(coordinator): State<Arc<Coordinator>>,
    Path(command_id): Path<CommandId>,
) -> ApiResult<impl IntoResponse> {
    let status = coordinator.command_status(&command_id)?;
    Ok(Json(status))
}

pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/:command_id", get(command_status))
        .route("/:command_id/response", post(submit_response))
        .with_state(state)
}
