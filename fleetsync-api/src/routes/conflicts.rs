//! Conflict REST API Routes
//!
//! Detection, manual reporting, policy resolution (single and batch), and
//! log queries. Resolution failures are structured results inside a `200`
//! body: a conflict that cannot be resolved automatically stays `manual`
//! and is not an HTTP error.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use fleetsync_conflict::{BatchError, ConflictRecord};
use fleetsync_core::{ConflictError, ConflictId};
use std::sync::Arc;

use crate::{
    coordinator::Coordinator,
    error::{ApiError, ApiResult},
    state::AppState,
    types::{
        ConflictListResponse, DetectConflictsRequest, ListConflictsQuery, ReportConflictRequest,
        ResolveBatchRequest, ResolveConflictRequest, ResolveConflictResponse,
        DEFAULT_CONFLICT_PAGE,
    },
};

fn validate_path(path: &str) -> ApiResult<()> {
    if path.trim().is_empty() || path.split('.').any(str::is_empty) {
        return Err(ApiError::validation_failed(format!(
            "invalid record path {:?}",
            path
        )));
    }
    Ok(())
}

/// POST /v1/conflicts/detect - Compare two sources of one record
#[cfg_attr(feature = "openapi", utoipa::path(
    post,
    path = "/v1/conflicts/detect",
    tag = "Conflicts",
    request_body = DetectConflictsRequest,
    responses(
        (status = 200, description = "Detected conflicts (possibly none)", body = ConflictListResponse),
        (status = 400, description = "Invalid request", body = ApiError),
    ),
))]
pub async fn detect_conflicts(
    State(coordinator): State<Arc<Coordinator>>,
    Json(req): Json<DetectConflictsRequest>,
) -> ApiResult<impl IntoResponse> {
    validate_path(&req.path)?;
    let conflicts = coordinator.detect_conflicts(&req.path, &req.a, &req.b)?;
    Ok(Json(ConflictListResponse { conflicts }))
}

/// POST /v1/conflicts/report - Log a conflict detection cannot infer
#[cfg_attr(feature = "openapi", utoipa::path(
    post,
    path = "/v1/conflicts/report",
    tag = "Conflicts",
    request_body = ReportConflictRequest,
    responses(
        (status = 201, description = "Conflict logged", body = ConflictRecord),
        (status = 400, description = "Invalid request", body = ApiError),
    ),
))]
pub async fn report_conflict(
    State(coordinator): State<Arc<Coordinator>>,
    Json(req): Json<ReportConflictRequest>,
) -> ApiResult<impl IntoResponse> {
    validate_path(&req.path)?;
    let record = ConflictRecord::new(req.path, req.conflict_type, req.sources)?;
    let record = coordinator.report_conflict(record)?;
    Ok((StatusCode::CREATED, Json(record)))
}

/// POST /v1/conflicts/resolve - Resolve one conflict by policy
#[cfg_attr(feature = "openapi", utoipa::path(
    post,
    path = "/v1/conflicts/resolve",
    tag = "Conflicts",
    request_body = ResolveConflictRequest,
    responses(
        (status = 200, description = "Resolution outcome", body = ResolveConflictResponse),
        (status = 400, description = "Neither or both of conflict_id and record given", body = ApiError),
        (status = 404, description = "Conflict not found", body = ApiError),
        (status = 409, description = "Conflict already resolved", body = ApiError),
    ),
))]
pub async fn resolve_conflict(
    State(coordinator): State<Arc<Coordinator>>,
    Json(req): Json<ResolveConflictRequest>,
) -> ApiResult<impl IntoResponse> {
    let (record, outcome) = match (req.conflict_id, req.record) {
        (Some(conflict_id), None) => coordinator.resolve(conflict_id)?,
        (None, Some(mut record)) => {
            if record.sources.len() < 2 {
                return Err(ConflictError::InsufficientSources {
                    count: record.sources.len(),
                }
                .into());
            }
            let outcome = coordinator.resolve_record(&mut record);
            (record, outcome)
        }
        _ => {
            return Err(ApiError::validation_failed(
                "exactly one of conflict_id and record is required",
            ))
        }
    };
    Ok(Json(ResolveConflictResponse { record, outcome }))
}

/// POST /v1/conflicts/resolve/batch - Resolve many conflicts independently
#[cfg_attr(feature = "openapi", utoipa::path(
    post,
    path = "/v1/conflicts/resolve/batch",
    tag = "Conflicts",
    request_body = ResolveBatchRequest,
    responses(
        (status = 200, description = "Per-record outcomes", body = fleetsync_conflict::BatchOutcome),
    ),
))]
pub async fn resolve_batch(
    State(coordinator): State<Arc<Coordinator>>,
    Json(req): Json<ResolveBatchRequest>,
) -> ApiResult<impl IntoResponse> {
    let mut records = req.records;
    let mut lookup_errors = Vec::new();
    for conflict_id in req.conflict_ids {
        match coordinator.resolver().get(conflict_id) {
            Ok(record) => records.push(record),
            Err(err) => lookup_errors.push(BatchError {
                conflict_id,
                message: err.to_string(),
            }),
        }
    }

    let mut outcome = coordinator.resolve_batch(records);
    outcome.errors.extend(lookup_errors);
    Ok(Json(outcome))
}

/// GET /v1/conflicts/stats - Totals for alerting
#[cfg_attr(feature = "openapi", utoipa::path(
    get,
    path = "/v1/conflicts/stats",
    tag = "Conflicts",
    responses(
        (status = 200, description = "Conflict statistics", body = fleetsync_conflict::ConflictStats),
    ),
))]
pub async fn conflict_stats(
    State(coordinator): State<Arc<Coordinator>>,
) -> ApiResult<impl IntoResponse> {
    let stats = coordinator.resolver().stats()?;
    Ok(Json(stats))
}

/// GET /v1/conflicts - Recent conflicts, newest first
#[cfg_attr(feature = "openapi", utoipa::path(
    get,
    path = "/v1/conflicts",
    tag = "Conflicts",
    params(
        ("limit" = Option<usize>, Query, description = "Maximum number of records"),
        ("unresolved_only" = Option<bool>, Query, description = "Only unresolved records"),
    ),
    responses(
        (status = 200, description = "Conflict history", body = ConflictListResponse),
    ),
))]
pub async fn list_conflicts(
    State(coordinator): State<Arc<Coordinator>>,
    Query(params): Query<ListConflictsQuery>,
) -> ApiResult<impl IntoResponse> {
    let limit = params.limit.unwrap_or(DEFAULT_CONFLICT_PAGE);
    let conflicts = if params.unresolved_only {
        let mut unresolved = coordinator.resolver().unresolved()?;
        unresolved.reverse();
        unresolved.truncate(limit);
        unresolved
    } else {
        coordinator.resolver().history(limit)?
    };
    Ok(Json(ConflictListResponse { conflicts }))
}

/// GET /v1/conflicts/{conflict_id} - One logged conflict
#[cfg_attr(feature = "openapi", utoipa::path(
    get,
    path = "/v1/conflicts/{conflict_id}",
    tag = "Conflicts",
    params(("conflict_id" = String, Path, description = "Conflict identifier")),
    responses(
        (status = 200, description = "Conflict record", body = ConflictRecord),
        (status = 404, description = "Conflict not found", body = ApiError),
    ),
))]
pub async fn get_conflict(
    State(coordinator): State<Arc<Coordinator>>,
    Path(conflict_id): Path<ConflictId>,
) -> ApiResult<impl IntoResponse> {
    let record = coordinator.resolver().get(conflict_id)?;
    Ok(Json(record))
}

pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/", get(list_conflicts))
        .route("/detect", post(detect_conflicts))
        .route("/report", post(report_conflict))
        .route("/resolve", post(resolve_conflict))
        .route("/resolve/batch", post(resolve_batch))
        .route("/stats", get(conflict_stats))
        .route("/:conflict_id", get(get_conflict))
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_path() {
        assert!(validate_path("dashboards.main").is_ok());
        assert!(validate_path("").is_err());
        assert!(validate_path("dashboards..main").is_err());
        assert!(validate_path("dashboards.").is_err());
    }
}
