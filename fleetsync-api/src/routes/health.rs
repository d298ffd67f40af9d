//! Health Check Endpoints
//!
//! - /health/ping - Simple liveness check
//! - /health/live - Process alive check with uptime
//! - /v1/health   - Fleet health snapshot with standing alerts
//!
//! Fleet health is reported with `200` whatever its value: a critical
//! fleet is still a working coordinator.

use axum::{extract::State, http::StatusCode, response::IntoResponse, routing::get, Json, Router};
use serde::{Deserialize, Serialize};

use crate::error::ApiResult;
use crate::health::SyncHealthAggregator;
use crate::state::AppState;

// ============================================================================
// TYPES
// ============================================================================

/// Process health response
#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct HealthResponse {
    pub status: HealthStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    pub version: String,
    pub uptime_seconds: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Unhealthy,
}

// ============================================================================
// HANDLERS
// ============================================================================

/// GET /health/ping - Simple pong response
#[cfg_attr(feature = "openapi", utoipa::path(
    get,
    path = "/health/ping",
    tag = "Health",
    responses(
        (status = 200, description = "Service is responding", body = String),
    ),
))]
pub async fn ping() -> impl IntoResponse {
    (StatusCode::OK, "pong")
}

/// GET /health/live - Process liveness check
#[cfg_attr(feature = "openapi", utoipa::path(
    get,
    path = "/health/live",
    tag = "Health",
    responses(
        (status = 200, description = "Process is alive", body = HealthResponse),
    ),
))]
pub async fn liveness(State(start_time): State<std::time::Instant>) -> impl IntoResponse {
    let response = HealthResponse {
        status: HealthStatus::Healthy,
        message: Some("Process is alive".to_string()),
        version: env!("CARGO_PKG_VERSION").to_string(),
        uptime_seconds: start_time.elapsed().as_secs(),
    };
    (StatusCode::OK, Json(response))
}

/// GET /v1/health - Fleet health snapshot
#[cfg_attr(feature = "openapi", utoipa::path(
    get,
    path = "/v1/health",
    tag = "Health",
    responses(
        (status = 200, description = "Fleet health and standing alerts", body = crate::health::SyncHealthSnapshot),
        (status = 500, description = "Coordinator state unavailable", body = crate::error::ApiError),
    ),
))]
pub async fn fleet_health(
    State(health): State<SyncHealthAggregator>,
) -> ApiResult<impl IntoResponse> {
    let snapshot = health.snapshot()?;
    Ok(Json(snapshot))
}

/// Routes mounted under `/health`.
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/ping", get(ping))
        .route("/live", get(liveness))
        .with_state(state)
}
