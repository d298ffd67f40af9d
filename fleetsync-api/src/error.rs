//! Error Types for the fleetsync API
//!
//! This module defines error handling for the HTTP layer:
//! - ApiError struct for structured error responses
//! - ErrorCode enum for categorizing errors and owning the status mapping
//! - IntoResponse implementation for Axum HTTP responses
//! - Conversions from the core `FleetError` taxonomy
//!
//! All errors are serialized as JSON with appropriate HTTP status codes.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use fleetsync_core::{
    AgentError, ConfigError, ConflictError, DispatchError, FleetError, StorageError,
};
use serde::{Deserialize, Serialize};
use std::fmt;

// ============================================================================
// ERROR CODE ENUM
// ============================================================================

/// Error codes for API responses.
///
/// Each error code maps to a specific HTTP status code. Callers use the
/// code, not the status, to tell "agent offline" (`TIMEOUT`) apart from
/// "agent rejected the command" (`AGENT_FAILURE`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    // ========================================================================
    // Validation Errors (400, 422)
    // ========================================================================
    /// Request validation failed
    ValidationFailed,

    /// Request contains invalid input data
    InvalidInput,

    /// No conflict policy applies to the path and type
    PolicyMissing,

    /// Resolved data was rejected by the policy validator
    ResolutionRejected,

    // ========================================================================
    // Not Found Errors (404)
    // ========================================================================
    /// Requested agent has never reported
    AgentNotFound,

    /// Requested command is unknown or was purged
    CommandNotFound,

    /// Requested conflict is unknown or was evicted from the log
    ConflictNotFound,

    // ========================================================================
    // Conflict Errors (409)
    // ========================================================================
    /// Another caller is already waiting for this command
    AlreadyAwaited,

    /// Operation conflicts with current state
    StateConflict,

    // ========================================================================
    // Upstream Errors (502, 504)
    // ========================================================================
    /// The agent answered and reported failure
    AgentFailure,

    /// The agent did not answer in time
    Timeout,

    // ========================================================================
    // Server Errors (500, 503)
    // ========================================================================
    /// Internal server error
    InternalError,

    /// Service is temporarily unavailable
    ServiceUnavailable,
}

impl ErrorCode {
    /// Get the HTTP status code for this error code.
    pub fn status_code(&self) -> StatusCode {
        match self {
            ErrorCode::ValidationFailed | ErrorCode::InvalidInput => StatusCode::BAD_REQUEST,

            ErrorCode::PolicyMissing | ErrorCode::ResolutionRejected => {
                StatusCode::UNPROCESSABLE_ENTITY
            }

            ErrorCode::AgentNotFound
            | ErrorCode::CommandNotFound
            | ErrorCode::ConflictNotFound => StatusCode::NOT_FOUND,

            ErrorCode::AlreadyAwaited | ErrorCode::StateConflict => StatusCode::CONFLICT,

            ErrorCode::AgentFailure => StatusCode::BAD_GATEWAY,
            ErrorCode::Timeout => StatusCode::GATEWAY_TIMEOUT,

            ErrorCode::ServiceUnavailable => StatusCode::SERVICE_UNAVAILABLE,
            ErrorCode::InternalError => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Get a default message for this error code.
    pub fn default_message(&self) -> &'static str {
        match self {
            ErrorCode::ValidationFailed => "Request validation failed",
            ErrorCode::InvalidInput => "Invalid input data",
            ErrorCode::PolicyMissing => "No conflict policy applies",
            ErrorCode::ResolutionRejected => "Resolved data failed validation",
            ErrorCode::AgentNotFound => "Agent not found",
            ErrorCode::CommandNotFound => "Command not found",
            ErrorCode::ConflictNotFound => "Conflict not found",
            ErrorCode::AlreadyAwaited => "Command response is already awaited",
            ErrorCode::StateConflict => "Operation conflicts with current state",
            ErrorCode::AgentFailure => "Agent reported failure",
            ErrorCode::Timeout => "Agent did not respond in time",
            ErrorCode::InternalError => "Internal server error",
            ErrorCode::ServiceUnavailable => "Service temporarily unavailable",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

// ============================================================================
// API ERROR STRUCT
// ============================================================================

/// Structured error response for API operations.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct ApiError {
    /// Error code categorizing the error
    pub code: ErrorCode,

    /// Human-readable error message
    pub message: String,

    /// Optional additional details
    #[serde(skip_serializing_if = "Option::is_none")]
    #[cfg_attr(feature = "openapi", schema(value_type = Option<Object>))]
    pub details: Option<serde_json::Value>,
}

impl ApiError {
    /// Create a new ApiError with the given code and message.
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            details: None,
        }
    }

    /// Create an error using the code's default message.
    pub fn from_code(code: ErrorCode) -> Self {
        Self::new(code, code.default_message())
    }

    /// Add details to this error.
    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = Some(details);
        self
    }

    /// Get the HTTP status code for this error.
    pub fn status_code(&self) -> StatusCode {
        self.code.status_code()
    }

    pub fn validation_failed(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::ValidationFailed, message)
    }

    pub fn invalid_input(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::InvalidInput, message)
    }

    pub fn agent_not_found(agent_id: impl fmt::Display) -> Self {
        Self::new(ErrorCode::AgentNotFound, format!("Agent {} not found", agent_id))
    }

    pub fn command_not_found(command_id: impl fmt::Display) -> Self {
        Self::new(
            ErrorCode::CommandNotFound,
            format!("Command {} not found", command_id),
        )
    }

    pub fn conflict_not_found(conflict_id: impl fmt::Display) -> Self {
        Self::new(
            ErrorCode::ConflictNotFound,
            format!("Conflict {} not found", conflict_id),
        )
    }

    pub fn state_conflict(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::StateConflict, message)
    }

    pub fn internal_error(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::InternalError, message)
    }

    pub fn service_unavailable(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::ServiceUnavailable, message)
    }
}

impl fmt::Display for ApiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.code, self.message)
    }
}

impl std::error::Error for ApiError {}

/// Convert ApiError into an HTTP response.
///
/// ```ignore
/// async fn handler() -> Result<Json<Response>, ApiError> {
///     Err(ApiError::agent_not_found("display-7"))
/// }
/// ```
impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let body = Json(self);
        (status, body).into_response()
    }
}

// ============================================================================
// CONVERSIONS FROM CORE ERRORS
// ============================================================================

impl From<AgentError> for ApiError {
    fn from(err: AgentError) -> Self {
        match err {
            AgentError::NotFound { agent_id } => ApiError::agent_not_found(agent_id),
        }
    }
}

impl From<DispatchError> for ApiError {
    fn from(err: DispatchError) -> Self {
        let message = err.to_string();
        match err {
            DispatchError::NotFound { command_id } => ApiError::command_not_found(command_id),
            DispatchError::Timeout {
                command_id,
                timeout_ms,
            } => ApiError::new(ErrorCode::Timeout, message).with_details(serde_json::json!({
                "command_id": command_id,
                "timeout_ms": timeout_ms,
            })),
            DispatchError::AgentFailure {
                command_id,
                message: agent_message,
            } => ApiError::new(ErrorCode::AgentFailure, message).with_details(serde_json::json!({
                "command_id": command_id,
                "agent_error": agent_message,
            })),
            DispatchError::AlreadyAwaited { .. } => ApiError::new(ErrorCode::AlreadyAwaited, message),
            DispatchError::Cancelled { .. } => ApiError::service_unavailable(message),
        }
    }
}

impl From<ConflictError> for ApiError {
    fn from(err: ConflictError) -> Self {
        let message = err.to_string();
        match err {
            ConflictError::NotFound { conflict_id } => ApiError::conflict_not_found(conflict_id),
            ConflictError::PolicyMissing { .. } => ApiError::new(ErrorCode::PolicyMissing, message),
            ConflictError::ValidationFailure { .. } | ConflictError::MergeFailed { .. } => {
                ApiError::new(ErrorCode::ResolutionRejected, message)
            }
            ConflictError::AlreadyResolved { .. } | ConflictError::DuplicatePolicy { .. } => {
                ApiError::state_conflict(message)
            }
            ConflictError::InvalidPattern { .. } | ConflictError::InsufficientSources { .. } => {
                ApiError::validation_failed(message)
            }
        }
    }
}

impl From<StorageError> for ApiError {
    fn from(err: StorageError) -> Self {
        tracing::error!("Storage error: {:?}", err);
        ApiError::internal_error("Coordinator state is unavailable")
    }
}

impl From<ConfigError> for ApiError {
    fn from(err: ConfigError) -> Self {
        tracing::error!("Configuration error: {:?}", err);
        ApiError::internal_error(err.to_string())
    }
}

impl From<FleetError> for ApiError {
    fn from(err: FleetError) -> Self {
        match err {
            FleetError::Storage(e) => e.into(),
            FleetError::Agent(e) => e.into(),
            FleetError::Dispatch(e) => e.into(),
            FleetError::Conflict(e) => e.into(),
            FleetError::Config(e) => e.into(),
            FleetError::Broadcast(e) => {
                tracing::error!("Broadcast error surfaced to a caller: {:?}", e);
                ApiError::internal_error(e.to_string())
            }
        }
    }
}

impl From<serde_json::Error> for ApiError {
    fn from(err: serde_json::Error) -> Self {
        tracing::error!("JSON serialization error: {:?}", err);
        ApiError::invalid_input(format!("Invalid JSON: {}", err))
    }
}

// ============================================================================
// RESULT TYPE ALIAS
// ============================================================================

/// Result type alias for API operations.
pub type ApiResult<T> = Result<T, ApiError>;
