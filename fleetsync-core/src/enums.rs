//! Shared enums
//!
//! Wire names are snake_case/lowercase to match what edge agents send.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

// ============================================================================
// LIVENESS
// ============================================================================

/// Liveness status of an agent, either declared by the agent or computed
/// from heartbeat age.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
#[serde(rename_all = "lowercase")]
pub enum LivenessStatus {
    Online,
    Offline,
    Error,
}

impl LivenessStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            LivenessStatus::Online => "online",
            LivenessStatus::Offline => "offline",
            LivenessStatus::Error => "error",
        }
    }
}

impl fmt::Display for LivenessStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LivenessStatus {
    type Err = EnumParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "online" => Ok(LivenessStatus::Online),
            "offline" => Ok(LivenessStatus::Offline),
            "error" => Ok(LivenessStatus::Error),
            _ => Err(EnumParseError::new("liveness status", s)),
        }
    }
}

// ============================================================================
// CONFLICTS
// ============================================================================

/// Kind of disagreement between two views of a record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
#[serde(rename_all = "snake_case")]
pub enum ConflictType {
    DataMismatch,
    VersionConflict,
    TimestampConflict,
    DeleteConflict,
    CreateConflict,
    PermissionConflict,
}

impl ConflictType {
    pub const ALL: [ConflictType; 6] = [
        ConflictType::DataMismatch,
        ConflictType::VersionConflict,
        ConflictType::TimestampConflict,
        ConflictType::DeleteConflict,
        ConflictType::CreateConflict,
        ConflictType::PermissionConflict,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ConflictType::DataMismatch => "data_mismatch",
            ConflictType::VersionConflict => "version_conflict",
            ConflictType::TimestampConflict => "timestamp_conflict",
            ConflictType::DeleteConflict => "delete_conflict",
            ConflictType::CreateConflict => "create_conflict",
            ConflictType::PermissionConflict => "permission_conflict",
        }
    }
}

impl fmt::Display for ConflictType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ConflictType {
    type Err = EnumParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ConflictType::ALL
            .into_iter()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| EnumParseError::new("conflict type", s))
    }
}

/// How a conflict is (or is to be) resolved.
///
/// `WebAdminWins` keeps the coordinator's copy, `ControllerWins` keeps the
/// edge agent's copy.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
#[serde(rename_all = "snake_case")]
pub enum Resolution {
    WebAdminWins,
    ControllerWins,
    Merge,
    #[default]
    Manual,
    LastWriterWins,
    Versioned,
}

impl Resolution {
    pub fn as_str(&self) -> &'static str {
        match self {
            Resolution::WebAdminWins => "web_admin_wins",
            Resolution::ControllerWins => "controller_wins",
            Resolution::Merge => "merge",
            Resolution::Manual => "manual",
            Resolution::LastWriterWins => "last_writer_wins",
            Resolution::Versioned => "versioned",
        }
    }
}

impl fmt::Display for Resolution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// COMMANDS
// ============================================================================

/// Lifecycle state of a dispatched command.
///
/// ```text
/// Enqueued ── poll ──→ Delivered ──┬── response ──→ Responded
///                                  └── deadline ──→ TimedOut
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
#[serde(rename_all = "snake_case")]
pub enum CommandState {
    Enqueued,
    Delivered,
    Responded,
    TimedOut,
}

impl CommandState {
    /// True once no further response will be accepted.
    pub fn is_terminal(&self) -> bool {
        matches!(self, CommandState::Responded | CommandState::TimedOut)
    }
}

// ============================================================================
// PARSE ERROR
// ============================================================================

/// Error when parsing an enum from its wire name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnumParseError {
    pub kind: &'static str,
    pub value: String,
}

impl EnumParseError {
    fn new(kind: &'static str, value: &str) -> Self {
        Self {
            kind,
            value: value.to_string(),
        }
    }
}

impl fmt::Display for EnumParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Invalid {}: {}", self.kind, self.value)
    }
}

impl std::error::Error for EnumParseError {}
