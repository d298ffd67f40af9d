//! Fleet health and standing alerts
//!
//! Combines liveness, conflict and dispatch state into the one snapshot
//! dashboards poll. An unresolved conflict shows up here as a standing
//! alert; it never blocks synchronization work.

use crate::coordinator::Coordinator;
use chrono::Utc;
use fleetsync_agents::{DispatchStats, LivenessSummary};
use fleetsync_conflict::ConflictStats;
use fleetsync_core::{AlertSeverity, FleetHealth, FleetResult, Timestamp};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// What a standing alert is about.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
#[serde(rename_all = "snake_case")]
pub enum AlertKind {
    /// The online fraction crossed a health threshold
    FleetDegraded,
    AgentsOffline,
    AgentsInError,
    UnresolvedConflicts,
}

/// One standing alert.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct SyncAlert {
    pub severity: AlertSeverity,
    pub kind: AlertKind,
    pub message: String,
}

/// Everything a dashboard needs to render fleet health.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct SyncHealthSnapshot {
    pub health: FleetHealth,
    pub agents: LivenessSummary,
    pub conflicts: ConflictStats,
    pub dispatch: DispatchStats,
    pub subscribers: usize,
    pub alerts: Vec<SyncAlert>,
    #[cfg_attr(feature = "openapi", schema(value_type = String, format = "date-time"))]
    pub checked_at: Timestamp,
}

/// Derive standing alerts from liveness and conflict counts.
///
/// Having no live subscribers is normal (nobody has a dashboard open) and
/// is not an alert.
pub fn alerts_for(agents: &LivenessSummary, conflicts: &ConflictStats) -> Vec<SyncAlert> {
    let mut alerts = Vec::new();

    if agents.total > 0 && agents.health != FleetHealth::Healthy && agents.offline + agents.error > 0 {
        alerts.push(SyncAlert {
            severity: agents.health.into(),
            kind: AlertKind::FleetDegraded,
            message: format!("{} of {} agents online", agents.online, agents.total),
        });
    }
    if agents.offline > 0 {
        alerts.push(SyncAlert {
            severity: AlertSeverity::Warning,
            kind: AlertKind::AgentsOffline,
            message: format!("{} agent(s) offline", agents.offline),
        });
    }
    if agents.error > 0 {
        alerts.push(SyncAlert {
            severity: AlertSeverity::Warning,
            kind: AlertKind::AgentsInError,
            message: format!("{} agent(s) reporting errors", agents.error),
        });
    }
    if conflicts.unresolved > 0 {
        alerts.push(SyncAlert {
            severity: AlertSeverity::Warning,
            kind: AlertKind::UnresolvedConflicts,
            message: format!(
                "{} conflict(s) awaiting manual resolution",
                conflicts.unresolved
            ),
        });
    }
    alerts
}

/// Builds [`SyncHealthSnapshot`]s from a coordinator.
#[derive(Debug, Clone)]
pub struct SyncHealthAggregator {
    coordinator: Arc<Coordinator>,
}

impl SyncHealthAggregator {
    pub fn new(coordinator: Arc<Coordinator>) -> Self {
        Self { coordinator }
    }

    pub fn snapshot(&self) -> FleetResult<SyncHealthSnapshot> {
        self.snapshot_at(Utc::now())
    }

    pub fn snapshot_at(&self, now: Timestamp) -> FleetResult<SyncHealthSnapshot> {
        let conflicts = self.coordinator.resolver().stats_at(now)?;
        let agents = self
            .coordinator
            .liveness()
            .summary_at(now, conflicts.unresolved > 0);
        let alerts = alerts_for(&agents, &conflicts);

        Ok(SyncHealthSnapshot {
            health: agents.health,
            agents,
            conflicts,
            dispatch: self.coordinator.dispatcher().stats(),
            subscribers: self.coordinator.broadcaster().subscriber_count(),
            alerts,
            checked_at: now,
        })
    }
}
