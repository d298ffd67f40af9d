//! Agent liveness tracking
//!
//! Status is recomputed on every read from the last heartbeat, so no
//! background timer is needed to flip an agent offline.

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use fleetsync_core::{
    classify_fleet_health, AgentError, AgentId, FleetHealth, LivenessStatus, SyncConfig,
    Timestamp,
};
use serde::{Deserialize, Serialize};
use std::time::Duration;

// ============================================================================
// HEARTBEAT INGRESS
// ============================================================================

/// A heartbeat as sent by an edge agent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct Heartbeat {
    pub agent_id: AgentId,
    #[cfg_attr(feature = "openapi", schema(value_type = String, format = "date-time"))]
    pub timestamp: Timestamp,
    pub status: LivenessStatus,
    /// Opaque agent-reported telemetry, kept for the status view.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[cfg_attr(feature = "openapi", schema(value_type = Option<Object>))]
    pub metrics: Option<serde_json::Value>,
}

/// Result of ingesting a heartbeat or error report.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HeartbeatOutcome {
    /// Status after the update.
    pub status: LivenessStatus,
    /// Status before the update, `None` for a newly registered agent.
    pub previous: Option<LivenessStatus>,
}

impl HeartbeatOutcome {
    /// True when the update moved the agent to a different status.
    pub fn changed(&self) -> bool {
        self.previous != Some(self.status)
    }
}

// ============================================================================
// AGENT STATE
// ============================================================================

/// Liveness state of one registered agent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct AgentLivenessState {
    pub agent_id: AgentId,
    #[cfg_attr(feature = "openapi", schema(value_type = String, format = "date-time"))]
    pub first_seen: Timestamp,
    #[cfg_attr(feature = "openapi", schema(value_type = String, format = "date-time"))]
    pub last_seen: Timestamp,
    pub declared_status: LivenessStatus,
    pub last_error: Option<String>,
    #[cfg_attr(feature = "openapi", schema(value_type = Option<Object>))]
    pub metrics: Option<serde_json::Value>,
}

impl AgentLivenessState {
    fn new(agent_id: AgentId, at: Timestamp, declared_status: LivenessStatus) -> Self {
        Self {
            agent_id,
            first_seen: at,
            last_seen: at,
            declared_status,
            last_error: None,
            metrics: None,
        }
    }

    /// Status of this agent as of `now`.
    ///
    /// A declared error always wins. Otherwise the agent is offline once
    /// its last heartbeat is at least `threshold` old. A heartbeat stamped
    /// in the future (clock skew) counts as fresh.
    pub fn computed_status(&self, now: Timestamp, threshold: Duration) -> LivenessStatus {
        if self.declared_status == LivenessStatus::Error {
            return LivenessStatus::Error;
        }
        match now.signed_duration_since(self.last_seen).to_std() {
            Ok(age) if age >= threshold => LivenessStatus::Offline,
            _ => LivenessStatus::Online,
        }
    }
}

/// Point-in-time view of an agent, as served to dashboards.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct AgentStatusView {
    pub agent_id: AgentId,
    pub status: LivenessStatus,
    #[cfg_attr(feature = "openapi", schema(value_type = String, format = "date-time"))]
    pub last_seen: Timestamp,
    pub declared_status: LivenessStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    #[cfg_attr(feature = "openapi", schema(value_type = Option<Object>))]
    pub metrics: Option<serde_json::Value>,
}

/// Fleet-wide liveness counts with the derived health.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct LivenessSummary {
    pub total: usize,
    pub online: usize,
    pub offline: usize,
    pub error: usize,
    pub health: FleetHealth,
}

/// Count statuses and classify the fleet.
///
/// `pending_sync` degrades an otherwise healthy fleet to `warning`.
pub fn aggregate<I>(statuses: I, pending_sync: bool) -> LivenessSummary
where
    I: IntoIterator<Item = LivenessStatus>,
{
    let (mut online, mut offline, mut error) = (0, 0, 0);
    for status in statuses {
        match status {
            LivenessStatus::Online => online += 1,
            LivenessStatus::Offline => offline += 1,
            LivenessStatus::Error => error += 1,
        }
    }
    let total = online + offline + error;
    LivenessSummary {
        total,
        online,
        offline,
        error,
        health: classify_fleet_health(online, total, pending_sync),
    }
}

// ============================================================================
// TRACKER
// ============================================================================

/// Tracks every registered agent's last heartbeat.
///
/// Agents are partitioned by id, so heartbeats from different agents never
/// contend on a single lock.
#[derive(Debug)]
pub struct LivenessTracker {
    agents: DashMap<AgentId, AgentLivenessState>,
    threshold: Duration,
}

impl LivenessTracker {
    pub fn new(threshold: Duration) -> Self {
        Self {
            agents: DashMap::new(),
            threshold,
        }
    }

    pub fn from_config(config: &SyncConfig) -> Self {
        Self::new(config.liveness_threshold)
    }

    pub fn threshold(&self) -> Duration {
        self.threshold
    }

    /// Record a heartbeat and return the recomputed status.
    ///
    /// Heartbeats are last-write-wins on `last_seen`: an older heartbeat
    /// arriving after a newer one moves `last_seen` backwards.
    pub fn report_heartbeat(
        &self,
        agent_id: &AgentId,
        declared_status: LivenessStatus,
        observed_at: Timestamp,
    ) -> HeartbeatOutcome {
        self.apply(agent_id, declared_status, observed_at, None)
    }

    /// Ingest a full heartbeat, keeping its metrics.
    pub fn record(&self, heartbeat: Heartbeat) -> HeartbeatOutcome {
        self.apply(
            &heartbeat.agent_id,
            heartbeat.status,
            heartbeat.timestamp,
            heartbeat.metrics,
        )
    }

    fn apply(
        &self,
        agent_id: &AgentId,
        declared_status: LivenessStatus,
        observed_at: Timestamp,
        metrics: Option<serde_json::Value>,
    ) -> HeartbeatOutcome {
        let threshold = self.threshold;
        let outcome = match self.agents.entry(agent_id.clone()) {
            Entry::Occupied(mut entry) => {
                let previous = entry.get().computed_status(observed_at, threshold);
                let state = entry.get_mut();
                state.last_seen = observed_at;
                state.declared_status = declared_status;
                if declared_status != LivenessStatus::Error {
                    state.last_error = None;
                }
                if metrics.is_some() {
                    state.metrics = metrics;
                }
                HeartbeatOutcome {
                    status: state.computed_status(observed_at, threshold),
                    previous: Some(previous),
                }
            }
            Entry::Vacant(entry) => {
                let mut state = AgentLivenessState::new(agent_id.clone(), observed_at, declared_status);
                state.metrics = metrics;
                let status = state.computed_status(observed_at, threshold);
                entry.insert(state);
                HeartbeatOutcome {
                    status,
                    previous: None,
                }
            }
        };

        if outcome.changed() {
            tracing::info!(
                agent_id = %agent_id,
                status = %outcome.status,
                previous = ?outcome.previous,
                "Agent status changed"
            );
        } else {
            tracing::trace!(agent_id = %agent_id, "Heartbeat recorded");
        }
        outcome
    }

    /// Register an agent without a heartbeat. Existing agents are untouched.
    pub fn register(&self, agent_id: &AgentId, at: Timestamp) -> bool {
        match self.agents.entry(agent_id.clone()) {
            Entry::Occupied(_) => false,
            Entry::Vacant(entry) => {
                entry.insert(AgentLivenessState::new(
                    agent_id.clone(),
                    at,
                    LivenessStatus::Online,
                ));
                tracing::debug!(agent_id = %agent_id, "Agent registered");
                true
            }
        }
    }

    /// Record an explicit error reported by (or about) an agent.
    ///
    /// The error sticks until the agent heartbeats with a non-error status.
    /// An unknown agent is registered by its first error report.
    pub fn report_error(
        &self,
        agent_id: &AgentId,
        message: impl Into<String>,
        at: Timestamp,
    ) -> HeartbeatOutcome {
        let message = message.into();
        let threshold = self.threshold;
        let outcome = match self.agents.entry(agent_id.clone()) {
            Entry::Occupied(mut entry) => {
                let previous = entry.get().computed_status(at, threshold);
                let state = entry.get_mut();
                state.declared_status = LivenessStatus::Error;
                state.last_error = Some(message.clone());
                HeartbeatOutcome {
                    status: LivenessStatus::Error,
                    previous: Some(previous),
                }
            }
            Entry::Vacant(entry) => {
                let mut state =
                    AgentLivenessState::new(agent_id.clone(), at, LivenessStatus::Error);
                state.last_error = Some(message.clone());
                entry.insert(state);
                HeartbeatOutcome {
                    status: LivenessStatus::Error,
                    previous: None,
                }
            }
        };
        tracing::warn!(agent_id = %agent_id, error = %message, "Agent reported error");
        outcome
    }

    /// Current status of an agent.
    pub fn status_of(&self, agent_id: &AgentId) -> Result<LivenessStatus, AgentError> {
        self.status_at(agent_id, chrono::Utc::now())
    }

    /// Status of an agent as of `now`.
    pub fn status_at(
        &self,
        agent_id: &AgentId,
        now: Timestamp,
    ) -> Result<LivenessStatus, AgentError> {
        self.agents
            .get(agent_id)
            .map(|state| state.computed_status(now, self.threshold))
            .ok_or_else(|| AgentError::NotFound {
                agent_id: agent_id.clone(),
            })
    }

    /// Full view of one agent as of `now`.
    pub fn view_at(&self, agent_id: &AgentId, now: Timestamp) -> Result<AgentStatusView, AgentError> {
        self.agents
            .get(agent_id)
            .map(|state| self.view_of(&state, now))
            .ok_or_else(|| AgentError::NotFound {
                agent_id: agent_id.clone(),
            })
    }

    /// Views of every agent as of `now`, sorted by agent id.
    pub fn snapshot_at(&self, now: Timestamp) -> Vec<AgentStatusView> {
        let mut views: Vec<AgentStatusView> = self
            .agents
            .iter()
            .map(|entry| self.view_of(entry.value(), now))
            .collect();
        views.sort_by(|a, b| a.agent_id.cmp(&b.agent_id));
        views
    }

    fn view_of(&self, state: &AgentLivenessState, now: Timestamp) -> AgentStatusView {
        AgentStatusView {
            agent_id: state.agent_id.clone(),
            status: state.computed_status(now, self.threshold),
            last_seen: state.last_seen,
            declared_status: state.declared_status,
            last_error: state.last_error.clone(),
            metrics: state.metrics.clone(),
        }
    }

    /// Liveness counts across the fleet as of `now`.
    pub fn summary_at(&self, now: Timestamp, pending_sync: bool) -> LivenessSummary {
        let statuses: Vec<LivenessStatus> = self
            .agents
            .iter()
            .map(|entry| entry.value().computed_status(now, self.threshold))
            .collect();
        aggregate(statuses, pending_sync)
    }

    /// Remove agents whose last heartbeat is older than `retention`.
    ///
    /// Returns the ids that were removed.
    pub fn age_out(&self, retention: Duration, now: Timestamp) -> Vec<AgentId> {
        let mut removed = Vec::new();
        self.agents.retain(|agent_id, state| {
            let expired = matches!(
                now.signed_duration_since(state.last_seen).to_std(),
                Ok(age) if age > retention
            );
            if expired {
                removed.push(agent_id.clone());
            }
            !expired
        });
        if !removed.is_empty() {
            tracing::info!(count = removed.len(), "Aged out silent agents");
        }
        removed
    }

    pub fn len(&self) -> usize {
        self.agents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.agents.is_empty()
    }
}

impl Default for LivenessTracker {
    fn default() -> Self {
        Self::from_config(&SyncConfig::default())
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    fn t(ms: i64) -> Timestamp {
        Utc.timestamp_millis_opt(1_700_000_000_000 + ms).unwrap()
    }

    fn tracker() -> LivenessTracker {
        LivenessTracker::new(Duration::from_millis(120_000))
    }

    #[test]
    fn test_threshold_boundary() {
        let tracker = tracker();
        let agent = AgentId::new("agent-a");
        tracker.report_heartbeat(&agent, LivenessStatus::Online, t(0));

        assert_eq!(tracker.status_at(&agent, t(119_999)), Ok(LivenessStatus::Online));
        assert_eq!(tracker.status_at(&agent, t(120_000)), Ok(LivenessStatus::Offline));
        assert_eq!(tracker.status_at(&agent, t(120_001)), Ok(LivenessStatus::Offline));
    }

    #[test]
    fn test_declared_error_overrides_age() {
        let tracker = tracker();
        let agent = AgentId::new("agent-a");
        tracker.report_heartbeat(&agent, LivenessStatus::Error, t(0));

        assert_eq!(tracker.status_at(&agent, t(1)), Ok(LivenessStatus::Error));
        assert_eq!(tracker.status_at(&agent, t(500_000)), Ok(LivenessStatus::Error));
    }

    #[test]
    fn test_unknown_agent_is_not_found() {
        let tracker = tracker();
        let missing = AgentId::new("ghost");
        assert_eq!(
            tracker.status_of(&missing),
            Err(AgentError::NotFound { agent_id: missing.clone() })
        );
    }

    #[test]
    fn test_outcome_reports_transitions() {
        let tracker = tracker();
        let agent = AgentId::new("agent-a");

        let first = tracker.report_heartbeat(&agent, LivenessStatus::Online, t(0));
        assert_eq!(first.previous, None);
        assert!(first.changed());

        let steady = tracker.report_heartbeat(&agent, LivenessStatus::Online, t(1_000));
        assert!(!steady.changed());

        let revived = tracker.report_heartbeat(&agent, LivenessStatus::Online, t(300_000));
        assert_eq!(revived.previous, Some(LivenessStatus::Offline));
        assert_eq!(revived.status, LivenessStatus::Online);
    }

    #[test]
    fn test_out_of_order_heartbeat_is_last_write_wins() {
        let tracker = tracker();
        let agent = AgentId::new("agent-a");
        tracker.report_heartbeat(&agent, LivenessStatus::Online, t(200_000));
        tracker.report_heartbeat(&agent, LivenessStatus::Online, t(0));

        assert_eq!(tracker.status_at(&agent, t(200_000)), Ok(LivenessStatus::Offline));
    }

    #[test]
    fn test_error_report_sticks_until_healthy_heartbeat() {
        let tracker = tracker();
        let agent = AgentId::new("agent-a");
        tracker.report_heartbeat(&agent, LivenessStatus::Online, t(0));

        let outcome = tracker.report_error(&agent, "display crashed", t(10));
        assert_eq!(outcome.status, LivenessStatus::Error);
        assert_eq!(outcome.previous, Some(LivenessStatus::Online));

        let view = tracker.view_at(&agent, t(20)).expect("registered");
        assert_eq!(view.last_error.as_deref(), Some("display crashed"));

        tracker.report_heartbeat(&agent, LivenessStatus::Online, t(30));
        let view = tracker.view_at(&agent, t(40)).expect("registered");
        assert_eq!(view.status, LivenessStatus::Online);
        assert_eq!(view.last_error, None);
    }

    #[test]
    fn test_record_keeps_metrics() {
        let tracker = tracker();
        let agent = AgentId::new("display-3");
        tracker.record(Heartbeat {
            agent_id: agent.clone(),
            timestamp: t(0),
            status: LivenessStatus::Online,
            metrics: Some(serde_json::json!({"cpu": 12.5})),
        });
        // A heartbeat without metrics keeps the last known metrics.
        tracker.report_heartbeat(&agent, LivenessStatus::Online, t(5));

        let view = tracker.view_at(&agent, t(10)).expect("registered");
        assert_eq!(view.metrics, Some(serde_json::json!({"cpu": 12.5})));
    }

    #[test]
    fn test_summary_counts_and_health() {
        let tracker = tracker();
        for i in 0..4 {
            tracker.report_heartbeat(&AgentId::new(format!("on-{i}")), LivenessStatus::Online, t(0));
        }
        tracker.report_heartbeat(&AgentId::new("stale"), LivenessStatus::Online, t(-200_000));
        tracker.report_error(&AgentId::new("broken"), "disk full", t(0));

        let summary = tracker.summary_at(t(1_000), false);
        assert_eq!(summary.total, 6);
        assert_eq!(summary.online, 4);
        assert_eq!(summary.offline, 1);
        assert_eq!(summary.error, 1);
        assert_eq!(summary.health, FleetHealth::Warning);
    }

    #[test]
    fn test_register_does_not_overwrite() {
        let tracker = tracker();
        let agent = AgentId::new("agent-a");
        assert!(tracker.register(&agent, t(0)));
        tracker.report_error(&agent, "boom", t(1));
        assert!(!tracker.register(&agent, t(2)));
        assert_eq!(tracker.status_at(&agent, t(3)), Ok(LivenessStatus::Error));
    }

    #[test]
    fn test_age_out_removes_only_expired() {
        let tracker = tracker();
        tracker.report_heartbeat(&AgentId::new("old"), LivenessStatus::Online, t(0));
        tracker.report_heartbeat(&AgentId::new("new"), LivenessStatus::Online, t(90_000));

        let removed = tracker.age_out(Duration::from_secs(60), t(100_000));
        assert_eq!(removed, vec![AgentId::new("old")]);
        assert_eq!(tracker.len(), 1);
    }
}

#[cfg(test)]
mod prop_tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use proptest::prelude::*;

    fn status_strategy() -> impl Strategy<Value = LivenessStatus> {
        prop_oneof![
            Just(LivenessStatus::Online),
            Just(LivenessStatus::Offline),
            Just(LivenessStatus::Error),
        ]
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(100))]

        /// Property: status is online below the threshold, offline at or
        /// above it, and error whenever the agent declared error.
        #[test]
        fn prop_status_follows_threshold(
            threshold_ms in 1u64..600_000,
            elapsed_ms in 0u64..1_200_000,
            declared in status_strategy(),
        ) {
            let tracker = LivenessTracker::new(Duration::from_millis(threshold_ms));
            let agent = AgentId::new("agent");
            let base = Utc.timestamp_millis_opt(1_700_000_000_000).unwrap();
            tracker.report_heartbeat(&agent, declared, base);

            let now = base + chrono::Duration::milliseconds(elapsed_ms as i64);
            let status = tracker.status_at(&agent, now).unwrap();

            let expected = if declared == LivenessStatus::Error {
                LivenessStatus::Error
            } else if elapsed_ms >= threshold_ms {
                LivenessStatus::Offline
            } else {
                LivenessStatus::Online
            };
            prop_assert_eq!(status, expected);
        }

        /// Property: aggregate counts always add up to the total.
        #[test]
        fn prop_aggregate_counts_sum(statuses in prop::collection::vec(status_strategy(), 0..50)) {
            let summary = aggregate(statuses.clone(), false);
            prop_assert_eq!(summary.total, statuses.len());
            prop_assert_eq!(summary.online + summary.offline + summary.error, summary.total);
        }
    }
}
