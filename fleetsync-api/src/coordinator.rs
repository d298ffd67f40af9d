//! Coordinator: the explicitly owned synchronization state
//!
//! One `Coordinator` holds the liveness table, command queues, conflict
//! log and subscriber set of a process. Every mutation goes through it so
//! the matching [`SyncEvent`] is published in the same call. Independent
//! instances share nothing, which is what the test suites rely on.

use chrono::Utc;
use fleetsync_agents::{
    AgentStatusView, CommandDispatcher, CommandResponse, CommandStatus, Heartbeat,
    HeartbeatOutcome, LivenessSummary, LivenessTracker, PendingCommand, SubmitOutcome,
};
use fleetsync_conflict::{
    BatchOutcome, ConflictRecord, ConflictResolver, ConflictSource, ResolutionOutcome,
};
use fleetsync_core::{
    AgentError, AgentId, CommandId, CommandState, ConflictId, DispatchError, FleetResult,
    SyncConfig, Timestamp,
};
use fleetsync_events::{EventBroadcaster, Subscription, SyncEvent};
use std::time::Duration;

pub struct Coordinator {
    config: SyncConfig,
    liveness: LivenessTracker,
    dispatcher: CommandDispatcher,
    resolver: ConflictResolver,
    broadcaster: EventBroadcaster,
}

impl Coordinator {
    /// Build a coordinator from a validated configuration, with the
    /// built-in conflict policies loaded.
    pub fn new(config: SyncConfig) -> FleetResult<Self> {
        config.validate()?;
        Ok(Self {
            liveness: LivenessTracker::from_config(&config),
            dispatcher: CommandDispatcher::from_config(&config),
            resolver: ConflictResolver::from_config(&config),
            broadcaster: EventBroadcaster::from_config(&config),
            config,
        })
    }

    /// Assemble a coordinator from pre-built components, e.g. a resolver
    /// with a custom policy set.
    pub fn from_parts(
        config: SyncConfig,
        liveness: LivenessTracker,
        dispatcher: CommandDispatcher,
        resolver: ConflictResolver,
        broadcaster: EventBroadcaster,
    ) -> Self {
        Self {
            config,
            liveness,
            dispatcher,
            resolver,
            broadcaster,
        }
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    pub fn liveness(&self) -> &LivenessTracker {
        &self.liveness
    }

    pub fn dispatcher(&self) -> &CommandDispatcher {
        &self.dispatcher
    }

    pub fn resolver(&self) -> &ConflictResolver {
        &self.resolver
    }

    pub fn broadcaster(&self) -> &EventBroadcaster {
        &self.broadcaster
    }

    // ========================================================================
    // AGENTS
    // ========================================================================

    /// Ingest a heartbeat and publish the matching event.
    pub fn heartbeat(&self, heartbeat: Heartbeat) -> HeartbeatOutcome {
        let agent_id = heartbeat.agent_id.clone();
        let at = heartbeat.timestamp;
        let outcome = self.liveness.record(heartbeat);

        let event = if outcome.changed() {
            SyncEvent::AgentStatusChanged {
                agent_id,
                status: outcome.status,
                previous: outcome.previous,
                at,
            }
        } else {
            SyncEvent::AgentHeartbeat {
                agent_id,
                status: outcome.status,
                at,
            }
        };
        self.broadcaster.publish(event);
        outcome
    }

    /// Record an agent error and publish it, plus the status change if any.
    pub fn report_error(
        &self,
        agent_id: &AgentId,
        message: impl Into<String>,
        at: Timestamp,
    ) -> HeartbeatOutcome {
        let message = message.into();
        let outcome = self.liveness.report_error(agent_id, message.clone(), at);

        if outcome.changed() {
            self.broadcaster.publish(SyncEvent::AgentStatusChanged {
                agent_id: agent_id.clone(),
                status: outcome.status,
                previous: outcome.previous,
                at,
            });
        }
        self.broadcaster.publish(SyncEvent::AgentError {
            agent_id: agent_id.clone(),
            message,
            at,
        });
        outcome
    }

    pub fn agent_status(&self, agent_id: &AgentId) -> Result<AgentStatusView, AgentError> {
        self.agent_status_at(agent_id, Utc::now())
    }

    pub fn agent_status_at(
        &self,
        agent_id: &AgentId,
        now: Timestamp,
    ) -> Result<AgentStatusView, AgentError> {
        self.liveness.view_at(agent_id, now)
    }

    /// Fleet liveness counts, degraded to `warning` while any conflict is
    /// waiting for an operator.
    pub fn summary_at(&self, now: Timestamp) -> FleetResult<LivenessSummary> {
        let pending_sync = self.resolver.unresolved_count()? > 0;
        Ok(self.liveness.summary_at(now, pending_sync))
    }

    // ========================================================================
    // COMMANDS
    // ========================================================================

    pub fn enqueue(
        &self,
        agent_id: &AgentId,
        command_type: impl Into<String>,
        payload: serde_json::Value,
    ) -> CommandId {
        let command_type = command_type.into();
        let command_id = self
            .dispatcher
            .enqueue(agent_id, command_type.clone(), payload);
        self.broadcaster.publish(SyncEvent::CommandEnqueued {
            command_id: command_id.clone(),
            agent_id: agent_id.clone(),
            command_type,
        });
        command_id
    }

    /// Agent-side pull: every queued command for the agent, oldest first.
    pub fn poll(&self, agent_id: &AgentId) -> Vec<PendingCommand> {
        self.dispatcher.poll_and_drain(agent_id)
    }

    /// Accept an agent's response. Discarded responses publish nothing.
    pub fn submit_response(&self, response: CommandResponse) -> SubmitOutcome {
        let command_id = response.command_id.clone();
        let success = response.success;
        let outcome = self.dispatcher.submit_response(response);
        if outcome != SubmitOutcome::Discarded {
            self.broadcaster.publish(SyncEvent::CommandFinished {
                command_id,
                state: CommandState::Responded,
                success,
            });
        }
        outcome
    }

    /// Wait for a command's response. `None` uses the configured default.
    pub async fn await_response(
        &self,
        command_id: &CommandId,
        timeout: Option<Duration>,
    ) -> Result<serde_json::Value, DispatchError> {
        let timeout = timeout.unwrap_or(self.config.default_command_timeout);
        let result = self.dispatcher.await_response(command_id, timeout).await;
        if let Err(err) = &result {
            self.publish_timeout(command_id, err);
        }
        result
    }

    /// Enqueue a command and wait for its response.
    pub async fn issue(
        &self,
        agent_id: &AgentId,
        command_type: impl Into<String>,
        payload: serde_json::Value,
        timeout: Option<Duration>,
    ) -> (CommandId, Result<serde_json::Value, DispatchError>) {
        let command_id = self.enqueue(agent_id, command_type, payload);
        let result = self.await_response(&command_id, timeout).await;
        (command_id, result)
    }

    fn publish_timeout(&self, command_id: &CommandId, err: &DispatchError) {
        if !err.is_connectivity_failure() {
            return;
        }
        // Only commands this coordinator issued have a lifecycle to report.
        if let Ok(status) = self.dispatcher.command_status(command_id) {
            if status.state == CommandState::TimedOut {
                self.broadcaster.publish(SyncEvent::CommandFinished {
                    command_id: command_id.clone(),
                    state: CommandState::TimedOut,
                    success: false,
                });
            }
        }
    }

    pub fn command_status(&self, command_id: &CommandId) -> Result<CommandStatus, DispatchError> {
        self.dispatcher.command_status(command_id)
    }

    // ========================================================================
    // CONFLICTS
    // ========================================================================

    /// Compare two sources and publish every conflict found.
    pub fn detect_conflicts(
        &self,
        path: &str,
        a: &ConflictSource,
        b: &ConflictSource,
    ) -> FleetResult<Vec<ConflictRecord>> {
        let records = self.resolver.detect_conflicts(path, a, b)?;
        for record in &records {
            self.broadcaster.publish(SyncEvent::ConflictDetected {
                conflict: record.clone(),
            });
        }
        Ok(records)
    }

    pub fn report_conflict(&self, record: ConflictRecord) -> FleetResult<ConflictRecord> {
        let record = self.resolver.report_conflict(record)?;
        self.broadcaster.publish(SyncEvent::ConflictDetected {
            conflict: record.clone(),
        });
        Ok(record)
    }

    /// Resolve a logged conflict by policy.
    pub fn resolve(&self, conflict_id: ConflictId) -> FleetResult<(ConflictRecord, ResolutionOutcome)> {
        let (record, outcome) = self.resolver.resolve_by_id(conflict_id)?;
        self.publish_resolved(&record);
        Ok((record, outcome))
    }

    /// Resolve a caller-supplied record by policy.
    pub fn resolve_record(&self, record: &mut ConflictRecord) -> ResolutionOutcome {
        let outcome = self.resolver.resolve_conflict(record);
        self.publish_resolved(record);
        outcome
    }

    /// Resolve each record independently.
    pub fn resolve_batch(&self, records: Vec<ConflictRecord>) -> BatchOutcome {
        let outcome = self.resolver.resolve_batch(records);
        for record in &outcome.resolved {
            self.publish_resolved(record);
        }
        outcome
    }

    fn publish_resolved(&self, record: &ConflictRecord) {
        if record.is_resolved() {
            self.broadcaster.publish(SyncEvent::ConflictResolved {
                conflict_id: record.id,
                path: record.path.clone(),
                resolution: record.resolution,
                resolved_by: record.resolved_by.clone(),
            });
        }
    }

    // ========================================================================
    // SUBSCRIBERS
    // ========================================================================

    /// Full current state as a `Snapshot` event.
    pub fn snapshot_event(&self) -> FleetResult<SyncEvent> {
        let now = Utc::now();
        let unresolved_conflicts = self.resolver.unresolved()?;
        let summary = self
            .liveness
            .summary_at(now, !unresolved_conflicts.is_empty());
        Ok(SyncEvent::Snapshot {
            agents: self.liveness.snapshot_at(now),
            summary,
            unresolved_conflicts,
            at: now,
        })
    }

    /// Open a subscription whose first frame is the current snapshot.
    pub fn subscribe(&self) -> FleetResult<Subscription> {
        let snapshot = self.snapshot_event()?;
        Ok(self.broadcaster.subscribe_with_snapshot(snapshot))
    }

    // ========================================================================
    // HOUSEKEEPING
    // ========================================================================

    /// Drop silent agents and expired command state. Returns
    /// `(agents_removed, command_entries_removed)`.
    pub fn housekeep(&self, now: Timestamp) -> (usize, usize) {
        let agents = self.liveness.age_out(self.config.agent_retention, now).len();
        let commands = self.dispatcher.purge_expired(now);
        (agents, commands)
    }
}

impl Default for Coordinator {
    fn default() -> Self {
        let config = SyncConfig::default();
        Self::from_parts(
            config.clone(),
            LivenessTracker::from_config(&config),
            CommandDispatcher::from_config(&config),
            ConflictResolver::from_config(&config),
            EventBroadcaster::from_config(&config),
        )
    }
}

impl std::fmt::Debug for Coordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Coordinator")
            .field("agents", &self.liveness.len())
            .field("dispatch", &self.dispatcher.stats())
            .field("broadcaster", &self.broadcaster)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fleetsync_core::LivenessStatus;
    use fleetsync_events::StreamFrame;
    use serde_json::json;

    fn heartbeat(agent: &str, status: LivenessStatus, at: Timestamp) -> Heartbeat {
        Heartbeat {
            agent_id: AgentId::new(agent),
            timestamp: at,
            status,
            metrics: None,
        }
    }

    fn next_event(sub: &mut Subscription) -> Option<SyncEvent> {
        match sub.try_recv()? {
            StreamFrame::Event(event) => Some((*event).clone()),
            StreamFrame::Keepalive => None,
        }
    }

    #[tokio::test]
    async fn test_heartbeat_publishes_transition_then_plain_heartbeat() {
        let coordinator = Coordinator::default();
        let mut sub = coordinator.subscribe().unwrap();
        assert!(matches!(next_event(&mut sub), Some(SyncEvent::Snapshot { .. })));

        let now = Utc::now();
        coordinator.heartbeat(heartbeat("display-1", LivenessStatus::Online, now));
        coordinator.heartbeat(heartbeat("display-1", LivenessStatus::Online, now));

        match next_event(&mut sub) {
            Some(SyncEvent::AgentStatusChanged { previous, status, .. }) => {
                assert_eq!(previous, None);
                assert_eq!(status, LivenessStatus::Online);
            }
            other => panic!("expected status change, got {other:?}"),
        }
        assert!(matches!(next_event(&mut sub), Some(SyncEvent::AgentHeartbeat { .. })));
    }

    #[tokio::test]
    async fn test_report_error_publishes_change_and_error() {
        let coordinator = Coordinator::default();
        let agent = AgentId::new("controller-3");
        let now = Utc::now();
        coordinator.heartbeat(heartbeat("controller-3", LivenessStatus::Online, now));

        let mut sub = coordinator.subscribe().unwrap();
        let _snapshot = next_event(&mut sub);
        let outcome = coordinator.report_error(&agent, "chromium crashed", now);

        assert_eq!(outcome.status, LivenessStatus::Error);
        assert!(matches!(
            next_event(&mut sub),
            Some(SyncEvent::AgentStatusChanged { status: LivenessStatus::Error, .. })
        ));
        assert!(matches!(next_event(&mut sub), Some(SyncEvent::AgentError { .. })));
        assert_eq!(
            coordinator.agent_status(&agent).unwrap().last_error.as_deref(),
            Some("chromium crashed")
        );
    }

    #[tokio::test]
    async fn test_command_round_trip_publishes_lifecycle() {
        let coordinator = Coordinator::default();
        let agent = AgentId::new("agent-b");
        let mut sub = coordinator.subscribe().unwrap();
        let _snapshot = next_event(&mut sub);

        let command_id = coordinator.enqueue(&agent, "reload", json!({"page": "lobby"}));
        let polled = coordinator.poll(&agent);
        assert_eq!(polled.len(), 1);
        assert_eq!(
            coordinator.submit_response(CommandResponse::success(command_id.clone(), json!("ok"))),
            SubmitOutcome::Buffered
        );
        let value = coordinator
            .await_response(&command_id, Some(Duration::from_secs(1)))
            .await
            .unwrap();
        assert_eq!(value, json!("ok"));

        assert!(matches!(next_event(&mut sub), Some(SyncEvent::CommandEnqueued { .. })));
        assert!(matches!(
            next_event(&mut sub),
            Some(SyncEvent::CommandFinished { state: CommandState::Responded, success: true, .. })
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_publishes_finished_only_for_known_commands() {
        let coordinator = Coordinator::default();
        let mut sub = coordinator.subscribe().unwrap();
        let _snapshot = next_event(&mut sub);

        let unknown = coordinator
            .await_response(&CommandId::new("cmd-2"), Some(Duration::from_millis(100)))
            .await;
        assert!(matches!(unknown, Err(DispatchError::Timeout { .. })));
        assert!(next_event(&mut sub).is_none());

        let (command_id, result) = coordinator
            .issue(&AgentId::new("agent-c"), "reboot", json!({}), Some(Duration::from_millis(50)))
            .await;
        assert!(matches!(result, Err(DispatchError::Timeout { .. })));
        assert!(matches!(next_event(&mut sub), Some(SyncEvent::CommandEnqueued { .. })));
        match next_event(&mut sub) {
            Some(SyncEvent::CommandFinished { command_id: id, state, success }) => {
                assert_eq!(id, command_id);
                assert_eq!(state, CommandState::TimedOut);
                assert!(!success);
            }
            other => panic!("expected timeout event, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_unresolved_conflict_degrades_summary() {
        let coordinator = Coordinator::default();
        let now = Utc::now();
        coordinator.heartbeat(heartbeat("display-1", LivenessStatus::Online, now));
        assert_eq!(
            coordinator.summary_at(now).unwrap().health,
            fleetsync_core::FleetHealth::Healthy
        );

        let records = coordinator
            .detect_conflicts(
                "unknown.path",
                &ConflictSource::center(json!({"a": 1}), 2, now),
                &ConflictSource::edge("e1", json!({"a": 2}), 1, now - chrono::Duration::seconds(10)),
            )
            .unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(
            coordinator.summary_at(now).unwrap().health,
            fleetsync_core::FleetHealth::Warning
        );
    }

    #[tokio::test]
    async fn test_resolve_publishes_only_when_resolved() {
        let coordinator = Coordinator::default();
        let now = Utc::now();
        let records = coordinator
            .detect_conflicts(
                "dashboards.main",
                &ConflictSource::center(json!({"title": "A"}), 1, now),
                &ConflictSource::edge("e1", json!({"title": "B"}), 1, now - chrono::Duration::seconds(5)),
            )
            .unwrap();
        assert_eq!(records.len(), 1);

        let mut sub = coordinator.subscribe().unwrap();
        let _snapshot = next_event(&mut sub);
        let (record, outcome) = coordinator.resolve(records[0].id).unwrap();

        assert!(outcome.resolved);
        assert_eq!(outcome.data, Some(json!({"title": "A"})));
        assert!(record.is_resolved());
        assert!(matches!(next_event(&mut sub), Some(SyncEvent::ConflictResolved { .. })));
        assert_eq!(coordinator.resolver().unresolved_count().unwrap(), 0);
    }

    #[test]
    fn test_new_rejects_invalid_config() {
        let config = SyncConfig {
            conflict_log_capacity: 0,
            ..SyncConfig::default()
        };
        assert!(Coordinator::new(config).is_err());
    }
}
