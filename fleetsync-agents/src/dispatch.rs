//! Command dispatch to polling agents
//!
//! Agents never hold a channel open: commands wait in a per-agent FIFO
//! queue until the agent polls, and the agent's answer arrives later on a
//! separate request. The rendezvous between a caller awaiting that answer
//! and the answer itself is kept per command id:
//!
//! ```text
//!            await first                       response first
//!   (none) ─────────────→ Waiting ──┐   (none) ──────────────→ Buffered
//!                                   │                             │
//!            response / deadline    ↓          next await         ↓
//!                              (removed)                     (consumed)
//! ```
//!
//! Both transitions out of `(none)` happen under the same map entry lock,
//! so a response and a waiter registering at the same time always meet.

use chrono::Utc;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use fleetsync_core::{
    duration_millis, AgentId, CommandId, CommandState, DispatchError, SyncConfig, Timestamp,
};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::oneshot;

// ============================================================================
// COMMANDS AND RESPONSES
// ============================================================================

/// A command waiting in an agent's queue.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct PendingCommand {
    pub command_id: CommandId,
    pub agent_id: AgentId,
    pub command_type: String,
    #[cfg_attr(feature = "openapi", schema(value_type = Object))]
    pub payload: serde_json::Value,
    #[cfg_attr(feature = "openapi", schema(value_type = String, format = "date-time"))]
    pub enqueued_at: Timestamp,
}

impl PendingCommand {
    pub fn new(
        command_id: CommandId,
        agent_id: AgentId,
        command_type: impl Into<String>,
        payload: serde_json::Value,
    ) -> Self {
        Self {
            command_id,
            agent_id,
            command_type: command_type.into(),
            payload,
            enqueued_at: Utc::now(),
        }
    }
}

/// An agent's answer to a command.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct CommandResponse {
    pub command_id: CommandId,
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[cfg_attr(feature = "openapi", schema(value_type = Option<Object>))]
    pub data: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default = "chrono::Utc::now")]
    #[cfg_attr(feature = "openapi", schema(value_type = String, format = "date-time"))]
    pub received_at: Timestamp,
}

impl CommandResponse {
    pub fn success(command_id: CommandId, data: serde_json::Value) -> Self {
        Self {
            command_id,
            success: true,
            data: Some(data),
            error: None,
            received_at: Utc::now(),
        }
    }

    pub fn failure(command_id: CommandId, error: impl Into<String>) -> Self {
        Self {
            command_id,
            success: false,
            data: None,
            error: Some(error.into()),
            received_at: Utc::now(),
        }
    }

    /// The payload of a successful response, or the agent's failure.
    pub fn into_result(self) -> Result<serde_json::Value, DispatchError> {
        if self.success {
            Ok(self.data.unwrap_or(serde_json::Value::Null))
        } else {
            Err(DispatchError::AgentFailure {
                command_id: self.command_id,
                message: self
                    .error
                    .unwrap_or_else(|| "agent reported failure".to_string()),
            })
        }
    }
}

/// What happened to a submitted response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
#[serde(rename_all = "snake_case")]
pub enum SubmitOutcome {
    /// Handed to a caller that was already waiting.
    Delivered,
    /// Kept until a caller asks for it.
    Buffered,
    /// Unknown or already finished command; dropped.
    Discarded,
}

/// Lifecycle record of a command, as served to operators.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct CommandStatus {
    pub command_id: CommandId,
    pub agent_id: AgentId,
    pub command_type: String,
    pub state: CommandState,
    #[cfg_attr(feature = "openapi", schema(value_type = String, format = "date-time"))]
    pub updated_at: Timestamp,
}

/// Counters describing dispatcher load.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct DispatchStats {
    pub queued_agents: usize,
    pub queued_commands: usize,
    pub awaiting: usize,
    pub buffered: usize,
    pub tracked_commands: usize,
}

// ============================================================================
// DISPATCHER
// ============================================================================

enum Slot {
    Waiting {
        token: u64,
        tx: oneshot::Sender<CommandResponse>,
    },
    Buffered(CommandResponse),
}

/// Removes a waiter when its `await_response` future finishes or is
/// dropped, unless a newer waiter has taken the slot since.
struct WaiterGuard<'a> {
    slots: &'a DashMap<CommandId, Slot>,
    command_id: &'a CommandId,
    token: u64,
}

impl WaiterGuard<'_> {
    fn release(&self) -> bool {
        let token = self.token;
        self.slots
            .remove_if(self.command_id, |_, slot| {
                matches!(slot, Slot::Waiting { token: t, .. } if *t == token)
            })
            .is_some()
    }
}

impl Drop for WaiterGuard<'_> {
    fn drop(&mut self) {
        self.release();
    }
}

/// Per-agent command queues plus response correlation.
///
/// Lock order: a `slots` entry may be held while touching `commands`,
/// never the other way round.
pub struct CommandDispatcher {
    queues: DashMap<AgentId, VecDeque<PendingCommand>>,
    commands: DashMap<CommandId, CommandStatus>,
    slots: DashMap<CommandId, Slot>,
    next_token: AtomicU64,
    default_timeout: Duration,
    retention: Duration,
}

impl CommandDispatcher {
    pub fn new(default_timeout: Duration, retention: Duration) -> Self {
        Self {
            queues: DashMap::new(),
            commands: DashMap::new(),
            slots: DashMap::new(),
            next_token: AtomicU64::new(0),
            default_timeout,
            retention,
        }
    }

    pub fn from_config(config: &SyncConfig) -> Self {
        Self::new(config.default_command_timeout, config.response_retention)
    }

    pub fn default_timeout(&self) -> Duration {
        self.default_timeout
    }

    /// Queue a new command for an agent and return its generated id.
    pub fn enqueue(
        &self,
        agent_id: &AgentId,
        command_type: impl Into<String>,
        payload: serde_json::Value,
    ) -> CommandId {
        let command = PendingCommand::new(CommandId::generate(), agent_id.clone(), command_type, payload);
        let command_id = command.command_id.clone();
        self.enqueue_command(command);
        command_id
    }

    /// Queue a command with a caller-chosen id.
    pub fn enqueue_command(&self, command: PendingCommand) {
        let status = CommandStatus {
            command_id: command.command_id.clone(),
            agent_id: command.agent_id.clone(),
            command_type: command.command_type.clone(),
            state: CommandState::Enqueued,
            updated_at: command.enqueued_at,
        };
        if self.commands.insert(command.command_id.clone(), status).is_some() {
            tracing::warn!(command_id = %command.command_id, "Command id reused, lifecycle reset");
        }

        tracing::debug!(
            command_id = %command.command_id,
            agent_id = %command.agent_id,
            command_type = %command.command_type,
            "Command enqueued"
        );
        self.queues
            .entry(command.agent_id.clone())
            .or_default()
            .push_back(command);
    }

    /// Hand over and clear everything queued for an agent, oldest first.
    ///
    /// Delivery is at most once: the queue is removed in one step, so two
    /// concurrent polls never both receive a command.
    pub fn poll_and_drain(&self, agent_id: &AgentId) -> Vec<PendingCommand> {
        let commands: Vec<PendingCommand> = self
            .queues
            .remove(agent_id)
            .map(|(_, queue)| queue.into_iter().collect())
            .unwrap_or_default();

        let now = Utc::now();
        for command in &commands {
            if let Some(mut status) = self.commands.get_mut(&command.command_id) {
                if status.state == CommandState::Enqueued {
                    status.state = CommandState::Delivered;
                    status.updated_at = now;
                }
            }
        }
        if !commands.is_empty() {
            tracing::debug!(agent_id = %agent_id, count = commands.len(), "Commands delivered");
        }
        commands
    }

    /// Number of commands waiting for an agent's next poll.
    pub fn queue_len(&self, agent_id: &AgentId) -> usize {
        self.queues.get(agent_id).map(|q| q.len()).unwrap_or(0)
    }

    /// Wait for the response to a command.
    ///
    /// A response that arrived before this call is consumed immediately.
    /// Dropping the returned future releases the waiter. At most one
    /// caller may wait per command; a second gets `AlreadyAwaited`.
    pub async fn await_response(
        &self,
        command_id: &CommandId,
        timeout: Duration,
    ) -> Result<serde_json::Value, DispatchError> {
        let token = self.next_token.fetch_add(1, Ordering::Relaxed);

        let mut rx = match self.slots.entry(command_id.clone()) {
            Entry::Occupied(mut entry) => {
                let live_waiter = match entry.get() {
                    Slot::Waiting { tx, .. } => Some(!tx.is_closed()),
                    Slot::Buffered(_) => None,
                };
                match live_waiter {
                    Some(true) => {
                        return Err(DispatchError::AlreadyAwaited {
                            command_id: command_id.clone(),
                        });
                    }
                    // Previous waiter went away without cleaning up
                    Some(false) => {
                        let (tx, rx) = oneshot::channel();
                        entry.insert(Slot::Waiting { token, tx });
                        rx
                    }
                    None => {
                        if let Slot::Buffered(response) = entry.remove() {
                            tracing::debug!(command_id = %command_id, "Consumed buffered response");
                            return response.into_result();
                        }
                        return Err(DispatchError::NotFound {
                            command_id: command_id.clone(),
                        });
                    }
                }
            }
            Entry::Vacant(entry) => {
                let (tx, rx) = oneshot::channel();
                entry.insert(Slot::Waiting { token, tx });
                rx
            }
        };

        let guard = WaiterGuard {
            slots: &self.slots,
            command_id,
            token,
        };

        match tokio::time::timeout(timeout, &mut rx).await {
            Ok(Ok(response)) => response.into_result(),
            Ok(Err(_)) => Err(DispatchError::Cancelled {
                command_id: command_id.clone(),
            }),
            Err(_) => {
                if !guard.release() {
                    // The response won the race against the deadline.
                    if let Ok(response) = rx.try_recv() {
                        return response.into_result();
                    }
                }
                self.mark(command_id, CommandState::TimedOut);
                let timeout_ms = duration_millis(timeout);
                tracing::warn!(command_id = %command_id, timeout_ms, "Command timed out");
                Err(DispatchError::Timeout {
                    command_id: command_id.clone(),
                    timeout_ms,
                })
            }
        }
    }

    /// Accept an agent's response.
    ///
    /// Responses for unknown or already finished commands are dropped, so
    /// duplicate delivery from an agent is harmless.
    pub fn submit_response(&self, response: CommandResponse) -> SubmitOutcome {
        let command_id = response.command_id.clone();

        let outcome = match self.slots.entry(command_id.clone()) {
            Entry::Occupied(mut entry) => {
                let live_waiter = match entry.get() {
                    Slot::Waiting { tx, .. } => Some(!tx.is_closed()),
                    Slot::Buffered(_) => None,
                };
                match live_waiter {
                    Some(true) => match entry.remove() {
                        Slot::Waiting { tx, .. } => match tx.send(response) {
                            Ok(()) => SubmitOutcome::Delivered,
                            Err(_) => SubmitOutcome::Discarded,
                        },
                        Slot::Buffered(_) => SubmitOutcome::Discarded,
                    },
                    Some(false) => {
                        entry.insert(Slot::Buffered(response));
                        SubmitOutcome::Buffered
                    }
                    None => SubmitOutcome::Discarded,
                }
            }
            Entry::Vacant(entry) => {
                let accepting = self
                    .commands
                    .get(&command_id)
                    .map(|status| !status.state.is_terminal())
                    .unwrap_or(false);
                if accepting {
                    entry.insert(Slot::Buffered(response));
                    SubmitOutcome::Buffered
                } else {
                    SubmitOutcome::Discarded
                }
            }
        };

        match outcome {
            SubmitOutcome::Discarded => {
                tracing::debug!(command_id = %command_id, "Discarded response for unknown or finished command");
            }
            _ => {
                self.mark(&command_id, CommandState::Responded);
                tracing::debug!(command_id = %command_id, outcome = ?outcome, "Response accepted");
            }
        }
        outcome
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
        let result = self
            .await_response(&command_id, timeout.unwrap_or(self.default_timeout))
            .await;
        (command_id, result)
    }

    /// Lifecycle state of a command.
    pub fn command_status(&self, command_id: &CommandId) -> Result<CommandStatus, DispatchError> {
        self.commands
            .get(command_id)
            .map(|status| status.clone())
            .ok_or_else(|| DispatchError::NotFound {
                command_id: command_id.clone(),
            })
    }

    fn mark(&self, command_id: &CommandId, state: CommandState) {
        if let Some(mut status) = self.commands.get_mut(command_id) {
            if !status.state.is_terminal() {
                status.state = state;
                status.updated_at = Utc::now();
            }
        }
    }

    /// Drop unclaimed responses and finished commands older than the
    /// retention window. Returns how many entries were removed.
    pub fn purge_expired(&self, now: Timestamp) -> usize {
        let retention = self.retention;
        let expired = |at: Timestamp| {
            matches!(now.signed_duration_since(at).to_std(), Ok(age) if age > retention)
        };

        let before = self.slots.len() + self.commands.len();
        self.slots.retain(|_, slot| match slot {
            Slot::Buffered(response) => !expired(response.received_at),
            Slot::Waiting { .. } => true,
        });
        self.commands
            .retain(|_, status| !(status.state.is_terminal() && expired(status.updated_at)));
        let removed = before.saturating_sub(self.slots.len() + self.commands.len());

        if removed > 0 {
            tracing::debug!(removed, "Purged expired command state");
        }
        removed
    }

    pub fn stats(&self) -> DispatchStats {
        let (mut awaiting, mut buffered) = (0, 0);
        for slot in self.slots.iter() {
            match slot.value() {
                Slot::Waiting { .. } => awaiting += 1,
                Slot::Buffered(_) => buffered += 1,
            }
        }
        DispatchStats {
            queued_agents: self.queues.len(),
            queued_commands: self.queues.iter().map(|q| q.len()).sum(),
            awaiting,
            buffered,
            tracked_commands: self.commands.len(),
        }
    }
}

impl Default for CommandDispatcher {
    fn default() -> Self {
        Self::from_config(&SyncConfig::default())
    }
}

impl std::fmt::Debug for CommandDispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CommandDispatcher")
            .field("stats", &self.stats())
            .field("default_timeout", &self.default_timeout)
            .finish()
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::Arc;

    fn dispatcher() -> Arc<CommandDispatcher> {
        Arc::new(CommandDispatcher::new(
            Duration::from_secs(30),
            Duration::from_secs(300),
        ))
    }

    fn queue(d: &CommandDispatcher, id: &str, agent: &str) {
        d.enqueue_command(PendingCommand::new(
            CommandId::new(id),
            AgentId::new(agent),
            "reload",
            json!({}),
        ));
    }

    #[test]
    fn test_poll_drains_in_fifo_order() {
        let d = dispatcher();
        let agent = AgentId::new("agent-b");
        queue(&d, "c1", "agent-b");
        queue(&d, "c2", "agent-b");
        queue(&d, "other", "agent-c");

        let ids: Vec<String> = d
            .poll_and_drain(&agent)
            .into_iter()
            .map(|c| c.command_id.to_string())
            .collect();
        assert_eq!(ids, vec!["c1", "c2"]);
        assert!(d.poll_and_drain(&agent).is_empty());
        assert_eq!(d.queue_len(&AgentId::new("agent-c")), 1);
        assert_eq!(
            d.command_status(&CommandId::new("c1")).map(|s| s.state),
            Ok(CommandState::Delivered)
        );
    }

    #[tokio::test]
    async fn test_response_before_wait_is_buffered() {
        let d = dispatcher();
        queue(&d, "c1", "agent-b");

        let outcome = d.submit_response(CommandResponse::success(CommandId::new("c1"), json!({"ok": 1})));
        assert_eq!(outcome, SubmitOutcome::Buffered);

        let value = d
            .await_response(&CommandId::new("c1"), Duration::from_secs(1))
            .await;
        assert_eq!(value, Ok(json!({"ok": 1})));
        assert_eq!(d.stats().buffered, 0);
    }

    #[tokio::test]
    async fn test_wait_before_response_is_delivered() {
        let d = dispatcher();
        queue(&d, "c1", "agent-b");

        let waiter = {
            let d = d.clone();
            tokio::spawn(async move {
                d.await_response(&CommandId::new("c1"), Duration::from_secs(5)).await
            })
        };
        while d.stats().awaiting == 0 {
            tokio::task::yield_now().await;
        }

        let outcome = d.submit_response(CommandResponse::success(CommandId::new("c1"), json!({"ok": 1})));
        assert_eq!(outcome, SubmitOutcome::Delivered);
        assert_eq!(waiter.await.expect("join"), Ok(json!({"ok": 1})));
        assert_eq!(
            d.command_status(&CommandId::new("c1")).map(|s| s.state),
            Ok(CommandState::Responded)
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_unknown_command_times_out() {
        let d = dispatcher();
        let started = tokio::time::Instant::now();
        let result = d
            .await_response(&CommandId::new("cmd-2"), Duration::from_millis(100))
            .await;

        assert_eq!(
            result,
            Err(DispatchError::Timeout {
                command_id: CommandId::new("cmd-2"),
                timeout_ms: 100,
            })
        );
        assert!(started.elapsed() >= Duration::from_millis(100));
        assert_eq!(d.stats().awaiting, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_is_terminal() {
        let d = dispatcher();
        queue(&d, "c1", "agent-b");
        let result = d
            .await_response(&CommandId::new("c1"), Duration::from_millis(50))
            .await;
        assert!(result.as_ref().is_err_and(|e| e.is_connectivity_failure()));

        let late = d.submit_response(CommandResponse::success(CommandId::new("c1"), json!(1)));
        assert_eq!(late, SubmitOutcome::Discarded);
        assert_eq!(
            d.command_status(&CommandId::new("c1")).map(|s| s.state),
            Ok(CommandState::TimedOut)
        );
    }

    #[tokio::test]
    async fn test_agent_failure_is_distinct_from_timeout() {
        let d = dispatcher();
        queue(&d, "c1", "agent-b");
        d.submit_response(CommandResponse::failure(CommandId::new("c1"), "screen not found"));

        let result = d
            .await_response(&CommandId::new("c1"), Duration::from_secs(1))
            .await;
        match result {
            Err(err @ DispatchError::AgentFailure { .. }) => {
                assert!(!err.is_connectivity_failure());
                assert!(err.to_string().contains("screen not found"));
            }
            other => panic!("expected agent failure, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_second_concurrent_wait_is_rejected() {
        let d = dispatcher();
        queue(&d, "c1", "agent-b");

        let first = {
            let d = d.clone();
            tokio::spawn(async move {
                d.await_response(&CommandId::new("c1"), Duration::from_secs(5)).await
            })
        };
        while d.stats().awaiting == 0 {
            tokio::task::yield_now().await;
        }

        let second = d
            .await_response(&CommandId::new("c1"), Duration::from_secs(5))
            .await;
        assert_eq!(
            second,
            Err(DispatchError::AlreadyAwaited {
                command_id: CommandId::new("c1")
            })
        );

        d.submit_response(CommandResponse::success(CommandId::new("c1"), json!("done")));
        assert_eq!(first.await.expect("join"), Ok(json!("done")));
    }

    #[tokio::test]
    async fn test_dropped_wait_releases_waiter() {
        let d = dispatcher();
        queue(&d, "c1", "agent-b");

        let waiter = {
            let d = d.clone();
            tokio::spawn(async move {
                d.await_response(&CommandId::new("c1"), Duration::from_secs(60)).await
            })
        };
        while d.stats().awaiting == 0 {
            tokio::task::yield_now().await;
        }
        waiter.abort();
        let _ = waiter.await;
        assert_eq!(d.stats().awaiting, 0);

        // The command is still open, so a later response is kept for the next caller.
        let outcome = d.submit_response(CommandResponse::success(CommandId::new("c1"), json!(7)));
        assert_eq!(outcome, SubmitOutcome::Buffered);
    }

    #[test]
    fn test_unknown_and_duplicate_responses_are_discarded() {
        let d = dispatcher();
        assert_eq!(
            d.submit_response(CommandResponse::success(CommandId::new("nope"), json!(1))),
            SubmitOutcome::Discarded
        );

        queue(&d, "c1", "agent-b");
        assert_eq!(
            d.submit_response(CommandResponse::success(CommandId::new("c1"), json!(1))),
            SubmitOutcome::Buffered
        );
        assert_eq!(
            d.submit_response(CommandResponse::success(CommandId::new("c1"), json!(2))),
            SubmitOutcome::Discarded
        );
    }

    #[test]
    fn test_purge_drops_stale_buffered_responses() {
        let d = CommandDispatcher::new(Duration::from_secs(30), Duration::from_secs(60));
        queue(&d, "c1", "agent-b");
        d.poll_and_drain(&AgentId::new("agent-b"));
        let mut response = CommandResponse::success(CommandId::new("c1"), json!(1));
        response.received_at = Utc::now() - chrono::Duration::seconds(120);
        d.submit_response(response);

        let removed = d.purge_expired(Utc::now() + chrono::Duration::seconds(120));
        assert_eq!(removed, 2);
        assert_eq!(d.stats(), DispatchStats::default());
    }

    #[tokio::test]
    async fn test_issue_round_trip() {
        let d = dispatcher();
        let agent = AgentId::new("agent-b");

        let caller = {
            let d = d.clone();
            let agent = agent.clone();
            tokio::spawn(async move {
                d.issue(&agent, "screenshot", json!({"display": 1}), Some(Duration::from_secs(5)))
                    .await
            })
        };

        let command = loop {
            if let Some(command) = d.poll_and_drain(&agent).pop() {
                break command;
            }
            tokio::task::yield_now().await;
        };
        assert_eq!(command.command_type, "screenshot");
        d.submit_response(CommandResponse::success(command.command_id.clone(), json!("png")));

        let (command_id, result) = caller.await.expect("join");
        assert_eq!(command_id, command.command_id);
        assert_eq!(result, Ok(json!("png")));
    }
}

#[cfg(test)]
mod prop_tests {
    use super::*;
    use proptest::prelude::*;

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(50))]

        /// Property: per-agent delivery preserves enqueue order.
        #[test]
        fn prop_poll_preserves_fifo(count in 1usize..40) {
            let d = CommandDispatcher::default();
            let agent = AgentId::new("agent");
            let ids: Vec<CommandId> = (0..count)
                .map(|i| d.enqueue(&agent, "noop", serde_json::json!(i)))
                .collect();

            let delivered: Vec<CommandId> = d
                .poll_and_drain(&agent)
                .into_iter()
                .map(|c| c.command_id)
                .collect();
            prop_assert_eq!(delivered, ids);
            prop_assert!(d.poll_and_drain(&agent).is_empty());
        }

        /// Property: a response is returned identically whether the caller
        /// waited before or after it arrived.
        #[test]
        fn prop_wait_order_independent(value in any::<i64>(), wait_first in any::<bool>()) {
            let runtime = tokio::runtime::Builder::new_current_thread()
                .enable_time()
                .build()
                .unwrap();
            let result = runtime.block_on(async {
                let d = std::sync::Arc::new(CommandDispatcher::default());
                let id = d.enqueue(&AgentId::new("agent"), "noop", serde_json::json!(null));
                let response = CommandResponse::success(id.clone(), serde_json::json!(value));

                if wait_first {
                    let waiter = {
                        let d = d.clone();
                        let id = id.clone();
                        tokio::spawn(async move { d.await_response(&id, Duration::from_secs(5)).await })
                    };
                    while d.stats().awaiting == 0 {
                        tokio::task::yield_now().await;
                    }
                    d.submit_response(response);
                    waiter.await.unwrap()
                } else {
                    d.submit_response(response);
                    d.await_response(&id, Duration::from_secs(5)).await
                }
            });
            prop_assert_eq!(result, Ok(serde_json::json!(value)));
        }
    }
}
