//! fleetsync Agents - Liveness and Command Dispatch
//!
//! Everything the coordinator knows about individual edge agents: whether
//! they are alive, and which commands are waiting for them.
//!
//! Both components are plain owned state. Construct one of each per
//! coordinator instance and share it behind an `Arc`.

mod dispatch;
mod liveness;

pub use dispatch::{
    CommandDispatcher, CommandResponse, CommandStatus, DispatchStats, PendingCommand,
    SubmitOutcome,
};
pub use liveness::{
    aggregate, AgentLivenessState, AgentStatusView, Heartbeat, HeartbeatOutcome,
    LivenessSummary, LivenessTracker,
};
