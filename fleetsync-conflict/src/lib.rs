//! fleetsync Conflict - Detection and Policy-Driven Resolution
//!
//! The coordinator ("center") and an edge agent can each edit the same
//! logical record. This crate compares the two snapshots, records every
//! disagreement in a bounded log, and decides the surviving value using
//! per-path policies.
//!
//! ```text
//! detect_conflicts ──→ ConflictRecord (manual) ──→ resolve_conflict
//!                            │                          │
//!                            ↓                          ↓
//!                       ConflictLog ←──── update ── policy lookup
//!                                                   (path, type)
//! ```

mod defaults;
mod log;
mod pattern;
mod policy;
mod record;
mod resolver;

pub use defaults::{average_numeric_fields, builtin_policies, shallow_merge};
pub use log::ConflictLog;
pub use pattern::PathPattern;
pub use policy::{select_policy, ConditionFn, ConflictPolicy, MergeFn, PolicyCondition, ValidateFn};
pub use record::{ConflictRecord, ConflictSource, SourceOrigin};
pub use resolver::{
    BatchError, BatchOutcome, ConflictResolver, ConflictStats, ResolutionOutcome, ResolvedData,
    SYSTEM_RESOLVER,
};
