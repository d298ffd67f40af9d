//! fleetsync Test Utilities
//!
//! Shared test infrastructure for the fleetsync workspace:
//! - Proptest generators for identifiers, conflict types and record sources
//! - Fixtures for the usual heartbeat and conflict scenarios
//! - Assertions for coordinator-level invariants

pub use fleetsync_agents::{Heartbeat, LivenessSummary};
pub use fleetsync_conflict::{ConflictRecord, ConflictSource, SourceOrigin};
pub use fleetsync_core::{
    AgentId, CommandId, ConflictType, LivenessStatus, Resolution, SyncConfig, Timestamp,
};

use chrono::{TimeZone, Utc};
use std::time::Duration;

// ============================================================================
// PROPTEST GENERATORS
// ============================================================================

pub mod generators {
    //! Proptest strategies for fleetsync types.

    use super::*;
    use proptest::prelude::*;
    use serde_json::{Map, Value};

    /// Generate an agent identifier shaped like a site controller name.
    pub fn arb_agent_id() -> impl Strategy<Value = AgentId> {
        "[a-z]{2,8}-[0-9]{1,3}".prop_map(AgentId::new)
    }

    /// Generate a LivenessStatus variant.
    pub fn arb_liveness_status() -> impl Strategy<Value = LivenessStatus> {
        prop_oneof![
            Just(LivenessStatus::Online),
            Just(LivenessStatus::Offline),
            Just(LivenessStatus::Error),
        ]
    }

    /// Generate a ConflictType variant.
    pub fn arb_conflict_type() -> impl Strategy<Value = ConflictType> {
        prop::sample::select(ConflictType::ALL.to_vec())
    }

    /// Generate a timestamp within a few days of 2024-01-01.
    pub fn arb_timestamp() -> impl Strategy<Value = Timestamp> {
        (0i64..300_000_000).prop_map(fixtures::at_ms)
    }

    /// Generate a scalar JSON value.
    pub fn arb_json_scalar() -> impl Strategy<Value = Value> {
        prop_oneof![
            Just(Value::Null),
            any::<bool>().prop_map(Value::Bool),
            (-1000i64..1000).prop_map(Value::from),
            "[a-z ]{0,12}".prop_map(Value::String),
        ]
    }

    /// Generate a flat JSON object with up to `max_keys` keys.
    pub fn arb_json_object(max_keys: usize) -> impl Strategy<Value = Value> {
        prop::collection::btree_map("[a-e]{1,2}", arb_json_scalar(), 0..=max_keys).prop_map(
            |fields| {
                let map: Map<String, Value> = fields.into_iter().collect();
                Value::Object(map)
            },
        )
    }

    /// Generate a source from either side with a small version number.
    pub fn arb_conflict_source() -> impl Strategy<Value = ConflictSource> {
        (
            any::<bool>(),
            arb_json_object(4),
            0u64..20,
            arb_timestamp(),
            "[a-z]{3,6}",
        )
            .prop_map(|(center, data, version, timestamp, edge_id)| {
                if center {
                    ConflictSource::center(data, version, timestamp)
                } else {
                    ConflictSource::edge(edge_id, data, version, timestamp)
                }
            })
    }

    /// Generate a dotted record path such as `sites.north.schedule`.
    pub fn arb_record_path() -> impl Strategy<Value = String> {
        prop::collection::vec("[a-z]{1,8}", 1..4).prop_map(|segments| segments.join("."))
    }
}

// ============================================================================
// TEST FIXTURES
// ============================================================================

pub mod fixtures {
    //! Pre-built values for common scenarios.

    use super::*;
    use serde_json::json;

    /// Fixed reference instant so time-dependent tests are deterministic.
    pub fn base_time() -> Timestamp {
        Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0)
            .single()
            .unwrap_or_else(Utc::now)
    }

    /// `base_time()` shifted by `ms` milliseconds.
    pub fn at_ms(ms: i64) -> Timestamp {
        base_time() + chrono::Duration::milliseconds(ms)
    }

    /// Default configuration with short durations for tests.
    pub fn test_config() -> SyncConfig {
        SyncConfig {
            default_command_timeout: Duration::from_millis(500),
            response_retention: Duration::from_secs(5),
            keepalive_interval: Duration::from_secs(1),
            subscriber_stale_after: Duration::from_secs(3),
            subscriber_buffer: 16,
            housekeeping_interval: Duration::from_secs(1),
            ..SyncConfig::default()
        }
    }

    /// Heartbeat from `agent_id` reporting `status` at `at`.
    pub fn heartbeat_at(agent_id: &str, status: LivenessStatus, at: Timestamp) -> Heartbeat {
        Heartbeat {
            agent_id: AgentId::new(agent_id),
            timestamp: at,
            status,
            metrics: None,
        }
    }

    /// Center-side copy of a record.
    pub fn center_source(data: serde_json::Value, version: u64, at: Timestamp) -> ConflictSource {
        ConflictSource::center(data, version, at)
    }

    /// Edge-side copy of a record.
    pub fn edge_source(
        edge_id: &str,
        data: serde_json::Value,
        version: u64,
        at: Timestamp,
    ) -> ConflictSource {
        ConflictSource::edge(edge_id, data, version, at)
    }

    /// A data mismatch on `path` between a center and an edge copy of a
    /// schedule, both at version 3.
    pub fn schedule_mismatch(path: &str) -> ConflictRecord {
        let center = center_source(json!({"start": "08:00", "end": "17:00"}), 3, at_ms(0));
        let edge = edge_source(
            "north-1",
            json!({"start": "09:00", "end": "17:00"}),
            3,
            at_ms(5_000),
        );
        match ConflictRecord::new(path, ConflictType::DataMismatch, vec![center, edge]) {
            Ok(record) => record,
            Err(e) => panic!("fixture record must be valid: {e}"),
        }
    }
}

// ============================================================================
// ASSERTIONS
// ============================================================================

pub mod assertions {
    //! Assertions for coordinator-level invariants.

    use super::*;

    /// Assert the summary counts add up to the total.
    pub fn assert_summary_consistent(summary: &LivenessSummary) {
        assert_eq!(
            summary.online + summary.offline + summary.error,
            summary.total,
            "status counts must partition the fleet: {:?}",
            summary
        );
    }

    /// Assert a record was resolved with `expected`.
    pub fn assert_resolved_with(record: &ConflictRecord, expected: Resolution) {
        assert!(record.is_resolved(), "record {} is unresolved", record.id);
        assert_eq!(record.resolution, expected);
    }
}
