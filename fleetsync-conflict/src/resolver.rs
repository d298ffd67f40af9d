//! Conflict detection and resolution

use crate::{builtin_policies, select_policy, ConflictLog, ConflictPolicy, ConflictRecord, ConflictSource};
use chrono::Utc;
use fleetsync_core::{
    ConflictError, ConflictId, ConflictType, FleetError, FleetResult, Resolution, StorageError,
    SyncConfig, Timestamp,
};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::sync::{Arc, RwLock};
use std::time::Duration;

/// Who stamps automatically resolved records.
pub const SYSTEM_RESOLVER: &str = "system";

// ============================================================================
// RESULTS
// ============================================================================

/// Data produced by a successful policy application.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedData {
    /// False for `manual`: the data are the raw sources for a human.
    pub resolved: bool,
    pub resolution: Resolution,
    pub data: Value,
}

/// Structured result of resolving one record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct ResolutionOutcome {
    pub conflict_id: ConflictId,
    pub resolved: bool,
    pub resolution: Resolution,
    #[serde(skip_serializing_if = "Option::is_none")]
    #[cfg_attr(feature = "openapi", schema(value_type = Option<Object>))]
    pub data: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Failure of one record within a batch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct BatchError {
    pub conflict_id: ConflictId,
    pub message: String,
}

/// Result of a batch resolution. Every input record ends up in exactly one
/// of `resolved` and `unresolved`; failures are also listed in `errors`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct BatchOutcome {
    pub resolved: Vec<ConflictRecord>,
    pub unresolved: Vec<ConflictRecord>,
    pub errors: Vec<BatchError>,
}

/// Aggregate view of the conflict log for alerting.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct ConflictStats {
    pub total: usize,
    pub by_type: BTreeMap<ConflictType, usize>,
    pub by_resolution: BTreeMap<Resolution, usize>,
    pub last_24h: usize,
    pub unresolved: usize,
}

// ============================================================================
// RESOLVER
// ============================================================================

/// Detects conflicts between two authorities and resolves them by policy.
pub struct ConflictResolver {
    policies: RwLock<Vec<Arc<ConflictPolicy>>>,
    log: ConflictLog,
    timestamp_tolerance: Duration,
    strict_policies: bool,
}

impl ConflictResolver {
    /// A resolver with no policies.
    pub fn new(log_capacity: usize, timestamp_tolerance: Duration) -> Self {
        Self {
            policies: RwLock::new(Vec::new()),
            log: ConflictLog::new(log_capacity),
            timestamp_tolerance,
            strict_policies: false,
        }
    }

    /// A resolver preloaded with the built-in ownership policies.
    pub fn from_config(config: &SyncConfig) -> Self {
        let resolver = Self::new(config.conflict_log_capacity, config.timestamp_tolerance);
        let builtin = builtin_policies()
            .into_iter()
            .map(Arc::new)
            .collect::<Vec<_>>();
        tracing::debug!(count = builtin.len(), "Loaded built-in conflict policies");
        Self {
            policies: RwLock::new(builtin),
            ..resolver
        }
    }

    /// Reject a second policy for the same pattern and conflict type
    /// instead of letting it shadow the first.
    pub fn with_strict_policies(mut self) -> Self {
        self.strict_policies = true;
        self
    }

    pub fn log(&self) -> &ConflictLog {
        &self.log
    }

    fn policies(&self) -> FleetResult<std::sync::RwLockReadGuard<'_, Vec<Arc<ConflictPolicy>>>> {
        self.policies.read().map_err(|_| policy_lock_poisoned())
    }

    /// Register a policy.
    ///
    /// A later policy for the same pattern and type shadows the earlier
    /// one, unless the resolver is strict, in which case it is rejected.
    pub fn add_policy(&self, policy: ConflictPolicy) -> FleetResult<()> {
        let mut policies = self.policies.write().map_err(|_| policy_lock_poisoned())?;
        if policies.iter().any(|p| p.same_target(&policy)) {
            if self.strict_policies {
                return Err(ConflictError::DuplicatePolicy {
                    pattern: policy.pattern.to_string(),
                    conflict_type: policy.type_label(),
                }
                .into());
            }
            tracing::warn!(
                pattern = %policy.pattern,
                conflict_type = %policy.type_label(),
                "Policy shadows an earlier registration"
            );
        }
        tracing::debug!(pattern = %policy.pattern, resolution = %policy.default_resolution, "Policy registered");
        policies.push(Arc::new(policy));
        Ok(())
    }

    /// The policy that would handle a record at `path`.
    pub fn policy_for(
        &self,
        path: &str,
        conflict_type: ConflictType,
    ) -> FleetResult<Option<Arc<ConflictPolicy>>> {
        let policies = self.policies()?;
        Ok(select_policy(&policies, path, conflict_type).cloned())
    }

    // ------------------------------------------------------------------------
    // Detection
    // ------------------------------------------------------------------------

    /// Compare two snapshots of the record at `path`.
    ///
    /// Emits one record per disagreement: a version conflict, a data
    /// mismatch, and, when the data differ but the timestamps are too
    /// close to order, a timestamp conflict. Identical sources yield
    /// nothing. Every record is appended to the log.
    pub fn detect_conflicts(
        &self,
        path: &str,
        a: &ConflictSource,
        b: &ConflictSource,
    ) -> FleetResult<Vec<ConflictRecord>> {
        let mut types = Vec::new();
        if a.version != b.version {
            types.push(ConflictType::VersionConflict);
        }
        let data_mismatch = a.data_differs(b);
        if data_mismatch {
            types.push(ConflictType::DataMismatch);
        }
        if data_mismatch && self.timestamps_ambiguous(a.timestamp, b.timestamp) {
            types.push(ConflictType::TimestampConflict);
        }

        let mut records = Vec::with_capacity(types.len());
        for conflict_type in types {
            let record = ConflictRecord::new(path, conflict_type, vec![a.clone(), b.clone()])?;
            tracing::info!(
                conflict_id = %record.id,
                path = %path,
                conflict_type = %conflict_type,
                "Conflict detected"
            );
            self.log.push(record.clone())?;
            records.push(record);
        }
        Ok(records)
    }

    fn timestamps_ambiguous(&self, a: Timestamp, b: Timestamp) -> bool {
        let gap = (a - b).abs();
        match gap.to_std() {
            Ok(gap) => gap < self.timestamp_tolerance,
            Err(_) => false,
        }
    }

    /// Record a conflict found by a collaborator rather than by detection.
    pub fn report_conflict(&self, record: ConflictRecord) -> FleetResult<ConflictRecord> {
        if record.sources.len() < 2 {
            return Err(ConflictError::InsufficientSources {
                count: record.sources.len(),
            }
            .into());
        }
        tracing::info!(conflict_id = %record.id, path = %record.path, "Conflict reported");
        self.log.push(record.clone())?;
        Ok(record)
    }

    // ------------------------------------------------------------------------
    // Resolution
    // ------------------------------------------------------------------------

    /// Resolve a record by policy, reporting failure as a structured result.
    pub fn resolve_conflict(&self, record: &mut ConflictRecord) -> ResolutionOutcome {
        match self.try_resolve(record) {
            Ok(resolved) => ResolutionOutcome {
                conflict_id: record.id,
                resolved: resolved.resolved,
                resolution: resolved.resolution,
                data: Some(resolved.data),
                error: None,
            },
            Err(err) => ResolutionOutcome {
                conflict_id: record.id,
                resolved: false,
                resolution: record.resolution,
                data: None,
                error: Some(err.to_string()),
            },
        }
    }

    /// Resolve a record by policy.
    ///
    /// On success the record is stamped as resolved by the system. On any
    /// failure, and for `manual`, the record is left `manual`. The logged
    /// copy is kept in step with `record`.
    pub fn try_resolve(&self, record: &mut ConflictRecord) -> FleetResult<ResolvedData> {
        if record.is_resolved() {
            return Err(ConflictError::AlreadyResolved {
                conflict_id: record.id,
            }
            .into());
        }
        if record.sources.len() < 2 {
            return Err(ConflictError::InsufficientSources {
                count: record.sources.len(),
            }
            .into());
        }

        let policy = self
            .policy_for(&record.path, record.conflict_type)?
            .ok_or_else(|| ConflictError::PolicyMissing {
                path: record.path.clone(),
                conflict_type: record.conflict_type.to_string(),
            })?;

        let resolution = policy.resolution_for(record);
        let data = apply_resolution(resolution, &policy, record)?;

        if resolution == Resolution::Manual {
            tracing::info!(conflict_id = %record.id, path = %record.path, "Conflict requires manual resolution");
            return Ok(ResolvedData {
                resolved: false,
                resolution,
                data,
            });
        }

        if let Err(reason) = policy.validate(&data) {
            tracing::warn!(conflict_id = %record.id, reason = %reason, "Resolved data rejected by validator");
            return Err(ConflictError::ValidationFailure {
                conflict_id: record.id,
                reason,
            }
            .into());
        }

        record.mark_resolved(resolution, SYSTEM_RESOLVER, Utc::now());
        self.log.update(record)?;
        tracing::info!(
            conflict_id = %record.id,
            path = %record.path,
            resolution = %resolution,
            "Conflict resolved"
        );
        Ok(ResolvedData {
            resolved: true,
            resolution,
            data,
        })
    }

    /// Resolve a logged record by id. A record that is already resolved is
    /// an error here rather than a failed outcome.
    pub fn resolve_by_id(&self, conflict_id: ConflictId) -> FleetResult<(ConflictRecord, ResolutionOutcome)> {
        let mut record = self
            .log
            .get(conflict_id)?
            .ok_or(ConflictError::NotFound { conflict_id })?;
        if record.is_resolved() {
            return Err(ConflictError::AlreadyResolved { conflict_id }.into());
        }
        let outcome = self.resolve_conflict(&mut record);
        Ok((record, outcome))
    }

    /// Resolve each record independently. One failure never stops the batch.
    pub fn resolve_batch(&self, records: Vec<ConflictRecord>) -> BatchOutcome {
        let mut outcome = BatchOutcome::default();
        for mut record in records {
            match self.try_resolve(&mut record) {
                Ok(resolved) if resolved.resolved => outcome.resolved.push(record),
                Ok(_) => outcome.unresolved.push(record),
                Err(err) => {
                    outcome.errors.push(BatchError {
                        conflict_id: record.id,
                        message: err.to_string(),
                    });
                    outcome.unresolved.push(record);
                }
            }
        }
        tracing::debug!(
            resolved = outcome.resolved.len(),
            unresolved = outcome.unresolved.len(),
            errors = outcome.errors.len(),
            "Batch resolution finished"
        );
        outcome
    }

    // ------------------------------------------------------------------------
    // Queries
    // ------------------------------------------------------------------------

    pub fn get(&self, conflict_id: ConflictId) -> FleetResult<ConflictRecord> {
        self.log
            .get(conflict_id)?
            .ok_or_else(|| ConflictError::NotFound { conflict_id }.into())
    }

    /// Up to `limit` logged records, newest first.
    pub fn history(&self, limit: usize) -> FleetResult<Vec<ConflictRecord>> {
        self.log.recent(limit)
    }

    pub fn unresolved(&self) -> FleetResult<Vec<ConflictRecord>> {
        self.log.unresolved()
    }

    pub fn unresolved_count(&self) -> FleetResult<usize> {
        self.log
            .with_entries(|entries| entries.iter().filter(|r| !r.is_resolved()).count())
    }

    pub fn stats(&self) -> FleetResult<ConflictStats> {
        self.stats_at(Utc::now())
    }

    /// Totals over the log, with `last_24h` counted back from `now`.
    pub fn stats_at(&self, now: Timestamp) -> FleetResult<ConflictStats> {
        let day_ago = now - chrono::Duration::hours(24);
        self.log.with_entries(|entries| {
            let mut stats = ConflictStats {
                total: entries.len(),
                ..ConflictStats::default()
            };
            for record in entries {
                *stats.by_type.entry(record.conflict_type).or_default() += 1;
                *stats.by_resolution.entry(record.resolution).or_default() += 1;
                if record.detected_at > day_ago {
                    stats.last_24h += 1;
                }
                if !record.is_resolved() {
                    stats.unresolved += 1;
                }
            }
            stats
        })
    }
}

impl Default for ConflictResolver {
    fn default() -> Self {
        Self::from_config(&SyncConfig::default())
    }
}

impl std::fmt::Debug for ConflictResolver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConflictResolver")
            .field("log", &self.log)
            .field("timestamp_tolerance", &self.timestamp_tolerance)
            .field("strict_policies", &self.strict_policies)
            .finish_non_exhaustive()
    }
}

fn policy_lock_poisoned() -> FleetError {
    FleetError::Storage(StorageError::LockPoisoned {
        resource: "conflict_policies".to_string(),
    })
}

/// Compute the surviving data for a record under `resolution`.
fn apply_resolution(
    resolution: Resolution,
    policy: &ConflictPolicy,
    record: &ConflictRecord,
) -> Result<Value, ConflictError> {
    let first = || {
        record
            .sources
            .first()
            .map(|s| s.data.clone())
            .unwrap_or(Value::Null)
    };
    let data = match resolution {
        Resolution::WebAdminWins => record
            .source_from(true)
            .map(|s| s.data.clone())
            .unwrap_or_else(first),
        Resolution::ControllerWins => record
            .source_from(false)
            .map(|s| s.data.clone())
            .unwrap_or_else(first),
        Resolution::LastWriterWins => record
            .sources
            .iter()
            .max_by_key(|s| s.timestamp)
            .map(|s| s.data.clone())
            .unwrap_or_else(first),
        Resolution::Merge => {
            let merged = match policy.merge_fn() {
                Some(merge) => merge(&record.sources),
                None => crate::shallow_merge(&record.sources),
            };
            merged.map_err(|reason| ConflictError::MergeFailed {
                conflict_id: record.id,
                reason,
            })?
        }
        Resolution::Versioned => Value::Array(
            record
                .sources
                .iter()
                .map(|s| {
                    json!({
                        "origin": s.origin,
                        "version": s.version,
                        "timestamp": s.timestamp,
                        "data": s.data,
                    })
                })
                .collect(),
        ),
        Resolution::Manual => json!({
            "requires_manual_resolution": true,
            "sources": record.sources,
        }),
    };
    Ok(data)
}

// ============================================================================
// TESTS
// ============================================================================


#[cfg(test)]
mod prop_tests {
    use super::*;
    use chrono::TimeZone;
    use proptest::prelude::*;

    fn json_leaf() -> impl Strategy<Value = Value> {
        prop_oneof![
            any::<i64>().prop_map(Value::from),
            "[a-z]{0,8}".prop_map(Value::from),
            any::<bool>().prop_map(Value::from),
        ]
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(100))]

        /// Property: identical version, checksum and data never produce a
        /// conflict, whichever source comes first.
        #[test]
        fn prop_identical_sources_no_conflict(
            data in prop::collection::btree_map("[a-z]{1,5}", json_leaf(), 0..6),
            version in any::<u64>(),
            ts in 0i64..1_000_000,
        ) {
            let data = serde_json::to_value(data).unwrap();
            let at = Utc.timestamp_millis_opt(1_700_000_000_000 + ts).unwrap();
            let a = ConflictSource::center(data.clone(), version, at).with_checksum();
            let b = ConflictSource::edge("e", data, version, at).with_checksum();
            let r = ConflictResolver::new(10, Duration::from_secs(1));
            prop_assert!(r.detect_conflicts("p.q", &a, &b).unwrap().is_empty());
            prop_assert!(r.detect_conflicts("p.q", &b, &a).unwrap().is_empty());
        }

        /// Property: last-writer-wins picks the later timestamp regardless
        /// of which authority wrote it.
        #[test]
        fn prop_last_writer_wins(center_ts in 0i64..100_000, edge_ts in 0i64..100_000) {
            prop_assume!(center_ts != edge_ts);
            let r = ConflictResolver::new(10, Duration::from_secs(1));
            r.add_policy(ConflictPolicy::new("status.*", Resolution::LastWriterWins).unwrap()).unwrap();
            let at = |ms| Utc.timestamp_millis_opt(1_700_000_000_000 + ms).unwrap();
            let mut record = ConflictRecord::new(
                "status.door",
                ConflictType::DataMismatch,
                vec![
                    ConflictSource::center(json!("center"), 1, at(center_ts)),
                    ConflictSource::edge("e", json!("edge"), 1, at(edge_ts)),
                ],
            ).unwrap();
            let expected = if center_ts > edge_ts { json!("center") } else { json!("edge") };
            prop_assert_eq!(r.resolve_conflict(&mut record).data, Some(expected));
        }
    }
}
