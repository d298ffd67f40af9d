//! Resolution policies

use crate::{ConflictRecord, ConflictSource, PathPattern};
use fleetsync_core::{ConflictError, ConflictType, Resolution};
use std::fmt;
use std::sync::Arc;

/// Predicate deciding whether a condition applies to a record.
pub type ConditionFn = Arc<dyn Fn(&ConflictRecord) -> bool + Send + Sync>;

/// Custom merge of all sources into one payload.
pub type MergeFn = Arc<dyn Fn(&[ConflictSource]) -> Result<serde_json::Value, String> + Send + Sync>;

/// Check applied to resolved data before it is accepted.
pub type ValidateFn = Arc<dyn Fn(&serde_json::Value) -> Result<(), String> + Send + Sync>;

/// A named predicate that overrides the policy's default resolution.
#[derive(Clone)]
pub struct PolicyCondition {
    pub name: String,
    pub resolution: Resolution,
    predicate: ConditionFn,
}

impl PolicyCondition {
    pub fn applies_to(&self, record: &ConflictRecord) -> bool {
        (self.predicate)(record)
    }
}

impl fmt::Debug for PolicyCondition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PolicyCondition")
            .field("name", &self.name)
            .field("resolution", &self.resolution)
            .finish_non_exhaustive()
    }
}

/// Maps records under a path pattern to a resolution strategy.
///
/// A policy without a conflict type applies to every type, but loses to a
/// policy of the same specificity that names the exact type.
#[derive(Clone)]
pub struct ConflictPolicy {
    pub pattern: PathPattern,
    pub conflict_type: Option<ConflictType>,
    pub default_resolution: Resolution,
    pub conditions: Vec<PolicyCondition>,
    merge_fn: Option<MergeFn>,
    validate_fn: Option<ValidateFn>,
}

impl ConflictPolicy {
    pub fn new(pattern: &str, default_resolution: Resolution) -> Result<Self, ConflictError> {
        Ok(Self {
            pattern: PathPattern::parse(pattern)?,
            conflict_type: None,
            default_resolution,
            conditions: Vec::new(),
            merge_fn: None,
            validate_fn: None,
        })
    }

    /// Restrict the policy to one conflict type.
    pub fn for_type(mut self, conflict_type: ConflictType) -> Self {
        self.conflict_type = Some(conflict_type);
        self
    }

    /// Append a condition. Conditions are evaluated in insertion order.
    pub fn with_condition<F>(mut self, name: impl Into<String>, resolution: Resolution, predicate: F) -> Self
    where
        F: Fn(&ConflictRecord) -> bool + Send + Sync + 'static,
    {
        self.conditions.push(PolicyCondition {
            name: name.into(),
            resolution,
            predicate: Arc::new(predicate),
        });
        self
    }

    pub fn with_merge<F>(mut self, merge: F) -> Self
    where
        F: Fn(&[ConflictSource]) -> Result<serde_json::Value, String> + Send + Sync + 'static,
    {
        self.merge_fn = Some(Arc::new(merge));
        self
    }

    pub fn with_validator<F>(mut self, validate: F) -> Self
    where
        F: Fn(&serde_json::Value) -> Result<(), String> + Send + Sync + 'static,
    {
        self.validate_fn = Some(Arc::new(validate));
        self
    }

    /// Resolution for a record: the first matching condition, else the default.
    pub fn resolution_for(&self, record: &ConflictRecord) -> Resolution {
        self.conditions
            .iter()
            .find(|c| c.applies_to(record))
            .map(|c| {
                tracing::debug!(condition = %c.name, conflict_id = %record.id, "Policy condition matched");
                c.resolution
            })
            .unwrap_or(self.default_resolution)
    }

    pub fn merge_fn(&self) -> Option<&MergeFn> {
        self.merge_fn.as_ref()
    }

    pub fn validate(&self, data: &serde_json::Value) -> Result<(), String> {
        match &self.validate_fn {
            Some(validate) => validate(data),
            None => Ok(()),
        }
    }

    /// Rank of this policy for a record: `None` when it does not apply,
    /// otherwise (path specificity, names the exact type).
    pub(crate) fn rank(&self, path: &str, conflict_type: ConflictType) -> Option<(usize, bool)> {
        let specificity = self.pattern.match_path(path)?;
        match self.conflict_type {
            None => Some((specificity, false)),
            Some(t) if t == conflict_type => Some((specificity, true)),
            Some(_) => None,
        }
    }

    /// True when both policies would compete for exactly the same records.
    pub(crate) fn same_target(&self, other: &ConflictPolicy) -> bool {
        self.pattern == other.pattern && self.conflict_type == other.conflict_type
    }

    pub(crate) fn type_label(&self) -> String {
        self.conflict_type
            .map(|t| t.as_str().to_string())
            .unwrap_or_else(|| "*".to_string())
    }
}

impl fmt::Debug for ConflictPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConflictPolicy")
            .field("pattern", &self.pattern.as_str())
            .field("conflict_type", &self.conflict_type)
            .field("default_resolution", &self.default_resolution)
            .field("conditions", &self.conditions)
            .field("merge_fn", &self.merge_fn.is_some())
            .field("validate_fn", &self.validate_fn.is_some())
            .finish()
    }
}

/// Pick the best policy for a record.
///
/// Higher path specificity wins first, then an exact conflict type over a
/// type-agnostic policy, then the later registration.
pub fn select_policy<'a>(
    policies: &'a [Arc<ConflictPolicy>],
    path: &str,
    conflict_type: ConflictType,
) -> Option<&'a Arc<ConflictPolicy>> {
    policies
        .iter()
        .enumerate()
        .filter_map(|(index, policy)| {
            policy
                .rank(path, conflict_type)
                .map(|(specificity, exact)| ((specificity, exact, index), policy))
        })
        .max_by_key(|(key, _)| *key)
        .map(|(_, policy)| policy)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ConflictSource;
    use chrono::Utc;
    use serde_json::json;

    fn policy(pattern: &str, resolution: Resolution) -> Arc<ConflictPolicy> {
        Arc::new(ConflictPolicy::new(pattern, resolution).expect("valid"))
    }

    fn record(path: &str, edge_version: u64) -> ConflictRecord {
        let now = Utc::now();
        ConflictRecord::new(
            path,
            ConflictType::DataMismatch,
            vec![
                ConflictSource::center(json!({"v": 1}), 3, now),
                ConflictSource::edge("e1", json!({"v": 2}), edge_version, now),
            ],
        )
        .expect("two sources")
    }

    #[test]
    fn test_exact_path_beats_wildcard_regardless_of_order() {
        let policies = vec![
            policy("dashboards.main", Resolution::ControllerWins),
            policy("dashboards.*", Resolution::WebAdminWins),
        ];
        let chosen = select_policy(&policies, "dashboards.main", ConflictType::DataMismatch)
            .expect("policy");
        assert_eq!(chosen.default_resolution, Resolution::ControllerWins);
    }

    #[test]
    fn test_later_registration_wins_ties() {
        let policies = vec![
            policy("sites.*", Resolution::WebAdminWins),
            policy("sites.*", Resolution::Merge),
        ];
        let chosen = select_policy(&policies, "sites.hq", ConflictType::DataMismatch).expect("policy");
        assert_eq!(chosen.default_resolution, Resolution::Merge);
    }

    #[test]
    fn test_exact_type_beats_any_type_at_same_specificity() {
        let policies = vec![
            Arc::new(
                ConflictPolicy::new("status.*", Resolution::LastWriterWins)
                    .expect("valid")
                    .for_type(ConflictType::DataMismatch),
            ),
            policy("status.*", Resolution::Manual),
        ];
        let chosen = select_policy(&policies, "status.door", ConflictType::DataMismatch).expect("policy");
        assert_eq!(chosen.default_resolution, Resolution::LastWriterWins);

        let other = select_policy(&policies, "status.door", ConflictType::VersionConflict).expect("policy");
        assert_eq!(other.default_resolution, Resolution::Manual);
    }

    #[test]
    fn test_global_fallback_and_no_policy() {
        let policies = vec![policy("*", Resolution::Manual), policy("sites.*", Resolution::WebAdminWins)];
        let chosen = select_policy(&policies, "cookies.session", ConflictType::DeleteConflict).expect("policy");
        assert!(chosen.pattern.is_global());

        let typed_only = vec![Arc::new(
            ConflictPolicy::new("*", Resolution::Manual)
                .expect("valid")
                .for_type(ConflictType::DeleteConflict),
        )];
        assert!(select_policy(&typed_only, "sites.hq", ConflictType::DataMismatch).is_none());
    }

    #[test]
    fn test_first_matching_condition_wins() {
        let policy = ConflictPolicy::new("controllers.*", Resolution::ControllerWins)
            .expect("valid")
            .with_condition("edge_is_stale", Resolution::WebAdminWins, |r| {
                r.sources[1].version < r.sources[0].version
            })
            .with_condition("always", Resolution::Manual, |_| true);

        assert_eq!(policy.resolution_for(&record("controllers.c1", 1)), Resolution::WebAdminWins);
        assert_eq!(policy.resolution_for(&record("controllers.c1", 5)), Resolution::Manual);
    }
}
