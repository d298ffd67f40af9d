//! Conflict sources and records

use chrono::Utc;
use fleetsync_core::{
    compute_checksum, ConflictError, ConflictId, ConflictType, Resolution, Timestamp,
};
use serde::{Deserialize, Serialize};

/// Which authority a source snapshot came from.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SourceOrigin {
    /// The coordinator (web admin) copy.
    Center,
    /// An edge agent's copy.
    Edge {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        edge_id: Option<String>,
    },
}

impl SourceOrigin {
    pub fn edge(edge_id: impl Into<String>) -> Self {
        SourceOrigin::Edge {
            edge_id: Some(edge_id.into()),
        }
    }

    pub fn is_center(&self) -> bool {
        matches!(self, SourceOrigin::Center)
    }

    pub fn is_edge(&self) -> bool {
        matches!(self, SourceOrigin::Edge { .. })
    }
}

/// A snapshot of a record as seen by one authority. Immutable once built.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct ConflictSource {
    pub origin: SourceOrigin,
    #[cfg_attr(feature = "openapi", schema(value_type = Object))]
    pub data: serde_json::Value,
    pub version: u64,
    #[cfg_attr(feature = "openapi", schema(value_type = String, format = "date-time"))]
    pub timestamp: Timestamp,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub checksum: Option<String>,
}

impl ConflictSource {
    pub fn new(
        origin: SourceOrigin,
        data: serde_json::Value,
        version: u64,
        timestamp: Timestamp,
    ) -> Self {
        Self {
            origin,
            data,
            version,
            timestamp,
            checksum: None,
        }
    }

    pub fn center(data: serde_json::Value, version: u64, timestamp: Timestamp) -> Self {
        Self::new(SourceOrigin::Center, data, version, timestamp)
    }

    pub fn edge(
        edge_id: impl Into<String>,
        data: serde_json::Value,
        version: u64,
        timestamp: Timestamp,
    ) -> Self {
        Self::new(SourceOrigin::edge(edge_id), data, version, timestamp)
    }

    /// Attach the SHA-256 checksum of `data`.
    pub fn with_checksum(mut self) -> Self {
        self.checksum = Some(compute_checksum(&self.data));
        self
    }

    /// True when the two snapshots carry different data. Checksums are
    /// compared when both sides have one, the payloads otherwise.
    pub fn data_differs(&self, other: &ConflictSource) -> bool {
        match (&self.checksum, &other.checksum) {
            (Some(a), Some(b)) => a != b,
            _ => self.data != other.data,
        }
    }
}

/// A detected disagreement between sources of one logical record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct ConflictRecord {
    pub id: ConflictId,
    pub path: String,
    pub conflict_type: ConflictType,
    pub sources: Vec<ConflictSource>,
    /// Stays `manual` until a resolution succeeds.
    #[serde(default)]
    pub resolution: Resolution,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resolved_by: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[cfg_attr(feature = "openapi", schema(value_type = Option<String>, format = "date-time"))]
    pub resolved_at: Option<Timestamp>,
    #[serde(default = "chrono::Utc::now")]
    #[cfg_attr(feature = "openapi", schema(value_type = String, format = "date-time"))]
    pub detected_at: Timestamp,
}

impl ConflictRecord {
    /// Build an unresolved record. At least two sources are required.
    pub fn new(
        path: impl Into<String>,
        conflict_type: ConflictType,
        sources: Vec<ConflictSource>,
    ) -> Result<Self, ConflictError> {
        if sources.len() < 2 {
            return Err(ConflictError::InsufficientSources {
                count: sources.len(),
            });
        }
        Ok(Self {
            id: ConflictId::now_v7(),
            path: path.into(),
            conflict_type,
            sources,
            resolution: Resolution::Manual,
            resolved_by: None,
            resolved_at: None,
            detected_at: Utc::now(),
        })
    }

    pub fn is_resolved(&self) -> bool {
        self.resolved_at.is_some()
    }

    /// First source from the given authority.
    pub fn source_from(&self, center: bool) -> Option<&ConflictSource> {
        self.sources
            .iter()
            .find(|s| if center { s.origin.is_center() } else { s.origin.is_edge() })
    }

    pub(crate) fn mark_resolved(&mut self, resolution: Resolution, resolved_by: &str, at: Timestamp) {
        self.resolution = resolution;
        self.resolved_by = Some(resolved_by.to_string());
        self.resolved_at = Some(at);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_record_requires_two_sources() {
        let only = vec![ConflictSource::center(json!({}), 1, Utc::now())];
        assert_eq!(
            ConflictRecord::new("sites.hq", ConflictType::DataMismatch, only),
            Err(ConflictError::InsufficientSources { count: 1 })
        );
    }

    #[test]
    fn test_checksums_take_priority_over_data() {
        let now = Utc::now();
        let a = ConflictSource::center(json!({"a": 1, "b": 2}), 1, now).with_checksum();
        let b = ConflictSource::edge("e1", json!({"b": 2, "a": 1}), 1, now).with_checksum();
        assert!(!a.data_differs(&b));

        // A stale checksum hides a payload difference, as the agent vouched for it.
        let mut c = b.clone();
        c.data = json!({"a": 9});
        assert!(!a.data_differs(&c));

        c.checksum = None;
        assert!(a.data_differs(&c));
    }

    #[test]
    fn test_origin_wire_format() {
        let json = serde_json::to_value(SourceOrigin::edge("controller-4")).expect("serialize");
        assert_eq!(json, json!({"kind": "edge", "edge_id": "controller-4"}));
        let center: SourceOrigin = serde_json::from_value(json!({"kind": "center"})).expect("parse");
        assert!(center.is_center());
    }

    #[test]
    fn test_new_record_is_manual() {
        let now = Utc::now();
        let record = ConflictRecord::new(
            "dashboards.main",
            ConflictType::VersionConflict,
            vec![
                ConflictSource::center(json!(1), 2, now),
                ConflictSource::edge("e", json!(1), 1, now),
            ],
        )
        .expect("two sources");
        assert_eq!(record.resolution, Resolution::Manual);
        assert!(!record.is_resolved());
        assert_eq!(record.source_from(false).map(|s| s.version), Some(1));
    }
}
