//! Built-in policies and merge helpers
//!
//! Ownership model of the fleet's configuration:
//!
//! | Paths                                   | Owner       | Resolution          |
//! |-----------------------------------------|-------------|---------------------|
//! | `dashboards.*`, `sites.*`, `cookies.*`  | coordinator | `web_admin_wins`    |
//! | `controllers.*`                         | edge        | `controller_wins`   |
//! | `status.*`                              | volatile    | `last_writer_wins`  |
//! | `metrics.*`                             | telemetry   | `merge` (averaging) |
//! | any deletion                            | nobody      | `manual`            |

use crate::{ConflictPolicy, ConflictRecord, ConflictSource};
use fleetsync_core::{ConflictType, Resolution};
use serde_json::{Map, Value};

/// Conflict types the ownership policies cover. Deletions and permission
/// changes are deliberately absent so they fall through to `manual`.
const OWNED_TYPES: [ConflictType; 4] = [
    ConflictType::DataMismatch,
    ConflictType::VersionConflict,
    ConflictType::TimestampConflict,
    ConflictType::CreateConflict,
];

/// Overlay each later source's top-level fields onto the first source.
///
/// Later sources win per field. A non-object source replaces the
/// accumulated value entirely.
pub fn shallow_merge(sources: &[ConflictSource]) -> Result<Value, String> {
    let mut iter = sources.iter();
    let mut merged = iter
        .next()
        .map(|s| s.data.clone())
        .ok_or_else(|| "no sources to merge".to_string())?;

    for source in iter {
        match (&mut merged, &source.data) {
            (Value::Object(acc), Value::Object(fields)) => {
                for (key, value) in fields {
                    acc.insert(key.clone(), value.clone());
                }
            }
            (acc, other) => *acc = other.clone(),
        }
    }
    Ok(merged)
}

/// Shallow merge, with every field that is numeric in all sources
/// carrying it replaced by the mean of those values.
pub fn average_numeric_fields(sources: &[ConflictSource]) -> Result<Value, String> {
    let mut merged = shallow_merge(sources)?;
    if let Value::Object(acc) = &mut merged {
        let objects: Vec<&Map<String, Value>> =
            sources.iter().filter_map(|s| s.data.as_object()).collect();
        for (key, slot) in acc.iter_mut() {
            let values: Vec<&Value> = objects.iter().filter_map(|o| o.get(key)).collect();
            let numbers: Vec<f64> = values.iter().filter_map(|v| v.as_f64()).collect();
            if numbers.is_empty() || numbers.len() != values.len() {
                continue;
            }
            let mean = numbers.iter().sum::<f64>() / numbers.len() as f64;
            if let Some(number) = serde_json::Number::from_f64(mean) {
                *slot = Value::Number(number);
            }
        }
    }
    Ok(merged)
}

fn center_is_newer(record: &ConflictRecord) -> bool {
    match (record.source_from(true), record.source_from(false)) {
        (Some(center), Some(edge)) => center.version > edge.version,
        _ => false,
    }
}

fn owned(pattern: &str, resolution: Resolution) -> Vec<ConflictPolicy> {
    OWNED_TYPES
        .into_iter()
        .filter_map(|t| ConflictPolicy::new(pattern, resolution).ok().map(|p| p.for_type(t)))
        .collect()
}

/// The default policy set.
pub fn builtin_policies() -> Vec<ConflictPolicy> {
    let mut policies = Vec::new();

    for collection in ["dashboards.*", "sites.*", "cookies.*"] {
        policies.extend(owned(collection, Resolution::WebAdminWins));
    }

    // An operator pushing a newer revision overrides the edge's local copy.
    policies.extend(owned("controllers.*", Resolution::ControllerWins).into_iter().map(|p| {
        p.with_condition("center_has_newer_version", Resolution::WebAdminWins, center_is_newer)
    }));

    for conflict_type in [
        ConflictType::DataMismatch,
        ConflictType::VersionConflict,
        ConflictType::TimestampConflict,
    ] {
        if let Ok(policy) = ConflictPolicy::new("status.*", Resolution::LastWriterWins) {
            policies.push(policy.for_type(conflict_type));
        }
    }

    if let Ok(policy) = ConflictPolicy::new("metrics.*", Resolution::Merge) {
        policies.push(
            policy
                .for_type(ConflictType::DataMismatch)
                .with_merge(average_numeric_fields),
        );
    }

    for conflict_type in [ConflictType::DeleteConflict, ConflictType::PermissionConflict] {
        if let Ok(policy) = ConflictPolicy::new("*", Resolution::Manual) {
            policies.push(policy.for_type(conflict_type));
        }
    }

    policies
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use serde_json::json;

    fn sources(values: &[Value]) -> Vec<ConflictSource> {
        let now = Utc::now();
        values
            .iter()
            .enumerate()
            .map(|(i, v)| ConflictSource::edge(format!("e{i}"), v.clone(), 1, now))
            .collect()
    }

    #[test]
    fn test_shallow_merge_later_wins_per_field() {
        let merged = shallow_merge(&sources(&[
            json!({"title": "Lobby", "rotation": 30}),
            json!({"rotation": 60, "theme": "dark"}),
        ]))
        .expect("merge");
        assert_eq!(merged, json!({"title": "Lobby", "rotation": 60, "theme": "dark"}));
    }

    #[test]
    fn test_shallow_merge_non_object_replaces() {
        let merged = shallow_merge(&sources(&[json!({"a": 1}), json!("flat")])).expect("merge");
        assert_eq!(merged, json!("flat"));
        assert!(shallow_merge(&[]).is_err());
    }

    #[test]
    fn test_average_numeric_fields() {
        let merged = average_numeric_fields(&sources(&[
            json!({"cpu": 10, "temp": 40.0, "host": "a"}),
            json!({"cpu": 20, "host": "b"}),
            json!({"cpu": 30, "temp": "n/a"}),
        ]))
        .expect("merge");
        assert_eq!(merged["cpu"], json!(20.0));
        // Mixed types are not averaged; the overlay value is kept.
        assert_eq!(merged["temp"], json!("n/a"));
        assert_eq!(merged["host"], json!("b"));
    }

    #[test]
    fn test_builtin_deletes_are_manual_everywhere() {
        let policies: Vec<_> = builtin_policies().into_iter().map(std::sync::Arc::new).collect();
        for path in ["dashboards.main", "controllers.c1", "status.door", "anything.at.all"] {
            let policy = crate::select_policy(&policies, path, ConflictType::DeleteConflict).expect("policy");
            assert_eq!(policy.default_resolution, Resolution::Manual, "{path}");
        }
    }

    #[test]
    fn test_builtin_ownership() {
        let policies: Vec<_> = builtin_policies().into_iter().map(std::sync::Arc::new).collect();
        let pick = |path: &str, t: ConflictType| {
            crate::select_policy(&policies, path, t).map(|p| p.default_resolution)
        };
        assert_eq!(pick("dashboards.main", ConflictType::DataMismatch), Some(Resolution::WebAdminWins));
        assert_eq!(pick("cookies.sso", ConflictType::VersionConflict), Some(Resolution::WebAdminWins));
        assert_eq!(pick("controllers.c1", ConflictType::DataMismatch), Some(Resolution::ControllerWins));
        assert_eq!(pick("status.door", ConflictType::TimestampConflict), Some(Resolution::LastWriterWins));
        assert_eq!(pick("metrics.cpu", ConflictType::DataMismatch), Some(Resolution::Merge));
        assert_eq!(pick("unknown.path", ConflictType::DataMismatch), None);
    }
}
