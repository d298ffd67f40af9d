//! Identity types for fleetsync entities

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use uuid::Uuid;

/// Timestamp type using UTC timezone.
pub type Timestamp = DateTime<Utc>;

/// Whole milliseconds in `duration`, saturating at `u64::MAX`.
pub fn duration_millis(duration: std::time::Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

/// Generates the boilerplate shared by string-backed identifiers.
///
/// Agents and commands are named by the edge (hostnames, controller
/// serials, caller-chosen command ids), so these wrap a `String` rather
/// than a UUID.
macro_rules! string_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            /// Wrap an existing identifier.
            pub fn new(id: impl Into<String>) -> Self {
                Self(id.into())
            }

            /// Borrow the identifier as a string slice.
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<&str> for $name {
            fn from(value: &str) -> Self {
                Self(value.to_string())
            }
        }

        impl From<String> for $name {
            fn from(value: String) -> Self {
                Self(value)
            }
        }

        impl AsRef<str> for $name {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }
    };
}

/// Generates the boilerplate shared by UUIDv7-backed identifiers.
macro_rules! uuid_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
        #[serde(transparent)]
        pub struct $name(Uuid);

        impl $name {
            /// Generate a new timestamp-sortable identifier.
            pub fn now_v7() -> Self {
                Self(Uuid::now_v7())
            }

            /// Wrap an existing UUID.
            pub fn from_uuid(id: Uuid) -> Self {
                Self(id)
            }

            /// The underlying UUID.
            pub fn as_uuid(&self) -> Uuid {
                self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl std::str::FromStr for $name {
            type Err = uuid::Error;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Uuid::parse_str(s).map(Self)
            }
        }
    };
}

string_id!(
    /// Identifier of an edge agent (site controller or display host).
    AgentId
);

string_id!(
    /// Identifier of a dispatched command.
    CommandId
);

impl CommandId {
    /// Generate a fresh command identifier (UUIDv7, timestamp-sortable).
    pub fn generate() -> Self {
        Self(Uuid::now_v7().to_string())
    }
}

uuid_id!(
    /// Identifier of a detected conflict.
    ConflictId
);

uuid_id!(
    /// Identifier of a broadcast subscriber.
    SubscriberId
);

/// Compute the SHA-256 checksum of a JSON value as lowercase hex.
///
/// Object keys are hashed in sorted order, so structurally equal values
/// produce equal checksums whatever their insertion order.
pub fn compute_checksum(data: &serde_json::Value) -> String {
    let mut hasher = Sha256::new();
    write_canonical(data, &mut hasher);
    hex::encode(hasher.finalize())
}

fn write_canonical(value: &serde_json::Value, hasher: &mut Sha256) {
    match value {
        serde_json::Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            hasher.update(b"{");
            for key in keys {
                hasher.update(serde_json::Value::String(key.clone()).to_string().as_bytes());
                hasher.update(b":");
                write_canonical(&map[key], hasher);
                hasher.update(b",");
            }
            hasher.update(b"}");
        }
        serde_json::Value::Array(items) => {
            hasher.update(b"[");
            for item in items {
                write_canonical(item, hasher);
                hasher.update(b",");
            }
            hasher.update(b"]");
        }
        scalar => hasher.update(scalar.to_string().as_bytes()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_duration_millis_saturates() {
        use std::time::Duration;
        assert_eq!(duration_millis(Duration::from_millis(1500)), 1500);
        assert_eq!(duration_millis(Duration::from_micros(999)), 0);
        assert_eq!(duration_millis(Duration::MAX), u64::MAX);
    }

    #[test]
    fn test_string_id_roundtrip_display() {
        let id = AgentId::new("site-controller-7");
        assert_eq!(id.to_string(), "site-controller-7");
        assert_eq!(id.as_str(), "site-controller-7");
        assert_eq!(AgentId::from("site-controller-7"), id);
    }

    #[test]
    fn test_string_id_serializes_transparently() {
        let id = CommandId::new("cmd-1");
        let json = serde_json::to_string(&id).expect("serialize");
        assert_eq!(json, "\"cmd-1\"");
    }

    #[test]
    fn test_generated_command_ids_are_unique() {
        assert_ne!(CommandId::generate(), CommandId::generate());
    }

    #[test]
    fn test_uuid_id_parses_from_display() {
        let id = ConflictId::now_v7();
        let parsed: ConflictId = id.to_string().parse().expect("parse");
        assert_eq!(parsed, id);
    }

    #[test]
    fn test_checksum_ignores_key_order() {
        let a = json!({"title": "Lobby", "rotation": 30});
        let b = json!({"rotation": 30, "title": "Lobby"});
        assert_eq!(compute_checksum(&a), compute_checksum(&b));
        assert_ne!(compute_checksum(&a), compute_checksum(&json!({"title": "Lobby"})));
        assert_eq!(compute_checksum(&a).len(), 64);
    }
}
