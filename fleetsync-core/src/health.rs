//! Fleet health classification
//!
//! Dashboards alert on these values, so the thresholds are a contract:
//! `critical` below 50% of agents online, `warning` below 80% or whenever
//! synchronization work is pending, `healthy` otherwise.

use serde::{Deserialize, Serialize};

/// Derived overall health of the fleet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
#[serde(rename_all = "lowercase")]
pub enum FleetHealth {
    /// Enough agents online and nothing pending
    Healthy,
    /// Degraded: some agents missing or sync work pending
    Warning,
    /// Less than half of the fleet is reachable
    Critical,
}

/// Fraction of online agents below which the fleet is critical.
pub const CRITICAL_ONLINE_FRACTION: f64 = 0.5;

/// Fraction of online agents below which the fleet is degraded.
pub const WARNING_ONLINE_FRACTION: f64 = 0.8;

/// Classify fleet health from liveness counts.
///
/// An empty fleet is `Healthy` unless sync work is pending: there is no
/// agent to be missing.
pub fn classify_fleet_health(online: usize, total: usize, pending_sync: bool) -> FleetHealth {
    if total > 0 {
        let fraction = online as f64 / total as f64;
        if fraction < CRITICAL_ONLINE_FRACTION {
            return FleetHealth::Critical;
        }
        if fraction < WARNING_ONLINE_FRACTION {
            return FleetHealth::Warning;
        }
    }
    if pending_sync {
        FleetHealth::Warning
    } else {
        FleetHealth::Healthy
    }
}

/// Severity of a standing alert.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
#[serde(rename_all = "lowercase")]
pub enum AlertSeverity {
    Info,
    Warning,
    Critical,
}

impl From<FleetHealth> for AlertSeverity {
    fn from(health: FleetHealth) -> Self {
        match health {
            FleetHealth::Healthy => AlertSeverity::Info,
            FleetHealth::Warning => AlertSeverity::Warning,
            FleetHealth::Critical => AlertSeverity::Critical,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_thresholds() {
        assert_eq!(classify_fleet_health(10, 10, false), FleetHealth::Healthy);
        assert_eq!(classify_fleet_health(8, 10, false), FleetHealth::Healthy);
        assert_eq!(classify_fleet_health(7, 10, false), FleetHealth::Warning);
        assert_eq!(classify_fleet_health(5, 10, false), FleetHealth::Warning);
        assert_eq!(classify_fleet_health(4, 10, false), FleetHealth::Critical);
        assert_eq!(classify_fleet_health(0, 3, false), FleetHealth::Critical);
    }

    #[test]
    fn test_pending_sync_degrades_healthy_fleet() {
        assert_eq!(classify_fleet_health(10, 10, true), FleetHealth::Warning);
        assert_eq!(classify_fleet_health(1, 10, true), FleetHealth::Critical);
    }

    #[test]
    fn test_empty_fleet() {
        assert_eq!(classify_fleet_health(0, 0, false), FleetHealth::Healthy);
        assert_eq!(classify_fleet_health(0, 0, true), FleetHealth::Warning);
    }
}
