//! Alerts and their lifecycle fields.

use core::fmt;

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use crate::reading::SensorKind;

/// What condition an alert describes.
///
/// This enum is marked `#[non_exhaustive]` to allow adding new conditions
/// in future versions without breaking downstream code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[non_exhaustive]
pub enum AlertKind {
    /// A parameter breached the high side of its band.
    HighCo2,
    /// A parameter breached the low side of its band.
    LowCo2,
    /// Temperature above band.
    HighTemperature,
    /// Temperature below band.
    LowTemperature,
    /// Humidity above band.
    HighHumidity,
    /// Humidity below band.
    LowHumidity,
    /// A sensor stopped producing fresh, good-quality readings.
    SensorStale,
    /// The ledger is full of unsynced data; new events are at risk.
    StorageFull,
    /// Ledger corruption forced a reinitialization; entries were lost.
    StorageCorrupt,
    /// Sync retries for some entry exceeded the alerting bound.
    SyncStalled,
    /// The remote permanently rejected an entry.
    SyncRejected,
}

impl AlertKind {
    /// The breach alert kind for a parameter and side.
    #[must_use]
    pub fn breach(kind: SensorKind, high: bool) -> Self {
        match (kind, high) {
            (SensorKind::Co2, true) => AlertKind::HighCo2,
            (SensorKind::Co2, false) => AlertKind::LowCo2,
            (SensorKind::Temperature, true) => AlertKind::HighTemperature,
            (SensorKind::Temperature, false) => AlertKind::LowTemperature,
            (SensorKind::Humidity, true) => AlertKind::HighHumidity,
            (SensorKind::Humidity, false) => AlertKind::LowHumidity,
        }
    }

    /// Stable identifier used in fingerprints and storage.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            AlertKind::HighCo2 => "high_co2",
            AlertKind::LowCo2 => "low_co2",
            AlertKind::HighTemperature => "high_temperature",
            AlertKind::LowTemperature => "low_temperature",
            AlertKind::HighHumidity => "high_humidity",
            AlertKind::LowHumidity => "low_humidity",
            AlertKind::SensorStale => "sensor_stale",
            AlertKind::StorageFull => "storage_full",
            AlertKind::StorageCorrupt => "storage_corrupt",
            AlertKind::SyncStalled => "sync_stalled",
            AlertKind::SyncRejected => "sync_rejected",
        }
    }

    /// Parse the stable identifier back into a kind.
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        Some(match s {
            "high_co2" => AlertKind::HighCo2,
            "low_co2" => AlertKind::LowCo2,
            "high_temperature" => AlertKind::HighTemperature,
            "low_temperature" => AlertKind::LowTemperature,
            "high_humidity" => AlertKind::HighHumidity,
            "low_humidity" => AlertKind::LowHumidity,
            "sensor_stale" => AlertKind::SensorStale,
            "storage_full" => AlertKind::StorageFull,
            "storage_corrupt" => AlertKind::StorageCorrupt,
            "sync_stalled" => AlertKind::SyncStalled,
            "sync_rejected" => AlertKind::SyncRejected,
            _ => return None,
        })
    }
}

impl fmt::Display for AlertKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Alert severity.
///
/// # Ordering
///
/// Severities are ordered `Low < Medium < High < Critical`, so threshold
/// comparisons like `if severity >= AlertSeverity::High` work directly.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum AlertSeverity {
    /// Informational; just outside the band.
    Low,
    /// Noticeably outside the band.
    Medium,
    /// Far outside the band.
    High,
    /// Past the safety bound, or data at risk.
    Critical,
}

impl fmt::Display for AlertSeverity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AlertSeverity::Low => write!(f, "low"),
            AlertSeverity::Medium => write!(f, "medium"),
            AlertSeverity::High => write!(f, "high"),
            AlertSeverity::Critical => write!(f, "critical"),
        }
    }
}

/// Stable identity for deduplicating alerts.
///
/// Two occurrences of the same condition on the same device share a
/// fingerprint; re-occurrence within the cooldown updates the open alert
/// instead of creating a duplicate.
///
/// ```
/// use myco_types::{AlertKind, fingerprint};
///
/// assert_eq!(fingerprint(AlertKind::HighCo2, "chamber-1"), "high_co2:chamber-1");
/// ```
#[must_use]
pub fn fingerprint(kind: AlertKind, device_id: &str) -> String {
    format!("{}:{}", kind.as_str(), device_id)
}

/// A freshly evaluated alert condition, before lifecycle resolution.
///
/// Candidates are produced by pure evaluation; whether one opens a new
/// alert, refreshes an open one, or is swallowed by a cooldown is decided
/// against the alert table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlertCandidate {
    /// Condition kind.
    pub kind: AlertKind,
    /// Device the condition was observed on.
    pub device_id: String,
    /// Severity graded from the breach distance.
    pub severity: AlertSeverity,
    /// The value that triggered the condition, when there is one.
    pub trigger_value: Option<f64>,
    /// The threshold that was crossed, when there is one.
    pub threshold: Option<f64>,
    /// When the condition was observed.
    #[serde(with = "time::serde::rfc3339")]
    pub observed_at: OffsetDateTime,
}

impl AlertCandidate {
    /// The candidate's dedup fingerprint.
    #[must_use]
    pub fn fingerprint(&self) -> String {
        fingerprint(self.kind, &self.device_id)
    }
}

/// An alert row with its full lifecycle state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Alert {
    /// Dedup identity: `{kind}:{device_id}`.
    pub fingerprint: String,
    /// Condition kind.
    pub kind: AlertKind,
    /// Device the alert belongs to.
    pub device_id: String,
    /// Worst severity seen while the alert has been open.
    pub severity: AlertSeverity,
    /// Value that most recently triggered the condition.
    pub trigger_value: Option<f64>,
    /// Threshold that was crossed.
    pub threshold: Option<f64>,
    /// Whether an operator acknowledged the alert.
    pub acknowledged: bool,
    /// Whether the condition has cleared.
    pub resolved: bool,
    /// First occurrence.
    #[serde(with = "time::serde::rfc3339")]
    pub first_seen: OffsetDateTime,
    /// Most recent occurrence.
    #[serde(with = "time::serde::rfc3339")]
    pub last_seen: OffsetDateTime,
}

impl Alert {
    /// Whether the alert is still open (not resolved).
    #[must_use]
    pub fn is_open(&self) -> bool {
        !self.resolved
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn breach_maps_parameter_and_side() {
        assert_eq!(AlertKind::breach(SensorKind::Co2, true), AlertKind::HighCo2);
        assert_eq!(
            AlertKind::breach(SensorKind::Humidity, false),
            AlertKind::LowHumidity
        );
    }

    #[test]
    fn severity_ordering() {
        assert!(AlertSeverity::Critical > AlertSeverity::High);
        assert!(AlertSeverity::High > AlertSeverity::Medium);
        assert!(AlertSeverity::Medium > AlertSeverity::Low);
    }

    #[test]
    fn kind_string_round_trip() {
        for kind in [
            AlertKind::HighCo2,
            AlertKind::SensorStale,
            AlertKind::StorageFull,
            AlertKind::SyncStalled,
        ] {
            assert_eq!(AlertKind::parse(kind.as_str()), Some(kind));
        }
        assert_eq!(AlertKind::parse("nonsense"), None);
    }

    #[test]
    fn same_condition_same_fingerprint() {
        let now = OffsetDateTime::now_utc();
        let a = AlertCandidate {
            kind: AlertKind::HighCo2,
            device_id: "chamber-1".to_string(),
            severity: AlertSeverity::High,
            trigger_value: Some(2100.0),
            threshold: Some(1000.0),
            observed_at: now,
        };
        let b = AlertCandidate {
            severity: AlertSeverity::Medium,
            trigger_value: Some(1400.0),
            observed_at: now + time::Duration::minutes(1),
            ..a.clone()
        };
        assert_eq!(a.fingerprint(), b.fingerprint());
    }
}
