//! Pure alert evaluation.
//!
//! The evaluator turns a reading plus its threshold band into an
//! [`AlertCandidate`] with a graded severity. Lifecycle concerns (dedup
//! within the cooldown window, auto-resolve after a sustained in-range
//! period) are handled against the alert table in the ledger; this module
//! stays pure so it can be tested exhaustively.

use time::OffsetDateTime;

use myco_types::{AlertCandidate, AlertKind, AlertSeverity, Reading, ThresholdBand};

/// Grades threshold breaches and sensor staleness into alert candidates.
#[derive(Debug, Clone, Default)]
pub struct AlertEvaluator {
    _priv: (),
}

impl AlertEvaluator {
    /// Create an evaluator.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Evaluate one actionable reading against its band.
    ///
    /// Returns `None` while the value sits inside `[min, max]`. Staleness
    /// is not handled here; see [`AlertEvaluator::stale_candidate`].
    #[must_use]
    pub fn evaluate(
        &self,
        reading: &Reading,
        band: &ThresholdBand,
        now: OffsetDateTime,
    ) -> Option<AlertCandidate> {
        let value = reading.value;

        let (high, threshold, overshoot) = if value > band.max {
            (true, band.max, value - band.max)
        } else if value < band.min {
            (false, band.min, band.min - value)
        } else {
            return None;
        };

        let severity = if high && value > band.critical_max {
            AlertSeverity::Critical
        } else {
            grade_overshoot(overshoot, band)
        };

        Some(AlertCandidate {
            kind: AlertKind::breach(reading.kind, high),
            device_id: reading.device_id.clone(),
            severity,
            trigger_value: Some(value),
            threshold: Some(threshold),
            observed_at: now,
        })
    }

    /// Candidate for a sensor that stopped producing actionable readings.
    #[must_use]
    pub fn stale_candidate(&self, reading: &Reading, now: OffsetDateTime) -> AlertCandidate {
        AlertCandidate {
            kind: AlertKind::SensorStale,
            device_id: reading.device_id.clone(),
            severity: AlertSeverity::High,
            trigger_value: Some(reading.age(now).whole_seconds() as f64),
            threshold: None,
            observed_at: now,
        }
    }
}

/// Severity from how far past the threshold the value landed, relative to
/// the width of the target range.
fn grade_overshoot(overshoot: f64, band: &ThresholdBand) -> AlertSeverity {
    let width = (band.max - band.min).max(f64::EPSILON);
    let ratio = overshoot / width;
    if ratio > 0.5 {
        AlertSeverity::High
    } else if ratio > 0.2 {
        AlertSeverity::Medium
    } else {
        AlertSeverity::Low
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use myco_types::{SensorKind, ThresholdSet};

    fn co2_band() -> ThresholdBand {
        ThresholdSet::fruiting_defaults()
            .band(SensorKind::Co2)
            .unwrap()
            .clone()
    }

    fn reading(value: f64, now: OffsetDateTime) -> Reading {
        Reading::builder(SensorKind::Co2)
            .device_id("chamber-1")
            .value(value)
            .captured_at(now)
            .build()
    }

    #[test]
    fn in_range_produces_no_candidate() {
        let now = OffsetDateTime::now_utc();
        let e = AlertEvaluator::new();
        assert!(e.evaluate(&reading(650.0, now), &co2_band(), now).is_none());
        // Boundary values are still in range.
        assert!(e.evaluate(&reading(1000.0, now), &co2_band(), now).is_none());
        assert!(e.evaluate(&reading(300.0, now), &co2_band(), now).is_none());
    }

    #[test]
    fn severity_scales_with_distance() {
        let now = OffsetDateTime::now_utc();
        let e = AlertEvaluator::new();
        let band = co2_band(); // min 300, max 1000, width 700, critical 5000

        let low = e.evaluate(&reading(1050.0, now), &band, now).unwrap();
        assert_eq!(low.severity, AlertSeverity::Low);

        let medium = e.evaluate(&reading(1250.0, now), &band, now).unwrap();
        assert_eq!(medium.severity, AlertSeverity::Medium);

        let high = e.evaluate(&reading(1500.0, now), &band, now).unwrap();
        assert_eq!(high.severity, AlertSeverity::High);

        let critical = e.evaluate(&reading(5500.0, now), &band, now).unwrap();
        assert_eq!(critical.severity, AlertSeverity::Critical);
    }

    #[test]
    fn low_side_breach_carries_the_min_threshold() {
        let now = OffsetDateTime::now_utc();
        let e = AlertEvaluator::new();
        let c = e.evaluate(&reading(100.0, now), &co2_band(), now).unwrap();
        assert_eq!(c.kind, AlertKind::LowCo2);
        assert_eq!(c.threshold, Some(300.0));
        assert_eq!(c.trigger_value, Some(100.0));
    }

    #[test]
    fn stale_candidate_reports_age() {
        let now = OffsetDateTime::now_utc();
        let e = AlertEvaluator::new();
        let r = reading(650.0, now - time::Duration::minutes(5));
        let c = e.stale_candidate(&r, now);
        assert_eq!(c.kind, AlertKind::SensorStale);
        assert_eq!(c.trigger_value, Some(300.0));
        assert_eq!(c.fingerprint(), "sensor_stale:chamber-1");
    }
}
