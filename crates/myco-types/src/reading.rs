//! Sensor readings and their quality classification.

use core::fmt;

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

/// The environmental parameter a reading measures.
///
/// This enum is marked `#[non_exhaustive]` to allow adding new parameters
/// in future versions without breaking downstream code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[non_exhaustive]
pub enum SensorKind {
    /// CO2 concentration in parts per million.
    Co2,
    /// Air temperature in degrees Celsius.
    Temperature,
    /// Relative humidity percentage (0-100).
    Humidity,
}

impl SensorKind {
    /// The unit readings of this kind are expressed in.
    #[must_use]
    pub fn unit(&self) -> &'static str {
        match self {
            SensorKind::Co2 => "ppm",
            SensorKind::Temperature => "°C",
            SensorKind::Humidity => "%",
        }
    }

    /// Physically plausible value range for this kind of sensor.
    ///
    /// Values outside this range indicate a faulted sensor rather than a
    /// real environmental condition and are rejected at the sampler
    /// boundary.
    #[must_use]
    pub fn physical_range(&self) -> (f64, f64) {
        match self {
            SensorKind::Co2 => (0.0, 100_000.0),
            SensorKind::Temperature => (-40.0, 100.0),
            SensorKind::Humidity => (0.0, 100.0),
        }
    }
}

impl fmt::Display for SensorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SensorKind::Co2 => write!(f, "co2"),
            SensorKind::Temperature => write!(f, "temperature"),
            SensorKind::Humidity => write!(f, "humidity"),
        }
    }
}

/// Quality classification attached to every reading by the sampler.
///
/// # Ordering
///
/// Qualities are ordered `Bad < Uncertain < Good`, which allows threshold
/// comparisons like `if reading.quality < Quality::Good { hold_state() }`.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
#[serde(rename_all = "snake_case")]
pub enum Quality {
    /// The sensor reported an error or the value failed plausibility checks.
    Bad,
    /// The value is readable but suspect (e.g. sensor warming up).
    Uncertain,
    /// Normal, trustworthy reading.
    #[default]
    Good,
}

impl fmt::Display for Quality {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Quality::Bad => write!(f, "bad"),
            Quality::Uncertain => write!(f, "uncertain"),
            Quality::Good => write!(f, "good"),
        }
    }
}

/// A single sensor reading. Immutable once created.
///
/// # Example
///
/// ```
/// use myco_types::{Reading, SensorKind};
/// use time::OffsetDateTime;
///
/// let reading = Reading::builder(SensorKind::Co2)
///     .device_id("chamber-1")
///     .value(850.0)
///     .captured_at(OffsetDateTime::now_utc())
///     .build();
/// assert_eq!(reading.unit, "ppm");
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Reading {
    /// Identifier of the device that produced this reading.
    pub device_id: String,
    /// What parameter was measured.
    pub kind: SensorKind,
    /// The measured value, in `unit`.
    pub value: f64,
    /// Unit string, derived from `kind` unless overridden.
    pub unit: String,
    /// Quality classification from the sampler.
    pub quality: Quality,
    /// When the sensor captured the value.
    #[serde(with = "time::serde::rfc3339")]
    pub captured_at: OffsetDateTime,
}

impl Reading {
    /// Create a builder for a reading of the given kind.
    pub fn builder(kind: SensorKind) -> ReadingBuilder {
        ReadingBuilder::new(kind)
    }

    /// Age of this reading relative to `now`.
    ///
    /// Negative ages (clock skew) are clamped to zero.
    #[must_use]
    pub fn age(&self, now: OffsetDateTime) -> time::Duration {
        (now - self.captured_at).max(time::Duration::ZERO)
    }

    /// Whether this reading is too old to act on.
    #[must_use]
    pub fn is_stale(&self, now: OffsetDateTime, staleness_limit: time::Duration) -> bool {
        self.age(now) > staleness_limit
    }

    /// Whether the control engine may act on this reading.
    ///
    /// A reading is actionable only when its quality is [`Quality::Good`]
    /// and it is not stale. A stale or degraded reading must never be
    /// treated as "in range".
    #[must_use]
    pub fn is_actionable(&self, now: OffsetDateTime, staleness_limit: time::Duration) -> bool {
        self.quality == Quality::Good && !self.is_stale(now, staleness_limit)
    }
}

/// Builder for [`Reading`].
///
/// Plausibility checks happen at the sampler boundary, not here: a builder
/// is also used by tests to construct deliberately implausible readings.
#[derive(Debug)]
#[must_use]
pub struct ReadingBuilder {
    reading: Reading,
}

impl ReadingBuilder {
    fn new(kind: SensorKind) -> Self {
        Self {
            reading: Reading {
                device_id: String::new(),
                kind,
                value: 0.0,
                unit: kind.unit().to_string(),
                quality: Quality::Good,
                captured_at: OffsetDateTime::UNIX_EPOCH,
            },
        }
    }

    /// Set the producing device identifier.
    pub fn device_id(mut self, device_id: impl Into<String>) -> Self {
        self.reading.device_id = device_id.into();
        self
    }

    /// Set the measured value.
    pub fn value(mut self, value: f64) -> Self {
        self.reading.value = value;
        self
    }

    /// Override the unit string.
    pub fn unit(mut self, unit: impl Into<String>) -> Self {
        self.reading.unit = unit.into();
        self
    }

    /// Set the quality classification.
    pub fn quality(mut self, quality: Quality) -> Self {
        self.reading.quality = quality;
        self
    }

    /// Set the capture timestamp.
    pub fn captured_at(mut self, captured_at: OffsetDateTime) -> Self {
        self.reading.captured_at = captured_at;
        self
    }

    /// Build the reading.
    #[must_use]
    pub fn build(self) -> Reading {
        self.reading
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builder_defaults_unit_from_kind() {
        let r = Reading::builder(SensorKind::Humidity).value(88.0).build();
        assert_eq!(r.unit, "%");
        assert_eq!(r.quality, Quality::Good);
    }

    #[test]
    fn physical_ranges_bracket_typical_values() {
        let (lo, hi) = SensorKind::Humidity.physical_range();
        assert!(lo <= 0.0 && hi >= 100.0);
        let (lo, hi) = SensorKind::Co2.physical_range();
        assert!((lo..=hi).contains(&850.0));
    }

    #[test]
    fn staleness_uses_capture_age() {
        let now = OffsetDateTime::now_utc();
        let limit = time::Duration::seconds(30);

        let fresh = Reading::builder(SensorKind::Co2)
            .value(900.0)
            .captured_at(now - time::Duration::seconds(10))
            .build();
        assert!(!fresh.is_stale(now, limit));
        assert!(fresh.is_actionable(now, limit));

        let old = Reading::builder(SensorKind::Co2)
            .value(900.0)
            .captured_at(now - time::Duration::seconds(120))
            .build();
        assert!(old.is_stale(now, limit));
        assert!(!old.is_actionable(now, limit));
    }

    #[test]
    fn degraded_quality_is_not_actionable() {
        let now = OffsetDateTime::now_utc();
        let r = Reading::builder(SensorKind::Temperature)
            .value(22.0)
            .quality(Quality::Uncertain)
            .captured_at(now)
            .build();
        assert!(!r.is_actionable(now, time::Duration::seconds(30)));
    }

    #[test]
    fn quality_ordering() {
        assert!(Quality::Bad < Quality::Uncertain);
        assert!(Quality::Uncertain < Quality::Good);
    }

    #[test]
    fn serde_round_trip() {
        let now = OffsetDateTime::now_utc();
        let r = Reading::builder(SensorKind::Co2)
            .device_id("chamber-1")
            .value(812.5)
            .captured_at(now)
            .build();
        let json = serde_json::to_string(&r).unwrap();
        assert!(json.contains("co2"));
        let back: Reading = serde_json::from_str(&json).unwrap();
        assert_eq!(back.kind, SensorKind::Co2);
        assert_eq!(back.value, 812.5);
    }
}
