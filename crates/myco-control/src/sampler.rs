//! Sensor sampling boundary.
//!
//! [`SensorSampler`] abstracts over whatever actually produces readings
//! (an I2C driver, a BLE gateway, a simulator). The control loop only
//! depends on the trait, so tests inject a [`MockSampler`] with scripted
//! values and fault injection.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use rand::Rng;
use time::OffsetDateTime;
use tokio::sync::RwLock;
use tracing::warn;

use myco_types::{Quality, Reading, SensorKind};

use crate::error::SensorError;

/// Check a reading against its kind's physical plausibility range.
///
/// # Errors
///
/// Returns [`SensorError::OutOfPhysicalRange`] for values a working sensor
/// cannot produce (including non-finite values).
pub fn validate_physical(reading: &Reading) -> Result<(), SensorError> {
    let (min, max) = reading.kind.physical_range();
    if !reading.value.is_finite() || reading.value < min || reading.value > max {
        return Err(SensorError::OutOfPhysicalRange {
            kind: reading.kind,
            value: reading.value,
            min,
            max,
        });
    }
    Ok(())
}

/// Source of periodic sensor readings.
#[async_trait]
pub trait SensorSampler: Send + Sync {
    /// Identifier of the device the readings belong to.
    fn device_id(&self) -> &str;

    /// Produce the current batch of readings, one per available sensor.
    ///
    /// Implementations classify their own output: a value that fails
    /// plausibility checks comes back with [`Quality::Bad`] rather than
    /// being silently dropped, so the control loop can hold state and
    /// alert on it.
    ///
    /// # Errors
    ///
    /// Returns [`SensorError::Unavailable`] when the sensor bus cannot be
    /// read at all.
    async fn sample(&self) -> Result<Vec<Reading>, SensorError>;
}

#[async_trait]
impl<T: SensorSampler + ?Sized> SensorSampler for std::sync::Arc<T> {
    fn device_id(&self) -> &str {
        (**self).device_id()
    }

    async fn sample(&self) -> Result<Vec<Reading>, SensorError> {
        (**self).sample().await
    }
}

/// Scriptable in-memory sampler for tests and bench setups.
pub struct MockSampler {
    device_id: String,
    values: RwLock<BTreeMap<SensorKind, f64>>,
    quality: RwLock<BTreeMap<SensorKind, Quality>>,
    /// Extra age subtracted from the capture timestamp, per kind.
    age: RwLock<BTreeMap<SensorKind, time::Duration>>,
    /// Uniform noise amplitude added to every value.
    noise: RwLock<f64>,
    fail: AtomicBool,
}

impl std::fmt::Debug for MockSampler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MockSampler")
            .field("device_id", &self.device_id)
            .finish()
    }
}

impl MockSampler {
    /// Create a sampler with plausible room-air defaults.
    #[must_use]
    pub fn new(device_id: &str) -> Self {
        let mut values = BTreeMap::new();
        values.insert(SensorKind::Co2, 800.0);
        values.insert(SensorKind::Temperature, 21.0);
        values.insert(SensorKind::Humidity, 60.0);
        Self {
            device_id: device_id.to_string(),
            values: RwLock::new(values),
            quality: RwLock::new(BTreeMap::new()),
            age: RwLock::new(BTreeMap::new()),
            noise: RwLock::new(0.0),
            fail: AtomicBool::new(false),
        }
    }

    /// Add uniform noise of the given amplitude to every sampled value,
    /// for simulating a jittery sensor around a threshold.
    pub async fn set_noise(&self, amplitude: f64) {
        *self.noise.write().await = amplitude.abs();
    }

    /// Script the next value for a sensor kind.
    pub async fn set_value(&self, kind: SensorKind, value: f64) {
        self.values.write().await.insert(kind, value);
    }

    /// Script the quality for a sensor kind.
    pub async fn set_quality(&self, kind: SensorKind, quality: Quality) {
        self.quality.write().await.insert(kind, quality);
    }

    /// Make readings of this kind come back already aged.
    pub async fn set_age(&self, kind: SensorKind, age: time::Duration) {
        self.age.write().await.insert(kind, age);
    }

    /// Toggle whole-sampler failure.
    pub fn set_fail(&self, fail: bool) {
        self.fail.store(fail, Ordering::Relaxed);
    }
}

#[async_trait]
impl SensorSampler for MockSampler {
    fn device_id(&self) -> &str {
        &self.device_id
    }

    async fn sample(&self) -> Result<Vec<Reading>, SensorError> {
        if self.fail.load(Ordering::Relaxed) {
            return Err(SensorError::Unavailable("mock sampler failure".to_string()));
        }

        let now = OffsetDateTime::now_utc();
        let values = self.values.read().await;
        let qualities = self.quality.read().await;
        let ages = self.age.read().await;
        let noise = *self.noise.read().await;

        let mut readings = Vec::with_capacity(values.len());
        for (&kind, &value) in values.iter() {
            let age = ages.get(&kind).copied().unwrap_or(time::Duration::ZERO);
            let value = if noise > 0.0 {
                value + rand::rng().random_range(-noise..=noise)
            } else {
                value
            };
            let mut reading = Reading::builder(kind)
                .device_id(&self.device_id)
                .value(value)
                .quality(qualities.get(&kind).copied().unwrap_or(Quality::Good))
                .captured_at(now - age)
                .build();
            if let Err(e) = validate_physical(&reading) {
                warn!("{e}: downgrading quality to bad");
                reading.quality = Quality::Bad;
            }
            readings.push(reading);
        }
        Ok(readings)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn sample_returns_all_kinds() {
        let sampler = MockSampler::new("chamber-1");
        let readings = sampler.sample().await.unwrap();
        assert_eq!(readings.len(), 3);
        assert!(readings.iter().all(|r| r.quality == Quality::Good));
        assert!(readings.iter().all(|r| r.device_id == "chamber-1"));
    }

    #[tokio::test]
    async fn scripted_value_and_quality() {
        let sampler = MockSampler::new("chamber-1");
        sampler.set_value(SensorKind::Co2, 15_000.0).await;
        sampler.set_quality(SensorKind::Co2, Quality::Uncertain).await;

        let readings = sampler.sample().await.unwrap();
        let co2 = readings.iter().find(|r| r.kind == SensorKind::Co2).unwrap();
        assert_eq!(co2.value, 15_000.0);
        assert_eq!(co2.quality, Quality::Uncertain);
    }

    #[tokio::test]
    async fn implausible_value_is_downgraded_to_bad() {
        let sampler = MockSampler::new("chamber-1");
        sampler.set_value(SensorKind::Humidity, 140.0).await;

        let readings = sampler.sample().await.unwrap();
        let hum = readings
            .iter()
            .find(|r| r.kind == SensorKind::Humidity)
            .unwrap();
        assert_eq!(hum.quality, Quality::Bad);
    }

    #[tokio::test]
    async fn failure_injection() {
        let sampler = MockSampler::new("chamber-1");
        sampler.set_fail(true);
        assert!(matches!(
            sampler.sample().await,
            Err(SensorError::Unavailable(_))
        ));
        sampler.set_fail(false);
        assert!(sampler.sample().await.is_ok());
    }

    #[tokio::test]
    async fn aged_readings_are_stale() {
        let sampler = MockSampler::new("chamber-1");
        sampler
            .set_age(SensorKind::Co2, time::Duration::minutes(10))
            .await;

        let readings = sampler.sample().await.unwrap();
        let co2 = readings.iter().find(|r| r.kind == SensorKind::Co2).unwrap();
        let now = OffsetDateTime::now_utc();
        assert!(co2.is_stale(now, time::Duration::seconds(60)));
    }

    #[tokio::test]
    async fn noise_stays_within_amplitude() {
        let sampler = MockSampler::new("chamber-1");
        sampler.set_value(SensorKind::Co2, 1000.0).await;
        sampler.set_noise(25.0).await;

        for _ in 0..50 {
            let readings = sampler.sample().await.unwrap();
            let co2 = readings.iter().find(|r| r.kind == SensorKind::Co2).unwrap();
            assert!((975.0..=1025.0).contains(&co2.value));
        }
    }

    #[test]
    fn validate_physical_rejects_nan() {
        let r = Reading::builder(SensorKind::Temperature)
            .value(f64::NAN)
            .build();
        assert!(validate_physical(&r).is_err());
    }
}
