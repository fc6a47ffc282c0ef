//! Error types for the control core.

use thiserror::Error;

use myco_types::SensorKind;

/// Errors raised at the sensor boundary.
///
/// Sensor errors are always recovered locally: the control loop holds the
/// last known actuator state and raises an alert, it never crashes.
///
/// This enum is marked `#[non_exhaustive]` to allow adding new variants
/// in future versions without breaking downstream code.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum SensorError {
    /// The newest available reading is older than the staleness limit.
    #[error("{kind} reading is stale: {age_seconds}s old")]
    Stale {
        /// Which sensor went stale.
        kind: SensorKind,
        /// Age of the newest reading.
        age_seconds: i64,
    },

    /// The sensor reported a value outside its physically plausible range.
    #[error("{kind} value {value} outside physical range [{min}, {max}]")]
    OutOfPhysicalRange {
        /// Which sensor misbehaved.
        kind: SensorKind,
        /// The implausible value.
        value: f64,
        /// Lower plausibility bound.
        min: f64,
        /// Upper plausibility bound.
        max: f64,
    },

    /// The sensor could not be read at all.
    #[error("sensor unavailable: {0}")]
    Unavailable(String),
}

/// Errors raised at the actuator boundary.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ActuatorError {
    /// No actuator with this name is registered with the bank.
    #[error("unknown actuator: {0}")]
    Unknown(String),

    /// The underlying driver failed to apply the state.
    #[error("driver failed to set {name}: {message}")]
    Driver {
        /// Actuator that failed.
        name: String,
        /// Driver-reported failure.
        message: String,
    },
}

/// Result type alias for actuator operations.
pub type Result<T> = std::result::Result<T, ActuatorError>;
