//! Configuration-boundary errors.

use thiserror::Error;

use crate::mode::Mode;
use crate::reading::SensorKind;

/// Errors raised when rejecting invalid configuration.
///
/// Configuration is validated synchronously at every boundary (file load,
/// API update); an invalid threshold set never reaches the control engine.
///
/// This enum is marked `#[non_exhaustive]` to allow adding new variants
/// in future versions without breaking downstream code.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ConfigError {
    /// A threshold band violates its ordering or value constraints.
    #[error("invalid {kind} thresholds for {mode} mode: {message}")]
    InvalidThreshold {
        /// Mode the offending band belongs to.
        mode: Mode,
        /// Parameter the offending band governs.
        kind: SensorKind,
        /// What is wrong with it.
        message: String,
    },

    /// Any other configuration field violation.
    #[error("invalid config field {field}: {message}")]
    Invalid {
        /// Dotted path of the offending field.
        field: String,
        /// What is wrong with it.
        message: String,
    },
}

/// Result type alias using [`ConfigError`].
pub type ConfigResult<T> = std::result::Result<T, ConfigError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_names_the_band() {
        let err = ConfigError::InvalidThreshold {
            mode: Mode::Fruiting,
            kind: SensorKind::Co2,
            message: "min above max".to_string(),
        };
        let msg = err.to_string();
        assert!(msg.contains("co2"));
        assert!(msg.contains("fruiting"));
    }
}
