//! Operating modes and threshold configuration.
//!
//! A [`Mode`] selects which [`ThresholdSet`] the control engine works from.
//! The engine itself is mode-blind: every mode-specific strategy (which
//! actuator serves a parameter, which direction it pushes, where the dead
//! zone sits) is data in the band, so a new cultivation phase is a new
//! `ThresholdSet`, not new control logic.

use core::fmt;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::reading::SensorKind;

/// Cultivation phase the chamber is in.
///
/// Set by the operator, read by the control engine as configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Mode {
    /// Colonization phase: CO2 is allowed to accumulate, little ventilation.
    Spawning,
    /// Fruiting phase: CO2 is vented down, high humidity maintained.
    Fruiting,
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Mode::Spawning => write!(f, "spawning"),
            Mode::Fruiting => write!(f, "fruiting"),
        }
    }
}

/// Control band for one parameter within a mode.
///
/// The switching bounds are `max + hysteresis` on the high side and
/// `min - hysteresis` on the low side; between them the actuator holds its
/// current state. `critical_max` is a mode-independent safety bound that
/// forces the mitigating state regardless of the dead zone.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ThresholdBand {
    /// The parameter this band governs.
    pub kind: SensorKind,
    /// Name of the actuator that serves this parameter.
    pub actuator: String,
    /// Direction of the actuator's effect. `false`: the actuator reduces
    /// the parameter when on (exhaust fan vs CO2). `true`: it raises the
    /// parameter when on (humidifier vs humidity, heater vs temperature).
    pub invert_on_high: bool,
    /// Lower edge of the target range.
    pub min: f64,
    /// Preferred value, used for reporting only.
    pub optimal: f64,
    /// Upper edge of the target range.
    pub max: f64,
    /// Widens the dead zone on both sides. Must be >= 0.
    pub hysteresis: f64,
    /// Safety bound: above this the mitigating state is forced.
    pub critical_max: f64,
}

impl ThresholdBand {
    /// High-side switching bound.
    #[must_use]
    pub fn high_bound(&self) -> f64 {
        self.max + self.hysteresis
    }

    /// Low-side switching bound.
    #[must_use]
    pub fn low_bound(&self) -> f64 {
        self.min - self.hysteresis
    }

    /// Whether `value` sits inside the target range `[min, max]`.
    #[must_use]
    pub fn in_range(&self, value: f64) -> bool {
        value >= self.min && value <= self.max
    }

    /// The actuator state that reduces this parameter.
    ///
    /// For a reducing actuator that state is on; for a raising actuator it
    /// is off. Safety overrides command this state.
    #[must_use]
    pub fn mitigating_state(&self) -> bool {
        !self.invert_on_high
    }

    /// Validate the band's internal ordering.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidThreshold`] unless
    /// `min <= optimal <= max <= critical_max`, `hysteresis >= 0`, and all
    /// values are finite.
    pub fn validate(&self, mode: Mode) -> Result<(), ConfigError> {
        let invalid = |message: String| ConfigError::InvalidThreshold {
            mode,
            kind: self.kind,
            message,
        };

        for (name, v) in [
            ("min", self.min),
            ("optimal", self.optimal),
            ("max", self.max),
            ("hysteresis", self.hysteresis),
            ("critical_max", self.critical_max),
        ] {
            if !v.is_finite() {
                return Err(invalid(format!("{name} is not finite")));
            }
        }
        if self.hysteresis < 0.0 {
            return Err(invalid(format!("hysteresis {} is negative", self.hysteresis)));
        }
        if !(self.min <= self.optimal && self.optimal <= self.max && self.max <= self.critical_max)
        {
            return Err(invalid(format!(
                "ordering violated: min {} <= optimal {} <= max {} <= critical_max {} must hold",
                self.min, self.optimal, self.max, self.critical_max
            )));
        }
        if self.actuator.is_empty() {
            return Err(invalid("actuator name is empty".to_string()));
        }
        Ok(())
    }
}

/// The full set of threshold bands for one mode.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ThresholdSet {
    /// The mode these bands apply to.
    pub mode: Mode,
    /// One band per governed parameter.
    pub bands: Vec<ThresholdBand>,
}

impl ThresholdSet {
    /// Look up the band governing `kind`, if any.
    #[must_use]
    pub fn band(&self, kind: SensorKind) -> Option<&ThresholdBand> {
        self.bands.iter().find(|b| b.kind == kind)
    }

    /// Validate every band and reject duplicate parameters.
    ///
    /// # Errors
    ///
    /// Returns the first [`ConfigError::InvalidThreshold`] encountered.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut seen = Vec::new();
        for band in &self.bands {
            band.validate(self.mode)?;
            if seen.contains(&band.kind) {
                return Err(ConfigError::InvalidThreshold {
                    mode: self.mode,
                    kind: band.kind,
                    message: "duplicate band for parameter".to_string(),
                });
            }
            seen.push(band.kind);
        }
        Ok(())
    }

    /// Default bands for the spawning phase.
    ///
    /// CO2 is left to accumulate between 10,000 and 20,000 ppm; the exhaust
    /// fan only vents above that or past the safety bound.
    #[must_use]
    pub fn spawning_defaults() -> Self {
        Self {
            mode: Mode::Spawning,
            bands: vec![
                ThresholdBand {
                    kind: SensorKind::Co2,
                    actuator: "exhaust_fan".to_string(),
                    invert_on_high: false,
                    min: 10_000.0,
                    optimal: 15_000.0,
                    max: 20_000.0,
                    hysteresis: 500.0,
                    critical_max: 30_000.0,
                },
                ThresholdBand {
                    kind: SensorKind::Temperature,
                    actuator: "heater".to_string(),
                    invert_on_high: true,
                    min: 24.0,
                    optimal: 25.5,
                    max: 27.0,
                    hysteresis: 0.5,
                    critical_max: 32.0,
                },
                ThresholdBand {
                    kind: SensorKind::Humidity,
                    actuator: "humidifier".to_string(),
                    invert_on_high: true,
                    min: 85.0,
                    optimal: 90.0,
                    max: 95.0,
                    hysteresis: 1.0,
                    critical_max: 99.0,
                },
            ],
        }
    }

    /// Default bands for the fruiting phase.
    ///
    /// CO2 is vented down into the 300-1000 ppm range. The CO2 hysteresis
    /// is deliberately a tunable field rather than a fixed interpretation;
    /// deployments that want a pure hold on `[300, 1000]` set it to zero.
    #[must_use]
    pub fn fruiting_defaults() -> Self {
        Self {
            mode: Mode::Fruiting,
            bands: vec![
                ThresholdBand {
                    kind: SensorKind::Co2,
                    actuator: "exhaust_fan".to_string(),
                    invert_on_high: false,
                    min: 300.0,
                    optimal: 650.0,
                    max: 1000.0,
                    hysteresis: 50.0,
                    critical_max: 5000.0,
                },
                ThresholdBand {
                    kind: SensorKind::Temperature,
                    actuator: "heater".to_string(),
                    invert_on_high: true,
                    min: 18.0,
                    optimal: 20.0,
                    max: 22.0,
                    hysteresis: 0.5,
                    critical_max: 30.0,
                },
                ThresholdBand {
                    kind: SensorKind::Humidity,
                    actuator: "humidifier".to_string(),
                    invert_on_high: true,
                    min: 88.0,
                    optimal: 92.0,
                    max: 96.0,
                    hysteresis: 1.0,
                    critical_max: 99.0,
                },
            ],
        }
    }
}

/// Threshold sets for every known mode.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ThresholdTable {
    /// Bands used while spawning.
    pub spawning: ThresholdSet,
    /// Bands used while fruiting.
    pub fruiting: ThresholdSet,
}

impl Default for ThresholdTable {
    fn default() -> Self {
        Self {
            spawning: ThresholdSet::spawning_defaults(),
            fruiting: ThresholdSet::fruiting_defaults(),
        }
    }
}

impl ThresholdTable {
    /// The threshold set for `mode`.
    #[must_use]
    pub fn for_mode(&self, mode: Mode) -> &ThresholdSet {
        match mode {
            Mode::Spawning => &self.spawning,
            Mode::Fruiting => &self.fruiting,
        }
    }

    /// Validate both sets, including that each set's declared mode matches
    /// its slot.
    ///
    /// # Errors
    ///
    /// Returns the first [`ConfigError`] encountered.
    pub fn validate(&self) -> Result<(), ConfigError> {
        for (slot, set) in [(Mode::Spawning, &self.spawning), (Mode::Fruiting, &self.fruiting)] {
            if set.mode != slot {
                return Err(ConfigError::Invalid {
                    field: "thresholds".to_string(),
                    message: format!("set declared for {} stored in the {} slot", set.mode, slot),
                });
            }
            set.validate()?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        ThresholdTable::default().validate().unwrap();
    }

    #[test]
    fn ordering_violation_is_rejected() {
        let mut set = ThresholdSet::fruiting_defaults();
        set.bands[0].min = 2000.0; // min > max
        let err = set.validate().unwrap_err();
        assert!(matches!(err, ConfigError::InvalidThreshold { .. }));
        assert!(err.to_string().contains("ordering"));
    }

    #[test]
    fn negative_hysteresis_is_rejected() {
        let mut set = ThresholdSet::spawning_defaults();
        set.bands[0].hysteresis = -1.0;
        assert!(set.validate().is_err());
    }

    #[test]
    fn duplicate_parameter_is_rejected() {
        let mut set = ThresholdSet::fruiting_defaults();
        let dup = set.bands[0].clone();
        set.bands.push(dup);
        let err = set.validate().unwrap_err();
        assert!(err.to_string().contains("duplicate"));
    }

    #[test]
    fn bounds_widen_by_hysteresis() {
        let set = ThresholdSet::fruiting_defaults();
        let band = set.band(SensorKind::Co2).unwrap();
        assert_eq!(band.high_bound(), 1050.0);
        assert_eq!(band.low_bound(), 250.0);
        assert!(band.in_range(650.0));
        assert!(!band.in_range(1001.0));
    }

    #[test]
    fn mitigating_state_follows_direction() {
        let set = ThresholdSet::fruiting_defaults();
        // Exhaust fan reduces CO2: mitigation is on.
        assert!(set.band(SensorKind::Co2).unwrap().mitigating_state());
        // Humidifier raises humidity: mitigation is off.
        assert!(!set.band(SensorKind::Humidity).unwrap().mitigating_state());
    }

    #[test]
    fn table_rejects_mode_slot_mismatch() {
        let mut table = ThresholdTable::default();
        table.spawning.mode = Mode::Fruiting;
        assert!(table.validate().is_err());
    }
}
