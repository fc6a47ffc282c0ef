//! Control decisions.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use crate::mode::Mode;
use crate::reading::Reading;

/// Immutable record of one control evaluation for one reading.
///
/// `actions` maps actuator names to their commanded state, and carries
/// only states that differ from what was current at decision time: an
/// empty map is a hold (dead zone, stale reading, or nothing to change).
/// `reasoning` is an ordered, human-readable account of how the engine
/// got there; it is stored verbatim in the ledger.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Decision {
    /// When the decision was computed.
    #[serde(with = "time::serde::rfc3339")]
    pub decided_at: OffsetDateTime,
    /// Mode in force at decision time.
    pub mode: Mode,
    /// Snapshot of the reading that drove the decision.
    pub reading: Reading,
    /// Commanded actuator states, keyed by actuator name.
    ///
    /// A `BTreeMap` keeps iteration order deterministic, so identical
    /// inputs serialize to identical ledger payloads.
    pub actions: BTreeMap<String, bool>,
    /// Ordered explanation of the evaluation.
    pub reasoning: Vec<String>,
}

impl Decision {
    /// Whether this decision commands any state change at all.
    #[must_use]
    pub fn is_hold(&self) -> bool {
        self.actions.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reading::SensorKind;

    #[test]
    fn serialization_is_deterministic() {
        let reading = Reading::builder(SensorKind::Co2)
            .device_id("chamber-1")
            .value(1500.0)
            .captured_at(OffsetDateTime::UNIX_EPOCH)
            .build();
        let mut actions = BTreeMap::new();
        actions.insert("exhaust_fan".to_string(), true);
        actions.insert("heater".to_string(), false);
        let decision = Decision {
            decided_at: OffsetDateTime::UNIX_EPOCH,
            mode: Mode::Fruiting,
            reading,
            actions,
            reasoning: vec!["co2 1500 above high bound 1050: exhaust_fan -> on".to_string()],
        };

        let a = serde_json::to_string(&decision).unwrap();
        let b = serde_json::to_string(&decision.clone()).unwrap();
        assert_eq!(a, b);
        assert!(!decision.is_hold());
    }
}
