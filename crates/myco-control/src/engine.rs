//! The hysteresis control engine.
//!
//! [`ControlEngine::decide`] is pure and total: given identical inputs it
//! returns an identical [`Decision`], never blocks, and never fails
//! partially. Determinism is what makes the engine testable and lets crash
//! recovery replay ledger entries to reconstruct actuator state.

use std::collections::BTreeMap;

use time::OffsetDateTime;

use myco_types::{Decision, Mode, Reading, ThresholdBand, ThresholdSet};

/// Pure decision engine: reading + mode + thresholds in, decision out.
///
/// Per parameter the engine is a three-zone comparator. The switching
/// bounds sit `hysteresis` outside the target range, and between them the
/// actuator holds its current state:
///
/// ```text
///            low_bound           high_bound
///   ------------|---- hold zone ----|------------> value
///    act toward |                   | act toward
///    "too low"  |  (no switching)   | "too high"
/// ```
///
/// The hold zone is what prevents rapid on/off cycling when the value
/// hovers near a bound. Above `critical_max` the mitigating state is
/// forced regardless of zone or mode.
#[derive(Debug, Clone)]
pub struct ControlEngine {
    staleness_limit: time::Duration,
}

impl ControlEngine {
    /// Create an engine that refuses to act on readings older than
    /// `staleness_limit`.
    #[must_use]
    pub fn new(staleness_limit: time::Duration) -> Self {
        Self { staleness_limit }
    }

    /// The configured staleness limit.
    #[must_use]
    pub fn staleness_limit(&self) -> time::Duration {
        self.staleness_limit
    }

    /// Evaluate one reading against the mode's thresholds.
    ///
    /// `current` holds the present on/off state per actuator name.
    /// `now` is passed in rather than sampled so the function stays
    /// deterministic.
    ///
    /// The returned decision's `actions` contains only state *changes*; an
    /// empty map is a hold. Reasons are accumulated in order for every
    /// branch taken, including holds.
    #[must_use]
    pub fn decide(
        &self,
        reading: &Reading,
        mode: Mode,
        thresholds: &ThresholdSet,
        current: &BTreeMap<String, bool>,
        now: OffsetDateTime,
    ) -> Decision {
        let mut actions = BTreeMap::new();
        let mut reasoning = Vec::new();

        let Some(band) = thresholds.band(reading.kind) else {
            reasoning.push(format!(
                "no {} band configured for {} mode: holding",
                reading.kind, mode
            ));
            return self.finish(reading, mode, actions, reasoning, now);
        };

        if !reading.is_actionable(now, self.staleness_limit) {
            reasoning.push(format!(
                "{} reading not actionable (quality {}, age {}s): holding {}",
                reading.kind,
                reading.quality,
                reading.age(now).whole_seconds(),
                band.actuator,
            ));
            return self.finish(reading, mode, actions, reasoning, now);
        }

        let value = reading.value;
        let is_on = current.get(&band.actuator).copied().unwrap_or(false);

        // Safety first: past critical_max the mitigating state wins over
        // every strategy, including the hold zone.
        if value > band.critical_max {
            let target = band.mitigating_state();
            reasoning.push(format!(
                "{} {value}{} above critical {}: forcing {} {}",
                reading.kind,
                reading.unit,
                band.critical_max,
                band.actuator,
                on_off(target),
            ));
            if target != is_on {
                actions.insert(band.actuator.clone(), target);
            } else {
                reasoning.push(format!("{} already {}", band.actuator, on_off(target)));
            }
            return self.finish(reading, mode, actions, reasoning, now);
        }

        if value > band.high_bound() {
            let target = !band.invert_on_high;
            reasoning.push(format!(
                "{} {value}{} above high bound {}: {}",
                reading.kind,
                reading.unit,
                band.high_bound(),
                high_side_intent(band, target),
            ));
            if target != is_on {
                actions.insert(band.actuator.clone(), target);
            } else {
                reasoning.push(format!("{} already {}", band.actuator, on_off(target)));
            }
        } else if value < band.low_bound() {
            let target = band.invert_on_high;
            reasoning.push(format!(
                "{} {value}{} below low bound {}: {}",
                reading.kind,
                reading.unit,
                band.low_bound(),
                low_side_intent(band, target),
            ));
            if target != is_on {
                actions.insert(band.actuator.clone(), target);
            } else {
                reasoning.push(format!("{} already {}", band.actuator, on_off(target)));
            }
        } else {
            reasoning.push(format!(
                "{} {value}{} within [{}, {}]: holding {} {}",
                reading.kind,
                reading.unit,
                band.low_bound(),
                band.high_bound(),
                band.actuator,
                on_off(is_on),
            ));
        }

        self.finish(reading, mode, actions, reasoning, now)
    }

    fn finish(
        &self,
        reading: &Reading,
        mode: Mode,
        actions: BTreeMap<String, bool>,
        reasoning: Vec<String>,
        now: OffsetDateTime,
    ) -> Decision {
        Decision {
            decided_at: now,
            mode,
            reading: reading.clone(),
            actions,
            reasoning,
        }
    }
}

fn on_off(state: bool) -> &'static str {
    if state { "on" } else { "off" }
}

/// Intent phrasing for a high-side breach.
fn high_side_intent(band: &ThresholdBand, target: bool) -> String {
    if band.invert_on_high {
        format!("letting {} fall, {} -> {}", band.kind, band.actuator, on_off(target))
    } else {
        format!("venting {}, {} -> {}", band.kind, band.actuator, on_off(target))
    }
}

/// Intent phrasing for a low-side breach.
fn low_side_intent(band: &ThresholdBand, target: bool) -> String {
    if band.invert_on_high {
        format!("raising {}, {} -> {}", band.kind, band.actuator, on_off(target))
    } else {
        format!(
            "letting {} accumulate, {} -> {}",
            band.kind, band.actuator, on_off(target)
        )
    }
}
