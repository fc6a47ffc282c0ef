//! Actuator driving and the override policy.
//!
//! The [`ActuatorBank`] is the single synchronized entry point for actuator
//! mutations. Both call sites — the automatic control tick and an
//! operator's manual override — go through it, so concurrent writes to the
//! same actuator serialize on its lock.
//!
//! Write-ahead discipline is the caller's job: [`ActuatorBank::plan`]
//! returns the intended [`ActuatorChange`] without side effects, the
//! caller records it durably, then [`ActuatorBank::apply`] performs the
//! hardware write and state update.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use time::OffsetDateTime;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info};

use myco_types::{ActuatorChange, ActuatorState, TriggeredBy};

use crate::error::ActuatorError;

/// Hardware (or mock) that can energize named actuators.
#[async_trait]
pub trait ActuatorDriver: Send + Sync {
    /// Apply a state to one actuator.
    ///
    /// # Errors
    ///
    /// Returns [`ActuatorError::Driver`] when the hardware write fails.
    async fn apply(&self, name: &str, on: bool) -> Result<(), ActuatorError>;

    /// The states the hardware currently reports.
    async fn current(&self) -> BTreeMap<String, bool>;
}

#[async_trait]
impl<T: ActuatorDriver + ?Sized> ActuatorDriver for std::sync::Arc<T> {
    async fn apply(&self, name: &str, on: bool) -> Result<(), ActuatorError> {
        (**self).apply(name, on).await
    }

    async fn current(&self) -> BTreeMap<String, bool> {
        (**self).current().await
    }
}

/// In-memory driver for tests.
#[derive(Debug, Default)]
pub struct MockDriver {
    states: RwLock<BTreeMap<String, bool>>,
    applied: RwLock<Vec<(String, bool)>>,
    fail: AtomicBool,
}

impl MockDriver {
    /// Create an empty mock driver.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Toggle write failure.
    pub fn set_fail(&self, fail: bool) {
        self.fail.store(fail, Ordering::Relaxed);
    }

    /// Every `(name, state)` write in application order.
    pub async fn applied(&self) -> Vec<(String, bool)> {
        self.applied.read().await.clone()
    }
}

#[async_trait]
impl ActuatorDriver for MockDriver {
    async fn apply(&self, name: &str, on: bool) -> Result<(), ActuatorError> {
        if self.fail.load(Ordering::Relaxed) {
            return Err(ActuatorError::Driver {
                name: name.to_string(),
                message: "mock driver failure".to_string(),
            });
        }
        self.states.write().await.insert(name.to_string(), on);
        self.applied.write().await.push((name.to_string(), on));
        Ok(())
    }

    async fn current(&self) -> BTreeMap<String, bool> {
        self.states.read().await.clone()
    }
}

/// What happens to automatic control after a manual override.
///
/// The policy is explicit so operators are never surprised by the next
/// tick silently undoing their command.
#[derive(Debug, Clone)]
pub struct OverridePolicy {
    /// How long a manual override holds before automatic control resumes.
    /// `None` holds until the override is explicitly cleared.
    pub expiry: Option<time::Duration>,
}

impl Default for OverridePolicy {
    fn default() -> Self {
        Self {
            expiry: Some(time::Duration::hours(1)),
        }
    }
}

/// Owner of all actuator state, serializing automatic and manual writes.
pub struct ActuatorBank<D> {
    driver: D,
    states: Mutex<BTreeMap<String, ActuatorState>>,
    policy: OverridePolicy,
}

impl<D: ActuatorDriver> ActuatorBank<D> {
    /// Create a bank over `driver` with the given actuators registered,
    /// all off and under automatic control.
    pub fn new<I, S>(driver: D, names: I, policy: OverridePolicy, now: OffsetDateTime) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let states = names
            .into_iter()
            .map(|n| {
                let name: String = n.into();
                (name.clone(), ActuatorState::new(name, now))
            })
            .collect();
        Self {
            driver,
            states: Mutex::new(states),
            policy,
        }
    }

    /// Snapshot of every actuator's state.
    pub async fn snapshot(&self) -> Vec<ActuatorState> {
        self.states.lock().await.values().cloned().collect()
    }

    /// Current on/off map, as the control engine consumes it.
    pub async fn current_map(&self) -> BTreeMap<String, bool> {
        self.states
            .lock()
            .await
            .iter()
            .map(|(name, s)| (name.clone(), s.is_on))
            .collect()
    }

    /// Whether a manual override currently holds this actuator.
    pub async fn overridden(&self, name: &str, now: OffsetDateTime) -> bool {
        self.states
            .lock()
            .await
            .get(name)
            .is_some_and(|s| s.override_active(now))
    }

    /// Compute the change a command would make, without side effects.
    ///
    /// Automatic commands produce a change only when the state actually
    /// flips. Manual commands are always recorded, even when the state
    /// stays the same, because the override marker itself matters.
    ///
    /// # Errors
    ///
    /// Returns [`ActuatorError::Unknown`] for unregistered actuators.
    pub async fn plan(
        &self,
        name: &str,
        on: bool,
        trigger: TriggeredBy,
        now: OffsetDateTime,
    ) -> Result<Option<ActuatorChange>, ActuatorError> {
        let states = self.states.lock().await;
        let state = states
            .get(name)
            .ok_or_else(|| ActuatorError::Unknown(name.to_string()))?;

        if trigger == TriggeredBy::Auto && state.is_on == on {
            return Ok(None);
        }

        Ok(Some(ActuatorChange {
            name: name.to_string(),
            is_on: on,
            triggered_by: trigger,
            changed_at: now,
        }))
    }

    /// Perform the hardware write for a planned change and update state.
    ///
    /// # Errors
    ///
    /// Returns [`ActuatorError::Unknown`] for unregistered actuators and
    /// propagates driver failures. On driver failure the in-memory state
    /// is left untouched; the durable record of the intent lets recovery
    /// reapply it.
    pub async fn apply(&self, change: &ActuatorChange) -> Result<(), ActuatorError> {
        let mut states = self.states.lock().await;
        if !states.contains_key(&change.name) {
            return Err(ActuatorError::Unknown(change.name.clone()));
        }

        self.driver.apply(&change.name, change.is_on).await?;

        let state = states
            .get_mut(&change.name)
            .ok_or_else(|| ActuatorError::Unknown(change.name.clone()))?;
        if state.is_on != change.is_on {
            state.last_changed_at = change.changed_at;
        }
        state.is_on = change.is_on;
        state.triggered_by = change.triggered_by;
        state.override_expires_at = match change.triggered_by {
            TriggeredBy::Auto => None,
            TriggeredBy::Manual => self.policy.expiry.map(|d| change.changed_at + d),
        };

        info!(
            actuator = %change.name,
            on = change.is_on,
            trigger = %change.triggered_by,
            "applied actuator change"
        );
        Ok(())
    }

    /// Clear a manual override, returning the actuator to automatic
    /// control without changing its physical state.
    ///
    /// Returns whether an override was actually cleared.
    ///
    /// # Errors
    ///
    /// Returns [`ActuatorError::Unknown`] for unregistered actuators.
    pub async fn clear_override(&self, name: &str) -> Result<bool, ActuatorError> {
        let mut states = self.states.lock().await;
        let state = states
            .get_mut(name)
            .ok_or_else(|| ActuatorError::Unknown(name.to_string()))?;
        let had_override = state.triggered_by == TriggeredBy::Manual;
        state.triggered_by = TriggeredBy::Auto;
        state.override_expires_at = None;
        if had_override {
            debug!(actuator = name, "manual override cleared");
        }
        Ok(had_override)
    }

    /// Reapply replayed states after a restart, before the first tick.
    ///
    /// Replayed states count as automatic control; manual overrides do not
    /// survive a restart.
    ///
    /// # Errors
    ///
    /// Propagates the first driver failure.
    pub async fn restore(
        &self,
        replayed: &BTreeMap<String, bool>,
        now: OffsetDateTime,
    ) -> Result<(), ActuatorError> {
        let mut states = self.states.lock().await;
        for (name, &on) in replayed {
            if let Some(state) = states.get_mut(name) {
                self.driver.apply(name, on).await?;
                state.is_on = on;
                state.last_changed_at = now;
                state.triggered_by = TriggeredBy::Auto;
                state.override_expires_at = None;
            }
        }
        info!(count = replayed.len(), "restored actuator states from ledger");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const NAMES: [&str; 3] = ["exhaust_fan", "heater", "humidifier"];

    fn bank(policy: OverridePolicy) -> ActuatorBank<MockDriver> {
        ActuatorBank::new(MockDriver::new(), NAMES, policy, OffsetDateTime::now_utc())
    }

    #[tokio::test]
    async fn auto_plan_skips_no_op() {
        let now = OffsetDateTime::now_utc();
        let bank = bank(OverridePolicy::default());

        // Already off: nothing to do.
        let plan = bank
            .plan("exhaust_fan", false, TriggeredBy::Auto, now)
            .await
            .unwrap();
        assert!(plan.is_none());

        // Turning on produces a change.
        let plan = bank
            .plan("exhaust_fan", true, TriggeredBy::Auto, now)
            .await
            .unwrap()
            .unwrap();
        assert!(plan.is_on);
    }

    #[tokio::test]
    async fn manual_plan_is_always_recorded() {
        let now = OffsetDateTime::now_utc();
        let bank = bank(OverridePolicy::default());
        let plan = bank
            .plan("heater", false, TriggeredBy::Manual, now)
            .await
            .unwrap();
        assert!(plan.is_some());
    }

    #[tokio::test]
    async fn apply_drives_hardware_and_updates_state() {
        let now = OffsetDateTime::now_utc();
        let bank = bank(OverridePolicy::default());
        let change = bank
            .plan("exhaust_fan", true, TriggeredBy::Auto, now)
            .await
            .unwrap()
            .unwrap();
        bank.apply(&change).await.unwrap();

        let map = bank.current_map().await;
        assert_eq!(map.get("exhaust_fan"), Some(&true));
        assert_eq!(bank.driver.applied().await, vec![("exhaust_fan".to_string(), true)]);
    }

    #[tokio::test]
    async fn manual_override_expires_per_policy() {
        let now = OffsetDateTime::now_utc();
        let bank = bank(OverridePolicy {
            expiry: Some(time::Duration::minutes(30)),
        });

        let change = bank
            .plan("exhaust_fan", true, TriggeredBy::Manual, now)
            .await
            .unwrap()
            .unwrap();
        bank.apply(&change).await.unwrap();

        assert!(bank.overridden("exhaust_fan", now).await);
        assert!(
            !bank
                .overridden("exhaust_fan", now + time::Duration::hours(1))
                .await
        );
    }

    #[tokio::test]
    async fn until_cleared_override_holds_until_cleared() {
        let now = OffsetDateTime::now_utc();
        let bank = bank(OverridePolicy { expiry: None });

        let change = bank
            .plan("heater", true, TriggeredBy::Manual, now)
            .await
            .unwrap()
            .unwrap();
        bank.apply(&change).await.unwrap();

        assert!(bank.overridden("heater", now + time::Duration::days(2)).await);
        assert!(bank.clear_override("heater").await.unwrap());
        assert!(!bank.overridden("heater", now).await);
        // Clearing twice is a no-op.
        assert!(!bank.clear_override("heater").await.unwrap());
    }

    #[tokio::test]
    async fn auto_apply_clears_override_marker() {
        let now = OffsetDateTime::now_utc();
        let bank = bank(OverridePolicy::default());

        let manual = bank
            .plan("exhaust_fan", true, TriggeredBy::Manual, now)
            .await
            .unwrap()
            .unwrap();
        bank.apply(&manual).await.unwrap();

        let auto = ActuatorChange {
            name: "exhaust_fan".to_string(),
            is_on: false,
            triggered_by: TriggeredBy::Auto,
            changed_at: now + time::Duration::hours(2),
        };
        bank.apply(&auto).await.unwrap();
        assert!(!bank.overridden("exhaust_fan", now + time::Duration::hours(2)).await);
    }

    #[tokio::test]
    async fn unknown_actuator_is_rejected() {
        let now = OffsetDateTime::now_utc();
        let bank = bank(OverridePolicy::default());
        let err = bank
            .plan("mister", true, TriggeredBy::Auto, now)
            .await
            .unwrap_err();
        assert!(matches!(err, ActuatorError::Unknown(_)));
    }

    #[tokio::test]
    async fn driver_failure_leaves_state_untouched() {
        let now = OffsetDateTime::now_utc();
        let bank = bank(OverridePolicy::default());
        let change = bank
            .plan("exhaust_fan", true, TriggeredBy::Auto, now)
            .await
            .unwrap()
            .unwrap();

        bank.driver.set_fail(true);
        assert!(bank.apply(&change).await.is_err());
        assert_eq!(bank.current_map().await.get("exhaust_fan"), Some(&false));

        bank.driver.set_fail(false);
        bank.apply(&change).await.unwrap();
        assert_eq!(bank.current_map().await.get("exhaust_fan"), Some(&true));
    }

    #[tokio::test]
    async fn restore_reapplies_states_as_auto() {
        let now = OffsetDateTime::now_utc();
        let bank = bank(OverridePolicy::default());
        let mut replayed = BTreeMap::new();
        replayed.insert("exhaust_fan".to_string(), true);
        replayed.insert("humidifier".to_string(), true);

        bank.restore(&replayed, now).await.unwrap();
        let map = bank.current_map().await;
        assert_eq!(map.get("exhaust_fan"), Some(&true));
        assert_eq!(map.get("humidifier"), Some(&true));
        assert!(!bank.overridden("exhaust_fan", now).await);
    }
}
