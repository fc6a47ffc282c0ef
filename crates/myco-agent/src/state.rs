//! Application state shared across the control loop, sync agent, and API.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use time::OffsetDateTime;
use tokio::sync::{Mutex, Notify, RwLock, broadcast, watch};
use tracing::{info, warn};

use myco_control::{ActuatorBank, ActuatorDriver, OverridePolicy, SensorSampler};
use myco_ledger::{Ledger, RecoveryReport};
use myco_types::{Alert, AlertCandidate, AlertKind, AlertSeverity, EntityType, Mode};

use crate::config::Config;

/// Errors surfaced while wiring or recovering the agent.
#[derive(Debug, thiserror::Error)]
pub enum AgentError {
    /// Ledger failure.
    #[error(transparent)]
    Ledger(#[from] myco_ledger::Error),

    /// Actuator failure.
    #[error(transparent)]
    Actuator(#[from] myco_control::ActuatorError),
}

/// Shared application state.
///
/// One instance per process, passed explicitly everywhere; there is no
/// global controller singleton.
pub struct AppState {
    /// Device identity, cloned out of the config at construction.
    pub device_id: String,
    /// Configuration (RwLock for runtime threshold/mode updates).
    pub config: RwLock<Config>,
    /// The durable ledger. The lock is held for single statements, never
    /// across a network call.
    pub ledger: Mutex<Ledger>,
    /// Current operating mode.
    pub mode: RwLock<Mode>,
    /// Whether automatic control is enabled.
    automation: AtomicBool,
    /// Actuator owner; serializes automatic and manual writes.
    pub bank: ActuatorBank<Arc<dyn ActuatorDriver>>,
    /// Source of sensor readings.
    pub sampler: Arc<dyn SensorSampler>,
    /// Nudges the sync agent when new pending entries exist.
    pub sync_notify: Notify,
    /// Broadcast channel for alert lifecycle events.
    pub alerts_tx: broadcast::Sender<Alert>,
    /// Shutdown signaling.
    pub shutdown: ShutdownState,
}

impl AppState {
    /// Create application state.
    pub fn new(
        ledger: Ledger,
        config: Config,
        sampler: Arc<dyn SensorSampler>,
        driver: Arc<dyn ActuatorDriver>,
    ) -> Arc<Self> {
        let now = OffsetDateTime::now_utc();
        let policy = OverridePolicy {
            expiry: config.control.override_expiry(),
        };
        let bank = ActuatorBank::new(driver, config.actuator_names(), policy, now);
        let (alerts_tx, _) = broadcast::channel(64);

        Arc::new(Self {
            device_id: config.device.id.clone(),
            mode: RwLock::new(config.control.mode),
            automation: AtomicBool::new(config.control.automation),
            config: RwLock::new(config),
            ledger: Mutex::new(ledger),
            bank,
            sampler,
            sync_notify: Notify::new(),
            alerts_tx,
            shutdown: ShutdownState::new(),
        })
    }

    /// Whether automatic control is enabled.
    pub fn automation_enabled(&self) -> bool {
        self.automation.load(Ordering::SeqCst)
    }

    /// Enable or disable automatic control.
    pub fn set_automation(&self, enabled: bool) {
        self.automation.store(enabled, Ordering::SeqCst);
        info!(enabled, "automation toggled");
    }

    /// Recover state after startup, before the first tick.
    ///
    /// Requeues entries a previous run left in flight, replays actuator
    /// changes past the checkpoint, and reapplies the reconstructed states
    /// to the hardware. A reinitialized (previously corrupt) ledger is
    /// surfaced as a critical alert with the presumed loss count.
    pub async fn recover(&self, report: Option<&RecoveryReport>) -> Result<(), AgentError> {
        let now = OffsetDateTime::now_utc();

        let replayed = {
            let ledger = self.ledger.lock().await;
            let requeued = ledger.requeue_in_flight()?;
            if requeued > 0 {
                self.sync_notify.notify_one();
            }
            ledger.replay_actuator_state()?
        };

        if !replayed.is_empty() {
            self.bank.restore(&replayed, now).await?;
        }

        if let Some(report) = report.filter(|r| r.reinitialized) {
            warn!(
                entries_lost = report.entries_lost,
                "ledger was reinitialized after corruption"
            );
            let candidate = AlertCandidate {
                kind: AlertKind::StorageCorrupt,
                device_id: self.device_id.clone(),
                severity: AlertSeverity::Critical,
                trigger_value: report.entries_lost.map(|n| n as f64),
                threshold: None,
                observed_at: now,
            };
            self.raise_alert(&candidate).await?;
        }

        Ok(())
    }

    /// Run a candidate through the alert lifecycle, ledger it when
    /// announcable, and broadcast the resulting row.
    pub async fn raise_alert(&self, candidate: &AlertCandidate) -> Result<(), AgentError> {
        let cooldown = self.config.read().await.alerts.cooldown();
        let ledger = self.ledger.lock().await;
        let disposition = ledger.upsert_alert(candidate, cooldown)?;

        if disposition.is_announcable() {
            let alert = disposition.alert();
            // A full ledger must not stop the alert table update above;
            // the append is best-effort and its own failure is logged.
            if let Err(e) = ledger.append(EntityType::Alert, alert, candidate.observed_at) {
                warn!("could not ledger alert event: {e}");
            } else {
                self.sync_notify.notify_one();
            }
            let _ = self.alerts_tx.send(alert.clone());
        }
        Ok(())
    }
}

/// Shutdown signal shared by the control loop, sync agent, and server.
pub struct ShutdownState {
    stop_tx: watch::Sender<bool>,
    stop_rx: watch::Receiver<bool>,
}

impl ShutdownState {
    /// Create an un-signaled shutdown state.
    pub fn new() -> Self {
        let (stop_tx, stop_rx) = watch::channel(false);
        Self { stop_tx, stop_rx }
    }

    /// Get a receiver for the stop signal.
    pub fn subscribe(&self) -> watch::Receiver<bool> {
        self.stop_rx.clone()
    }

    /// Signal every task to stop.
    pub fn signal(&self) {
        let _ = self.stop_tx.send(true);
    }

    /// Whether stop has been signaled.
    pub fn is_stopped(&self) -> bool {
        *self.stop_rx.borrow()
    }
}

impl Default for ShutdownState {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use myco_control::{MockDriver, MockSampler};
    use myco_ledger::LedgerConfig;
    use myco_types::{ActuatorChange, TriggeredBy};

    fn state() -> Arc<AppState> {
        let ledger = Ledger::open_in_memory(LedgerConfig::default()).unwrap();
        AppState::new(
            ledger,
            Config::default(),
            Arc::new(MockSampler::new("chamber-1")),
            Arc::new(MockDriver::new()),
        )
    }

    #[tokio::test]
    async fn automation_toggle() {
        let state = state();
        assert!(state.automation_enabled());
        state.set_automation(false);
        assert!(!state.automation_enabled());
    }

    #[tokio::test]
    async fn shutdown_signal_reaches_subscribers() {
        let state = state();
        let rx = state.shutdown.subscribe();
        assert!(!*rx.borrow());
        state.shutdown.signal();
        assert!(*rx.borrow());
        assert!(state.shutdown.is_stopped());
    }

    #[tokio::test]
    async fn recover_replays_and_requeues() {
        let now = OffsetDateTime::now_utc();
        let ledger = Ledger::open_in_memory(LedgerConfig::default()).unwrap();

        // A change the previous run durably recorded but may not have
        // finished applying, plus an entry stuck in flight.
        let change = ActuatorChange {
            name: "exhaust_fan".to_string(),
            is_on: true,
            triggered_by: TriggeredBy::Auto,
            changed_at: now,
        };
        ledger
            .append(EntityType::ActuatorChange, &change, now)
            .unwrap();
        let stuck = ledger
            .append(EntityType::Reading, &serde_json::json!({}), now)
            .unwrap();
        {
            let mut l = ledger;
            l.claim_batch(10, now).unwrap();
            // Rebind for state construction below.
            let state = AppState::new(
                l,
                Config::default(),
                Arc::new(MockSampler::new("chamber-1")),
                Arc::new(MockDriver::new()),
            );
            state.recover(None).await.unwrap();

            let map = state.bank.current_map().await;
            assert_eq!(map.get("exhaust_fan"), Some(&true));

            let ledger = state.ledger.lock().await;
            let entry = ledger.entry(stuck).unwrap().unwrap();
            assert_eq!(entry.sync_status, myco_types::SyncStatus::Pending);
        }
    }

    #[tokio::test]
    async fn reinitialized_ledger_raises_critical_alert() {
        let state = state();
        let report = RecoveryReport {
            reinitialized: true,
            entries_lost: Some(17),
            sidelined_to: None,
        };
        let mut rx = state.alerts_tx.subscribe();
        state.recover(Some(&report)).await.unwrap();

        let alert = rx.recv().await.unwrap();
        assert_eq!(alert.kind, AlertKind::StorageCorrupt);
        assert_eq!(alert.severity, AlertSeverity::Critical);
        assert_eq!(alert.trigger_value, Some(17.0));
    }
}
