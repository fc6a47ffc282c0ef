//! The periodic control tick.
//!
//! One tick runs sample -> decide -> ledger append -> apply, sequentially
//! and to completion; ticks never overlap. Every state-changing step is
//! appended to the ledger *before* its side effect is performed, which is
//! what makes the loop crash-safe: on restart the ledger replay
//! reconstructs actuator state without consulting the remote backend.

use std::time::Duration;

use serde::Serialize;
use time::OffsetDateTime;
use tracing::{debug, error, info, warn};

use myco_control::{AlertEvaluator, ControlEngine};
use myco_types::{
    AlertCandidate, AlertKind, AlertSeverity, EntityType, Reading, ThresholdBand, TriggeredBy,
    fingerprint,
};

use crate::state::AppState;

/// Drive ticks until shutdown is signaled.
///
/// The current tick always finishes; the stop signal is only observed
/// between ticks.
pub async fn run_control_loop(state: std::sync::Arc<AppState>) {
    let tick_secs = state.config.read().await.control.tick_interval_secs;
    let mut interval = tokio::time::interval(Duration::from_secs(tick_secs));
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    let mut stop = state.shutdown.subscribe();

    info!(interval_secs = tick_secs, "control loop started");
    loop {
        tokio::select! {
            _ = interval.tick() => {
                run_tick(&state).await;
            }
            _ = stop.changed() => {
                if *stop.borrow() {
                    info!("control loop stopping");
                    break;
                }
            }
        }
    }
}

/// Execute exactly one control tick.
///
/// Failures inside a tick (sensor faults, a full ledger, a driver error)
/// are recovered locally: logged, alerted on, and the loop carries on.
/// Nothing here ever panics the process.
pub async fn run_tick(state: &AppState) {
    if !state.automation_enabled() {
        debug!("automation disabled; tick skipped");
        return;
    }

    let now = OffsetDateTime::now_utc();

    let readings = match state.sampler.sample().await {
        Ok(readings) => readings,
        Err(e) => {
            warn!("sampler failed: {e}; holding actuator states");
            let candidate = AlertCandidate {
                kind: AlertKind::SensorStale,
                device_id: state.device_id.to_string(),
                severity: AlertSeverity::High,
                trigger_value: None,
                threshold: None,
                observed_at: now,
            };
            if let Err(e) = state.raise_alert(&candidate).await {
                error!("could not raise sampler alert: {e}");
            }
            return;
        }
    };

    let (mode, thresholds, staleness, resolve_after) = {
        let config = state.config.read().await;
        let mode = *state.mode.read().await;
        (
            mode,
            config.thresholds.for_mode(mode).clone(),
            config.control.staleness_limit(),
            config.alerts.resolve_after(),
        )
    };

    let engine = ControlEngine::new(staleness);
    let evaluator = AlertEvaluator::new();
    let mut current = state.bank.current_map().await;
    let mut all_actionable = !readings.is_empty();

    for reading in &readings {
        append_entry(state, EntityType::Reading, reading, now).await;

        let decision = engine.decide(reading, mode, &thresholds, &current, now);
        for reason in &decision.reasoning {
            debug!(kind = %reading.kind, "{reason}");
        }
        append_entry(state, EntityType::Decision, &decision, now).await;

        let band = thresholds.band(reading.kind);
        let safety = band.is_some_and(|b| {
            reading.is_actionable(now, staleness) && reading.value > b.critical_max
        });

        for (name, &on) in &decision.actions {
            // A manual override outlasts automatic decisions, but never a
            // safety override.
            if !safety && state.bank.overridden(name, now).await {
                info!(actuator = name, "manual override in force; skipping automatic change");
                continue;
            }

            match state.bank.plan(name, on, TriggeredBy::Auto, now).await {
                Ok(Some(change)) => {
                    // Write-ahead: durably record the intent, then act.
                    append_entry(state, EntityType::ActuatorChange, &change, now).await;
                    match state.bank.apply(&change).await {
                        Ok(()) => {
                            current.insert(name.clone(), on);
                        }
                        Err(e) => {
                            warn!("could not apply {name}: {e}; recovery will reattempt");
                        }
                    }
                }
                Ok(None) => {}
                Err(e) => warn!("could not plan change for {name}: {e}"),
            }
        }

        all_actionable &= reading.is_actionable(now, staleness);
        evaluate_alerts(state, &evaluator, reading, band, now, staleness, resolve_after).await;
    }

    // The staleness alert is per device; it only starts recovering once
    // every sensor is actionable again.
    if all_actionable {
        note_in_range(
            state,
            &fingerprint(AlertKind::SensorStale, &state.device_id),
            now,
            resolve_after,
        )
        .await;
    }

    // The checkpoint marks everything up to here as applied; replay after
    // a crash starts from this snapshot.
    let applied = state.bank.current_map().await;
    {
        let ledger = state.ledger.lock().await;
        if let Err(e) = ledger.save_checkpoint(&applied, now) {
            error!("could not save checkpoint: {e}");
        }
    }

    state.sync_notify.notify_one();
}

/// Run the alert lifecycle for one reading.
async fn evaluate_alerts(
    state: &AppState,
    evaluator: &AlertEvaluator,
    reading: &Reading,
    band: Option<&ThresholdBand>,
    now: OffsetDateTime,
    staleness: time::Duration,
    resolve_after: time::Duration,
) {
    if !reading.is_actionable(now, staleness) {
        let candidate = evaluator.stale_candidate(reading, now);
        if let Err(e) = state.raise_alert(&candidate).await {
            error!("could not raise stale alert: {e}");
        }
        return;
    }

    let Some(band) = band else {
        return;
    };

    if let Some(candidate) = evaluator.evaluate(reading, band, now) {
        let breached_high = reading.value > band.max;
        if let Err(e) = state.raise_alert(&candidate).await {
            error!("could not raise breach alert: {e}");
        }
        // The opposite side of the band is necessarily in range.
        let opposite = AlertKind::breach(reading.kind, !breached_high);
        note_in_range(
            state,
            &fingerprint(opposite, &reading.device_id),
            now,
            resolve_after,
        )
        .await;
    } else {
        for high in [true, false] {
            let kind = AlertKind::breach(reading.kind, high);
            note_in_range(state, &fingerprint(kind, &reading.device_id), now, resolve_after)
                .await;
        }
    }
}

/// Track an absent condition and announce its resolution when sustained.
async fn note_in_range(
    state: &AppState,
    alert_fingerprint: &str,
    now: OffsetDateTime,
    resolve_after: time::Duration,
) {
    let resolved = {
        let ledger = state.ledger.lock().await;
        match ledger.note_in_range(alert_fingerprint, now, resolve_after) {
            Ok(resolved) => resolved,
            Err(e) => {
                error!("could not track recovery for {alert_fingerprint}: {e}");
                None
            }
        }
    };

    if let Some(alert) = resolved {
        append_entry(state, EntityType::Alert, &alert, now).await;
        let _ = state.alerts_tx.send(alert);
    }
}

/// Append an event to the ledger, escalating a full ledger to a critical
/// data-at-risk alert instead of silently dropping the event.
async fn append_entry<T: Serialize>(
    state: &AppState,
    entity_type: EntityType,
    payload: &T,
    now: OffsetDateTime,
) -> bool {
    let result = {
        let ledger = state.ledger.lock().await;
        ledger.append(entity_type, payload, now)
    };

    match result {
        Ok(_) => true,
        Err(myco_ledger::Error::Full { unsynced }) => {
            error!("ledger full with {unsynced} unsynced entries; data at risk");
            let candidate = AlertCandidate {
                kind: AlertKind::StorageFull,
                device_id: state.device_id.to_string(),
                severity: AlertSeverity::Critical,
                trigger_value: Some(unsynced as f64),
                threshold: None,
                observed_at: now,
            };
            if let Err(e) = state.raise_alert(&candidate).await {
                error!("could not raise storage alert: {e}");
            }
            false
        }
        Err(e) => {
            error!("ledger append failed: {e}");
            false
        }
    }
}
