//! The sync agent.
//!
//! Drains pending ledger entries to the remote boundary on a fixed
//! interval, or sooner when the control loop appends something new. Runs
//! independently of the control tick and never blocks it: the ledger lock
//! is held for single statements and never across a network call.

use std::time::Duration;

use time::OffsetDateTime;
use tracing::{debug, error, info, warn};

use myco_types::{AlertCandidate, AlertKind, AlertSeverity, SyncItem, fingerprint};

use crate::remote::{SyncError, SyncTransport};
use crate::state::{AgentError, AppState};

/// Counters for one sync cycle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SyncCycle {
    /// Entries claimed into the batch.
    pub claimed: usize,
    /// Entries acknowledged by the remote.
    pub synced: usize,
    /// Entries returned to pending with backoff.
    pub retried: usize,
    /// Entries permanently failed.
    pub failed: usize,
}

/// Background agent reconciling the ledger against the remote store.
pub struct SyncAgent<T> {
    state: std::sync::Arc<AppState>,
    transport: T,
}

impl<T: SyncTransport> SyncAgent<T> {
    /// Create a sync agent over a transport.
    pub fn new(state: std::sync::Arc<AppState>, transport: T) -> Self {
        Self { state, transport }
    }

    /// Run cycles until shutdown, then drain within the grace period.
    pub async fn run(self) {
        let (interval_secs, grace_secs) = {
            let config = self.state.config.read().await;
            (config.sync.interval_secs, config.sync.shutdown_grace_secs)
        };
        let mut interval = tokio::time::interval(Duration::from_secs(interval_secs.max(1)));
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        let mut stop = self.state.shutdown.subscribe();

        info!(interval_secs, "sync agent started");
        loop {
            tokio::select! {
                _ = interval.tick() => {}
                _ = self.state.sync_notify.notified() => {
                    debug!("sync agent nudged by new pending entries");
                }
                _ = stop.changed() => {
                    if *stop.borrow() {
                        break;
                    }
                }
            }
            if self.state.shutdown.is_stopped() {
                break;
            }

            if let Err(e) = self.sync_once(OffsetDateTime::now_utc()).await {
                error!("sync cycle failed: {e}");
            }
        }

        // Bounded grace for a final drain; anything still marked syncing
        // afterwards is requeued on the next startup.
        let grace = Duration::from_secs(grace_secs);
        info!(grace_secs, "sync agent draining before shutdown");
        match tokio::time::timeout(grace, self.sync_once(OffsetDateTime::now_utc())).await {
            Ok(Ok(cycle)) if cycle.claimed > 0 => {
                info!(synced = cycle.synced, "final drain finished");
            }
            Ok(Ok(_)) => {}
            Ok(Err(e)) => warn!("final drain failed: {e}"),
            Err(_) => warn!("final drain exceeded the grace period"),
        }
        info!("sync agent stopped");
    }

    /// Claim one batch, submit it, and apply the per-item verdicts.
    ///
    /// Partial success is the normal case: one entry's permanent failure
    /// neither blocks nor rolls back another's acknowledgement.
    pub async fn sync_once(&self, now: OffsetDateTime) -> Result<SyncCycle, AgentError> {
        let (batch_size, initial_backoff, max_backoff, alert_threshold) = {
            let config = self.state.config.read().await;
            (
                config.sync.batch_size,
                Duration::from_secs(config.sync.initial_backoff_secs),
                Duration::from_secs(config.sync.max_backoff_secs),
                config.sync.retry_alert_threshold,
            )
        };

        let entries = {
            let mut ledger = self.state.ledger.lock().await;
            ledger.claim_batch(batch_size, now)?
        };
        if entries.is_empty() {
            return Ok(SyncCycle::default());
        }

        let items: Vec<SyncItem> = entries.iter().map(SyncItem::from).collect();
        let mut cycle = SyncCycle {
            claimed: entries.len(),
            ..SyncCycle::default()
        };
        let mut alerts: Vec<AlertCandidate> = Vec::new();

        match self.transport.submit(&items).await {
            Ok(outcomes) => {
                let by_id: std::collections::HashMap<_, _> =
                    outcomes.into_iter().map(|o| (o.local_id, o)).collect();

                let ledger = self.state.ledger.lock().await;
                for entry in &entries {
                    match by_id.get(&entry.local_id) {
                        Some(outcome)
                            if outcome.status == myco_types::SyncItemStatus::Accepted =>
                        {
                            ledger.mark_synced(entry.local_id, outcome.backend_id.as_deref())?;
                            cycle.synced += 1;
                        }
                        Some(outcome) if outcome.is_permanent_rejection() => {
                            ledger.mark_failed(entry.local_id)?;
                            cycle.failed += 1;
                            warn!(
                                local_id = %entry.local_id,
                                code = outcome.error_code,
                                "entry permanently rejected by remote"
                            );
                            alerts.push(rejected_alert(&self.state.device_id, now));
                        }
                        // Transient rejection, or the remote did not answer
                        // for this item at all.
                        _ => {
                            let delay =
                                backoff_delay(entry.retry_count, initial_backoff, max_backoff);
                            let count =
                                ledger.mark_retry(entry.local_id, now + delay)?;
                            cycle.retried += 1;
                            if count == alert_threshold {
                                alerts.push(stalled_alert(&self.state.device_id, count, now));
                            }
                        }
                    }
                }
            }
            Err(e) => {
                let ledger = self.state.ledger.lock().await;
                for entry in &entries {
                    let delay = backoff_delay(entry.retry_count, initial_backoff, max_backoff);
                    let count = ledger.mark_retry(entry.local_id, now + delay)?;
                    cycle.retried += 1;
                    if count == alert_threshold {
                        alerts.push(stalled_alert(&self.state.device_id, count, now));
                    }
                }
                match e {
                    SyncError::Transient(msg) => {
                        debug!("batch transiently failed: {msg}");
                    }
                    SyncError::Permanent(msg) => {
                        // An endpoint-level rejection is a configuration or
                        // deployment problem; terminally failing the data
                        // would throw it away for nothing. Surface loudly,
                        // keep retrying.
                        error!("endpoint rejected the batch: {msg}");
                        alerts.push(stalled_alert(&self.state.device_id, 0, now));
                    }
                }
            }
        }

        for candidate in alerts {
            if let Err(e) = self.state.raise_alert(&candidate).await {
                error!("could not raise sync alert: {e}");
            }
        }

        if cycle != SyncCycle::default() {
            debug!(
                claimed = cycle.claimed,
                synced = cycle.synced,
                retried = cycle.retried,
                failed = cycle.failed,
                "sync cycle finished"
            );
        }

        // A sustained run of cycles without stalls lets the stalled-sync
        // alert resolve itself.
        if cycle.retried == 0 && cycle.failed == 0 {
            let resolve_after = self.state.config.read().await.alerts.resolve_after();
            let ledger = self.state.ledger.lock().await;
            let fp = fingerprint(AlertKind::SyncStalled, &self.state.device_id);
            if let Err(e) = ledger.note_in_range(&fp, now, resolve_after) {
                warn!("could not track sync recovery: {e}");
            }
        }

        Ok(cycle)
    }
}

fn stalled_alert(device_id: &str, retries: u32, now: OffsetDateTime) -> AlertCandidate {
    AlertCandidate {
        kind: AlertKind::SyncStalled,
        device_id: device_id.to_string(),
        severity: AlertSeverity::Medium,
        trigger_value: Some(f64::from(retries)),
        threshold: None,
        observed_at: now,
    }
}

fn rejected_alert(device_id: &str, now: OffsetDateTime) -> AlertCandidate {
    AlertCandidate {
        kind: AlertKind::SyncRejected,
        device_id: device_id.to_string(),
        severity: AlertSeverity::High,
        trigger_value: None,
        threshold: None,
        observed_at: now,
    }
}

/// Exponential backoff with a cap and up to 25% jitter.
fn backoff_delay(retry_count: u32, initial: Duration, max: Duration) -> time::Duration {
    use rand::Rng;

    let exp = initial.as_secs_f64() * 2f64.powi(retry_count.min(16) as i32);
    let capped = exp.min(max.as_secs_f64());
    let jittered = capped * (1.0 + rand::rng().random::<f64>() * 0.25);
    time::Duration::seconds_f64(jittered.min(max.as_secs_f64() * 1.25))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_grows_and_caps() {
        let initial = Duration::from_secs(2);
        let max = Duration::from_secs(300);

        let d0 = backoff_delay(0, initial, max);
        let d3 = backoff_delay(3, initial, max);
        let d20 = backoff_delay(20, initial, max);

        // 2s, 16s, capped — each within its jitter envelope.
        assert!(d0 >= time::Duration::seconds(2) && d0 <= time::Duration::seconds_f64(2.5));
        assert!(d3 >= time::Duration::seconds(16) && d3 <= time::Duration::seconds_f64(20.0));
        assert!(d20 >= time::Duration::seconds(300));
        assert!(d20 <= time::Duration::seconds_f64(375.0));
    }
}
