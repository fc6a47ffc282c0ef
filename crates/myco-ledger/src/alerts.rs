//! Alert lifecycle operations.
//!
//! The alerts table holds at most one open row per fingerprint. A breach
//! re-occurring while its alert is open refreshes `last_seen` instead of
//! creating a duplicate; once the parameter has stayed in range for the
//! configured period the alert auto-resolves without operator action.

use rusqlite::{OptionalExtension, params};
use time::OffsetDateTime;
use tracing::{debug, info};

use myco_types::{Alert, AlertCandidate, AlertKind, AlertSeverity};

use crate::error::{Error, Result};
use crate::store::Ledger;

/// What happened when a candidate met the alert table.
#[derive(Debug, Clone)]
pub enum AlertDisposition {
    /// No open alert existed; a new one was created.
    Opened(Alert),
    /// An open alert existed and the occurrence fell within its cooldown;
    /// only `last_seen` (and severity, if worse) moved.
    Refreshed(Alert),
    /// An open alert existed but the cooldown had lapsed; the alert was
    /// updated and is worth re-announcing.
    Reraised(Alert),
}

impl AlertDisposition {
    /// The alert row after the operation.
    #[must_use]
    pub fn alert(&self) -> &Alert {
        match self {
            AlertDisposition::Opened(a)
            | AlertDisposition::Refreshed(a)
            | AlertDisposition::Reraised(a) => a,
        }
    }

    /// Whether this occurrence should produce a new ledger event.
    ///
    /// Refreshes inside the cooldown stay local; opens and re-raises are
    /// synced upstream.
    #[must_use]
    pub fn is_announcable(&self) -> bool {
        !matches!(self, AlertDisposition::Refreshed(_))
    }
}

/// Filter for listing alerts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AlertFilter {
    /// Unresolved alerts.
    Open,
    /// Unresolved alerts an operator has acknowledged.
    Acknowledged,
    /// Resolved alerts.
    Resolved,
    /// Everything.
    All,
}

impl Ledger {
    /// Record an alert occurrence, deduplicating against the open row.
    pub fn upsert_alert(
        &self,
        candidate: &AlertCandidate,
        cooldown: time::Duration,
    ) -> Result<AlertDisposition> {
        let fingerprint = candidate.fingerprint();

        let Some(existing) = self.open_alert(&fingerprint)? else {
            self.conn().execute(
                "INSERT INTO alerts (fingerprint, kind, device_id, severity, trigger_value,
                 threshold, acknowledged, resolved, first_seen, last_seen, in_range_since)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, 0, 0, ?7, ?7, NULL)",
                params![
                    fingerprint,
                    candidate.kind.as_str(),
                    candidate.device_id,
                    severity_str(candidate.severity),
                    candidate.trigger_value,
                    candidate.threshold,
                    candidate.observed_at.unix_timestamp(),
                ],
            )?;
            let alert = self
                .open_alert(&fingerprint)?
                .ok_or_else(|| Error::Corrupt {
                    message: format!("alert {fingerprint} vanished after insert"),
                })?;
            info!(fingerprint, severity = %alert.severity, "alert opened");
            return Ok(AlertDisposition::Opened(alert));
        };

        let within_cooldown =
            candidate.observed_at - existing.last_seen <= cooldown;
        let severity = existing.severity.max(candidate.severity);

        self.conn().execute(
            "UPDATE alerts SET last_seen = ?2, severity = ?3, trigger_value = ?4,
             threshold = ?5, in_range_since = NULL
             WHERE fingerprint = ?1 AND resolved = 0",
            params![
                fingerprint,
                candidate.observed_at.unix_timestamp(),
                severity_str(severity),
                candidate.trigger_value,
                candidate.threshold,
            ],
        )?;

        let alert = self
            .open_alert(&fingerprint)?
            .ok_or_else(|| Error::Corrupt {
                message: format!("alert {fingerprint} vanished after update"),
            })?;

        if within_cooldown {
            debug!(fingerprint, "alert refreshed within cooldown");
            Ok(AlertDisposition::Refreshed(alert))
        } else {
            info!(fingerprint, "alert re-raised after cooldown");
            Ok(AlertDisposition::Reraised(alert))
        }
    }

    /// Track that the condition behind `fingerprint` is currently absent.
    ///
    /// The first in-range observation starts the clock; once the condition
    /// has stayed absent for `resolve_after` the open alert is resolved
    /// and returned. Any re-occurrence resets the clock (see
    /// [`Ledger::upsert_alert`]).
    pub fn note_in_range(
        &self,
        fingerprint: &str,
        now: OffsetDateTime,
        resolve_after: time::Duration,
    ) -> Result<Option<Alert>> {
        let Some(alert) = self.open_alert(fingerprint)? else {
            return Ok(None);
        };

        let in_range_since: Option<i64> = self.conn().query_row(
            "SELECT in_range_since FROM alerts WHERE fingerprint = ?1 AND resolved = 0",
            [fingerprint],
            |row| row.get(0),
        )?;

        match in_range_since {
            None => {
                self.conn().execute(
                    "UPDATE alerts SET in_range_since = ?2
                     WHERE fingerprint = ?1 AND resolved = 0",
                    params![fingerprint, now.unix_timestamp()],
                )?;
                Ok(None)
            }
            Some(since) => {
                let since = OffsetDateTime::from_unix_timestamp(since).map_err(|e| {
                    Error::Corrupt {
                        message: format!("alert in_range_since: {e}"),
                    }
                })?;
                if now - since >= resolve_after {
                    self.conn().execute(
                        "UPDATE alerts SET resolved = 1
                         WHERE fingerprint = ?1 AND resolved = 0",
                        [fingerprint],
                    )?;
                    info!(fingerprint, "alert auto-resolved");
                    Ok(Some(Alert {
                        resolved: true,
                        ..alert
                    }))
                } else {
                    Ok(None)
                }
            }
        }
    }

    /// Mark the open alert with this fingerprint as acknowledged.
    ///
    /// Returns whether an open alert existed.
    pub fn acknowledge_alert(&self, fingerprint: &str) -> Result<bool> {
        let updated = self.conn().execute(
            "UPDATE alerts SET acknowledged = 1 WHERE fingerprint = ?1 AND resolved = 0",
            [fingerprint],
        )?;
        Ok(updated > 0)
    }

    /// The open alert with this fingerprint, if any.
    pub fn open_alert(&self, fingerprint: &str) -> Result<Option<Alert>> {
        let mut stmt = self.conn().prepare(
            "SELECT fingerprint, kind, device_id, severity, trigger_value, threshold,
             acknowledged, resolved, first_seen, last_seen
             FROM alerts WHERE fingerprint = ?1 AND resolved = 0",
        )?;
        let alert = stmt.query_row([fingerprint], row_to_alert).optional()?;
        Ok(alert)
    }

    /// List alerts matching the filter, most recently seen first.
    pub fn list_alerts(&self, filter: AlertFilter) -> Result<Vec<Alert>> {
        let where_clause = match filter {
            AlertFilter::Open => "WHERE resolved = 0",
            AlertFilter::Acknowledged => "WHERE resolved = 0 AND acknowledged = 1",
            AlertFilter::Resolved => "WHERE resolved = 1",
            AlertFilter::All => "",
        };
        let sql = format!(
            "SELECT fingerprint, kind, device_id, severity, trigger_value, threshold,
             acknowledged, resolved, first_seen, last_seen
             FROM alerts {where_clause} ORDER BY last_seen DESC"
        );

        let mut stmt = self.conn().prepare(&sql)?;
        let alerts = stmt
            .query_map([], row_to_alert)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(alerts)
    }
}

fn severity_str(severity: AlertSeverity) -> &'static str {
    match severity {
        AlertSeverity::Low => "low",
        AlertSeverity::Medium => "medium",
        AlertSeverity::High => "high",
        AlertSeverity::Critical => "critical",
    }
}

fn parse_severity(s: &str) -> AlertSeverity {
    match s {
        "low" => AlertSeverity::Low,
        "medium" => AlertSeverity::Medium,
        "critical" => AlertSeverity::Critical,
        _ => AlertSeverity::High,
    }
}

fn row_to_alert(row: &rusqlite::Row<'_>) -> rusqlite::Result<Alert> {
    let kind: String = row.get(1)?;
    Ok(Alert {
        fingerprint: row.get(0)?,
        kind: AlertKind::parse(&kind).unwrap_or(AlertKind::SensorStale),
        device_id: row.get(2)?,
        severity: parse_severity(&row.get::<_, String>(3)?),
        trigger_value: row.get(4)?,
        threshold: row.get(5)?,
        acknowledged: row.get::<_, i64>(6)? != 0,
        resolved: row.get::<_, i64>(7)? != 0,
        first_seen: OffsetDateTime::from_unix_timestamp(row.get(8)?).map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(
                8,
                rusqlite::types::Type::Integer,
                Box::new(e),
            )
        })?,
        last_seen: OffsetDateTime::from_unix_timestamp(row.get(9)?).map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(
                9,
                rusqlite::types::Type::Integer,
                Box::new(e),
            )
        })?,
    })
}
