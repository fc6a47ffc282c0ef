//! Main ledger implementation.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use rusqlite::{Connection, OptionalExtension, params};
use time::OffsetDateTime;
use tracing::{debug, info, warn};
use uuid::Uuid;

use myco_types::{ActuatorChange, Decision, EntityType, LedgerEntry, SyncStatus};

use crate::error::{Error, Result};
use crate::schema;

/// Capacity and retention settings for a ledger.
#[derive(Debug, Clone)]
pub struct LedgerConfig {
    /// Maximum number of rows before appends start purging.
    pub max_entries: u64,
    /// Synced rows older than this are eligible for purging.
    pub retention: time::Duration,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            max_entries: 50_000,
            retention: time::Duration::days(7),
        }
    }
}

/// Per-status row counts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Serialize)]
pub struct StatusCounts {
    /// Rows waiting to sync.
    pub pending: u64,
    /// Rows claimed by an in-flight batch.
    pub syncing: u64,
    /// Rows acknowledged by the remote.
    pub synced: u64,
    /// Rows permanently rejected.
    pub failed: u64,
}

/// Outcome of opening a ledger that may have been corrupted.
#[derive(Debug, Clone)]
pub struct RecoveryReport {
    /// Whether the database had to be reinitialized.
    pub reinitialized: bool,
    /// How many entries were presumed lost, when countable.
    pub entries_lost: Option<u64>,
    /// Where the corrupt file was sidelined to.
    pub sidelined_to: Option<PathBuf>,
}

impl RecoveryReport {
    fn clean() -> Self {
        Self {
            reinitialized: false,
            entries_lost: None,
            sidelined_to: None,
        }
    }
}

/// SQLite-backed durable ledger.
///
/// The ledger is the single source of truth for "has this event been sent
/// upstream" and the write-ahead log that makes the control loop
/// crash-safe: state-changing actions are appended here before their side
/// effects are performed.
pub struct Ledger {
    conn: Connection,
    config: LedgerConfig,
}

impl Ledger {
    /// Open or create a ledger database at the given path.
    pub fn open<P: AsRef<Path>>(path: P, config: LedgerConfig) -> Result<Self> {
        let path = path.as_ref();

        if let Some(parent) = path.parent() {
            if !parent.exists() {
                std::fs::create_dir_all(parent).map_err(|e| Error::CreateDirectory {
                    path: parent.to_path_buf(),
                    source: e,
                })?;
            }
        }

        info!("opening ledger at {}", path.display());
        let conn = Connection::open(path)?;

        conn.execute_batch(
            "PRAGMA foreign_keys = ON;
             PRAGMA journal_mode = WAL;
             PRAGMA synchronous = NORMAL;",
        )?;

        schema::initialize(&conn)?;

        Ok(Self { conn, config })
    }

    /// Open, recovering from corruption by sidelining the bad file and
    /// starting fresh.
    ///
    /// The returned report says whether a reinitialization happened and
    /// how many entries were presumed lost. Losses are fatal to that data,
    /// not to the process; callers surface them rather than swallow them.
    pub fn open_with_recovery<P: AsRef<Path>>(
        path: P,
        config: LedgerConfig,
    ) -> Result<(Self, RecoveryReport)> {
        let path = path.as_ref();

        match Self::open(path, config.clone()).and_then(|l| {
            l.integrity_check()?;
            Ok(l)
        }) {
            Ok(ledger) => Ok((ledger, RecoveryReport::clean())),
            Err(e) => {
                warn!("ledger at {} unusable ({e}); reinitializing", path.display());

                // Best-effort loss count before the file is sidelined.
                let entries_lost = Connection::open(path)
                    .ok()
                    .and_then(|c| {
                        c.query_row("SELECT COUNT(*) FROM ledger", [], |row| row.get::<_, u64>(0))
                            .ok()
                    });

                let sidelined = sideline_path(path);
                std::fs::rename(path, &sidelined)?;
                // WAL sidecars would otherwise be replayed into the fresh file.
                for suffix in ["-wal", "-shm"] {
                    let mut sidecar = path.as_os_str().to_owned();
                    sidecar.push(suffix);
                    let _ = std::fs::remove_file(PathBuf::from(sidecar));
                }

                let ledger = Self::open(path, config)?;
                match entries_lost {
                    Some(lost) => warn!(
                        "ledger reinitialized; {lost} entries presumed lost (sidelined to {})",
                        sidelined.display()
                    ),
                    None => warn!(
                        "ledger reinitialized; loss count unreadable (sidelined to {})",
                        sidelined.display()
                    ),
                }
                Ok((
                    ledger,
                    RecoveryReport {
                        reinitialized: true,
                        entries_lost,
                        sidelined_to: Some(sidelined),
                    },
                ))
            }
        }
    }

    /// Open an in-memory ledger (for testing).
    pub fn open_in_memory(config: LedgerConfig) -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        schema::initialize(&conn)?;
        Ok(Self { conn, config })
    }

    /// Run SQLite's integrity check.
    pub fn integrity_check(&self) -> Result<()> {
        let verdict: String =
            self.conn
                .query_row("PRAGMA integrity_check", [], |row| row.get(0))?;
        if verdict == "ok" {
            Ok(())
        } else {
            Err(Error::Corrupt { message: verdict })
        }
    }

    // === Append path ===

    /// Append an event, serialized as the entry payload.
    ///
    /// Runs the capacity check first: at capacity, synced rows older than
    /// the retention window are purged automatically. Pending and syncing
    /// rows are never purged; if they alone keep the ledger full, the
    /// append fails with [`Error::Full`] so the caller can escalate.
    pub fn append<T: serde::Serialize>(
        &self,
        entity_type: EntityType,
        payload: &T,
        now: OffsetDateTime,
    ) -> Result<Uuid> {
        self.ensure_capacity(now)?;

        let entry = LedgerEntry::new(entity_type, serde_json::to_value(payload)?, now);
        self.conn.execute(
            "INSERT INTO ledger (local_id, entity_type, payload, sync_status, retry_count,
             next_retry_at, backend_id, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                entry.local_id.to_string(),
                entry.entity_type.as_str(),
                entry.payload.to_string(),
                entry.sync_status.as_str(),
                entry.retry_count,
                Option::<i64>::None,
                Option::<String>::None,
                entry.created_at.unix_timestamp(),
            ],
        )?;

        debug!(local_id = %entry.local_id, entity = %entity_type, "appended ledger entry");
        Ok(entry.local_id)
    }

    fn ensure_capacity(&self, now: OffsetDateTime) -> Result<()> {
        let total = self.count_all()?;
        if total < self.config.max_entries {
            return Ok(());
        }

        let cutoff = now - self.config.retention;
        let purged = self.purge_synced(cutoff)?;
        if purged > 0 {
            info!("ledger at capacity: purged {purged} synced entries older than retention");
        }

        if self.count_all()? >= self.config.max_entries {
            let counts = self.counts()?;
            return Err(Error::Full {
                unsynced: counts.pending + counts.syncing,
            });
        }
        Ok(())
    }

    /// Delete synced rows created before `older_than`.
    ///
    /// Pending, syncing, and failed rows are untouched: unsynced data is
    /// never dropped, and failed rows stay visible for inspection.
    pub fn purge_synced(&self, older_than: OffsetDateTime) -> Result<u64> {
        let purged = self.conn.execute(
            "DELETE FROM ledger WHERE sync_status = 'synced' AND created_at < ?1",
            [older_than.unix_timestamp()],
        )?;
        Ok(purged as u64)
    }

    // === Query path ===

    /// Fetch one entry by id.
    pub fn entry(&self, local_id: Uuid) -> Result<Option<LedgerEntry>> {
        let mut stmt = self.conn.prepare(
            "SELECT local_id, entity_type, payload, sync_status, retry_count,
             next_retry_at, backend_id, created_at
             FROM ledger WHERE local_id = ?1",
        )?;
        let entry = stmt
            .query_row([local_id.to_string()], row_to_entry)
            .optional()?;
        Ok(entry)
    }

    /// All entries with the given status, oldest first.
    pub fn query_by_status(
        &self,
        status: SyncStatus,
        limit: Option<u64>,
    ) -> Result<Vec<LedgerEntry>> {
        let mut sql = String::from(
            "SELECT local_id, entity_type, payload, sync_status, retry_count,
             next_retry_at, backend_id, created_at
             FROM ledger WHERE sync_status = ?1 ORDER BY created_at ASC",
        );
        if let Some(limit) = limit {
            sql.push_str(&format!(" LIMIT {limit}"));
        }

        let mut stmt = self.conn.prepare(&sql)?;
        let entries = stmt
            .query_map([status.as_str()], row_to_entry)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(entries)
    }

    /// Per-status row counts.
    pub fn counts(&self) -> Result<StatusCounts> {
        let mut stmt = self
            .conn
            .prepare("SELECT sync_status, COUNT(*) FROM ledger GROUP BY sync_status")?;
        let mut counts = StatusCounts::default();
        let rows = stmt.query_map([], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, u64>(1)?))
        })?;
        for row in rows {
            let (status, count) = row?;
            match SyncStatus::parse(&status) {
                Some(SyncStatus::Pending) => counts.pending = count,
                Some(SyncStatus::Syncing) => counts.syncing = count,
                Some(SyncStatus::Synced) => counts.synced = count,
                Some(SyncStatus::Failed) => counts.failed = count,
                None => warn!("unknown sync_status '{status}' in ledger"),
            }
        }
        Ok(counts)
    }

    fn count_all(&self) -> Result<u64> {
        let count: u64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM ledger", [], |row| row.get(0))?;
        Ok(count)
    }

    /// Decode the most recent decisions, newest first.
    pub fn recent_decisions(&self, limit: u64) -> Result<Vec<Decision>> {
        let mut stmt = self.conn.prepare(
            "SELECT payload FROM ledger WHERE entity_type = 'decision'
             ORDER BY created_at DESC, rowid DESC LIMIT ?1",
        )?;
        let payloads = stmt
            .query_map([limit], |row| row.get::<_, String>(0))?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        let mut decisions = Vec::with_capacity(payloads.len());
        for payload in payloads {
            decisions.push(serde_json::from_str(&payload)?);
        }
        Ok(decisions)
    }

    // === Sync lifecycle ===

    /// Claim up to `limit` due pending entries for an outgoing batch,
    /// transitioning them to syncing.
    ///
    /// An entry is due when it has no `next_retry_at` or its backoff has
    /// elapsed. Claimed entries are returned oldest first.
    pub fn claim_batch(&mut self, limit: u64, now: OffsetDateTime) -> Result<Vec<LedgerEntry>> {
        let tx = self.conn.transaction()?;
        let mut entries = {
            let mut stmt = tx.prepare(
                "SELECT local_id, entity_type, payload, sync_status, retry_count,
                 next_retry_at, backend_id, created_at
                 FROM ledger
                 WHERE sync_status = 'pending'
                   AND (next_retry_at IS NULL OR next_retry_at <= ?1)
                 ORDER BY created_at ASC LIMIT ?2",
            )?;
            stmt.query_map(params![now.unix_timestamp(), limit], row_to_entry)?
                .collect::<std::result::Result<Vec<_>, _>>()?
        };

        for entry in &mut entries {
            tx.execute(
                "UPDATE ledger SET sync_status = 'syncing' WHERE local_id = ?1",
                [entry.local_id.to_string()],
            )?;
            entry.sync_status = SyncStatus::Syncing;
        }
        tx.commit()?;

        if !entries.is_empty() {
            debug!(count = entries.len(), "claimed batch for sync");
        }
        Ok(entries)
    }

    /// Move an entry to a new sync status, enforcing the lifecycle.
    ///
    /// `backend_id` is recorded on the first transition to synced and
    /// never overwritten afterwards.
    pub fn update_sync_status(
        &self,
        local_id: Uuid,
        new_status: SyncStatus,
        backend_id: Option<&str>,
    ) -> Result<()> {
        let current = self
            .entry(local_id)?
            .ok_or(Error::EntryNotFound(local_id))?;

        if !current.sync_status.can_transition_to(new_status) {
            return Err(Error::InvalidTransition {
                local_id,
                from: current.sync_status,
                to: new_status,
            });
        }

        // backend_id is immutable once set: COALESCE keeps the existing
        // value and only fills NULL.
        self.conn.execute(
            "UPDATE ledger SET sync_status = ?2, backend_id = COALESCE(backend_id, ?3)
             WHERE local_id = ?1",
            params![local_id.to_string(), new_status.as_str(), backend_id],
        )?;
        Ok(())
    }

    /// Acknowledge an entry: syncing -> synced, with its remote id.
    pub fn mark_synced(&self, local_id: Uuid, backend_id: Option<&str>) -> Result<()> {
        self.update_sync_status(local_id, SyncStatus::Synced, backend_id)
    }

    /// Return an entry to pending after a transient failure, bumping its
    /// retry count and recording when the next attempt may run.
    pub fn mark_retry(&self, local_id: Uuid, next_retry_at: OffsetDateTime) -> Result<u32> {
        self.update_sync_status(local_id, SyncStatus::Pending, None)?;
        self.conn.execute(
            "UPDATE ledger SET retry_count = retry_count + 1, next_retry_at = ?2
             WHERE local_id = ?1",
            params![local_id.to_string(), next_retry_at.unix_timestamp()],
        )?;
        let retry_count: u32 = self.conn.query_row(
            "SELECT retry_count FROM ledger WHERE local_id = ?1",
            [local_id.to_string()],
            |row| row.get(0),
        )?;
        Ok(retry_count)
    }

    /// Permanently fail an entry: syncing -> failed, terminal.
    pub fn mark_failed(&self, local_id: Uuid) -> Result<()> {
        self.update_sync_status(local_id, SyncStatus::Failed, None)
    }

    /// Return every in-flight entry to pending.
    ///
    /// Run at startup: a crash may have left entries claimed but
    /// unacknowledged. Re-submission is safe because the remote
    /// deduplicates on `local_id`.
    pub fn requeue_in_flight(&self) -> Result<u64> {
        let requeued = self.conn.execute(
            "UPDATE ledger SET sync_status = 'pending' WHERE sync_status = 'syncing'",
            [],
        )?;
        if requeued > 0 {
            info!("requeued {requeued} in-flight entries from previous run");
        }
        Ok(requeued as u64)
    }

    // === Checkpoint and replay ===

    /// Record the actuator snapshot that is fully applied as of `now`.
    pub fn save_checkpoint(
        &self,
        states: &BTreeMap<String, bool>,
        now: OffsetDateTime,
    ) -> Result<()> {
        self.conn.execute(
            "INSERT INTO checkpoint (id, applied_at, actuator_states) VALUES (1, ?1, ?2)
             ON CONFLICT(id) DO UPDATE SET applied_at = ?1, actuator_states = ?2",
            params![now.unix_timestamp(), serde_json::to_string(states)?],
        )?;
        Ok(())
    }

    /// Load the last checkpoint, if any.
    pub fn load_checkpoint(&self) -> Result<Option<(OffsetDateTime, BTreeMap<String, bool>)>> {
        let row = self
            .conn
            .query_row(
                "SELECT applied_at, actuator_states FROM checkpoint WHERE id = 1",
                [],
                |row| Ok((row.get::<_, i64>(0)?, row.get::<_, String>(1)?)),
            )
            .optional()?;

        match row {
            None => Ok(None),
            Some((ts, json)) => {
                let applied_at = OffsetDateTime::from_unix_timestamp(ts)
                    .map_err(|e| Error::Corrupt {
                        message: format!("checkpoint timestamp {ts}: {e}"),
                    })?;
                let states: BTreeMap<String, bool> = serde_json::from_str(&json)?;
                Ok(Some((applied_at, states)))
            }
        }
    }

    /// Reconstruct actuator state from the checkpoint plus every actuator
    /// change recorded at or after it.
    ///
    /// Reapplying a change that was already applied is harmless (setting a
    /// state is idempotent), so the replay window deliberately overlaps
    /// the checkpoint instant.
    pub fn replay_actuator_state(&self) -> Result<BTreeMap<String, bool>> {
        let (since, mut states) = match self.load_checkpoint()? {
            Some((applied_at, states)) => (Some(applied_at), states),
            None => (None, BTreeMap::new()),
        };

        let since_ts = since.map_or(i64::MIN, OffsetDateTime::unix_timestamp);
        let mut stmt = self.conn.prepare(
            "SELECT payload FROM ledger
             WHERE entity_type = 'actuator_change' AND created_at >= ?1
             ORDER BY created_at ASC, rowid ASC",
        )?;
        let payloads = stmt
            .query_map([since_ts], |row| row.get::<_, String>(0))?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        let replayed = payloads.len();
        for payload in payloads {
            let change: ActuatorChange = serde_json::from_str(&payload)?;
            states.insert(change.name, change.is_on);
        }
        if replayed > 0 {
            info!("replayed {replayed} actuator changes past the checkpoint");
        }
        Ok(states)
    }

    pub(crate) fn conn(&self) -> &Connection {
        &self.conn
    }
}

fn sideline_path(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(format!(
        ".corrupt-{}",
        OffsetDateTime::now_utc().unix_timestamp()
    ));
    PathBuf::from(name)
}

fn row_to_entry(row: &rusqlite::Row<'_>) -> rusqlite::Result<LedgerEntry> {
    let local_id: String = row.get(0)?;
    let entity_type: String = row.get(1)?;
    let payload: String = row.get(2)?;
    let sync_status: String = row.get(3)?;

    Ok(LedgerEntry {
        local_id: Uuid::parse_str(&local_id).map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(0, rusqlite::types::Type::Text, Box::new(e))
        })?,
        entity_type: EntityType::parse(&entity_type).ok_or_else(|| {
            rusqlite::Error::FromSqlConversionFailure(
                1,
                rusqlite::types::Type::Text,
                format!("unknown entity type {entity_type}").into(),
            )
        })?,
        payload: serde_json::from_str(&payload).map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(2, rusqlite::types::Type::Text, Box::new(e))
        })?,
        sync_status: SyncStatus::parse(&sync_status).ok_or_else(|| {
            rusqlite::Error::FromSqlConversionFailure(
                3,
                rusqlite::types::Type::Text,
                format!("unknown sync status {sync_status}").into(),
            )
        })?,
        retry_count: row.get(4)?,
        next_retry_at: row
            .get::<_, Option<i64>>(5)?
            .and_then(|ts| OffsetDateTime::from_unix_timestamp(ts).ok()),
        backend_id: row.get(6)?,
        created_at: OffsetDateTime::from_unix_timestamp(row.get(7)?).map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(
                7,
                rusqlite::types::Type::Integer,
                Box::new(e),
            )
        })?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use myco_types::TriggeredBy;
    use serde_json::json;

    fn ledger() -> Ledger {
        Ledger::open_in_memory(LedgerConfig::default()).unwrap()
    }

    fn small_ledger(max_entries: u64) -> Ledger {
        Ledger::open_in_memory(LedgerConfig {
            max_entries,
            retention: time::Duration::hours(1),
        })
        .unwrap()
    }

    #[test]
    fn append_and_fetch() {
        let ledger = ledger();
        let now = OffsetDateTime::now_utc();
        let id = ledger
            .append(EntityType::Reading, &json!({"value": 900.0}), now)
            .unwrap();

        let entry = ledger.entry(id).unwrap().unwrap();
        assert_eq!(entry.sync_status, SyncStatus::Pending);
        assert_eq!(entry.entity_type, EntityType::Reading);
        assert_eq!(entry.payload["value"], 900.0);
        assert_eq!(entry.retry_count, 0);
    }

    #[test]
    fn claim_batch_transitions_to_syncing_oldest_first() {
        let mut ledger = ledger();
        let now = OffsetDateTime::now_utc();
        let first = ledger
            .append(EntityType::Reading, &json!({"n": 1}), now - time::Duration::seconds(30))
            .unwrap();
        let second = ledger
            .append(EntityType::Reading, &json!({"n": 2}), now)
            .unwrap();

        let batch = ledger.claim_batch(10, now).unwrap();
        assert_eq!(batch.len(), 2);
        assert_eq!(batch[0].local_id, first);
        assert_eq!(batch[1].local_id, second);
        assert!(batch.iter().all(|e| e.sync_status == SyncStatus::Syncing));

        // Nothing pending remains.
        assert!(ledger.claim_batch(10, now).unwrap().is_empty());
    }

    #[test]
    fn claim_batch_respects_backoff() {
        let mut ledger = ledger();
        let now = OffsetDateTime::now_utc();
        let id = ledger.append(EntityType::Alert, &json!({}), now).unwrap();

        let batch = ledger.claim_batch(10, now).unwrap();
        assert_eq!(batch.len(), 1);
        ledger
            .mark_retry(id, now + time::Duration::minutes(5))
            .unwrap();

        // Not due yet.
        assert!(ledger.claim_batch(10, now).unwrap().is_empty());
        // Due after the backoff.
        let later = now + time::Duration::minutes(6);
        assert_eq!(ledger.claim_batch(10, later).unwrap().len(), 1);
    }

    #[test]
    fn backend_id_is_set_exactly_once() {
        let mut ledger = ledger();
        let now = OffsetDateTime::now_utc();
        let id = ledger.append(EntityType::Decision, &json!({}), now).unwrap();

        ledger.claim_batch(10, now).unwrap();
        ledger.mark_synced(id, Some("backend-1")).unwrap();
        let entry = ledger.entry(id).unwrap().unwrap();
        assert_eq!(entry.backend_id.as_deref(), Some("backend-1"));
        assert_eq!(entry.sync_status, SyncStatus::Synced);

        // A terminal entry cannot transition, and even a direct update
        // cannot overwrite the backend id.
        assert!(matches!(
            ledger.mark_synced(id, Some("backend-2")),
            Err(Error::InvalidTransition { .. })
        ));
        let entry = ledger.entry(id).unwrap().unwrap();
        assert_eq!(entry.backend_id.as_deref(), Some("backend-1"));
    }

    #[test]
    fn illegal_transitions_are_rejected() {
        let ledger = ledger();
        let now = OffsetDateTime::now_utc();
        let id = ledger.append(EntityType::Reading, &json!({}), now).unwrap();

        // pending -> synced skips the claim step.
        assert!(matches!(
            ledger.update_sync_status(id, SyncStatus::Synced, None),
            Err(Error::InvalidTransition { .. })
        ));

        // Unknown entry.
        assert!(matches!(
            ledger.update_sync_status(Uuid::new_v4(), SyncStatus::Syncing, None),
            Err(Error::EntryNotFound(_))
        ));
    }

    #[test]
    fn retry_bumps_count_and_requeues() {
        let mut ledger = ledger();
        let now = OffsetDateTime::now_utc();
        let id = ledger.append(EntityType::Reading, &json!({}), now).unwrap();

        ledger.claim_batch(10, now).unwrap();
        let count = ledger.mark_retry(id, now + time::Duration::seconds(4)).unwrap();
        assert_eq!(count, 1);

        let entry = ledger.entry(id).unwrap().unwrap();
        assert_eq!(entry.sync_status, SyncStatus::Pending);
        assert_eq!(entry.retry_count, 1);
        assert!(entry.next_retry_at.is_some());
    }

    #[test]
    fn failed_is_terminal() {
        let mut ledger = ledger();
        let now = OffsetDateTime::now_utc();
        let id = ledger.append(EntityType::Reading, &json!({}), now).unwrap();

        ledger.claim_batch(10, now).unwrap();
        ledger.mark_failed(id).unwrap();

        let entry = ledger.entry(id).unwrap().unwrap();
        assert_eq!(entry.sync_status, SyncStatus::Failed);
        assert!(matches!(
            ledger.update_sync_status(id, SyncStatus::Pending, None),
            Err(Error::InvalidTransition { .. })
        ));
    }

    #[test]
    fn requeue_in_flight_returns_syncing_to_pending() {
        let mut ledger = ledger();
        let now = OffsetDateTime::now_utc();
        ledger.append(EntityType::Reading, &json!({}), now).unwrap();
        ledger.append(EntityType::Reading, &json!({}), now).unwrap();
        ledger.claim_batch(10, now).unwrap();

        assert_eq!(ledger.counts().unwrap().syncing, 2);
        assert_eq!(ledger.requeue_in_flight().unwrap(), 2);
        let counts = ledger.counts().unwrap();
        assert_eq!(counts.syncing, 0);
        assert_eq!(counts.pending, 2);

        // Requeue does not touch retry counts.
        let entries = ledger.query_by_status(SyncStatus::Pending, None).unwrap();
        assert!(entries.iter().all(|e| e.retry_count == 0));
    }

    #[test]
    fn purge_never_touches_unsynced_rows() {
        let mut ledger = ledger();
        let old = OffsetDateTime::now_utc() - time::Duration::days(30);
        let now = OffsetDateTime::now_utc();

        let synced = ledger.append(EntityType::Reading, &json!({}), old).unwrap();
        let pending = ledger.append(EntityType::Reading, &json!({}), old).unwrap();
        let failed = ledger.append(EntityType::Reading, &json!({}), old).unwrap();

        // Drive one to synced and one to failed.
        for entry in ledger.claim_batch(10, now).unwrap() {
            if entry.local_id == synced {
                ledger.mark_synced(synced, Some("b-1")).unwrap();
            } else if entry.local_id == failed {
                ledger.mark_failed(failed).unwrap();
            } else {
                ledger.mark_retry(entry.local_id, now).unwrap();
            }
        }

        let purged = ledger.purge_synced(now - time::Duration::days(7)).unwrap();
        assert_eq!(purged, 1);
        assert!(ledger.entry(synced).unwrap().is_none());
        assert!(ledger.entry(pending).unwrap().is_some());
        assert!(ledger.entry(failed).unwrap().is_some());
    }

    #[test]
    fn full_ledger_with_unsynced_rows_errors() {
        let ledger = small_ledger(3);
        let now = OffsetDateTime::now_utc();

        for _ in 0..3 {
            ledger.append(EntityType::Reading, &json!({}), now).unwrap();
        }
        // All three are pending: nothing can be purged.
        let err = ledger
            .append(EntityType::Reading, &json!({}), now)
            .unwrap_err();
        match err {
            Error::Full { unsynced } => assert_eq!(unsynced, 3),
            other => panic!("expected Full, got {other:?}"),
        }
    }

    #[test]
    fn full_ledger_purges_old_synced_rows_first() {
        let mut ledger = small_ledger(3);
        let old = OffsetDateTime::now_utc() - time::Duration::days(2);
        let now = OffsetDateTime::now_utc();

        for _ in 0..3 {
            ledger.append(EntityType::Reading, &json!({}), old).unwrap();
        }
        for entry in ledger.claim_batch(10, now).unwrap() {
            ledger.mark_synced(entry.local_id, None).unwrap();
        }

        // Capacity check purges the old synced rows and the append goes
        // through.
        let id = ledger.append(EntityType::Reading, &json!({}), now).unwrap();
        assert!(ledger.entry(id).unwrap().is_some());
        assert_eq!(ledger.counts().unwrap().synced, 0);
    }

    #[test]
    fn checkpoint_round_trip() {
        let ledger = ledger();
        let now = OffsetDateTime::now_utc();
        let mut states = BTreeMap::new();
        states.insert("exhaust_fan".to_string(), true);

        assert!(ledger.load_checkpoint().unwrap().is_none());
        ledger.save_checkpoint(&states, now).unwrap();

        let (applied_at, loaded) = ledger.load_checkpoint().unwrap().unwrap();
        assert_eq!(applied_at.unix_timestamp(), now.unix_timestamp());
        assert_eq!(loaded, states);
    }

    #[test]
    fn replay_reconstructs_state_past_the_checkpoint() {
        let ledger = ledger();
        let t0 = OffsetDateTime::now_utc() - time::Duration::minutes(10);

        let mut checkpointed = BTreeMap::new();
        checkpointed.insert("exhaust_fan".to_string(), false);
        checkpointed.insert("heater".to_string(), true);
        ledger.save_checkpoint(&checkpointed, t0).unwrap();

        // Two changes after the checkpoint; the fan flips twice.
        for (minutes, name, on) in [(1, "exhaust_fan", true), (2, "exhaust_fan", false), (3, "humidifier", true)]
        {
            let change = ActuatorChange {
                name: name.to_string(),
                is_on: on,
                triggered_by: TriggeredBy::Auto,
                changed_at: t0 + time::Duration::minutes(minutes),
            };
            ledger
                .append(EntityType::ActuatorChange, &change, t0 + time::Duration::minutes(minutes))
                .unwrap();
        }

        let states = ledger.replay_actuator_state().unwrap();
        assert_eq!(states.get("exhaust_fan"), Some(&false));
        assert_eq!(states.get("heater"), Some(&true));
        assert_eq!(states.get("humidifier"), Some(&true));
    }

    #[test]
    fn recent_decisions_window() {
        let ledger = ledger();
        let now = OffsetDateTime::now_utc();
        for i in 0..5i64 {
            let decision = Decision {
                decided_at: now + time::Duration::seconds(i),
                mode: myco_types::Mode::Fruiting,
                reading: myco_types::Reading::builder(myco_types::SensorKind::Co2)
                    .device_id("chamber-1")
                    .value(1000.0 + i as f64)
                    .captured_at(now)
                    .build(),
                actions: BTreeMap::new(),
                reasoning: vec![format!("tick {i}")],
            };
            ledger
                .append(EntityType::Decision, &decision, now + time::Duration::seconds(i))
                .unwrap();
        }

        let recent = ledger.recent_decisions(3).unwrap();
        assert_eq!(recent.len(), 3);
        // Newest first.
        assert_eq!(recent[0].reasoning, vec!["tick 4".to_string()]);
    }

    #[test]
    fn recovery_on_disk_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ledger.db");
        let now = OffsetDateTime::now_utc();

        {
            let ledger = Ledger::open(&path, LedgerConfig::default()).unwrap();
            ledger.append(EntityType::Reading, &json!({}), now).unwrap();
        }

        // A clean file opens without reinitialization.
        let (ledger, report) =
            Ledger::open_with_recovery(&path, LedgerConfig::default()).unwrap();
        assert!(!report.reinitialized);
        assert_eq!(ledger.counts().unwrap().pending, 1);
        drop(ledger);

        // Garbage in the file forces a sideline + fresh start.
        std::fs::write(&path, b"definitely not a sqlite database").unwrap();
        let (ledger, report) =
            Ledger::open_with_recovery(&path, LedgerConfig::default()).unwrap();
        assert!(report.reinitialized);
        assert!(report.sidelined_to.is_some());
        assert_eq!(ledger.counts().unwrap().pending, 0);
    }
}
