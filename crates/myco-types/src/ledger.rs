//! Ledger entries and the sync wire format.
//!
//! Every state-changing event on the device (reading, decision, actuator
//! flip, alert) becomes a [`LedgerEntry`]: a durably stored, append-only
//! record that doubles as the outbox for remote synchronization. The
//! `local_id` is the idempotency key the remote deduplicates on.

use core::fmt;

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use uuid::Uuid;

use crate::actuator::TriggeredBy;

/// What kind of event a ledger entry records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityType {
    /// A sensor reading.
    Reading,
    /// A control decision.
    Decision,
    /// An applied actuator state change.
    ActuatorChange,
    /// An alert lifecycle event.
    Alert,
}

impl EntityType {
    /// Stable identifier used in storage and on the wire.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            EntityType::Reading => "reading",
            EntityType::Decision => "decision",
            EntityType::ActuatorChange => "actuator_change",
            EntityType::Alert => "alert",
        }
    }

    /// Parse the stable identifier back into an entity type.
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        Some(match s {
            "reading" => EntityType::Reading,
            "decision" => EntityType::Decision,
            "actuator_change" => EntityType::ActuatorChange,
            "alert" => EntityType::Alert,
            _ => return None,
        })
    }
}

impl fmt::Display for EntityType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Where an entry stands in the sync lifecycle.
///
/// Legal transitions are `Pending -> Syncing` and
/// `Syncing -> {Synced, Pending, Failed}`. `Synced` and `Failed` are
/// terminal; `Failed` is reached only on permanent (non-retryable)
/// rejection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncStatus {
    /// Waiting to be picked up by the sync agent.
    Pending,
    /// Claimed by an in-flight batch.
    Syncing,
    /// Acknowledged by the remote.
    Synced,
    /// Permanently rejected by the remote.
    Failed,
}

impl SyncStatus {
    /// Whether moving from `self` to `next` is a legal lifecycle step.
    #[must_use]
    pub fn can_transition_to(self, next: SyncStatus) -> bool {
        matches!(
            (self, next),
            (SyncStatus::Pending, SyncStatus::Syncing)
                | (SyncStatus::Syncing, SyncStatus::Synced)
                | (SyncStatus::Syncing, SyncStatus::Pending)
                | (SyncStatus::Syncing, SyncStatus::Failed)
        )
    }

    /// Stable identifier used in storage.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncStatus::Pending => "pending",
            SyncStatus::Syncing => "syncing",
            SyncStatus::Synced => "synced",
            SyncStatus::Failed => "failed",
        }
    }

    /// Parse the stable identifier back into a status.
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        Some(match s {
            "pending" => SyncStatus::Pending,
            "syncing" => SyncStatus::Syncing,
            "synced" => SyncStatus::Synced,
            "failed" => SyncStatus::Failed,
            _ => return None,
        })
    }
}

impl fmt::Display for SyncStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One durably stored event, with its sync bookkeeping.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LedgerEntry {
    /// Locally generated identity; also the remote idempotency key.
    pub local_id: Uuid,
    /// What kind of event the payload holds.
    pub entity_type: EntityType,
    /// The serialized event.
    pub payload: serde_json::Value,
    /// Sync lifecycle position.
    pub sync_status: SyncStatus,
    /// How many transient failures this entry has seen.
    pub retry_count: u32,
    /// Earliest time the next attempt may run, after a transient failure.
    #[serde(with = "time::serde::rfc3339::option")]
    pub next_retry_at: Option<OffsetDateTime>,
    /// Remote identity, set exactly once on first acceptance.
    pub backend_id: Option<String>,
    /// When the entry was appended.
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}

impl LedgerEntry {
    /// Create a fresh pending entry around a payload.
    #[must_use]
    pub fn new(
        entity_type: EntityType,
        payload: serde_json::Value,
        created_at: OffsetDateTime,
    ) -> Self {
        Self {
            local_id: Uuid::new_v4(),
            entity_type,
            payload,
            sync_status: SyncStatus::Pending,
            retry_count: 0,
            next_retry_at: None,
            backend_id: None,
            created_at,
        }
    }
}

/// Payload of an [`EntityType::ActuatorChange`] entry.
///
/// Replayed after a crash to reconstruct actuator state, so it carries
/// everything needed to reapply the flip.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActuatorChange {
    /// Actuator name.
    pub name: String,
    /// The state being applied.
    pub is_on: bool,
    /// Who commanded the change.
    pub triggered_by: TriggeredBy,
    /// When the change was commanded.
    #[serde(with = "time::serde::rfc3339")]
    pub changed_at: OffsetDateTime,
}

/// One entry as submitted to the remote endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncItem {
    /// Idempotency key.
    pub local_id: Uuid,
    /// What kind of event the payload holds.
    pub entity_type: EntityType,
    /// The serialized event.
    pub payload: serde_json::Value,
}

impl From<&LedgerEntry> for SyncItem {
    fn from(entry: &LedgerEntry) -> Self {
        Self {
            local_id: entry.local_id,
            entity_type: entry.entity_type,
            payload: entry.payload.clone(),
        }
    }
}

/// Per-item verdict from the remote endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncItemStatus {
    /// Stored (or already known) remotely.
    Accepted,
    /// Not stored; `error_code` tells whether a retry can help.
    Rejected,
}

/// Per-item response for one submitted [`SyncItem`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncOutcome {
    /// Echoed idempotency key.
    pub local_id: Uuid,
    /// Accepted or rejected.
    pub status: SyncItemStatus,
    /// Remote identity, present on acceptance.
    pub backend_id: Option<String>,
    /// HTTP-style error code on rejection (4xx permanent, 5xx transient).
    pub error_code: Option<u16>,
}

impl SyncOutcome {
    /// An accepted outcome carrying a backend id.
    #[must_use]
    pub fn accepted(local_id: Uuid, backend_id: impl Into<String>) -> Self {
        Self {
            local_id,
            status: SyncItemStatus::Accepted,
            backend_id: Some(backend_id.into()),
            error_code: None,
        }
    }

    /// A rejection with an error code.
    #[must_use]
    pub fn rejected(local_id: Uuid, error_code: u16) -> Self {
        Self {
            local_id,
            status: SyncItemStatus::Rejected,
            backend_id: None,
            error_code: Some(error_code),
        }
    }

    /// Whether this rejection is permanent (client error, never retried).
    ///
    /// Rejections without an error code are treated as transient: the
    /// remote did not say the item is unprocessable, so retrying is safe.
    #[must_use]
    pub fn is_permanent_rejection(&self) -> bool {
        self.status == SyncItemStatus::Rejected
            && self.error_code.is_some_and(|c| (400..500).contains(&c))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lifecycle_transitions() {
        use SyncStatus::*;
        assert!(Pending.can_transition_to(Syncing));
        assert!(Syncing.can_transition_to(Synced));
        assert!(Syncing.can_transition_to(Pending));
        assert!(Syncing.can_transition_to(Failed));

        assert!(!Pending.can_transition_to(Synced));
        assert!(!Synced.can_transition_to(Pending));
        assert!(!Failed.can_transition_to(Syncing));
        assert!(!Synced.can_transition_to(Failed));
    }

    #[test]
    fn entity_type_round_trip() {
        for t in [
            EntityType::Reading,
            EntityType::Decision,
            EntityType::ActuatorChange,
            EntityType::Alert,
        ] {
            assert_eq!(EntityType::parse(t.as_str()), Some(t));
        }
    }

    #[test]
    fn new_entry_starts_pending() {
        let entry = LedgerEntry::new(
            EntityType::Reading,
            serde_json::json!({"value": 900.0}),
            OffsetDateTime::now_utc(),
        );
        assert_eq!(entry.sync_status, SyncStatus::Pending);
        assert_eq!(entry.retry_count, 0);
        assert!(entry.backend_id.is_none());
    }

    #[test]
    fn rejection_classification() {
        let id = Uuid::new_v4();
        assert!(SyncOutcome::rejected(id, 422).is_permanent_rejection());
        assert!(!SyncOutcome::rejected(id, 500).is_permanent_rejection());
        assert!(!SyncOutcome::rejected(id, 503).is_permanent_rejection());
        assert!(!SyncOutcome::accepted(id, "b-1").is_permanent_rejection());
    }

    #[test]
    fn sync_item_from_entry() {
        let entry = LedgerEntry::new(
            EntityType::Alert,
            serde_json::json!({"kind": "high_co2"}),
            OffsetDateTime::now_utc(),
        );
        let item = SyncItem::from(&entry);
        assert_eq!(item.local_id, entry.local_id);
        assert_eq!(item.entity_type, EntityType::Alert);
    }
}
