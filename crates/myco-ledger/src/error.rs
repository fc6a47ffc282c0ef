//! Error types for myco-ledger.

use std::path::PathBuf;

use myco_types::SyncStatus;
use uuid::Uuid;

/// Result type for myco-ledger operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in myco-ledger.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Database error from SQLite.
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// The ledger is at capacity and nothing more can be purged.
    ///
    /// Raised only after an automatic purge of old synced entries failed
    /// to free space; the remaining rows are pending or in flight and must
    /// not be dropped. Callers escalate this as a data-at-risk condition.
    #[error("ledger full: {unsynced} unsynced entries cannot be purged")]
    Full {
        /// Number of pending/syncing rows occupying the ledger.
        unsynced: u64,
    },

    /// The database file failed its integrity check.
    #[error("ledger corrupt: {message}")]
    Corrupt {
        /// What the integrity check reported.
        message: String,
    },

    /// Illegal sync lifecycle step.
    #[error("illegal sync transition {from} -> {to} for entry {local_id}")]
    InvalidTransition {
        /// Entry whose transition was rejected.
        local_id: Uuid,
        /// Current status.
        from: SyncStatus,
        /// Requested status.
        to: SyncStatus,
    },

    /// No entry with this id exists.
    #[error("ledger entry not found: {0}")]
    EntryNotFound(Uuid),

    /// Failed to create the database directory.
    #[error("failed to create database directory {path}: {source}")]
    CreateDirectory {
        /// Directory that could not be created.
        path: PathBuf,
        /// Underlying I/O failure.
        source: std::io::Error,
    },

    /// Payload (de)serialization error.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// IO error.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}
