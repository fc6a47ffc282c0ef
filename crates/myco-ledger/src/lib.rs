//! Durable append-only event ledger for the myco chamber controller.
//!
//! The ledger is both the write-ahead log that makes local control
//! crash-safe and the outbox the sync agent drains to the remote system of
//! record. Every reading, decision, actuator change, and alert is appended
//! here before its side effect happens; sync status is tracked per entry
//! with an enforced lifecycle and a set-once remote id.
//!
//! # Example
//!
//! ```no_run
//! use myco_ledger::{Ledger, LedgerConfig};
//! use myco_types::EntityType;
//! use time::OffsetDateTime;
//!
//! let mut ledger = Ledger::open(myco_ledger::default_db_path(), LedgerConfig::default())?;
//! ledger.requeue_in_flight()?;
//!
//! let now = OffsetDateTime::now_utc();
//! ledger.append(EntityType::Reading, &serde_json::json!({"value": 812.0}), now)?;
//! let batch = ledger.claim_batch(50, now)?;
//! # let _ = batch;
//! # Ok::<(), myco_ledger::Error>(())
//! ```

mod alerts;
mod error;
mod schema;
mod store;

pub use alerts::{AlertDisposition, AlertFilter};
pub use error::{Error, Result};
pub use store::{Ledger, LedgerConfig, RecoveryReport, StatusCounts};

/// Default database path following platform conventions.
///
/// - Linux: `~/.local/share/myco/ledger.db`
/// - macOS: `~/Library/Application Support/myco/ledger.db`
/// - Windows: `C:\Users\<user>\AppData\Local\myco\ledger.db`
pub fn default_db_path() -> std::path::PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| std::path::PathBuf::from("."))
        .join("myco")
        .join("ledger.db")
}
