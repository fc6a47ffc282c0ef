//! Platform-agnostic types for the myco chamber controller.
//!
//! This crate defines the domain model shared by the control engine, the
//! durable ledger, and the sync agent: sensor readings, operating modes and
//! threshold bands, actuator state, control decisions, alerts, and ledger
//! entries with their sync lifecycle.
//!
//! Everything here is plain data: no I/O, no clocks (timestamps are always
//! passed in), no global state.

mod actuator;
mod alert;
mod decision;
mod error;
mod ledger;
mod mode;
mod reading;

pub use actuator::{ActuatorState, TriggeredBy};
pub use alert::{Alert, AlertCandidate, AlertKind, AlertSeverity, fingerprint};
pub use decision::Decision;
pub use error::{ConfigError, ConfigResult};
pub use ledger::{
    ActuatorChange, EntityType, LedgerEntry, SyncItem, SyncItemStatus, SyncOutcome, SyncStatus,
};
pub use mode::{Mode, ThresholdBand, ThresholdSet, ThresholdTable};
pub use reading::{Quality, Reading, ReadingBuilder, SensorKind};
