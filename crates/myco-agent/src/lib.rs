//! Device daemon for the myco chamber controller.
//!
//! Wires the pure control core (`myco-control`) and the durable ledger
//! (`myco-ledger`) into a running device: a periodic control tick, an
//! independent sync agent draining the ledger to the remote system of
//! record, and a small REST API for the operator surface.
//!
//! The binary (`mycod`) lives in `main.rs`; everything here is a library
//! so integration tests can assemble the same pieces around mocks.

pub mod api;
pub mod config;
pub mod remote;
pub mod state;
pub mod sync;
pub mod tick;

pub use config::{Config, ConfigError};
pub use remote::{HttpTransport, MemoryTransport, SyncError, SyncTransport};
pub use state::{AgentError, AppState};
pub use sync::{SyncAgent, SyncCycle};
pub use tick::{run_control_loop, run_tick};
