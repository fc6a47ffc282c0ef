//! Actuator state snapshots.

use core::fmt;

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

/// Who commanded the current actuator state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TriggeredBy {
    /// The automatic control tick.
    Auto,
    /// An operator override.
    Manual,
}

impl fmt::Display for TriggeredBy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TriggeredBy::Auto => write!(f, "auto"),
            TriggeredBy::Manual => write!(f, "manual"),
        }
    }
}

/// Current state of one actuator.
///
/// Owned exclusively by the driver bank; mutated only through its
/// synchronized entry point. Copies handed out elsewhere (ledger payloads,
/// API responses) are snapshots, not truth.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActuatorState {
    /// Actuator name (e.g. `exhaust_fan`).
    pub name: String,
    /// Whether the actuator is currently energized.
    pub is_on: bool,
    /// When the state last flipped.
    #[serde(with = "time::serde::rfc3339")]
    pub last_changed_at: OffsetDateTime,
    /// Who commanded the current state.
    pub triggered_by: TriggeredBy,
    /// When a manual override lapses and automatic control resumes.
    ///
    /// `None` while under automatic control, or for an override that holds
    /// until explicitly cleared.
    #[serde(with = "time::serde::rfc3339::option")]
    pub override_expires_at: Option<OffsetDateTime>,
}

impl ActuatorState {
    /// A fresh, de-energized actuator under automatic control.
    #[must_use]
    pub fn new(name: impl Into<String>, at: OffsetDateTime) -> Self {
        Self {
            name: name.into(),
            is_on: false,
            last_changed_at: at,
            triggered_by: TriggeredBy::Auto,
            override_expires_at: None,
        }
    }

    /// Whether a manual override is still holding at `now`.
    #[must_use]
    pub fn override_active(&self, now: OffsetDateTime) -> bool {
        match self.triggered_by {
            TriggeredBy::Auto => false,
            TriggeredBy::Manual => self.override_expires_at.is_none_or(|t| now < t),
        }
    }
}
