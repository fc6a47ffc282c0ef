//! Deterministic control core for the myco chamber controller.
//!
//! The centerpiece is [`ControlEngine::decide`]: a pure three-zone
//! comparator with hysteresis that turns a sensor reading into actuator
//! commands without oscillating near band edges. Around it sit the
//! [`AlertEvaluator`] (pure breach grading), the [`SensorSampler`] and
//! [`ActuatorDriver`] traits with mock implementations, and the
//! [`ActuatorBank`] that owns actuator state and serializes automatic and
//! manual writes.
//!
//! Nothing in this crate touches storage or the network; durability and
//! synchronization live in `myco-ledger` and the agent.

mod actuator;
mod alerts;
mod engine;
mod error;
mod sampler;

pub use actuator::{ActuatorBank, ActuatorDriver, MockDriver, OverridePolicy};
pub use alerts::AlertEvaluator;
pub use engine::ControlEngine;
pub use error::{ActuatorError, Result, SensorError};
pub use sampler::{MockSampler, SensorSampler, validate_physical};
