//! Outbound agent events.
//!
//! The [`AgentService`](super::service::AgentService) emits these through
//! the [`EventSink`](super::ports::EventSink) port.  Adapters on the other
//! side decide what to do with them.

use crate::context::ContextSnapshot;
use crate::decision::ActuatorCommand;
use crate::error::{ContextError, InferenceError, PublishError};
use crate::safety::Mode;
use crate::telemetry::DeviceStatus;

/// Structured events emitted by the agent core.
#[derive(Debug, Clone)]
pub enum AgentEvent {
    /// The service passed its startup checks.
    Started { actuators: usize, features: usize },

    /// A new context snapshot replaced the previous one.
    ContextUpdated(ContextSnapshot),

    /// A context poll failed; the previous snapshot stays in effect.
    ContextStale(ContextError),

    /// A decision cycle published its commands.
    Decision(Vec<ActuatorCommand>),

    /// A decision cycle was skipped without error.
    CycleSkipped(SkipReason),

    /// A decision cycle aborted; no command was published.
    CycleFailed(InferenceError),

    /// An automated command did not reach the transport.
    PublishFailed { actuator_id: String, error: PublishError },

    EmergencyTriggered { reason: String },

    /// Safety commands all reached the transport.
    SafetyShutoffPublished { actuators: usize },

    /// Safety commands could not be published; retried next tick.
    SafetyPublishFailed(PublishError),

    EmergencyCleared,

    /// A field device reported its own status.
    DeviceStatus(DeviceStatus),

    /// Periodic snapshot.
    Status(StatusReport),
}

/// Why a cycle did nothing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// Automated decisions are suspended.
    Emergency,
    /// Fewer distinct sensors than required.
    InsufficientSensors { have: usize, need: usize },
    /// The raw metric has not reported yet.
    NoRawMetric,
    /// The previous cycle was still running.
    Overrun,
}

/// Running counters of the decision loop.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CycleStats {
    pub run: u64,
    pub skipped: u64,
    pub failed: u64,
    pub overruns: u64,
    pub messages: u64,
    pub rejected_messages: u64,
}

/// A point-in-time snapshot suitable for logging.
#[derive(Debug, Clone)]
pub struct StatusReport {
    pub mode: Mode,
    pub sensors: usize,
    /// (name, value, unit) of every known sensor.
    pub readings: Vec<(String, f64, String)>,
    pub context: ContextSnapshot,
    pub stats: CycleStats,
}
