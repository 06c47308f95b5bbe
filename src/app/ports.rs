//! Port traits: the hexagonal boundary between the decision core and the
//! outside world.
//!
//! ```text
//!   Adapter ──▶ Port trait ──▶ AgentService (domain)
//! ```
//!
//! Driven adapters (MQTT publisher, weather poller, classifier, event
//! sinks, clock) implement these traits.  The
//! [`AgentService`](super::service::AgentService) consumes them via
//! generics, so the core never touches a socket directly.
//!
//! All port errors are typed; callers must handle every variant explicitly.

use std::time::Duration;

use crate::context::ContextSnapshot;
use crate::decision::{ActuatorCommand, Prediction};
use crate::encoder::FeatureVector;
use crate::error::{ContextError, InferenceError, PublishError};
use crate::safety::EmergencyNotice;

// ───────────────────────────────────────────────────────────────
// Actuator port (driven adapter: domain → bus)
// ───────────────────────────────────────────────────────────────

/// Write-side port: the domain calls this to command actuators.
pub trait ActuatorPort {
    /// Publish one command to the actuator it names.
    fn publish_command(&mut self, cmd: &ActuatorCommand) -> Result<(), PublishError>;

    /// Broadcast an emergency stop notice.
    fn publish_emergency(&mut self, notice: &EmergencyNotice) -> Result<(), PublishError>;

    /// Block until everything accepted so far has left the process, or
    /// `timeout` expires.  Transports that send synchronously need not
    /// override this.
    fn flush(&mut self, timeout: Duration) -> Result<(), PublishError> {
        let _ = timeout;
        Ok(())
    }
}

// ───────────────────────────────────────────────────────────────
// Context port (driven adapter: weather provider → domain)
// ───────────────────────────────────────────────────────────────

/// One time-boxed poll of the external context source.
///
/// Failures are never fatal; the caller keeps its previous snapshot.
pub trait ContextPort {
    fn poll(&mut self) -> Result<ContextSnapshot, ContextError>;
}

// ───────────────────────────────────────────────────────────────
// Inference port (driven adapter: classifier)
// ───────────────────────────────────────────────────────────────

/// The pre-trained classifier, treated as a black box.
pub trait InferencePort {
    /// Feature count the model was trained on.
    fn input_len(&self) -> usize;

    /// Width of the raw model output (classes or actuators).
    fn output_len(&self) -> usize;

    fn infer(&mut self, features: &FeatureVector) -> Result<Prediction, InferenceError>;
}

// ───────────────────────────────────────────────────────────────
// Event sink port (driven adapter: domain → logging)
// ───────────────────────────────────────────────────────────────

/// The domain emits structured [`AgentEvent`](super::events::AgentEvent)s
/// through this port.  Adapters decide where they go.
pub trait EventSink {
    fn emit(&mut self, event: &super::events::AgentEvent);
}

// ───────────────────────────────────────────────────────────────
// Clock port
// ───────────────────────────────────────────────────────────────

/// Wall-clock source for command timestamps (Unix seconds).
pub trait Clock {
    fn now(&self) -> f64;
}
