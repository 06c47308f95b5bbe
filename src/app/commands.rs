//! Inbound commands to the agent.
//!
//! These arrive on the control topic and are interpreted by the
//! scheduler and the [`AgentService`](super::service::AgentService).

/// Commands that external operators can send into the agent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AgentCommand {
    /// Leave Emergency and resume automated decisions.
    ClearEmergency,

    /// Raise the stop signal; the agent shuts every actuator off and exits.
    Shutdown,
}
