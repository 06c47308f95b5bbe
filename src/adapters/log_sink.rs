//! Log-based event sink adapter.
//!
//! Implements [`EventSink`] by rendering every agent event as one
//! `TAG | key=value` line through the `log` facade.  Emergency events go
//! out at `error` so they stand out in any log filter.

use log::{error, info, warn};

use crate::app::events::AgentEvent;
use crate::app::ports::EventSink;
use crate::decision::ActuatorCommand;
use crate::telemetry::DeviceStatusKind;

/// Adapter that logs every [`AgentEvent`].
#[derive(Debug, Default)]
pub struct LogEventSink;

impl LogEventSink {
    pub fn new() -> Self {
        Self
    }
}

fn render(cmd: &ActuatorCommand) -> String {
    let mut s = format!("{}={:?}@{}%", cmd.actuator_id, cmd.action, cmd.intensity);
    if let Some(d) = cmd.duration {
        s.push_str(&format!("/{d}s"));
    }
    if let Some(m) = cmd.mode {
        s.push_str(&format!("[{m:?}]"));
    }
    s
}

impl EventSink for LogEventSink {
    fn emit(&mut self, event: &AgentEvent) {
        match event {
            AgentEvent::Started { actuators, features } => {
                info!("START | actuators={} features={}", actuators, features);
            }
            AgentEvent::ContextUpdated(c) => {
                info!(
                    "CTX   | day={} weather={} temp={:?} wind={:?}",
                    c.is_day, c.weather, c.outdoor_temp_c, c.wind_speed_kmh
                );
            }
            AgentEvent::ContextStale(e) => {
                warn!("CTX   | stale ({})", e);
            }
            AgentEvent::Decision(cmds) => {
                let line: Vec<String> = cmds.iter().map(render).collect();
                info!("DECIDE| {}", line.join(" "));
            }
            AgentEvent::CycleSkipped(reason) => {
                info!("SKIP  | {:?}", reason);
            }
            AgentEvent::CycleFailed(e) => {
                warn!("FAIL  | {} (actuators unchanged)", e);
            }
            AgentEvent::PublishFailed { actuator_id, error } => {
                warn!("PUB   | {} not delivered: {}", actuator_id, error);
            }
            AgentEvent::EmergencyTriggered { reason } => {
                error!("EMERG | triggered: {}", reason);
            }
            AgentEvent::SafetyShutoffPublished { actuators } => {
                info!("EMERG | shutoff published to {} actuators", actuators);
            }
            AgentEvent::SafetyPublishFailed(e) => {
                error!("EMERG | SHUTOFF NOT DELIVERED: {} (retrying next tick)", e);
            }
            AgentEvent::EmergencyCleared => {
                info!("EMERG | cleared, automated decisions resumed");
            }
            AgentEvent::DeviceStatus(d) => match d.kind {
                DeviceStatusKind::Emergency => {
                    error!("DEVICE| {} emergency: {}", d.device_id, d.status);
                }
                DeviceStatusKind::Connected => info!("DEVICE| {} connected", d.device_id),
                DeviceStatusKind::Other => info!("DEVICE| {}: {}", d.device_id, d.status),
            },
            AgentEvent::Status(s) => {
                let readings: Vec<String> = s
                    .readings
                    .iter()
                    .map(|(n, v, u)| format!("{n}={v}{u}"))
                    .collect();
                info!(
                    "STATUS| mode={:?} sensors={} [{}] | day={} weather={} | \
                     cycles run={} skipped={} failed={} overruns={} | msgs={} rejected={}",
                    s.mode,
                    s.sensors,
                    readings.join(" "),
                    s.context.is_day,
                    s.context.weather,
                    s.stats.run,
                    s.stats.skipped,
                    s.stats.failed,
                    s.stats.overruns,
                    s.stats.messages,
                    s.stats.rejected_messages,
                );
            }
        }
    }
}
