//! Emergency monitor.
//!
//! Watches raw sensor readings against hard thresholds, independently of
//! the classifier, and owns a two-state machine:
//!
//! ```text
//!            any watched sensor > limit
//!   Normal ─────────────────────────────▶ Emergency
//!     ▲                                      │
//!     └──────────── clear() ─────────────────┘
//! ```
//!
//! ## Lifecycle
//!
//! 1. Starts in `Normal`.
//! 2. The first breach trips `Emergency` and yields one safety `off`
//!    command per managed actuator.  The caller publishes them at once.
//! 3. Further breaches change nothing.  There is no automatic recovery:
//!    only [`EmergencyMonitor::clear`] returns to `Normal`.
//! 4. If the shutoff could not be published the monitor keeps it pending
//!    and the scheduler retries it every decision tick.

use log::{error, info, warn};
use serde::{Deserialize, Serialize};

use crate::app::state::ReadingTable;
use crate::decision::{ActuatorCommand, CommandSource};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    Normal,
    Emergency,
}

#[derive(Debug, Clone, PartialEq)]
pub struct EmergencyState {
    pub mode: Mode,
    pub trigger_reason: Option<String>,
    /// Unix seconds of the Normal → Emergency transition.
    pub triggered_at: Option<f64>,
}

impl EmergencyState {
    fn normal() -> Self {
        Self {
            mode: Mode::Normal,
            trigger_reason: None,
            triggered_at: None,
        }
    }
}

/// A hard ceiling on one named sensor.  Breached when `value > max`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SafetyThreshold {
    pub sensor: String,
    pub max: f64,
}

impl SafetyThreshold {
    pub fn new(sensor: &str, max: f64) -> Self {
        Self {
            sensor: sensor.to_string(),
            max,
        }
    }

    /// Thermal, humidity and acoustic ceilings of the reference deployment.
    pub fn reference() -> Vec<Self> {
        vec![
            Self::new("temperatura", 45.0),
            Self::new("humedad", 95.0),
            Self::new("ruido", 90.0),
        ]
    }
}

/// Broadcast on the emergency topic when the monitor trips.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmergencyNotice {
    /// Always `"emergency_stop"`.
    pub command: String,
    pub reason: String,
    pub timestamp: f64,
    pub source: CommandSource,
}

impl EmergencyNotice {
    pub fn new(reason: &str, timestamp: f64) -> Self {
        Self {
            command: "emergency_stop".into(),
            reason: reason.to_string(),
            timestamp,
            source: CommandSource::Safety,
        }
    }
}

/// The emergency state machine.
pub struct EmergencyMonitor {
    thresholds: Vec<SafetyThreshold>,
    actuators: Vec<String>,
    state: EmergencyState,
    shutoff_pending: bool,
}

impl EmergencyMonitor {
    pub fn new(thresholds: Vec<SafetyThreshold>, actuators: Vec<String>) -> Self {
        Self {
            thresholds,
            actuators,
            state: EmergencyState::normal(),
            shutoff_pending: false,
        }
    }

    /// First watched sensor currently beyond its limit, as a reason string.
    pub fn breach(&self, readings: &ReadingTable) -> Option<String> {
        self.thresholds.iter().find_map(|t| {
            let r = readings.get(&t.sensor)?;
            (r.value > t.max).then(|| {
                format!("{} {} {} > {}", t.sensor, r.value, r.unit, t.max)
            })
        })
    }

    /// Evaluate the latest readings.
    ///
    /// Returns the safety commands exactly once, on the Normal → Emergency
    /// transition.  Returns `None` while Normal without breach and for
    /// every call once already in Emergency.
    pub fn evaluate(&mut self, readings: &ReadingTable, now: f64) -> Option<Vec<ActuatorCommand>> {
        if self.is_emergency() {
            return None;
        }
        let reason = self.breach(readings)?;
        Some(self.trip(reason, now))
    }

    /// Enter Emergency unconditionally (shutdown path) and return the
    /// shutoff commands.  Already-tripped monitors keep their original
    /// reason but still return commands.
    pub fn trip(&mut self, reason: String, now: f64) -> Vec<ActuatorCommand> {
        if self.is_emergency() {
            warn!("Emergency re-asserted: {reason}");
        } else {
            error!("EMERGENCY: {reason}");
            self.state = EmergencyState {
                mode: Mode::Emergency,
                trigger_reason: Some(reason),
                triggered_at: Some(now),
            };
        }
        self.shutoff_pending = true;
        self.safety_commands(now)
    }

    /// One explicit `off` per managed actuator, tagged `safety`.
    pub fn safety_commands(&self, now: f64) -> Vec<ActuatorCommand> {
        self.actuators
            .iter()
            .map(|id| ActuatorCommand::safety_off(id, now))
            .collect()
    }

    /// Record that the shutoff reached the transport.
    pub fn confirm_shutoff(&mut self) {
        self.shutoff_pending = false;
    }

    /// True while in Emergency with an unpublished shutoff.
    pub fn shutoff_pending(&self) -> bool {
        self.shutoff_pending
    }

    /// Explicit external reset.  Returns `true` if the state changed.
    pub fn clear(&mut self) -> bool {
        if !self.is_emergency() {
            return false;
        }
        info!(
            "Emergency cleared (was: {})",
            self.state.trigger_reason.as_deref().unwrap_or("-")
        );
        self.state = EmergencyState::normal();
        self.shutoff_pending = false;
        true
    }

    pub fn is_emergency(&self) -> bool {
        self.state.mode == Mode::Emergency
    }

    pub fn state(&self) -> &EmergencyState {
        &self.state
    }

    pub fn managed_actuators(&self) -> &[String] {
        &self.actuators
    }

    /// Notice for the current emergency, if any.
    pub fn notice(&self) -> Option<EmergencyNotice> {
        let reason = self.state.trigger_reason.as_deref()?;
        Some(EmergencyNotice::new(reason, self.state.triggered_at.unwrap_or_default()))
    }
}
