//! Decision translator: inference output → actuator commands.
//!
//! Two output contracts are supported, selected explicitly by
//! [`DecisionPolicy`]:
//!
//! - **Intensity**: the model emits one value in `[0, 1]` per actuator.
//!   Each actuator reads its own index and has its own activation
//!   threshold (percent).  Above threshold → `on` at the saturated
//!   percentage, otherwise `off` at zero.
//! - **Category**: the model emits class probabilities; the argmax class
//!   selects a discrete indicator mode for a single actuator.
//!
//! A prediction whose shape does not match the configured policy is a
//! contract violation with the inference engine and is surfaced as
//! [`InferenceError::MalformedOutput`].

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::InferenceError;

// ---------------------------------------------------------------------------
// Prediction
// ---------------------------------------------------------------------------

/// Output of the inference engine.  Ephemeral.
#[derive(Debug, Clone, PartialEq)]
pub enum Prediction {
    /// Argmax class index of a categorical model.
    Class(usize),
    /// Per-actuator intensities in `[0, 1]`.
    Intensities(Vec<f32>),
}

// ---------------------------------------------------------------------------
// Actuator command (outbound wire type)
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Action {
    On,
    Off,
}

/// Who produced a command.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CommandSource {
    Automated,
    Safety,
}

/// Discrete indicator modes driven by the category policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IndicatorMode {
    Off,
    Yellow,
    Green,
    Blue,
    Red,
}

impl IndicatorMode {
    /// (r, g, b) duty for the RGB indicator, each 0–255.
    pub fn rgb(self) -> (u8, u8, u8) {
        match self {
            Self::Off => (0, 0, 0),
            Self::Yellow => (255, 255, 0),
            Self::Green => (0, 255, 0),
            Self::Blue => (0, 0, 255),
            Self::Red => (255, 0, 0),
        }
    }
}

/// One command for one actuator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActuatorCommand {
    pub actuator_id: String,
    pub action: Action,
    /// 0–100.
    pub intensity: u8,
    /// Seconds the actuator should stay on, when the actuator uses one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration: Option<u32>,
    /// Unix seconds.
    pub timestamp: f64,
    pub source: CommandSource,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mode: Option<IndicatorMode>,
}

impl ActuatorCommand {
    /// Explicit zero-intensity shutoff issued by the emergency monitor.
    pub fn safety_off(actuator_id: &str, timestamp: f64) -> Self {
        Self {
            actuator_id: actuator_id.to_string(),
            action: Action::Off,
            intensity: 0,
            duration: None,
            timestamp,
            source: CommandSource::Safety,
            mode: None,
        }
    }

    pub fn is_on(&self) -> bool {
        self.action == Action::On
    }
}

// ---------------------------------------------------------------------------
// Policy configuration
// ---------------------------------------------------------------------------

/// One actuator driven by an intensity model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActuatorSpec {
    pub id: String,
    /// Index into the prediction vector.
    pub index: usize,
    /// Activation threshold in percent; `on` iff `trunc(p * 100) > threshold`.
    pub threshold_percent: u8,
    #[serde(default)]
    pub duration_secs: Option<u32>,
}

/// One class of a categorical model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassSpec {
    pub label: String,
    pub mode: IndicatorMode,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DecisionPolicy {
    Intensity { actuators: Vec<ActuatorSpec> },
    Category { indicator: String, classes: Vec<ClassSpec> },
}

impl DecisionPolicy {
    /// Fan / LED / pump table of the reference multi-actuator model.
    pub fn reference_intensity() -> Self {
        let spec = |id: &str, index, threshold_percent, duration_secs| ActuatorSpec {
            id: id.to_string(),
            index,
            threshold_percent,
            duration_secs,
        };
        Self::Intensity {
            actuators: vec![
                spec("ventilador", 0, 10, Some(60)),
                spec("led", 1, 5, None),
                spec("bomba", 2, 15, Some(30)),
            ],
        }
    }

    /// Four-class sound-ambience model driving the RGB indicator.
    pub fn reference_category() -> Self {
        let class = |label: &str, mode| ClassSpec {
            label: label.to_string(),
            mode,
        };
        Self::Category {
            indicator: "led".to_string(),
            classes: vec![
                class("moderate activity", IndicatorMode::Yellow),
                class("calm ambience", IndicatorMode::Green),
                class("unexpected peak", IndicatorMode::Blue),
                class("elevated noise", IndicatorMode::Red),
            ],
        }
    }

    /// Every actuator this policy can command, in declaration order.
    pub fn actuator_ids(&self) -> Vec<String> {
        match self {
            Self::Intensity { actuators } => actuators.iter().map(|a| a.id.clone()).collect(),
            Self::Category { indicator, .. } => vec![indicator.clone()],
        }
    }

    /// Length the prediction output must have, for startup checks.
    pub fn output_len(&self) -> usize {
        match self {
            Self::Intensity { actuators } => {
                actuators.iter().map(|a| a.index + 1).max().unwrap_or(0)
            }
            Self::Category { classes, .. } => classes.len(),
        }
    }
}

impl Default for DecisionPolicy {
    fn default() -> Self {
        Self::reference_intensity()
    }
}

// ---------------------------------------------------------------------------
// Translator
// ---------------------------------------------------------------------------

pub struct DecisionTranslator {
    policy: DecisionPolicy,
}

impl DecisionTranslator {
    pub fn new(policy: DecisionPolicy) -> Self {
        Self { policy }
    }

    pub fn policy(&self) -> &DecisionPolicy {
        &self.policy
    }

    /// Map a prediction to one command per actuator, stamped `automated`.
    pub fn translate(
        &self,
        prediction: &Prediction,
        timestamp: f64,
    ) -> Result<BTreeMap<String, ActuatorCommand>, InferenceError> {
        match (&self.policy, prediction) {
            (DecisionPolicy::Intensity { actuators }, Prediction::Intensities(values)) => {
                actuators
                    .iter()
                    .map(|spec| {
                        let cmd = intensity_command(spec, values, timestamp)?;
                        Ok((spec.id.clone(), cmd))
                    })
                    .collect()
            }
            (DecisionPolicy::Category { indicator, classes }, Prediction::Class(idx)) => {
                let class = classes.get(*idx).ok_or_else(|| {
                    InferenceError::MalformedOutput(format!(
                        "class {idx} outside {}-class map",
                        classes.len()
                    ))
                })?;
                let on = class.mode != IndicatorMode::Off;
                let cmd = ActuatorCommand {
                    actuator_id: indicator.clone(),
                    action: if on { Action::On } else { Action::Off },
                    intensity: if on { 100 } else { 0 },
                    duration: None,
                    timestamp,
                    source: CommandSource::Automated,
                    mode: Some(class.mode),
                };
                Ok(BTreeMap::from([(indicator.clone(), cmd)]))
            }
            (DecisionPolicy::Intensity { .. }, Prediction::Class(_)) => Err(
                InferenceError::MalformedOutput("class index under intensity policy".into()),
            ),
            (DecisionPolicy::Category { .. }, Prediction::Intensities(_)) => Err(
                InferenceError::MalformedOutput("intensity vector under category policy".into()),
            ),
        }
    }
}

fn intensity_command(
    spec: &ActuatorSpec,
    values: &[f32],
    timestamp: f64,
) -> Result<ActuatorCommand, InferenceError> {
    let p = *values.get(spec.index).ok_or_else(|| {
        InferenceError::MalformedOutput(format!(
            "no intensity at index {} for '{}' ({} outputs)",
            spec.index,
            spec.id,
            values.len()
        ))
    })?;
    if !p.is_finite() {
        return Err(InferenceError::MalformedOutput(format!(
            "non-finite intensity for '{}'",
            spec.id
        )));
    }

    let percent = (p * 100.0).trunc() as i32;
    let cmd = if percent > i32::from(spec.threshold_percent) {
        ActuatorCommand {
            actuator_id: spec.id.clone(),
            action: Action::On,
            intensity: percent.min(100) as u8,
            duration: spec.duration_secs,
            timestamp,
            source: CommandSource::Automated,
            mode: None,
        }
    } else {
        ActuatorCommand {
            actuator_id: spec.id.clone(),
            action: Action::Off,
            intensity: 0,
            duration: None,
            timestamp,
            source: CommandSource::Automated,
            mode: None,
        }
    };
    Ok(cmd)
}
