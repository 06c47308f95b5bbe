//! Agent configuration parameters
//!
//! All tunable parameters for the sound agent, grouped by concern.
//! `Default` is the reference deployment; a JSON file may override any
//! subset of fields.

use std::path::Path;
use std::time::Duration;

use log::warn;
use serde::{Deserialize, Serialize};

use crate::decision::DecisionPolicy;
use crate::encoder::NormalizationBounds;
use crate::error::ConfigError;
use crate::safety::SafetyThreshold;
use crate::tracker::{DEFAULT_WINDOW_CAPACITY, MAX_WINDOW_CAPACITY};

/// Environment variable naming the JSON config file.
pub const CONFIG_ENV: &str = "AGENT_CONFIG";

/// Core agent configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentConfig {
    pub mqtt: MqttConfig,
    pub location: LocationConfig,
    pub timing: TimingConfig,
    pub features: FeatureConfig,
    pub safety: SafetyConfig,
    pub decision: DecisionPolicy,
    /// Path to the exported classifier weights (JSON).
    pub model_path: String,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            mqtt: MqttConfig::default(),
            location: LocationConfig::default(),
            timing: TimingConfig::default(),
            features: FeatureConfig::default(),
            safety: SafetyConfig::default(),
            decision: DecisionPolicy::default(),
            model_path: "model.json".into(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MqttConfig {
    pub host: String,
    pub port: u16,
    pub client_id: String,
    pub keep_alive_secs: u16,
    /// Wildcard subscription for inbound telemetry.
    pub telemetry_topic: String,
    /// Actuator command topic; `{id}` is replaced by the actuator id.
    pub actuator_topic: String,
    pub emergency_topic: String,
    pub control_topic: String,
    /// Presence announcement published on every (re)connect.
    pub presence_topic: String,
    /// Wildcard subscription for field-device status reports.
    pub device_status_topic: String,
}

impl Default for MqttConfig {
    fn default() -> Self {
        Self {
            host: "localhost".into(),
            port: 1883,
            client_id: "soundagent".into(),
            keep_alive_secs: 60,
            telemetry_topic: "proyecto/sensores/+".into(),
            actuator_topic: "proyecto/actuadores/{id}".into(),
            emergency_topic: "proyecto/comandos/emergencia".into(),
            control_topic: "proyecto/comandos/agente".into(),
            presence_topic: "proyecto/estado/rpi/conectado".into(),
            device_status_topic: "proyecto/estado/esp32/+".into(),
        }
    }
}

impl MqttConfig {
    pub fn actuator_topic_for(&self, actuator_id: &str) -> String {
        self.actuator_topic.replace("{id}", actuator_id)
    }
}

/// Where the weather context is fetched for.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LocationConfig {
    pub latitude: f64,
    pub longitude: f64,
    /// IANA timezone passed to the forecast provider.
    pub timezone: String,
    pub endpoint: String,
}

impl Default for LocationConfig {
    fn default() -> Self {
        Self {
            latitude: 4.3270,
            longitude: 75.4120,
            timezone: "America/Bogota".into(),
            endpoint: "https://api.open-meteo.com/v1/forecast".into(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TimingConfig {
    /// Decision cycle interval (milliseconds)
    pub decision_interval_ms: u64,
    /// Context poll interval after a good poll (milliseconds)
    pub context_interval_ms: u64,
    /// Context poll interval after a failed poll (milliseconds)
    pub context_retry_ms: u64,
    /// HTTP timeout for one context poll (milliseconds)
    pub context_timeout_ms: u64,
    /// Budget for one inference call (milliseconds)
    pub inference_timeout_ms: u64,
    /// Status report interval (milliseconds)
    pub status_interval_ms: u64,
    /// How long shutdown waits for the final shutoff to leave the process
    /// (milliseconds)
    pub shutdown_flush_ms: u64,
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            decision_interval_ms: 10_000,
            context_interval_ms: 30_000,
            context_retry_ms: 60_000,
            context_timeout_ms: 10_000,
            inference_timeout_ms: 500,
            status_interval_ms: 30_000,
            shutdown_flush_ms: 5_000,
        }
    }
}

impl TimingConfig {
    pub fn decision_interval(&self) -> Duration {
        Duration::from_millis(self.decision_interval_ms)
    }

    pub fn context_interval(&self) -> Duration {
        Duration::from_millis(self.context_interval_ms)
    }

    pub fn context_retry(&self) -> Duration {
        Duration::from_millis(self.context_retry_ms)
    }

    pub fn context_timeout(&self) -> Duration {
        Duration::from_millis(self.context_timeout_ms)
    }

    pub fn inference_timeout(&self) -> Duration {
        Duration::from_millis(self.inference_timeout_ms)
    }

    pub fn status_interval(&self) -> Duration {
        Duration::from_millis(self.status_interval_ms)
    }

    pub fn shutdown_flush(&self) -> Duration {
        Duration::from_millis(self.shutdown_flush_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FeatureConfig {
    /// Sensor whose value feeds the rolling tracker.
    pub raw_metric: String,
    pub window_capacity: usize,
    /// Distinct sensors that must have reported before a cycle runs.
    pub min_sensors: usize,
    pub bounds: NormalizationBounds,
}

impl Default for FeatureConfig {
    fn default() -> Self {
        Self {
            raw_metric: "rms".into(),
            window_capacity: DEFAULT_WINDOW_CAPACITY,
            min_sensors: 3,
            bounds: NormalizationBounds::reference(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SafetyConfig {
    pub thresholds: Vec<SafetyThreshold>,
    /// Attempts per safety publish before it is left pending for the next tick.
    pub publish_attempts: u8,
}

impl Default for SafetyConfig {
    fn default() -> Self {
        Self {
            thresholds: SafetyThreshold::reference(),
            publish_attempts: 3,
        }
    }
}

impl AgentConfig {
    /// Range checks that do not need the model.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let t = &self.timing;
        if t.decision_interval_ms == 0 {
            return Err(ConfigError::ValidationFailed("decision interval must be > 0"));
        }
        if t.context_interval_ms == 0 || t.context_retry_ms == 0 {
            return Err(ConfigError::ValidationFailed("context intervals must be > 0"));
        }
        if t.context_timeout_ms == 0 || t.inference_timeout_ms == 0 {
            return Err(ConfigError::ValidationFailed("timeouts must be > 0"));
        }
        if t.status_interval_ms == 0 {
            return Err(ConfigError::ValidationFailed("status interval must be > 0"));
        }
        if t.shutdown_flush_ms == 0 {
            return Err(ConfigError::ValidationFailed("shutdown flush timeout must be > 0"));
        }

        let f = &self.features;
        if f.raw_metric.trim().is_empty() {
            return Err(ConfigError::ValidationFailed("raw metric name is empty"));
        }
        if f.window_capacity == 0 || f.window_capacity > MAX_WINDOW_CAPACITY {
            return Err(ConfigError::ValidationFailed("window capacity out of range"));
        }
        if f.min_sensors == 0 {
            return Err(ConfigError::ValidationFailed("min sensors must be >= 1"));
        }

        if self.safety.publish_attempts == 0 {
            return Err(ConfigError::ValidationFailed("safety publish attempts must be >= 1"));
        }
        if self
            .safety
            .thresholds
            .iter()
            .any(|th| th.sensor.trim().is_empty() || !th.max.is_finite())
        {
            return Err(ConfigError::ValidationFailed("safety threshold invalid"));
        }

        match &self.decision {
            DecisionPolicy::Intensity { actuators } => {
                if actuators.is_empty() {
                    return Err(ConfigError::ValidationFailed("no actuators configured"));
                }
                if actuators.iter().any(|a| a.threshold_percent > 100) {
                    return Err(ConfigError::ValidationFailed("threshold percent > 100"));
                }
            }
            DecisionPolicy::Category { indicator, classes } => {
                if indicator.trim().is_empty() || classes.is_empty() {
                    return Err(ConfigError::ValidationFailed("category policy incomplete"));
                }
            }
        }

        if self.model_path.trim().is_empty() {
            return Err(ConfigError::ValidationFailed("model path is empty"));
        }
        if !self.mqtt.actuator_topic.contains("{id}") {
            return Err(ConfigError::ValidationFailed("actuator topic lacks {id}"));
        }
        Ok(())
    }

    /// Parse and validate a JSON config file.
    pub fn load_from_file(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|e| ConfigError::Io(e.to_string()))?;
        let cfg: Self = serde_json::from_str(&text).map_err(|e| ConfigError::Parse(e.to_string()))?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Load from `path` if given, else defaults.
    ///
    /// An unreadable file falls back to defaults with a warning; a file that
    /// parses but fails validation is an error.
    pub fn load_or_default(path: Option<&Path>) -> Result<Self, ConfigError> {
        let Some(path) = path else {
            return Ok(Self::default());
        };
        match Self::load_from_file(path) {
            Ok(cfg) => Ok(cfg),
            Err(ConfigError::Io(e)) => {
                warn!("Config {} not readable ({e}), using defaults", path.display());
                Ok(Self::default())
            }
            Err(e) => Err(e),
        }
    }
}
