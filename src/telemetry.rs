//! Inbound wire formats.
//!
//! Telemetry: `{"sensor": "rms", "value": 812.0, "unit": "", "timestamp": 1718000000.0}`.
//! `unit` and `timestamp` are optional; a missing timestamp is stamped
//! with the receive time.  Unknown sensor names are accepted.
//!
//! Control: `{"command": "clear_emergency"}` or `{"command": "shutdown"}`.
//!
//! Device status: `{"device_id": "ESP32_01", "status": "..."}` on
//! `proyecto/estado/esp32/<kind>`; both fields default to `unknown`.

use serde::Deserialize;

use crate::app::commands::AgentCommand;
use crate::app::state::SensorReading;
use crate::error::MessageError;

#[derive(Debug, Deserialize)]
struct RawTelemetry {
    sensor: Option<String>,
    value: Option<serde_json::Value>,
    #[serde(default)]
    unit: Option<String>,
    #[serde(default)]
    timestamp: Option<f64>,
}

/// Decode one telemetry payload into a reading.
///
/// `value` may be a JSON number or a numeric string (the microphone node
/// publishes its RMS as text).
pub fn decode_reading(payload: &[u8], received_at: f64) -> Result<SensorReading, MessageError> {
    let raw: RawTelemetry =
        serde_json::from_slice(payload).map_err(|e| MessageError::Decode(e.to_string()))?;

    let sensor = raw
        .sensor
        .filter(|s| !s.trim().is_empty())
        .ok_or(MessageError::InvalidField("sensor"))?;

    let value = match raw.value {
        Some(serde_json::Value::Number(n)) => n.as_f64(),
        Some(serde_json::Value::String(s)) => s.trim().parse::<f64>().ok(),
        _ => None,
    }
    .filter(|v| v.is_finite())
    .ok_or(MessageError::InvalidField("value"))?;

    let timestamp = raw
        .timestamp
        .filter(|t| t.is_finite())
        .unwrap_or(received_at);

    Ok(SensorReading {
        name: sensor,
        value,
        unit: raw.unit.unwrap_or_default(),
        timestamp,
    })
}

#[derive(Debug, Deserialize)]
struct RawControl {
    command: String,
}

/// Decode a control-topic payload.
pub fn decode_command(payload: &[u8]) -> Result<AgentCommand, MessageError> {
    let raw: RawControl =
        serde_json::from_slice(payload).map_err(|e| MessageError::Decode(e.to_string()))?;
    match raw.command.as_str() {
        "clear_emergency" => Ok(AgentCommand::ClearEmergency),
        "shutdown" => Ok(AgentCommand::Shutdown),
        other => Err(MessageError::UnknownCommand(other.to_string())),
    }
}

/// Which status report a field device sent, from the last topic level.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceStatusKind {
    Connected,
    Emergency,
    Other,
}

impl DeviceStatusKind {
    pub fn from_topic(topic: &str) -> Self {
        match topic.rsplit('/').next() {
            Some("conectado") => Self::Connected,
            Some("emergencia") => Self::Emergency,
            _ => Self::Other,
        }
    }
}

/// A field device's self-reported status.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceStatus {
    pub kind: DeviceStatusKind,
    pub device_id: String,
    pub status: String,
}

#[derive(Debug, Deserialize)]
struct RawDeviceStatus {
    #[serde(default)]
    device_id: Option<String>,
    #[serde(default)]
    status: Option<String>,
}

pub fn decode_device_status(
    kind: DeviceStatusKind,
    payload: &[u8],
) -> Result<DeviceStatus, MessageError> {
    let raw: RawDeviceStatus =
        serde_json::from_slice(payload).map_err(|e| MessageError::Decode(e.to_string()))?;
    let unknown = || "unknown".to_string();
    Ok(DeviceStatus {
        kind,
        device_id: raw.device_id.unwrap_or_else(unknown),
        status: raw.status.unwrap_or_else(unknown),
    })
}
