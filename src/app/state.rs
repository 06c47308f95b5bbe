//! Latest-value sensor table.
//!
//! One [`SensorReading`] per sensor name, overwritten in place.  No
//! history is kept here; the rolling window for the raw metric lives in
//! the tracker.  The table holds at most [`MAX_SENSORS`] names; readings
//! for new names beyond that are refused.

use heapless::FnvIndexMap;
use serde::{Deserialize, Serialize};

/// Distinct sensor names tracked at once (power of two).
pub const MAX_SENSORS: usize = 32;

/// The most recent value reported by one named sensor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SensorReading {
    pub name: String,
    pub value: f64,
    pub unit: String,
    /// Unix seconds as reported by the device.
    pub timestamp: f64,
}

impl SensorReading {
    pub fn new(name: &str, value: f64, unit: &str, timestamp: f64) -> Self {
        Self {
            name: name.to_string(),
            value,
            unit: unit.to_string(),
            timestamp,
        }
    }
}

/// Sensor name → latest reading, in first-seen order.
#[derive(Debug, Clone, Default)]
pub struct ReadingTable {
    latest: FnvIndexMap<String, SensorReading, MAX_SENSORS>,
}

impl ReadingTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the entry for `reading.name` as a whole.
    ///
    /// Returns `false` (and keeps the table unchanged) when the name is new
    /// and the table is full.
    pub fn apply(&mut self, reading: SensorReading) -> bool {
        self.latest.insert(reading.name.clone(), reading).is_ok()
    }

    pub fn get(&self, name: &str) -> Option<&SensorReading> {
        self.latest.get(name)
    }

    pub fn value(&self, name: &str) -> Option<f64> {
        self.get(name).map(|r| r.value)
    }

    /// Number of distinct sensors that have reported at least once.
    pub fn distinct_sensors(&self) -> usize {
        self.latest.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &SensorReading> {
        self.latest.values()
    }
}
