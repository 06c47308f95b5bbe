//! Wall-clock adapter.

use chrono::Utc;

use crate::app::ports::Clock;

/// Unix seconds from the host clock, millisecond resolution.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> f64 {
        Utc::now().timestamp_millis() as f64 / 1000.0
    }
}
