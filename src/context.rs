//! External context: day/night flag and weather category.
//!
//! The weather vocabulary is a closed enumeration.  Provider weather codes
//! map onto it through a total function; anything unmapped lands on
//! [`WeatherCategory::Unknown`], which one-hot encodes as all zeros.
//!
//! Changing [`WeatherCategory::from_code`] changes the feature contract and
//! requires re-deriving the normalization bounds from a new training run.

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

/// Weather categories known to the agent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WeatherCategory {
    Sunny,
    PartlyCloudy,
    Foggy,
    Drizzle,
    Raining,
    Stormy,
    Snowing,
    Unknown,
}

impl WeatherCategory {
    /// Every variant, in declaration order.
    pub const ALL: [WeatherCategory; 8] = [
        Self::Sunny,
        Self::PartlyCloudy,
        Self::Foggy,
        Self::Drizzle,
        Self::Raining,
        Self::Stormy,
        Self::Snowing,
        Self::Unknown,
    ];

    /// Map an Open-Meteo WMO weather code to a category.
    pub fn from_code(code: i64) -> Self {
        match code {
            0 => Self::Sunny,
            1..=3 => Self::PartlyCloudy,
            45 | 48 => Self::Foggy,
            51 | 53 | 55 | 56 | 57 => Self::Drizzle,
            61 | 63 | 65 | 80 | 81 | 82 => Self::Raining,
            71 | 73 | 75 | 77 | 85 | 86 => Self::Snowing,
            95 | 96 | 99 => Self::Stormy,
            _ => Self::Unknown,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Self::Sunny => "sunny",
            Self::PartlyCloudy => "partly_cloudy",
            Self::Foggy => "foggy",
            Self::Drizzle => "drizzle",
            Self::Raining => "raining",
            Self::Stormy => "stormy",
            Self::Snowing => "snowing",
            Self::Unknown => "unknown",
        }
    }
}

impl core::fmt::Display for WeatherCategory {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.label())
    }
}

/// Latest external context.  Replaced wholesale on each successful poll.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ContextSnapshot {
    pub is_day: bool,
    pub weather: WeatherCategory,
    /// Outdoor temperature reported alongside the weather code (°C).
    #[serde(default)]
    pub outdoor_temp_c: Option<f32>,
    /// Wind speed reported alongside the weather code (km/h).
    #[serde(default)]
    pub wind_speed_kmh: Option<f32>,
}

impl ContextSnapshot {
    pub fn new(is_day: bool, weather: WeatherCategory) -> Self {
        Self {
            is_day,
            weather,
            outdoor_temp_c: None,
            wind_speed_kmh: None,
        }
    }
}

impl Default for ContextSnapshot {
    /// Pre-first-poll context: night, unknown weather.
    fn default() -> Self {
        Self::new(false, WeatherCategory::Unknown)
    }
}

/// Day iff `sunrise <= now < sunset`, all in the same local time base.
pub fn is_daytime(now: NaiveDateTime, sunrise: NaiveDateTime, sunset: NaiveDateTime) -> bool {
    sunrise <= now && now < sunset
}
