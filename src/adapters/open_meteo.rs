//! Open-Meteo context source.
//!
//! Implements [`ContextPort`] with a blocking `ureq` GET against the
//! forecast endpoint, asking for the current weather plus today's
//! sunrise/sunset in the configured timezone.  All three timestamps come
//! back in the same local time base, so the day/night decision needs no
//! timezone arithmetic.

use std::time::Duration;

use chrono::NaiveDateTime;
use log::debug;
use serde::Deserialize;

use crate::app::ports::ContextPort;
use crate::config::LocationConfig;
use crate::context::{ContextSnapshot, WeatherCategory, is_daytime};
use crate::error::ContextError;

/// Open-Meteo local time format (`2024-06-10T14:00`).
const TIME_FORMAT: &str = "%Y-%m-%dT%H:%M";

#[derive(Debug, Deserialize)]
struct ForecastResponse {
    current_weather: CurrentWeather,
    daily: Daily,
}

#[derive(Debug, Deserialize)]
struct CurrentWeather {
    time: String,
    weathercode: i64,
    #[serde(default)]
    temperature: Option<f32>,
    #[serde(default)]
    windspeed: Option<f32>,
}

#[derive(Debug, Deserialize)]
struct Daily {
    sunrise: Vec<String>,
    sunset: Vec<String>,
}

fn parse_time(field: &'static str, s: &str) -> Result<NaiveDateTime, ContextError> {
    NaiveDateTime::parse_from_str(s, TIME_FORMAT)
        .map_err(|e| ContextError::Malformed(format!("{field} '{s}': {e}")))
}

/// Parse a forecast body into a snapshot.
pub fn parse_forecast(body: &str) -> Result<ContextSnapshot, ContextError> {
    let resp: ForecastResponse =
        serde_json::from_str(body).map_err(|e| ContextError::Malformed(e.to_string()))?;

    let now = parse_time("current_weather.time", &resp.current_weather.time)?;
    let sunrise = resp
        .daily
        .sunrise
        .first()
        .ok_or_else(|| ContextError::Malformed("daily.sunrise is empty".into()))?;
    let sunset = resp
        .daily
        .sunset
        .first()
        .ok_or_else(|| ContextError::Malformed("daily.sunset is empty".into()))?;
    let sunrise = parse_time("daily.sunrise", sunrise)?;
    let sunset = parse_time("daily.sunset", sunset)?;

    Ok(ContextSnapshot {
        is_day: is_daytime(now, sunrise, sunset),
        weather: WeatherCategory::from_code(resp.current_weather.weathercode),
        outdoor_temp_c: resp.current_weather.temperature,
        wind_speed_kmh: resp.current_weather.windspeed,
    })
}

/// Weather poller bound to one location.
pub struct OpenMeteoSource {
    agent: ureq::Agent,
    url: String,
}

impl OpenMeteoSource {
    pub fn new(location: &LocationConfig, timeout: Duration) -> Self {
        let agent = ureq::AgentBuilder::new()
            .timeout(timeout)
            .user_agent(concat!("soundagent/", env!("CARGO_PKG_VERSION")))
            .build();
        Self {
            agent,
            url: forecast_url(location),
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

/// Full request URL for `location`.
pub fn forecast_url(location: &LocationConfig) -> String {
    format!(
        "{}?latitude={:.4}&longitude={:.4}&current_weather=true&daily=sunrise,sunset&timezone={}",
        location.endpoint,
        location.latitude,
        location.longitude,
        location.timezone.replace('/', "%2F"),
    )
}

fn is_timeout(t: &ureq::Transport) -> bool {
    let mut source = std::error::Error::source(t);
    while let Some(err) = source {
        if let Some(io) = err.downcast_ref::<std::io::Error>() {
            return matches!(
                io.kind(),
                std::io::ErrorKind::TimedOut | std::io::ErrorKind::WouldBlock
            );
        }
        source = err.source();
    }
    false
}

impl ContextPort for OpenMeteoSource {
    fn poll(&mut self) -> Result<ContextSnapshot, ContextError> {
        let resp = match self.agent.get(&self.url).call() {
            Ok(resp) => resp,
            Err(ureq::Error::Status(code, _)) => {
                return Err(ContextError::Network(format!("HTTP {code}")));
            }
            Err(ureq::Error::Transport(t)) if is_timeout(&t) => {
                return Err(ContextError::Timeout);
            }
            Err(ureq::Error::Transport(t)) => {
                return Err(ContextError::Network(t.to_string()));
            }
        };
        let body = resp
            .into_string()
            .map_err(|e| ContextError::Malformed(e.to_string()))?;
        let snapshot = parse_forecast(&body)?;
        debug!(
            "Context: {} / {} ({:?} °C)",
            if snapshot.is_day { "day" } else { "night" },
            snapshot.weather,
            snapshot.outdoor_temp_c
        );
        Ok(snapshot)
    }
}
