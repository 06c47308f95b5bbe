//! Fuzz target: Open-Meteo forecast parsing
//!
//! The weather API is outside our control; a hostile or truncated body
//! must surface as `ContextError::Malformed`, never as a panic.
//!
//! cargo fuzz run fuzz_forecast_parse

#![no_main]

use libfuzzer_sys::fuzz_target;
use soundagent::adapters::open_meteo::parse_forecast;
use soundagent::error::ContextError;

fuzz_target!(|data: &[u8]| {
    let Ok(body) = std::str::from_utf8(data) else {
        return;
    };
    if let Err(e) = parse_forecast(body) {
        assert!(matches!(e, ContextError::Malformed(_)));
    }
});
