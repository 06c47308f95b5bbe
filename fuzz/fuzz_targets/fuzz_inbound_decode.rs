//! Fuzz target: inbound bus payload decoding
//!
//! Feeds arbitrary bytes through the telemetry and control decoders.
//!
//! Invariants checked:
//! - No panics under any byte sequence
//! - A decoded reading always has a non-empty sensor name and finite value
//! - Applying a decoded reading never makes the emergency monitor panic
//!
//! cargo fuzz run fuzz_inbound_decode

#![no_main]

use libfuzzer_sys::fuzz_target;
use soundagent::app::state::ReadingTable;
use soundagent::safety::{EmergencyMonitor, SafetyThreshold};
use soundagent::telemetry::{decode_command, decode_reading};

fuzz_target!(|data: &[u8]| {
    let _ = decode_command(data);

    let Ok(reading) = decode_reading(data, 0.0) else {
        return;
    };
    assert!(!reading.name.trim().is_empty());
    assert!(reading.value.is_finite());
    assert!(reading.timestamp.is_finite());

    let mut table = ReadingTable::new();
    let limit = SafetyThreshold::reference()
        .into_iter()
        .find(|t| t.sensor == reading.name)
        .map(|t| t.max);
    let value = reading.value;
    table.apply(reading);

    let mut monitor = EmergencyMonitor::new(SafetyThreshold::reference(), vec!["led".into()]);
    let tripped = monitor.evaluate(&table, 0.0).is_some();
    assert_eq!(tripped, limit.is_some_and(|max| value > max));
});
