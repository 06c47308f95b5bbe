//! Adapters: concrete implementations of the hexagonal port traits.
//!
//! | Adapter       | Implements    | Connects to                   |
//! |---------------|---------------|-------------------------------|
//! | `mqtt`        | ActuatorPort  | MQTT broker (rumqttc)         |
//! |               | ingest thread | telemetry, control, status    |
//! | `open_meteo`  | ContextPort   | Open-Meteo forecast API (ureq)|
//! | `log_sink`    | EventSink     | `log` facade                  |
//! | `clock`       | Clock         | host wall clock               |
//! | `console_log` | `log::Log`    | stderr                        |
//! | `os_signal`   | StopSignal    | SIGINT / SIGTERM (ctrlc)      |

pub mod clock;
pub mod console_log;
pub mod log_sink;
pub mod mqtt;
pub mod open_meteo;
pub mod os_signal;
