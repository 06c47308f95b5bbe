//! Host logger backend for the `log` facade.
//!
//! Writes `2025-03-14T19:30:00.123Z INFO  soundagent::scheduler: message`
//! lines to stderr.  The maximum level comes from `AGENT_LOG`
//! (`error`, `warn`, `info`, `debug`, `trace`; default `info`).

use std::io::Write;

use chrono::{SecondsFormat, Utc};
use log::{LevelFilter, Log, Metadata, Record};

/// Environment variable holding the log level.
pub const LOG_ENV: &str = "AGENT_LOG";

struct ConsoleLogger;

static LOGGER: ConsoleLogger = ConsoleLogger;

impl Log for ConsoleLogger {
    fn enabled(&self, metadata: &Metadata<'_>) -> bool {
        metadata.level() <= log::max_level()
    }

    fn log(&self, record: &Record<'_>) {
        if !self.enabled(record.metadata()) {
            return;
        }
        let ts = Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true);
        let mut err = std::io::stderr().lock();
        let _ = writeln!(
            err,
            "{ts} {:<5} {}: {}",
            record.level(),
            record.target(),
            record.args()
        );
    }

    fn flush(&self) {
        let _ = std::io::stderr().flush();
    }
}

/// Parse a level name; unknown names fall back to `Info`.
pub fn parse_level(s: &str) -> LevelFilter {
    s.trim().parse().unwrap_or(LevelFilter::Info)
}

/// Install the logger.  Fails if another logger is already set.
pub fn init() -> Result<(), log::SetLoggerError> {
    let level = std::env::var(LOG_ENV).map_or(LevelFilter::Info, |v| parse_level(&v));
    log::set_logger(&LOGGER)?;
    log::set_max_level(level);
    Ok(())
}
