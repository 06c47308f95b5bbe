//! Sound agent: main entry point.
//!
//! ```text
//! ┌────────────────────────────────────────────────────────────────┐
//! │                      Adapters (outer ring)                     │
//! │                                                                │
//! │  MqttPublisher     OpenMeteoSource   MlpModel     SystemClock  │
//! │  (ActuatorPort)    (ContextPort)     on Inference (Clock)      │
//! │  mqtt ingest thread                  Worker       LogEventSink │
//! │  os_signal (SIGINT/SIGTERM → stop)                (EventSink)  │
//! │                                                                │
//! │  ──────────────── Port Trait Boundary ───────────────────      │
//! │                                                                │
//! │  ┌────────────────────────────────────────────────────────┐    │
//! │  │              AgentService (pure logic)                 │    │
//! │  │  Readings · Context · Emergency · Tracker · Encoder    │    │
//! │  └────────────────────────────────────────────────────────┘    │
//! │                                                                │
//! │  ControlLoop (edge-executor tasks) · context poller thread     │
//! └────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Config path: `AGENT_CONFIG`, else the first argument, else defaults.
#![deny(unused_must_use)]

use std::path::{Path, PathBuf};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use log::{error, info, warn};

use soundagent::adapters::clock::SystemClock;
use soundagent::adapters::console_log;
use soundagent::adapters::log_sink::LogEventSink;
use soundagent::adapters::mqtt::{self, MqttPublisher};
use soundagent::adapters::open_meteo::OpenMeteoSource;
use soundagent::adapters::os_signal;
use soundagent::app::service::AgentService;
use soundagent::channels::Links;
use soundagent::config::{AgentConfig, CONFIG_ENV};
use soundagent::inference::{InferenceWorker, MlpModel};
use soundagent::scheduler::{ControlLoop, spawn_context_poller};

fn config_path() -> Option<PathBuf> {
    std::env::var_os(CONFIG_ENV)
        .map(PathBuf::from)
        .or_else(|| std::env::args_os().nth(1).map(PathBuf::from))
}

/// Longest `main` waits for a background thread before leaving it behind.
const JOIN_LIMIT: Duration = Duration::from_secs(15);

fn join_within(name: &str, handle: JoinHandle<()>, limit: Duration) {
    let deadline = Instant::now() + limit;
    while !handle.is_finished() {
        if Instant::now() >= deadline {
            warn!("{name} thread still running after {} s, not waiting", limit.as_secs());
            return;
        }
        std::thread::sleep(Duration::from_millis(20));
    }
    if handle.join().is_err() {
        error!("{name} thread panicked");
    }
}

fn main() -> Result<()> {
    // ── 1. Logging ────────────────────────────────────────────
    console_log::init().map_err(|e| anyhow::anyhow!("logger init: {e}"))?;
    info!("soundagent v{}", env!("CARGO_PKG_VERSION"));

    // ── 2. Config + model (integrity failures are fatal) ─────
    let path = config_path();
    if path.is_none() {
        warn!("No config given ({CONFIG_ENV} or argv[1]), using defaults");
    }
    let config = AgentConfig::load_or_default(path.as_deref()).context("loading config")?;
    let model = MlpModel::load(Path::new(&config.model_path))
        .with_context(|| format!("loading model {}", config.model_path))?;
    let worker = InferenceWorker::spawn(model, config.timing.inference_timeout())
        .context("spawning inference worker")?;
    let service = AgentService::new(&config, worker).context("startup integrity check")?;

    // ── 3. Transport + background threads ─────────────────────
    let links = Links::new();
    os_signal::forward_to(&links.stop).context("installing signal handler")?;
    let (client, connection) = mqtt::connect(&config.mqtt);
    let publisher = MqttPublisher::new(client.clone(), config.mqtt.clone());
    let closer = publisher.clone();
    let ingest = mqtt::spawn_ingest(
        client,
        connection,
        config.mqtt.clone(),
        links.clone(),
        publisher.delivery(),
    )
    .context("spawning mqtt ingest thread")?;

    let source = OpenMeteoSource::new(&config.location, config.timing.context_timeout());
    info!("Context source: {}", source.url());
    let poller = spawn_context_poller(source, &config.timing, links.clone())
        .context("spawning context poller")?;

    // ── 4. Control loop (returns after the final shutoff) ─────
    let control = ControlLoop::new(
        service,
        publisher,
        LogEventSink::new(),
        SystemClock,
        config.timing.clone(),
        links.clone(),
    );
    let summary = control.run();
    if !summary.shutoff_delivered {
        error!("Final safety shutoff was NOT delivered to every actuator");
    }

    // ── 5. Join ───────────────────────────────────────────────
    links.stop.raise();
    closer.disconnect();
    for (name, handle) in [("mqtt-ingest", ingest), ("context-poll", poller)] {
        join_within(name, handle, JOIN_LIMIT);
    }
    info!(
        "Stopped: {} cycles run, {} skipped, {} failed, {} overruns",
        summary.stats.run, summary.stats.skipped, summary.stats.failed, summary.stats.overruns
    );
    Ok(())
}
