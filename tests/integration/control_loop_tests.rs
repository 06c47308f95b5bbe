//! ControlLoop end-to-end: channels in, executor tasks, final shutoff out.

use std::collections::VecDeque;
use std::thread;
use std::time::{Duration, Instant};

use soundagent::app::events::AgentEvent;
use soundagent::app::service::AgentService;
use soundagent::channels::{Inbound, Links};
use soundagent::config::{AgentConfig, TimingConfig};
use soundagent::context::{ContextSnapshot, WeatherCategory};
use soundagent::decision::{Action, CommandSource};
use soundagent::error::ContextError;
use soundagent::inference::InferenceWorker;
use soundagent::scheduler::{ControlLoop, spawn_context_poller};

use crate::mock_ports::{FixedClock, MockModel, ScriptedContext, SharedBus, SharedSink};

fn fast_timing() -> TimingConfig {
    TimingConfig {
        decision_interval_ms: 20,
        context_interval_ms: 15,
        context_retry_ms: 15,
        status_interval_ms: 50,
        ..TimingConfig::default()
    }
}

fn telemetry(links: &Links, json: &str) {
    assert!(links.push_inbound(Inbound::telemetry(json.as_bytes()).unwrap()));
}

/// Push a shutdown command from another thread after `delay`.
fn shutdown_after(links: &Links, delay: Duration) -> thread::JoinHandle<()> {
    let links = links.clone();
    thread::spawn(move || {
        thread::sleep(delay);
        links.push_inbound(Inbound::control(br#"{"command":"shutdown"}"#).unwrap());
    })
}

type TestLoop = ControlLoop<SharedBus, SharedSink, FixedClock>;

fn control_loop(links: &Links, model: MockModel) -> (TestLoop, SharedBus, SharedSink) {
    control_loop_with(links, model, fast_timing())
}

fn control_loop_with(
    links: &Links,
    model: MockModel,
    timing: TimingConfig,
) -> (TestLoop, SharedBus, SharedSink) {
    let mut cfg = AgentConfig::default();
    cfg.timing = timing.clone();
    let worker = InferenceWorker::spawn(model, timing.inference_timeout()).unwrap();
    let service = AgentService::new(&cfg, worker).unwrap();
    let bus = SharedBus::default();
    let sink = SharedSink::default();
    let control = ControlLoop::new(
        service,
        bus.clone(),
        sink.clone(),
        FixedClock(1_700_000_000.0),
        timing,
        links.clone(),
    );
    (control, bus, sink)
}

#[test]
fn runs_cycles_until_shutdown_then_switches_off() {
    let links = Links::new();
    telemetry(&links, r#"{"sensor":"rms","value":"2500.5"}"#);
    telemetry(&links, r#"{"sensor":"temperatura","value":22.0,"unit":"C"}"#);
    telemetry(&links, r#"{"sensor":"humedad","value":55.0,"unit":"%"}"#);
    telemetry(&links, "not json");

    let (control, bus, sink) = control_loop(&links, MockModel::intensities(&[0.5, 0.5, 0.5]));
    let stopper = shutdown_after(&links, Duration::from_millis(150));
    let summary = control.run();
    stopper.join().unwrap();

    assert!(summary.stats.run >= 1, "stats: {:?}", summary.stats);
    assert_eq!(summary.stats.rejected_messages, 1);
    assert!(summary.shutoff_delivered);

    let bus = bus.0.borrow();
    assert!(!bus.automated().is_empty());
    for id in ["ventilador", "led", "bomba"] {
        let last = bus.last_for(id).unwrap();
        assert_eq!((last.action, last.source), (Action::Off, CommandSource::Safety));
    }
    assert_eq!(bus.notices.len(), 1);

    let sink = sink.0.borrow();
    assert_eq!(sink.count(|e| matches!(e, AgentEvent::Started { .. })), 1);
    assert!(sink.count(|e| matches!(e, AgentEvent::Status(_))) >= 1);
}

#[test]
fn breach_in_telemetry_blocks_every_automated_command() {
    let links = Links::new();
    telemetry(&links, r#"{"sensor":"rms","value":900.0}"#);
    telemetry(&links, r#"{"sensor":"temperatura","value":22.0}"#);
    telemetry(&links, r#"{"sensor":"ruido","value":92.0,"unit":"dB"}"#);

    let (control, bus, _sink) = control_loop(&links, MockModel::intensities(&[0.9, 0.9, 0.9]));
    let stopper = shutdown_after(&links, Duration::from_millis(100));
    let summary = control.run();
    stopper.join().unwrap();

    assert_eq!(summary.stats.run, 0);
    assert!(summary.stats.skipped >= 1);
    let bus = bus.0.borrow();
    assert!(bus.automated().is_empty());
    assert!(bus.safety().len() >= 3);
    assert!(bus.notices[0].reason.contains("ruido"));
}

#[test]
fn poller_results_reach_the_service() {
    let links = Links::new();
    let script = VecDeque::from([
        Ok(ContextSnapshot::new(true, WeatherCategory::Foggy)),
        Err(ContextError::Timeout),
    ]);
    let poller =
        spawn_context_poller(ScriptedContext { script }, &fast_timing(), links.clone()).unwrap();

    let (control, _bus, sink) = control_loop(&links, MockModel::intensities(&[0.0, 0.0, 0.0]));
    let stopper = shutdown_after(&links, Duration::from_millis(120));
    control.run();
    stopper.join().unwrap();
    poller.join().unwrap();

    let sink = sink.0.borrow();
    assert!(sink.events.iter().any(|e| matches!(
        e,
        AgentEvent::ContextUpdated(s) if s.weather == WeatherCategory::Foggy && s.is_day
    )));
    assert!(sink.count(|e| matches!(e, AgentEvent::ContextStale(_))) >= 1);
}

#[test]
fn slow_model_does_not_delay_emergency_handling() {
    let links = Links::new();
    telemetry(&links, r#"{"sensor":"rms","value":900.0}"#);
    telemetry(&links, r#"{"sensor":"temperatura","value":22.0}"#);
    telemetry(&links, r#"{"sensor":"humedad","value":50.0}"#);

    let mut model = MockModel::intensities(&[0.9, 0.9, 0.9]);
    model.delay = Some(Duration::from_secs(2));
    let timing = TimingConfig {
        inference_timeout_ms: 100,
        ..fast_timing()
    };
    let (control, bus, sink) = control_loop_with(&links, model, timing);

    // Lands while the first inference call is still sleeping.
    let breach = {
        let links = links.clone();
        thread::spawn(move || {
            thread::sleep(Duration::from_millis(200));
            telemetry(&links, r#"{"sensor":"ruido","value":95.0,"unit":"dB"}"#);
            Instant::now()
        })
    };
    let stopper = shutdown_after(&links, Duration::from_millis(600));
    let summary = control.run();
    let breach_at = breach.join().unwrap();
    stopper.join().unwrap();

    let sink = sink.0.borrow();
    let tripped_at = sink
        .first_at(|e| matches!(e, AgentEvent::EmergencyTriggered { .. }))
        .expect("emergency never triggered");
    let lag = tripped_at.saturating_duration_since(breach_at);
    assert!(lag < Duration::from_millis(300), "emergency handled {lag:?} after breach");

    assert_eq!(summary.stats.run, 0);
    assert!(summary.stats.failed >= 1);
    let bus = bus.0.borrow();
    assert!(bus.automated().is_empty());
    assert!(bus.notices[0].reason.contains("ruido"));
}
