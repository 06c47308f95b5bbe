//! AgentService against mock ports: decision cycle, emergency override,
//! context staleness and startup integrity checks.

use soundagent::app::commands::AgentCommand;
use soundagent::app::events::{AgentEvent, SkipReason};
use soundagent::app::service::{AgentService, CycleOutcome};
use soundagent::app::state::MAX_SENSORS;
use soundagent::config::AgentConfig;
use soundagent::context::{ContextSnapshot, WeatherCategory};
use soundagent::encoder::FEATURE_COUNT;
use soundagent::decision::{Action, CommandSource, DecisionPolicy, IndicatorMode, Prediction};
use soundagent::error::{ConfigError, ContextError, InferenceError};
use soundagent::safety::Mode;
use soundagent::telemetry::{DeviceStatusKind, decode_device_status};

use crate::mock_ports::{MockBus, MockModel, RecordingSink, reading};

fn service(model: MockModel) -> AgentService<MockModel> {
    AgentService::new(&AgentConfig::default(), model).unwrap()
}

/// rms + two environmental sensors, all below their ceilings.
fn feed_normal(svc: &mut AgentService<MockModel>, bus: &mut MockBus, sink: &mut RecordingSink) {
    svc.handle_reading(reading("rms", 3000.0), 1.0, bus, sink);
    svc.handle_reading(reading("temperatura", 24.0), 1.0, bus, sink);
    svc.handle_reading(reading("humedad", 60.0), 1.0, bus, sink);
}

// ── Decision cycle ────────────────────────────────────────────

#[test]
fn full_cycle_publishes_one_automated_command_per_actuator() {
    let mut svc = service(MockModel::intensities(&[0.5, 0.03, 0.75]));
    let (mut bus, mut sink) = (MockBus::new(), RecordingSink::new());
    feed_normal(&mut svc, &mut bus, &mut sink);

    let out = svc.run_decision_cycle(10.0, &mut bus, &mut sink);
    assert_eq!(
        out,
        CycleOutcome::Published {
            commands: 3,
            published: 3
        }
    );
    assert_eq!(bus.automated().len(), 3);
    let fan = bus.last_for("ventilador").unwrap();
    assert_eq!((fan.action, fan.intensity, fan.duration), (Action::On, 50, Some(60)));
    assert_eq!(bus.last_for("led").unwrap().action, Action::Off);
    assert_eq!(bus.last_for("bomba").unwrap().intensity, 75);
    assert!(bus.commands.iter().all(|c| c.timestamp == 10.0));
    assert_eq!(svc.stats().run, 1);
}

#[test]
fn cycle_feeds_tracker_and_encoder_from_raw_metric() {
    let mut svc = service(MockModel::intensities(&[0.0, 0.0, 0.0]));
    let (mut bus, mut sink) = (MockBus::new(), RecordingSink::new());
    feed_normal(&mut svc, &mut bus, &mut sink);
    svc.apply_context(Ok(ContextSnapshot::new(false, WeatherCategory::Sunny)), &mut sink);

    svc.run_decision_cycle(1.0, &mut bus, &mut sink);
    svc.run_decision_cycle(2.0, &mut bus, &mut sink);
    assert_eq!(svc.tracker().window().len(), 2);
    assert_eq!(svc.tracker().total_observed(), 2);
}

#[test]
fn too_few_sensors_is_a_quiet_skip() {
    let mut svc = service(MockModel::intensities(&[0.9, 0.9, 0.9]));
    let (mut bus, mut sink) = (MockBus::new(), RecordingSink::new());
    svc.handle_reading(reading("rms", 100.0), 1.0, &mut bus, &mut sink);
    svc.handle_reading(reading("luz", 300.0), 1.0, &mut bus, &mut sink);

    let out = svc.run_decision_cycle(2.0, &mut bus, &mut sink);
    assert_eq!(
        out,
        CycleOutcome::Skipped(SkipReason::InsufficientSensors { have: 2, need: 3 })
    );
    assert!(bus.commands.is_empty());
}

#[test]
fn missing_raw_metric_skips() {
    let mut svc = service(MockModel::intensities(&[0.9, 0.9, 0.9]));
    let (mut bus, mut sink) = (MockBus::new(), RecordingSink::new());
    for name in ["temperatura", "humedad", "luz"] {
        svc.handle_reading(reading(name, 20.0), 1.0, &mut bus, &mut sink);
    }
    let out = svc.run_decision_cycle(2.0, &mut bus, &mut sink);
    assert_eq!(out, CycleOutcome::Skipped(SkipReason::NoRawMetric));
    assert!(bus.commands.is_empty());
}

#[test]
fn inference_failure_is_fail_stationary() {
    let mut svc = service(MockModel::failing(InferenceError::Unavailable("offline".into())));
    let (mut bus, mut sink) = (MockBus::new(), RecordingSink::new());
    feed_normal(&mut svc, &mut bus, &mut sink);

    let out = svc.run_decision_cycle(5.0, &mut bus, &mut sink);
    assert!(matches!(out, CycleOutcome::Failed(InferenceError::Unavailable(_))));
    assert!(bus.commands.is_empty());
    assert_eq!(svc.stats().failed, 1);
    assert_eq!(sink.count(|e| matches!(e, AgentEvent::CycleFailed(_))), 1);
}

#[test]
fn malformed_prediction_aborts_cycle() {
    let mut model = MockModel::intensities(&[0.5, 0.5, 0.5]);
    model.output = Ok(soundagent::decision::Prediction::Intensities(vec![0.5]));
    let mut svc = service(model);
    let (mut bus, mut sink) = (MockBus::new(), RecordingSink::new());
    feed_normal(&mut svc, &mut bus, &mut sink);

    let out = svc.run_decision_cycle(5.0, &mut bus, &mut sink);
    assert!(matches!(out, CycleOutcome::Failed(InferenceError::MalformedOutput(_))));
    assert!(bus.commands.is_empty());
}

#[test]
fn slow_inference_is_discarded_as_timeout() {
    let mut cfg = AgentConfig::default();
    cfg.timing.inference_timeout_ms = 5;
    let mut model = MockModel::intensities(&[0.9, 0.9, 0.9]);
    model.delay = Some(std::time::Duration::from_millis(40));
    let mut svc = AgentService::new(&cfg, model).unwrap();
    let (mut bus, mut sink) = (MockBus::new(), RecordingSink::new());
    feed_normal(&mut svc, &mut bus, &mut sink);

    let out = svc.run_decision_cycle(5.0, &mut bus, &mut sink);
    assert_eq!(out, CycleOutcome::Failed(InferenceError::Timeout));
    assert!(bus.commands.is_empty());
}

#[test]
fn category_policy_drives_indicator_mode() {
    let mut cfg = AgentConfig::default();
    cfg.decision = DecisionPolicy::reference_category();
    let mut svc = AgentService::new(&cfg, MockModel::class(1, 4)).unwrap();
    let (mut bus, mut sink) = (MockBus::new(), RecordingSink::new());
    feed_normal(&mut svc, &mut bus, &mut sink);

    svc.run_decision_cycle(3.0, &mut bus, &mut sink);
    assert_eq!(bus.commands.len(), 1);
    assert_eq!(bus.commands[0].actuator_id, "led");
    assert_eq!(bus.commands[0].mode, Some(IndicatorMode::Green));
}

// ── Context ───────────────────────────────────────────────────

#[test]
fn context_timeout_keeps_stale_snapshot_and_cycle_proceeds() {
    let mut svc = service(MockModel::intensities(&[0.2, 0.2, 0.2]));
    let (mut bus, mut sink) = (MockBus::new(), RecordingSink::new());
    let good = ContextSnapshot::new(true, WeatherCategory::Foggy);
    svc.apply_context(Ok(good), &mut sink);
    svc.apply_context(Err(ContextError::Timeout), &mut sink);
    assert_eq!(*svc.context(), good);

    feed_normal(&mut svc, &mut bus, &mut sink);
    let out = svc.run_decision_cycle(4.0, &mut bus, &mut sink);
    assert!(matches!(out, CycleOutcome::Published { .. }));
    assert_eq!(sink.count(|e| matches!(e, AgentEvent::ContextStale(_))), 1);
}

// ── Emergency ─────────────────────────────────────────────────

#[test]
fn noise_breach_publishes_safety_off_before_next_cycle() {
    let mut svc = service(MockModel::intensities(&[0.9, 0.9, 0.9]));
    let (mut bus, mut sink) = (MockBus::new(), RecordingSink::new());
    feed_normal(&mut svc, &mut bus, &mut sink);

    svc.handle_reading(reading("ruido", 92.0), 7.0, &mut bus, &mut sink);

    assert_eq!(svc.mode(), Mode::Emergency);
    let safety = bus.safety();
    assert_eq!(safety.len(), 3);
    for id in ["ventilador", "led", "bomba"] {
        let c = bus.last_for(id).unwrap();
        assert_eq!((c.action, c.intensity, c.source), (Action::Off, 0, CommandSource::Safety));
    }
    assert_eq!(bus.notices.len(), 1);
    assert!(bus.notices[0].reason.contains("ruido"));
    assert!(bus.automated().is_empty());
}

#[test]
fn no_automated_commands_while_in_emergency() {
    let mut svc = service(MockModel::intensities(&[0.9, 0.9, 0.9]));
    let (mut bus, mut sink) = (MockBus::new(), RecordingSink::new());
    feed_normal(&mut svc, &mut bus, &mut sink);
    svc.handle_reading(reading("temperatura", 50.0), 1.0, &mut bus, &mut sink);
    // Reading drops back below the ceiling: still Emergency.
    svc.handle_reading(reading("temperatura", 20.0), 2.0, &mut bus, &mut sink);

    for t in 0..5 {
        let out = svc.run_decision_cycle(10.0 + f64::from(t), &mut bus, &mut sink);
        assert_eq!(out, CycleOutcome::Skipped(SkipReason::Emergency));
    }
    assert!(bus.automated().is_empty());
    assert_eq!(bus.safety().len(), 3);
}

#[test]
fn repeated_breaches_publish_once() {
    let mut svc = service(MockModel::intensities(&[0.9, 0.9, 0.9]));
    let (mut bus, mut sink) = (MockBus::new(), RecordingSink::new());
    svc.handle_reading(reading("ruido", 95.0), 1.0, &mut bus, &mut sink);
    svc.handle_reading(reading("ruido", 99.0), 2.0, &mut bus, &mut sink);
    svc.handle_reading(reading("humedad", 99.0), 3.0, &mut bus, &mut sink);

    assert_eq!(bus.safety().len(), 3);
    assert_eq!(bus.notices.len(), 1);
    assert_eq!(svc.monitor().state().triggered_at, Some(1.0));
    assert_eq!(sink.count(|e| matches!(e, AgentEvent::EmergencyTriggered { .. })), 1);
}

#[test]
fn clear_command_resumes_automated_decisions() {
    let mut svc = service(MockModel::intensities(&[0.5, 0.5, 0.5]));
    let (mut bus, mut sink) = (MockBus::new(), RecordingSink::new());
    feed_normal(&mut svc, &mut bus, &mut sink);
    svc.handle_reading(reading("ruido", 91.0), 1.0, &mut bus, &mut sink);
    svc.handle_reading(reading("ruido", 40.0), 2.0, &mut bus, &mut sink);

    assert!(!svc.handle_command(AgentCommand::ClearEmergency, &mut sink));
    assert_eq!(svc.mode(), Mode::Normal);
    let out = svc.run_decision_cycle(3.0, &mut bus, &mut sink);
    assert!(matches!(out, CycleOutcome::Published { commands: 3, .. }));
    assert_eq!(bus.automated().len(), 3);
}

#[test]
fn clearing_while_breach_persists_retrips_on_next_cycle() {
    let mut svc = service(MockModel::intensities(&[0.5, 0.5, 0.5]));
    let (mut bus, mut sink) = (MockBus::new(), RecordingSink::new());
    feed_normal(&mut svc, &mut bus, &mut sink);
    svc.handle_reading(reading("ruido", 91.0), 1.0, &mut bus, &mut sink);
    svc.clear_emergency(&mut sink);

    let out = svc.run_decision_cycle(2.0, &mut bus, &mut sink);
    assert_eq!(out, CycleOutcome::Skipped(SkipReason::Emergency));
    assert_eq!(svc.mode(), Mode::Emergency);
    assert!(bus.automated().is_empty());
    assert_eq!(bus.safety().len(), 6);
}

#[test]
fn undelivered_shutoff_is_retried_every_tick() {
    let mut svc = service(MockModel::intensities(&[0.5, 0.5, 0.5]));
    let (mut bus, mut sink) = (MockBus::new(), RecordingSink::new());
    bus.offline = true;
    svc.handle_reading(reading("humedad", 97.0), 1.0, &mut bus, &mut sink);
    assert!(svc.monitor().shutoff_pending());
    assert!(bus.commands.is_empty());
    assert_eq!(sink.count(|e| matches!(e, AgentEvent::SafetyPublishFailed(_))), 1);

    svc.run_decision_cycle(2.0, &mut bus, &mut sink);
    assert!(svc.monitor().shutoff_pending());

    bus.offline = false;
    svc.run_decision_cycle(3.0, &mut bus, &mut sink);
    assert!(!svc.monitor().shutoff_pending());
    assert_eq!(bus.safety().len(), 3);
    assert!(bus.safety().iter().all(|c| c.timestamp == 3.0));

    svc.run_decision_cycle(4.0, &mut bus, &mut sink);
    assert_eq!(bus.safety().len(), 3);
}

#[test]
fn shutdown_switches_everything_off_from_normal() {
    let mut svc = service(MockModel::intensities(&[0.9, 0.9, 0.9]));
    let (mut bus, mut sink) = (MockBus::new(), RecordingSink::new());
    feed_normal(&mut svc, &mut bus, &mut sink);
    svc.run_decision_cycle(1.0, &mut bus, &mut sink);

    assert!(svc.handle_command(AgentCommand::Shutdown, &mut sink));
    assert!(svc.shutdown(2.0, &mut bus, &mut sink));
    for id in ["ventilador", "led", "bomba"] {
        let c = bus.last_for(id).unwrap();
        assert_eq!((c.action, c.source), (Action::Off, CommandSource::Safety));
    }
    assert_eq!(bus.notices.len(), 1);
    assert_eq!(svc.mode(), Mode::Emergency);
}

// ── Startup integrity ─────────────────────────────────────────

#[test]
fn missing_bound_refuses_to_start() {
    let mut cfg = AgentConfig::default();
    cfg.features.bounds.remove("weather_soleado");
    let err = AgentService::new(&cfg, MockModel::intensities(&[0.0; 3])).err().unwrap();
    assert_eq!(err, ConfigError::MissingBound("weather_soleado".into()));
}

#[test]
fn model_output_must_fit_policy() {
    let err = AgentService::new(&AgentConfig::default(), MockModel::intensities(&[0.0; 2]))
        .err()
        .unwrap();
    assert!(matches!(err, ConfigError::ValidationFailed(_)));

    let mut cfg = AgentConfig::default();
    cfg.decision = DecisionPolicy::reference_category();
    assert!(AgentService::new(&cfg, MockModel::class(0, 3)).is_err());
}

#[test]
fn status_reflects_state() {
    let mut svc = service(MockModel::intensities(&[0.5, 0.5, 0.5]));
    let (mut bus, mut sink) = (MockBus::new(), RecordingSink::new());
    feed_normal(&mut svc, &mut bus, &mut sink);
    svc.record_rejected();
    svc.run_decision_cycle(1.0, &mut bus, &mut sink);

    let s = svc.status();
    assert_eq!(s.mode, Mode::Normal);
    assert_eq!(s.sensors, 3);
    assert_eq!(s.stats.messages, 3);
    assert_eq!(s.stats.rejected_messages, 1);
    assert_eq!(s.stats.run, 1);
    assert!(s.readings.iter().any(|(n, v, _)| n == "rms" && *v == 3000.0));
}

// ── Scheduler hooks ───────────────────────────────────────────

#[test]
fn prediction_landing_after_a_breach_is_dropped() {
    let mut svc = service(MockModel::intensities(&[0.9, 0.9, 0.9]));
    let (mut bus, mut sink) = (MockBus::new(), RecordingSink::new());
    feed_normal(&mut svc, &mut bus, &mut sink);

    let features = svc.begin_cycle(5.0, &mut bus, &mut sink).unwrap();
    assert_eq!(features.len(), FEATURE_COUNT);
    // Breach arrives while the model is busy.
    svc.handle_reading(reading("ruido", 97.0), 5.5, &mut bus, &mut sink);

    let answer = Ok(Prediction::Intensities(vec![0.9, 0.9, 0.9]));
    let out = svc.finish_cycle(answer, 6.0, &mut bus, &mut sink);
    assert_eq!(out, CycleOutcome::Skipped(SkipReason::Emergency));
    assert!(bus.automated().is_empty());
    assert_eq!(svc.stats().run, 0);
}

#[test]
fn overrun_is_counted_once() {
    let mut svc = service(MockModel::intensities(&[0.0; 3]));
    let mut sink = RecordingSink::new();
    svc.record_overrun(&mut sink);
    svc.record_overrun(&mut sink);

    let stats = svc.stats();
    assert_eq!((stats.overruns, stats.skipped), (2, 0));
    assert_eq!(
        sink.count(|e| matches!(e, AgentEvent::CycleSkipped(SkipReason::Overrun))),
        2
    );
}

#[test]
fn sensor_table_is_bounded() {
    let mut svc = service(MockModel::intensities(&[0.0; 3]));
    let (mut bus, mut sink) = (MockBus::new(), RecordingSink::new());
    for i in 0..MAX_SENSORS {
        svc.handle_reading(reading(&format!("s{i}"), 1.0), 1.0, &mut bus, &mut sink);
    }
    assert_eq!(svc.stats().rejected_messages, 0);

    svc.handle_reading(reading("one_too_many", 1.0), 1.0, &mut bus, &mut sink);
    svc.handle_reading(reading("s0", 2.0), 1.0, &mut bus, &mut sink);

    assert_eq!(svc.readings().distinct_sensors(), MAX_SENSORS);
    assert_eq!(svc.stats().rejected_messages, 1);
    assert_eq!(svc.readings().value("s0"), Some(2.0));
    assert_eq!(svc.readings().value("one_too_many"), None);
}

#[test]
fn shutdown_is_undelivered_when_the_transport_cannot_flush() {
    let mut svc = service(MockModel::intensities(&[0.0; 3]));
    let (mut bus, mut sink) = (MockBus::new(), RecordingSink::new());
    bus.flush_fails = true;

    assert!(!svc.shutdown(9.0, &mut bus, &mut sink));
    assert_eq!(bus.safety().len(), 3);
    assert_eq!(
        sink.count(|e| matches!(e, AgentEvent::SafetyPublishFailed(_))),
        1
    );

    bus.flush_fails = false;
    assert!(svc.shutdown(10.0, &mut bus, &mut sink));
}

#[test]
fn device_status_is_reported_not_acted_on() {
    let mut svc = service(MockModel::intensities(&[0.0; 3]));
    let mut sink = RecordingSink::new();
    let status =
        decode_device_status(DeviceStatusKind::Emergency, br#"{"device_id":"esp32-1"}"#).unwrap();
    svc.handle_device_status(status, &mut sink);

    assert_eq!(svc.mode(), Mode::Normal);
    assert_eq!(svc.stats().messages, 1);
    assert!(sink.events.iter().any(|e| matches!(
        e,
        AgentEvent::DeviceStatus(d)
            if d.kind == DeviceStatusKind::Emergency && d.device_id == "esp32-1" && d.status == "unknown"
    )));
}
