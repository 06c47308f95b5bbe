//! Agent service: the hexagonal core.
//!
//! [`AgentService`] owns every piece of shared mutable state (latest
//! readings, context snapshot, emergency monitor, rolling tracker) and is
//! the only writer of each.  Ports are injected at call sites, so the
//! whole decision path is testable with mock adapters.
//!
//! ```text
//!  telemetry ──▶ ┌───────────────────────────────┐ ──▶ ActuatorPort
//!                │          AgentService          │
//!  context   ──▶ │ Readings · Context · Emergency │ ──▶ EventSink
//!                │ Tracker · Encoder · Translator │
//!                └───────────────┬───────────────┘
//!                                ▼
//!                          InferencePort
//! ```

use std::time::{Duration, Instant};

use log::{debug, error, info, warn};

use crate::config::AgentConfig;
use crate::context::ContextSnapshot;
use crate::decision::{ActuatorCommand, DecisionPolicy, DecisionTranslator, Prediction};
use crate::encoder::{FEATURE_COUNT, FeatureEncoder, FeatureVector};
use crate::error::{ConfigError, ContextError, InferenceError, PublishError};
use crate::safety::{EmergencyMonitor, Mode};
use crate::telemetry::DeviceStatus;
use crate::tracker::RollingFeatureTracker;

use super::commands::AgentCommand;
use super::events::{AgentEvent, CycleStats, SkipReason, StatusReport};
use super::ports::{ActuatorPort, EventSink, InferencePort};
use super::state::{ReadingTable, SensorReading};

/// Result of one decision tick.
#[derive(Debug, Clone, PartialEq)]
pub enum CycleOutcome {
    /// Automated commands were produced; `published` of them reached the bus.
    Published { commands: usize, published: usize },
    Skipped(SkipReason),
    /// Aborted; nothing was published and actuators keep their last state.
    Failed(InferenceError),
}

// ───────────────────────────────────────────────────────────────
// AgentService
// ───────────────────────────────────────────────────────────────

pub struct AgentService<I: InferencePort> {
    inference: I,
    readings: ReadingTable,
    context: ContextSnapshot,
    tracker: RollingFeatureTracker,
    encoder: FeatureEncoder,
    translator: DecisionTranslator,
    monitor: EmergencyMonitor,
    raw_metric: String,
    min_sensors: usize,
    inference_timeout: Duration,
    shutdown_flush: Duration,
    safety_attempts: u8,
    stats: CycleStats,
}

impl<I: InferencePort> AgentService<I> {
    /// Construct the service and run every deployment-time integrity check.
    ///
    /// Fails if a normalization bound is missing, if the model input width
    /// differs from the feature vector, or if the model output cannot feed
    /// the configured decision policy.  None of these are recoverable.
    pub fn new(config: &AgentConfig, inference: I) -> Result<Self, ConfigError> {
        config.validate()?;
        let encoder = FeatureEncoder::new(&config.features.bounds)?;

        if inference.input_len() != FEATURE_COUNT {
            return Err(ConfigError::FeatureLengthMismatch {
                expected: FEATURE_COUNT,
                actual: inference.input_len(),
            });
        }
        let needed = config.decision.output_len();
        let fits = match &config.decision {
            DecisionPolicy::Intensity { .. } => inference.output_len() >= needed,
            DecisionPolicy::Category { .. } => inference.output_len() == needed,
        };
        if !fits {
            return Err(ConfigError::ValidationFailed(
                "model output width does not match decision policy",
            ));
        }

        let monitor = EmergencyMonitor::new(
            config.safety.thresholds.clone(),
            config.decision.actuator_ids(),
        );

        Ok(Self {
            inference,
            readings: ReadingTable::new(),
            context: ContextSnapshot::default(),
            tracker: RollingFeatureTracker::new(config.features.window_capacity),
            encoder,
            translator: DecisionTranslator::new(config.decision.clone()),
            monitor,
            raw_metric: config.features.raw_metric.clone(),
            min_sensors: config.features.min_sensors,
            inference_timeout: config.timing.inference_timeout(),
            shutdown_flush: config.timing.shutdown_flush(),
            safety_attempts: config.safety.publish_attempts,
            stats: CycleStats::default(),
        })
    }

    pub fn start(&self, sink: &mut impl EventSink) {
        sink.emit(&AgentEvent::Started {
            actuators: self.monitor.managed_actuators().len(),
            features: FEATURE_COUNT,
        });
        info!(
            "AgentService started: raw metric '{}', min sensors {}, actuators {:?}",
            self.raw_metric,
            self.min_sensors,
            self.monitor.managed_actuators()
        );
    }

    // ── Inbound ───────────────────────────────────────────────

    /// Apply one decoded reading, then check the hard thresholds.
    ///
    /// A breach trips Emergency here, before the next decision tick, and
    /// the shutoff is published immediately.
    pub fn handle_reading(
        &mut self,
        reading: SensorReading,
        now: f64,
        act: &mut impl ActuatorPort,
        sink: &mut impl EventSink,
    ) {
        debug!("reading {}={} {}", reading.name, reading.value, reading.unit);
        self.stats.messages += 1;
        let name = reading.name.clone();
        if !self.readings.apply(reading) {
            warn!("Sensor table full, dropping reading for new sensor '{name}'");
            self.stats.rejected_messages += 1;
            return;
        }
        self.check_emergency(now, act, sink);
    }

    /// Count a message that failed to decode.  State is untouched.
    pub fn record_rejected(&mut self) {
        self.stats.rejected_messages += 1;
    }

    /// Swap in a fresh context snapshot, or keep the stale one on failure.
    pub fn apply_context(
        &mut self,
        result: Result<ContextSnapshot, ContextError>,
        sink: &mut impl EventSink,
    ) {
        match result {
            Ok(snapshot) => {
                self.context = snapshot;
                sink.emit(&AgentEvent::ContextUpdated(snapshot));
            }
            Err(e) => {
                warn!("Context poll failed ({e}), keeping previous snapshot");
                sink.emit(&AgentEvent::ContextStale(e));
            }
        }
    }

    /// Surface a field device's status report.  Informational only: a
    /// device-side emergency does not trip this agent's monitor.
    pub fn handle_device_status(&mut self, status: DeviceStatus, sink: &mut impl EventSink) {
        self.stats.messages += 1;
        sink.emit(&AgentEvent::DeviceStatus(status));
    }

    /// Process an operator command.  Returns `true` when the agent should stop.
    pub fn handle_command(&mut self, cmd: AgentCommand, sink: &mut impl EventSink) -> bool {
        match cmd {
            AgentCommand::ClearEmergency => {
                self.clear_emergency(sink);
                false
            }
            AgentCommand::Shutdown => {
                info!("Shutdown requested over control topic");
                true
            }
        }
    }

    // ── Decision cycle ────────────────────────────────────────

    /// Run one decision cycle with a blocking inference call.
    ///
    /// Emergency check → data sufficiency → tracker → encoder → inference
    /// → translate → publish, strictly in that order.  A call that overruns
    /// the inference budget is discarded once it returns.
    pub fn run_decision_cycle(
        &mut self,
        now: f64,
        act: &mut impl ActuatorPort,
        sink: &mut impl EventSink,
    ) -> CycleOutcome {
        let features = match self.begin_cycle(now, act, sink) {
            Ok(f) => f,
            Err(outcome) => return outcome,
        };
        let started = Instant::now();
        let mut prediction = self.inference.infer(&features);
        let elapsed = started.elapsed();
        if prediction.is_ok() && elapsed > self.inference_timeout {
            warn!(
                "Inference took {} ms (budget {} ms), result discarded",
                elapsed.as_millis(),
                self.inference_timeout.as_millis()
            );
            prediction = Err(InferenceError::Timeout);
        }
        self.finish_cycle(prediction, now, act, sink)
    }

    /// First half of a cycle: everything up to the model input.
    ///
    /// `Err` carries the outcome of a cycle that ends here (emergency or
    /// insufficient data).  On `Ok` the caller runs inference and hands the
    /// result to [`finish_cycle`](Self::finish_cycle).
    pub fn begin_cycle(
        &mut self,
        now: f64,
        act: &mut impl ActuatorPort,
        sink: &mut impl EventSink,
    ) -> Result<FeatureVector, CycleOutcome> {
        self.check_emergency(now, act, sink);
        if self.monitor.is_emergency() {
            if self.monitor.shutoff_pending() {
                let cmds = self.monitor.safety_commands(now);
                self.publish_shutoff(&cmds, act, sink);
            }
            return Err(self.skip(SkipReason::Emergency, sink));
        }

        let have = self.readings.distinct_sensors();
        if have < self.min_sensors {
            return Err(self.skip(
                SkipReason::InsufficientSensors {
                    have,
                    need: self.min_sensors,
                },
                sink,
            ));
        }
        let Some(raw) = self.readings.value(&self.raw_metric) else {
            return Err(self.skip(SkipReason::NoRawMetric, sink));
        };

        let (avg, std) = self.tracker.observe(raw);
        let features = self.encoder.encode(raw, avg, std, &self.context);
        debug!("features {:?}", features.as_slice());
        Ok(features)
    }

    /// Second half of a cycle: translate and publish a prediction.
    ///
    /// Emergency may have tripped while inference ran; the prediction is
    /// then dropped and nothing automated is published.
    pub fn finish_cycle(
        &mut self,
        prediction: Result<Prediction, InferenceError>,
        now: f64,
        act: &mut impl ActuatorPort,
        sink: &mut impl EventSink,
    ) -> CycleOutcome {
        if self.monitor.is_emergency() {
            return self.skip(SkipReason::Emergency, sink);
        }
        let commands = match prediction.and_then(|p| self.translator.translate(&p, now)) {
            Ok(c) => c.into_values().collect::<Vec<_>>(),
            Err(e) => {
                if e.is_transient() {
                    warn!("Decision cycle aborted: {e}");
                } else {
                    error!("Decision cycle aborted, model contract violated: {e}");
                }
                self.stats.failed += 1;
                sink.emit(&AgentEvent::CycleFailed(e.clone()));
                return CycleOutcome::Failed(e);
            }
        };

        self.stats.run += 1;
        let mut published = 0;
        for cmd in &commands {
            match act.publish_command(cmd) {
                Ok(()) => published += 1,
                Err(error) => {
                    warn!("Publish to '{}' failed: {error}", cmd.actuator_id);
                    sink.emit(&AgentEvent::PublishFailed {
                        actuator_id: cmd.actuator_id.clone(),
                        error,
                    });
                }
            }
        }
        sink.emit(&AgentEvent::Decision(commands.clone()));
        CycleOutcome::Published {
            commands: commands.len(),
            published,
        }
    }

    /// Record a tick dropped because the previous cycle overran.
    ///
    /// Counted under `overruns` only, never under `skipped`.
    pub fn record_overrun(&mut self, sink: &mut impl EventSink) {
        self.stats.overruns += 1;
        sink.emit(&AgentEvent::CycleSkipped(SkipReason::Overrun));
    }

    // ── Emergency ─────────────────────────────────────────────

    /// Explicit reset back to Normal.  Returns `true` if the mode changed.
    pub fn clear_emergency(&mut self, sink: &mut impl EventSink) -> bool {
        let cleared = self.monitor.clear();
        if cleared {
            sink.emit(&AgentEvent::EmergencyCleared);
        }
        cleared
    }

    /// Final safety shutoff on stop.  Returns `true` only if every command
    /// was accepted and the transport then flushed within the budget.
    pub fn shutdown(
        &mut self,
        now: f64,
        act: &mut impl ActuatorPort,
        sink: &mut impl EventSink,
    ) -> bool {
        let was_emergency = self.monitor.is_emergency();
        let cmds = self.monitor.trip("agent shutdown".into(), now);
        if !was_emergency {
            self.announce(act, sink);
        }
        if !self.publish_shutoff(&cmds, act, sink) {
            return false;
        }
        match act.flush(self.shutdown_flush) {
            Ok(()) => true,
            Err(e) => {
                error!("FINAL SHUTOFF NOT FLUSHED: {e}");
                sink.emit(&AgentEvent::SafetyPublishFailed(e));
                false
            }
        }
    }

    fn check_emergency(&mut self, now: f64, act: &mut impl ActuatorPort, sink: &mut impl EventSink) {
        if let Some(cmds) = self.monitor.evaluate(&self.readings, now) {
            self.announce(act, sink);
            self.publish_shutoff(&cmds, act, sink);
        }
    }

    fn announce(&mut self, act: &mut impl ActuatorPort, sink: &mut impl EventSink) {
        let Some(notice) = self.monitor.notice() else {
            return;
        };
        sink.emit(&AgentEvent::EmergencyTriggered {
            reason: notice.reason.clone(),
        });
        let attempts = self.safety_attempts;
        if let Err(e) = retry(attempts, || act.publish_emergency(&notice)) {
            error!("Emergency notice not published: {e}");
        }
    }

    /// Publish every safety command, retrying each.  Leaves the shutoff
    /// pending if any command could not be delivered.
    fn publish_shutoff(
        &mut self,
        cmds: &[ActuatorCommand],
        act: &mut impl ActuatorPort,
        sink: &mut impl EventSink,
    ) -> bool {
        let attempts = self.safety_attempts;
        let mut last_err = None;
        for cmd in cmds {
            if let Err(e) = retry(attempts, || act.publish_command(cmd)) {
                error!("SAFETY SHUTOFF NOT DELIVERED to '{}': {e}", cmd.actuator_id);
                last_err = Some(e);
            }
        }
        match last_err {
            None => {
                self.monitor.confirm_shutoff();
                sink.emit(&AgentEvent::SafetyShutoffPublished {
                    actuators: cmds.len(),
                });
                true
            }
            Some(e) => {
                sink.emit(&AgentEvent::SafetyPublishFailed(e));
                false
            }
        }
    }

    // ── Queries ───────────────────────────────────────────────

    pub fn mode(&self) -> Mode {
        self.monitor.state().mode
    }

    pub fn monitor(&self) -> &EmergencyMonitor {
        &self.monitor
    }

    pub fn readings(&self) -> &ReadingTable {
        &self.readings
    }

    pub fn context(&self) -> &ContextSnapshot {
        &self.context
    }

    pub fn tracker(&self) -> &RollingFeatureTracker {
        &self.tracker
    }

    pub fn stats(&self) -> CycleStats {
        self.stats
    }

    pub fn inference_timeout(&self) -> Duration {
        self.inference_timeout
    }

    /// The engine, for callers that run inference off this thread.
    pub fn inference_mut(&mut self) -> &mut I {
        &mut self.inference
    }

    pub fn status(&self) -> StatusReport {
        StatusReport {
            mode: self.mode(),
            sensors: self.readings.distinct_sensors(),
            readings: self
                .readings
                .iter()
                .map(|r| (r.name.clone(), r.value, r.unit.clone()))
                .collect(),
            context: self.context,
            stats: self.stats,
        }
    }

    // ── Internal ──────────────────────────────────────────────

    fn skip(&mut self, reason: SkipReason, sink: &mut impl EventSink) -> CycleOutcome {
        self.stats.skipped += 1;
        debug!("cycle skipped: {reason:?}");
        sink.emit(&AgentEvent::CycleSkipped(reason));
        CycleOutcome::Skipped(reason)
    }
}

/// Call `f` up to `attempts` times, returning the last error.
fn retry(attempts: u8, mut f: impl FnMut() -> Result<(), PublishError>) -> Result<(), PublishError> {
    let mut last = PublishError::Disconnected;
    for _ in 0..attempts.max(1) {
        match f() {
            Ok(()) => return Ok(()),
            Err(e) => last = e,
        }
    }
    Err(last)
}
