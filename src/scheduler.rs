//! Control loop scheduler.
//!
//! Runs on one thread using `edge-executor` for cooperative multi-task
//! scheduling and `async-io-mini` for reactor-driven timers.  Every state
//! update runs to completion between await points, so each activity
//! observes a self-consistent snapshot without locks.
//!
//! ```text
//!  ┌──────────────────────────────────────────────────────────────┐
//!  │  Control loop thread                                         │
//!  │  ┌────────────────────────────────────────────────────────┐  │
//!  │  │  edge_executor::LocalExecutor                          │  │
//!  │  │                                                        │  │
//!  │  │  ┌──────────┐ ┌──────────┐ ┌───────────┐ ┌──────────┐  │  │
//!  │  │  │ Ingest   │ │ Context  │ │ Decision  │ │ Status   │  │  │
//!  │  │  │ on recv  │ │ on recv  │ │ 10 s ⏱    │ │ 30 s ⏱   │  │  │
//!  │  │  └──────────┘ └──────────┘ └───────────┘ └──────────┘  │  │
//!  │  └────────────────────────────────────────────────────────┘  │
//!  │        ▲ Inbound          ▲ ContextPoll                      │
//!  └────────┼──────────────────┼──────────────────────────────────┘
//!           │                  │
//!     MQTT ingest thread   context poller thread
//! ```
//!
//! The decision interval is not reentrant: a cycle that overruns its
//! slot causes the missed ticks to be dropped, not queued.  Inference runs
//! on the [`InferenceWorker`] thread and is awaited under the inference
//! timeout, so ingest (and with it the emergency monitor) is never
//! blocked by the model.
//!
//! On stop the executor returns, the spawned tasks are dropped, and a
//! final safety shutoff is published before [`ControlLoop::run`] returns.

use core::cell::RefCell;
use std::rc::Rc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use log::{info, warn};

use crate::app::events::{AgentEvent, CycleStats};
use crate::app::ports::{ActuatorPort, Clock, ContextPort, EventSink};
use crate::app::service::AgentService;
use crate::channels::{Inbound, Links, StopSignal};
use crate::config::TimingConfig;
use crate::decision::Prediction;
use crate::error::InferenceError;
use crate::inference::{InferenceWorker, PendingInference};
use crate::telemetry::{decode_command, decode_device_status, decode_reading};

/// Outcome of a full run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunSummary {
    pub stats: CycleStats,
    /// Whether the final shutoff was written to the transport.
    pub shutoff_delivered: bool,
}

// ── Shared core ──────────────────────────────────────────────

struct Core<A, S, C> {
    service: AgentService<InferenceWorker>,
    actuator: A,
    sink: S,
    clock: C,
}

impl<A, S, C> Core<A, S, C>
where
    A: ActuatorPort,
    S: EventSink,
    C: Clock,
{
    fn handle_inbound(&mut self, msg: Inbound, stop: &StopSignal) {
        let now = self.clock.now();
        match msg {
            Inbound::Telemetry(payload) => match decode_reading(&payload, now) {
                Ok(reading) => {
                    self.service
                        .handle_reading(reading, now, &mut self.actuator, &mut self.sink);
                }
                Err(e) => {
                    warn!("Dropping malformed telemetry: {e}");
                    self.service.record_rejected();
                }
            },
            Inbound::Control(payload) => match decode_command(&payload) {
                Ok(cmd) => {
                    if self.service.handle_command(cmd, &mut self.sink) {
                        stop.raise();
                    }
                }
                Err(e) => {
                    warn!("Dropping control message: {e}");
                    self.service.record_rejected();
                }
            },
            Inbound::DeviceStatus(kind, payload) => match decode_device_status(kind, &payload) {
                Ok(status) => self.service.handle_device_status(status, &mut self.sink),
                Err(e) => {
                    warn!("Dropping device status: {e}");
                    self.service.record_rejected();
                }
            },
        }
    }

    /// Run a cycle up to the model call.  `None` if the cycle ended early.
    fn begin_decision(&mut self) -> Option<Result<PendingInference, InferenceError>> {
        let now = self.clock.now();
        let features = self
            .service
            .begin_cycle(now, &mut self.actuator, &mut self.sink)
            .ok()?;
        Some(self.service.inference_mut().submit(&features))
    }

    fn finish_decision(&mut self, prediction: Result<Prediction, InferenceError>) {
        let now = self.clock.now();
        self.service
            .finish_cycle(prediction, now, &mut self.actuator, &mut self.sink);
    }

    fn shutdown(&mut self) -> bool {
        let now = self.clock.now();
        self.service
            .shutdown(now, &mut self.actuator, &mut self.sink)
    }
}

type Shared<A, S, C> = Rc<RefCell<Core<A, S, C>>>;

// ── Tasks ────────────────────────────────────────────────────

/// Ingest task: wakes on every inbound bus message.
async fn ingest_loop<A, S, C>(core: Shared<A, S, C>, links: Links)
where
    A: ActuatorPort,
    S: EventSink,
    C: Clock,
{
    loop {
        let msg = links.inbound.receive().await;
        core.borrow_mut().handle_inbound(msg, &links.stop);
    }
}

/// Context task: wakes on every poll result from the poller thread.
async fn context_loop<A, S, C>(core: Shared<A, S, C>, links: Links)
where
    A: ActuatorPort,
    S: EventSink,
    C: Clock,
{
    loop {
        let poll = links.context.receive().await;
        let mut core = core.borrow_mut();
        let core = &mut *core;
        core.service.apply_context(poll, &mut core.sink);
    }
}

/// Decision task: one cycle per interval, missed ticks dropped.
///
/// The model runs on the inference worker; the core is released while
/// the answer is awaited so telemetry and emergencies keep flowing.
async fn decision_loop<A, S, C>(core: Shared<A, S, C>, interval: Duration)
where
    A: ActuatorPort,
    S: EventSink,
    C: Clock,
{
    let mut next = Instant::now() + interval;
    loop {
        let wait = next.saturating_duration_since(Instant::now());
        async_io_mini::Timer::after(wait).await;

        let submitted = core.borrow_mut().begin_decision();
        if let Some(submitted) = submitted {
            let prediction = match submitted {
                Ok(pending) => {
                    let timeout = core.borrow().service.inference_timeout();
                    pending.wait(timeout).await
                }
                Err(e) => Err(e),
            };
            core.borrow_mut().finish_decision(prediction);
        }

        next += interval;
        let now = Instant::now();
        let mut core = core.borrow_mut();
        while next <= now {
            warn!("Decision cycle overran its {} ms slot, skipping tick", interval.as_millis());
            let core = &mut *core;
            core.service.record_overrun(&mut core.sink);
            next += interval;
        }
    }
}

/// Status task: periodic snapshot through the event sink.
async fn status_loop<A, S, C>(core: Shared<A, S, C>, interval: Duration)
where
    A: ActuatorPort,
    S: EventSink,
    C: Clock,
{
    loop {
        async_io_mini::Timer::after(interval).await;
        let mut core = core.borrow_mut();
        let report = core.service.status();
        core.sink.emit(&AgentEvent::Status(report));
    }
}

// ── Control loop ─────────────────────────────────────────────

pub struct ControlLoop<A, S, C> {
    core: Core<A, S, C>,
    timing: TimingConfig,
    links: Links,
}

impl<A, S, C> ControlLoop<A, S, C>
where
    A: ActuatorPort,
    S: EventSink,
    C: Clock,
{
    pub fn new(
        service: AgentService<InferenceWorker>,
        actuator: A,
        sink: S,
        clock: C,
        timing: TimingConfig,
        links: Links,
    ) -> Self {
        Self {
            core: Core {
                service,
                actuator,
                sink,
                clock,
            },
            timing,
            links,
        }
    }

    /// Drive every activity until the stop signal is raised, then publish
    /// the final safety shutoff.
    pub fn run(self) -> RunSummary {
        let Self {
            mut core,
            timing,
            links,
        } = self;
        core.service.start(&mut core.sink);

        let shared: Shared<A, S, C> = Rc::new(RefCell::new(core));
        {
            let executor: edge_executor::LocalExecutor<'_, 8> = edge_executor::LocalExecutor::new();

            executor
                .spawn(ingest_loop(shared.clone(), links.clone()))
                .detach();
            executor
                .spawn(context_loop(shared.clone(), links.clone()))
                .detach();
            executor
                .spawn(decision_loop(shared.clone(), timing.decision_interval()))
                .detach();
            executor
                .spawn(status_loop(shared.clone(), timing.status_interval()))
                .detach();

            info!(
                "Control loop started (decision {} ms, status {} ms)",
                timing.decision_interval_ms, timing.status_interval_ms
            );

            futures_lite::future::block_on(executor.run(links.stop.wait()));
        }

        info!("Stop signal raised, shutting actuators off");
        let mut core = shared.borrow_mut();
        let shutoff_delivered = core.shutdown();
        RunSummary {
            stats: core.service.stats(),
            shutoff_delivered,
        }
    }
}

// ── Context poller thread ────────────────────────────────────

/// Spawn the blocking context poller.
///
/// Polls once immediately, then every `context_interval` after a good
/// poll or `context_retry` after a failed one.  Every result, good or
/// bad, is forwarded; the control loop decides what to keep.
pub fn spawn_context_poller<P>(
    mut poller: P,
    timing: &TimingConfig,
    links: Links,
) -> std::io::Result<JoinHandle<()>>
where
    P: ContextPort + Send + 'static,
{
    let interval = timing.context_interval();
    let retry = timing.context_retry();
    std::thread::Builder::new()
        .name("context-poll".into())
        .spawn(move || {
            info!("Context poller started");
            loop {
                if links.stop.is_raised() {
                    break;
                }
                let poll = poller.poll();
                let wait = if poll.is_ok() { interval } else { retry };
                links.push_context(poll);
                if !links.stop.sleep(wait) {
                    break;
                }
            }
            info!("Context poller stopped");
        })
}
