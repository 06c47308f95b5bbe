//! Inter-thread channels and the cooperative stop signal.
//!
//! Uses `embassy-sync` bounded MPMC channels to bridge the blocking I/O
//! threads with the single-threaded control loop.
//!
//! ```text
//! ┌──────────────┐   Inbound    ┌──────────────┐
//! │ MQTT ingest  │────────────▶│              │
//! │  (thread)    │              │ Control loop │
//! ├──────────────┤  ContextPoll │  (executor)  │
//! │ Ctx poller   │────────────▶│              │
//! │  (thread)    │              └──────────────┘
//! └──────────────┘
//! ```

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::channel::Channel;
use heapless::Vec;
use log::warn;

use crate::context::ContextSnapshot;
use crate::error::ContextError;
use crate::telemetry::DeviceStatusKind;

/// Largest inbound payload accepted from the bus.
pub const MAX_PAYLOAD: usize = 1024;

/// Channel depth for inbound bus messages.
const INBOUND_DEPTH: usize = 32;

/// Channel depth for context poll results.
const CONTEXT_DEPTH: usize = 2;

/// How often blocked waiters re-check the stop flag.
const STOP_POLL: Duration = Duration::from_millis(50);

pub type Payload = Vec<u8, MAX_PAYLOAD>;

/// A raw message from the bus, classified by topic.
#[derive(Debug, Clone)]
pub enum Inbound {
    Telemetry(Payload),
    Control(Payload),
    DeviceStatus(DeviceStatusKind, Payload),
}

impl Inbound {
    /// `None` if the payload exceeds [`MAX_PAYLOAD`].
    pub fn telemetry(bytes: &[u8]) -> Option<Self> {
        Vec::from_slice(bytes).ok().map(Self::Telemetry)
    }

    pub fn control(bytes: &[u8]) -> Option<Self> {
        Vec::from_slice(bytes).ok().map(Self::Control)
    }

    pub fn device_status(kind: DeviceStatusKind, bytes: &[u8]) -> Option<Self> {
        Vec::from_slice(bytes).ok().map(|p| Self::DeviceStatus(kind, p))
    }
}

pub type ContextPoll = Result<ContextSnapshot, ContextError>;

pub type InboundChannel = Channel<CriticalSectionRawMutex, Inbound, INBOUND_DEPTH>;
pub type ContextChannel = Channel<CriticalSectionRawMutex, ContextPoll, CONTEXT_DEPTH>;

// ───────────────────────────────────────────────────────────────
// Stop signal
// ───────────────────────────────────────────────────────────────

/// Cooperative cancellation flag shared by every activity.
#[derive(Debug, Clone, Default)]
pub struct StopSignal(Arc<AtomicBool>);

impl StopSignal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn raise(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_raised(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    /// Resolves once the signal is raised.
    pub async fn wait(&self) {
        while !self.is_raised() {
            async_io_mini::Timer::after(STOP_POLL).await;
        }
    }

    /// Blocking sleep for I/O threads.  Returns `false` if stopped early.
    pub fn sleep(&self, total: Duration) -> bool {
        let deadline = Instant::now() + total;
        loop {
            if self.is_raised() {
                return false;
            }
            let left = deadline.saturating_duration_since(Instant::now());
            if left.is_zero() {
                return true;
            }
            std::thread::sleep(left.min(STOP_POLL));
        }
    }
}

// ───────────────────────────────────────────────────────────────
// Shared links
// ───────────────────────────────────────────────────────────────

/// Everything the I/O threads and the control loop share.
#[derive(Clone)]
pub struct Links {
    pub inbound: Arc<InboundChannel>,
    pub context: Arc<ContextChannel>,
    pub stop: StopSignal,
}

impl Links {
    pub fn new() -> Self {
        Self {
            inbound: Arc::new(Channel::new()),
            context: Arc::new(Channel::new()),
            stop: StopSignal::new(),
        }
    }

    /// Hand a bus message to the control loop; drops it when the queue is full.
    pub fn push_inbound(&self, msg: Inbound) -> bool {
        if self.inbound.try_send(msg).is_err() {
            warn!("Inbound channel full, dropping message");
            return false;
        }
        true
    }

    /// Hand a poll result to the control loop; drops it when the queue is full.
    pub fn push_context(&self, poll: ContextPoll) -> bool {
        if self.context.try_send(poll).is_err() {
            warn!("Context channel full, dropping poll result");
            return false;
        }
        true
    }
}

impl Default for Links {
    fn default() -> Self {
        Self::new()
    }
}
