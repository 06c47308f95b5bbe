//! MQTT transport.
//!
//! - [`MqttPublisher`] implements [`ActuatorPort`] on a `rumqttc::Client`.
//!   Publishing never blocks the control loop: requests are queued with
//!   `try_publish` and a full queue is reported as a transport error.
//! - [`spawn_ingest`] drives the `rumqttc::Connection` on its own thread,
//!   classifies every incoming publish by topic and forwards it to the
//!   control loop over the inbound channel.
//!
//! ```text
//!  broker ──▶ Connection (ingest thread) ──▶ Links::inbound ──▶ control loop
//!  control loop ──▶ MqttPublisher ──▶ Client request queue ──▶ broker
//! ```
//!
//! The event loop writes one queued request per iteration, so a publish
//! accepted by `try_publish` has not left the process until the ingest
//! thread has seen its `Outgoing::Publish`.  [`Delivery`] counts both
//! sides; [`ActuatorPort::flush`] waits for them to meet.  After the stop
//! signal the ingest thread keeps driving the connection until the
//! `Disconnect` queued by [`MqttPublisher::disconnect`] is written.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use chrono::Utc;
use log::{debug, info, warn};
use rumqttc::{Client, Connection, Event, MqttOptions, Outgoing, Packet, QoS};
use serde::Serialize;

use crate::app::ports::ActuatorPort;
use crate::channels::{Inbound, Links};
use crate::config::MqttConfig;
use crate::decision::ActuatorCommand;
use crate::error::PublishError;
use crate::safety::EmergencyNotice;
use crate::telemetry::DeviceStatusKind;

/// Client request queue depth.
const REQUEST_CAPACITY: usize = 64;

/// Back-off after a connection error before the event loop reconnects.
const RECONNECT_DELAY: Duration = Duration::from_secs(2);

/// Longest the ingest thread keeps draining after stop.
const DRAIN_LIMIT: Duration = Duration::from_secs(10);

const FLUSH_POLL: Duration = Duration::from_millis(10);

/// Open a client/connection pair for `cfg`.  Nothing touches the network
/// until the connection is iterated.
pub fn connect(cfg: &MqttConfig) -> (Client, Connection) {
    let mut opts = MqttOptions::new(cfg.client_id.clone(), cfg.host.clone(), cfg.port);
    opts.set_keep_alive(Duration::from_secs(u64::from(cfg.keep_alive_secs.max(5))));
    opts.set_clean_session(true);
    Client::new(opts, REQUEST_CAPACITY)
}

// ───────────────────────────────────────────────────────────────
// Delivery accounting
// ───────────────────────────────────────────────────────────────

/// Publishes accepted into the client queue vs. written to the socket.
#[derive(Debug, Default)]
pub struct Delivery {
    queued: AtomicU64,
    sent: AtomicU64,
}

impl Delivery {
    pub fn record_queued(&self) {
        self.queued.fetch_add(1, Ordering::SeqCst);
    }

    pub fn record_sent(&self) {
        self.sent.fetch_add(1, Ordering::SeqCst);
    }

    /// Accepted but not yet written.
    pub fn pending(&self) -> u64 {
        self.queued
            .load(Ordering::SeqCst)
            .saturating_sub(self.sent.load(Ordering::SeqCst))
    }

    /// Block until every publish queued before this call has been written.
    pub fn wait_sent(&self, timeout: Duration) -> Result<(), PublishError> {
        let target = self.queued.load(Ordering::SeqCst);
        let deadline = Instant::now() + timeout;
        loop {
            let sent = self.sent.load(Ordering::SeqCst);
            if sent >= target {
                return Ok(());
            }
            if Instant::now() >= deadline {
                return Err(PublishError::Transport(format!(
                    "{} of {target} publishes still unsent after {} ms",
                    target - sent,
                    timeout.as_millis()
                )));
            }
            std::thread::sleep(FLUSH_POLL);
        }
    }
}

fn publish_json(
    client: &Client,
    delivery: &Delivery,
    topic: String,
    qos: QoS,
    payload: &impl Serialize,
) -> Result<(), PublishError> {
    let bytes = serde_json::to_vec(payload).map_err(|e| PublishError::Encode(e.to_string()))?;
    client
        .try_publish(topic, qos, false, bytes)
        .map_err(|e| PublishError::Transport(e.to_string()))?;
    delivery.record_queued();
    Ok(())
}

// ───────────────────────────────────────────────────────────────
// Topic routing
// ───────────────────────────────────────────────────────────────

/// MQTT filter match supporting `+` and a trailing `#`.
pub fn topic_matches(filter: &str, topic: &str) -> bool {
    let mut f = filter.split('/');
    let mut t = topic.split('/');
    loop {
        match (f.next(), t.next()) {
            (Some("#"), _) => return true,
            (Some("+"), Some(_)) => {}
            (Some(a), Some(b)) if a == b => {}
            (None, None) => return true,
            _ => return false,
        }
    }
}

/// Classify one incoming publish.  `None` for unrelated topics and
/// oversized payloads.
pub fn route(cfg: &MqttConfig, topic: &str, payload: &[u8]) -> Option<Inbound> {
    if topic == cfg.control_topic {
        return Inbound::control(payload);
    }
    if topic_matches(&cfg.telemetry_topic, topic) {
        return Inbound::telemetry(payload);
    }
    if topic_matches(&cfg.device_status_topic, topic) {
        return Inbound::device_status(DeviceStatusKind::from_topic(topic), payload);
    }
    None
}

// ───────────────────────────────────────────────────────────────
// Ingest thread
// ───────────────────────────────────────────────────────────────

#[derive(Serialize)]
struct Presence<'a> {
    device_id: &'a str,
    status: &'static str,
    timestamp: f64,
}

fn on_connected(client: &Client, cfg: &MqttConfig, delivery: &Delivery) {
    for topic in [&cfg.telemetry_topic, &cfg.control_topic, &cfg.device_status_topic] {
        if let Err(e) = client.try_subscribe(topic.as_str(), QoS::AtLeastOnce) {
            warn!("MQTT: subscribe to {topic} failed: {e}");
        }
    }
    let presence = Presence {
        device_id: &cfg.client_id,
        status: "connected",
        timestamp: Utc::now().timestamp_millis() as f64 / 1000.0,
    };
    let topic = cfg.presence_topic.clone();
    if let Err(e) = publish_json(client, delivery, topic, QoS::ExactlyOnce, &presence) {
        warn!("MQTT: presence publish failed: {e}");
    }
}

/// Spawn the ingest thread.
///
/// Until stop it forwards inbound traffic.  After stop it only drains:
/// queued publishes keep flowing out and the thread exits once the
/// `Disconnect` is written, the connection fails, or [`DRAIN_LIMIT`]
/// passes.
pub fn spawn_ingest(
    client: Client,
    mut connection: Connection,
    cfg: MqttConfig,
    links: Links,
    delivery: Arc<Delivery>,
) -> std::io::Result<JoinHandle<()>> {
    std::thread::Builder::new()
        .name("mqtt-ingest".into())
        .spawn(move || {
            info!("MQTT: connecting to {}:{}", cfg.host, cfg.port);
            let mut drain_until: Option<Instant> = None;
            for notification in connection.iter() {
                let stopping = links.stop.is_raised();
                if stopping {
                    let until = *drain_until.get_or_insert_with(|| Instant::now() + DRAIN_LIMIT);
                    if Instant::now() >= until {
                        warn!("MQTT: drain limit reached, {} publishes unsent", delivery.pending());
                        break;
                    }
                }
                match notification {
                    Ok(Event::Incoming(Packet::ConnAck(_))) => {
                        info!("MQTT: connected, subscribing");
                        on_connected(&client, &cfg, &delivery);
                    }
                    Ok(Event::Incoming(Packet::Publish(p))) if !stopping => {
                        match route(&cfg, &p.topic, &p.payload) {
                            Some(msg) => {
                                links.push_inbound(msg);
                            }
                            None => debug!("MQTT: ignoring {} ({} bytes)", p.topic, p.payload.len()),
                        }
                    }
                    Ok(Event::Outgoing(Outgoing::Publish(_))) => delivery.record_sent(),
                    Ok(Event::Outgoing(Outgoing::Disconnect)) => {
                        info!("MQTT: disconnect sent");
                        break;
                    }
                    Ok(_) => {}
                    Err(e) if stopping => {
                        warn!("MQTT: connection lost while draining ({e}), {} publishes unsent", delivery.pending());
                        break;
                    }
                    Err(e) => {
                        warn!("MQTT: connection error: {e}");
                        let _ = links.stop.sleep(RECONNECT_DELAY);
                    }
                }
            }
            info!("MQTT: ingest stopped");
        })
}

// ───────────────────────────────────────────────────────────────
// Publisher
// ───────────────────────────────────────────────────────────────

#[derive(Clone)]
pub struct MqttPublisher {
    client: Client,
    cfg: MqttConfig,
    delivery: Arc<Delivery>,
}

impl MqttPublisher {
    pub fn new(client: Client, cfg: MqttConfig) -> Self {
        Self {
            client,
            cfg,
            delivery: Arc::default(),
        }
    }

    /// Shared counters; hand these to [`spawn_ingest`].
    pub fn delivery(&self) -> Arc<Delivery> {
        self.delivery.clone()
    }

    /// Queue a clean disconnect after everything already published.
    pub fn disconnect(&self) {
        if let Err(e) = self.client.try_disconnect() {
            warn!("MQTT: disconnect request failed: {e}");
        }
    }
}

impl ActuatorPort for MqttPublisher {
    fn publish_command(&mut self, cmd: &ActuatorCommand) -> Result<(), PublishError> {
        let topic = self.cfg.actuator_topic_for(&cmd.actuator_id);
        publish_json(&self.client, &self.delivery, topic, QoS::AtLeastOnce, cmd)
    }

    fn publish_emergency(&mut self, notice: &EmergencyNotice) -> Result<(), PublishError> {
        let topic = self.cfg.emergency_topic.clone();
        publish_json(&self.client, &self.delivery, topic, QoS::AtLeastOnce, notice)
    }

    fn flush(&mut self, timeout: Duration) -> Result<(), PublishError> {
        self.delivery.wait_sent(timeout)
    }
}
