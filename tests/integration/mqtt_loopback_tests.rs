//! The real MQTT adapter against an in-process MQTT 3.1.1 broker on
//! loopback: subscriptions, presence, telemetry in, and the final shutoff
//! written before the disconnect.

use std::io::{self, Read, Write};
use std::net::{TcpListener, TcpStream};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use soundagent::adapters::mqtt::{self, MqttPublisher};
use soundagent::app::service::AgentService;
use soundagent::channels::Links;
use soundagent::config::{AgentConfig, MqttConfig, TimingConfig};
use soundagent::decision::{Action, ActuatorCommand, CommandSource};
use soundagent::inference::InferenceWorker;
use soundagent::scheduler::ControlLoop;

use crate::mock_ports::{FixedClock, MockModel, RecordingSink};

/// What the broker saw over one session.
#[derive(Default)]
struct Session {
    subscriptions: Vec<String>,
    publishes: Vec<(String, Vec<u8>)>,
    disconnected: bool,
}

fn read_packet(stream: &mut TcpStream) -> io::Result<(u8, Vec<u8>)> {
    let mut header = [0u8; 1];
    stream.read_exact(&mut header)?;
    let mut len = 0usize;
    let mut shift = 0;
    loop {
        let mut b = [0u8; 1];
        stream.read_exact(&mut b)?;
        len |= usize::from(b[0] & 0x7F) << shift;
        if b[0] & 0x80 == 0 {
            break;
        }
        shift += 7;
    }
    let mut body = vec![0u8; len];
    stream.read_exact(&mut body)?;
    Ok((header[0], body))
}

fn encode_publish(topic: &str, payload: &[u8]) -> Vec<u8> {
    let len = 2 + topic.len() + payload.len();
    let mut out = vec![0x30];
    let mut rem = len;
    loop {
        let mut b = (rem % 128) as u8;
        rem /= 128;
        if rem > 0 {
            b |= 0x80;
        }
        out.push(b);
        if rem == 0 {
            break;
        }
    }
    out.extend_from_slice(&(topic.len() as u16).to_be_bytes());
    out.extend_from_slice(topic.as_bytes());
    out.extend_from_slice(payload);
    out
}

fn send(writer: &Mutex<TcpStream>, bytes: &[u8]) -> io::Result<()> {
    writer.lock().unwrap().write_all(bytes)
}

/// Serve one client until DISCONNECT or EOF.  Once the control topic is
/// subscribed, three readings and then a `shutdown` command are sent.
fn serve(listener: TcpListener, cfg: MqttConfig) -> io::Result<Session> {
    let (mut stream, _) = listener.accept()?;
    stream.set_read_timeout(Some(Duration::from_secs(10)))?;
    let writer = Arc::new(Mutex::new(stream.try_clone()?));
    let mut session = Session::default();

    loop {
        let (header, body) = match read_packet(&mut stream) {
            Ok(p) => p,
            Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => break,
            Err(e) => return Err(e),
        };
        match header >> 4 {
            1 => send(&writer, &[0x20, 0x02, 0x00, 0x00])?,
            3 => {
                let qos = (header >> 1) & 0x03;
                let tlen = usize::from(u16::from_be_bytes([body[0], body[1]]));
                let topic = String::from_utf8_lossy(&body[2..2 + tlen]).into_owned();
                let mut at = 2 + tlen;
                if qos > 0 {
                    let (hi, lo) = (body[at], body[at + 1]);
                    at += 2;
                    let ack = if qos == 1 { 0x40 } else { 0x50 };
                    send(&writer, &[ack, 0x02, hi, lo])?;
                }
                session.publishes.push((topic, body[at..].to_vec()));
            }
            6 => send(&writer, &[0x70, 0x02, body[0], body[1]])?,
            8 => {
                let (hi, lo) = (body[0], body[1]);
                let flen = usize::from(u16::from_be_bytes([body[2], body[3]]));
                let filter = String::from_utf8_lossy(&body[4..4 + flen]).into_owned();
                send(&writer, &[0x90, 0x03, hi, lo, 0x01])?;
                if filter == cfg.control_topic {
                    let writer = writer.clone();
                    let control = cfg.control_topic.clone();
                    thread::spawn(move || {
                        thread::sleep(Duration::from_millis(50));
                        for (sensor, value) in [("rms", 1200.0), ("temperatura", 22.0), ("humedad", 50.0)] {
                            let json = format!(r#"{{"sensor":"{sensor}","value":{value}}}"#);
                            let topic = format!("proyecto/sensores/{sensor}");
                            let _ = send(&writer, &encode_publish(&topic, json.as_bytes()));
                        }
                        thread::sleep(Duration::from_millis(250));
                        let _ = send(&writer, &encode_publish(&control, br#"{"command":"shutdown"}"#));
                    });
                }
                session.subscriptions.push(filter);
            }
            12 => send(&writer, &[0xD0, 0x00])?,
            14 => {
                session.disconnected = true;
                break;
            }
            _ => {}
        }
    }
    Ok(session)
}

#[test]
fn final_shutoff_is_written_before_disconnect() {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let mut cfg = AgentConfig::default();
    cfg.mqtt.host = "127.0.0.1".into();
    cfg.mqtt.port = listener.local_addr().unwrap().port();
    cfg.mqtt.client_id = "soundagent-loopback".into();
    cfg.timing = TimingConfig {
        decision_interval_ms: 40,
        status_interval_ms: 1_000,
        ..TimingConfig::default()
    };

    let broker = {
        let mqtt_cfg = cfg.mqtt.clone();
        thread::spawn(move || serve(listener, mqtt_cfg))
    };

    let links = Links::new();
    let (client, connection) = mqtt::connect(&cfg.mqtt);
    let publisher = MqttPublisher::new(client.clone(), cfg.mqtt.clone());
    let closer = publisher.clone();
    let ingest = mqtt::spawn_ingest(
        client,
        connection,
        cfg.mqtt.clone(),
        links.clone(),
        publisher.delivery(),
    )
    .unwrap();

    let model = MockModel::intensities(&[0.5, 0.5, 0.5]);
    let worker = InferenceWorker::spawn(model, cfg.timing.inference_timeout()).unwrap();
    let service = AgentService::new(&cfg, worker).unwrap();
    let control = ControlLoop::new(
        service,
        publisher,
        RecordingSink::new(),
        FixedClock(1_700_000_000.0),
        cfg.timing.clone(),
        links.clone(),
    );
    let summary = control.run();

    links.stop.raise();
    closer.disconnect();
    ingest.join().unwrap();
    let session = broker.join().unwrap().unwrap();

    assert!(summary.shutoff_delivered);
    assert!(session.disconnected, "client closed without DISCONNECT");
    assert_eq!(summary.stats.messages, 3);
    for topic in ["proyecto/sensores/+", "proyecto/comandos/agente", "proyecto/estado/esp32/+"] {
        assert!(session.subscriptions.iter().any(|s| s == topic), "{topic} not subscribed");
    }

    let presence = session
        .publishes
        .iter()
        .find(|(t, _)| t == "proyecto/estado/rpi/conectado")
        .expect("no presence announcement");
    let presence: serde_json::Value = serde_json::from_slice(&presence.1).unwrap();
    assert_eq!(presence["device_id"], "soundagent-loopback");
    assert_eq!(presence["status"], "connected");
    assert!(presence["timestamp"].as_f64().unwrap() > 0.0);

    for id in ["ventilador", "led", "bomba"] {
        let topic = cfg.mqtt.actuator_topic_for(id);
        let last = session
            .publishes
            .iter()
            .rev()
            .find(|(t, _)| *t == topic)
            .unwrap_or_else(|| panic!("nothing published to {topic}"));
        let cmd: ActuatorCommand = serde_json::from_slice(&last.1).unwrap();
        assert_eq!((cmd.action, cmd.source), (Action::Off, CommandSource::Safety));
    }
}
