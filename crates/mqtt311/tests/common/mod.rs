//! In-process scripted broker for end-to-end tests.
//!
//! Speaks just enough MQTT 3.1.1 to exercise the client: CONNACK on
//! CONNECT, SUBACK granting the requested QoS, PUBACK for QoS-1 publishes,
//! PINGRESP for PINGREQ. Behavior knobs simulate the failure modes the
//! client must survive: withheld acknowledgements, severed connections,
//! and a silent broker.

use bytes::BytesMut;
use mqtt311_protocol::{
    ConnAckPacket, ConnectReturnCode, Packet, PubAckPacket, SubAckPacket, SubAckReturnCode,
};
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BrokerEvent {
    Connect {
        client_id: String,
        clean_session: bool,
        has_will: bool,
    },
    Subscribe {
        filter: String,
        qos: u8,
        packet_id: u16,
    },
    Unsubscribe {
        filter: String,
    },
    Publish {
        topic: String,
        payload: Vec<u8>,
        packet_id: Option<u16>,
        dup: bool,
        retain: bool,
    },
    PubAck {
        packet_id: u16,
    },
    PingReq,
    Disconnect,
    ConnectionClosed,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct BrokerBehavior {
    /// Swallow the PUBACK for this many initial QoS-1 publishes.
    pub withhold_pubacks: usize,
    /// Sever the TCP connection on the first QoS-1 publish, once.
    pub drop_on_first_publish: bool,
    /// Never answer PINGREQ.
    pub ignore_pings: bool,
}

pub struct ScriptedBroker {
    pub addr: SocketAddr,
    events: Arc<Mutex<Vec<BrokerEvent>>>,
    outbound: mpsc::UnboundedSender<Packet>,
    _handle: tokio::task::JoinHandle<()>,
}

impl ScriptedBroker {
    pub async fn start(behavior: BrokerBehavior) -> Self {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .try_init();

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let events = Arc::new(Mutex::new(Vec::new()));
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        let handle = tokio::spawn(run_broker(
            listener,
            behavior,
            Arc::clone(&events),
            outbound_rx,
        ));
        Self {
            addr,
            events,
            outbound: outbound_tx,
            _handle: handle,
        }
    }

    pub fn host(&self) -> String {
        self.addr.ip().to_string()
    }

    pub fn port(&self) -> u16 {
        self.addr.port()
    }

    pub fn events(&self) -> Vec<BrokerEvent> {
        self.events.lock().unwrap().clone()
    }

    /// Queues a packet for delivery to the currently connected client.
    pub fn deliver(&self, packet: Packet) {
        let _ = self.outbound.send(packet);
    }

    pub fn connect_count(&self) -> usize {
        self.events()
            .iter()
            .filter(|e| matches!(e, BrokerEvent::Connect { .. }))
            .count()
    }

    pub fn publishes(&self) -> Vec<BrokerEvent> {
        self.events()
            .into_iter()
            .filter(|e| matches!(e, BrokerEvent::Publish { .. }))
            .collect()
    }

    pub fn ping_count(&self) -> usize {
        self.events()
            .iter()
            .filter(|e| matches!(e, BrokerEvent::PingReq))
            .count()
    }

    /// Polls the event log until the predicate holds or the deadline
    /// passes. Returns whether it held.
    pub async fn wait_for(
        &self,
        predicate: impl Fn(&[BrokerEvent]) -> bool,
        timeout: Duration,
    ) -> bool {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            if predicate(&self.events()) {
                return true;
            }
            if tokio::time::Instant::now() >= deadline {
                return false;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }
}

async fn run_broker(
    listener: TcpListener,
    behavior: BrokerBehavior,
    events: Arc<Mutex<Vec<BrokerEvent>>>,
    mut outbound: mpsc::UnboundedReceiver<Packet>,
) {
    let mut withheld = 0usize;
    let mut dropped_once = false;
    loop {
        let Ok((stream, _)) = listener.accept().await else {
            return;
        };
        serve_connection(
            stream,
            behavior,
            &events,
            &mut outbound,
            &mut withheld,
            &mut dropped_once,
        )
        .await;
    }
}

fn log(events: &Arc<Mutex<Vec<BrokerEvent>>>, event: BrokerEvent) {
    events.lock().unwrap().push(event);
}

async fn serve_connection(
    mut stream: TcpStream,
    behavior: BrokerBehavior,
    events: &Arc<Mutex<Vec<BrokerEvent>>>,
    outbound: &mut mpsc::UnboundedReceiver<Packet>,
    withheld: &mut usize,
    dropped_once: &mut bool,
) {
    stream.set_nodelay(true).unwrap();
    let mut buf = BytesMut::with_capacity(4096);
    loop {
        tokio::select! {
            read = tokio::io::AsyncReadExt::read_buf(&mut stream, &mut buf) => {
                match read {
                    Ok(0) | Err(_) => {
                        log(events, BrokerEvent::ConnectionClosed);
                        return;
                    }
                    Ok(_) => {}
                }
                while let Some(packet) = try_decode(&mut buf) {
                    if !handle_packet(
                        packet,
                        &mut stream,
                        behavior,
                        events,
                        withheld,
                        dropped_once,
                    )
                    .await
                    {
                        return;
                    }
                }
            }
            delivery = outbound.recv() => {
                if let Some(packet) = delivery {
                    send(&mut stream, &packet).await;
                }
            }
        }
    }
}

/// Returns `false` when the connection should end (DISCONNECT or a scripted
/// severance).
async fn handle_packet(
    packet: Packet,
    stream: &mut TcpStream,
    behavior: BrokerBehavior,
    events: &Arc<Mutex<Vec<BrokerEvent>>>,
    withheld: &mut usize,
    dropped_once: &mut bool,
) -> bool {
    match packet {
        Packet::Connect(connect) => {
            log(
                events,
                BrokerEvent::Connect {
                    client_id: connect.client_id,
                    clean_session: connect.clean_session,
                    has_will: connect.will.is_some(),
                },
            );
            send(
                stream,
                &Packet::ConnAck(ConnAckPacket {
                    session_present: false,
                    return_code: ConnectReturnCode::Accepted,
                }),
            )
            .await;
        }
        Packet::Subscribe(subscribe) => {
            let filter = &subscribe.filters[0];
            log(
                events,
                BrokerEvent::Subscribe {
                    filter: filter.filter.clone(),
                    qos: filter.qos.as_u8(),
                    packet_id: subscribe.packet_id,
                },
            );
            let return_codes = subscribe
                .filters
                .iter()
                .map(|f| SubAckReturnCode::Granted(f.qos))
                .collect();
            send(
                stream,
                &Packet::SubAck(SubAckPacket {
                    packet_id: subscribe.packet_id,
                    return_codes,
                }),
            )
            .await;
        }
        Packet::Unsubscribe(unsubscribe) => {
            log(
                events,
                BrokerEvent::Unsubscribe {
                    filter: unsubscribe.filters[0].clone(),
                },
            );
            send(
                stream,
                &Packet::UnsubAck(mqtt311_protocol::UnsubAckPacket::new(unsubscribe.packet_id)),
            )
            .await;
        }
        Packet::Publish(publish) => {
            log(
                events,
                BrokerEvent::Publish {
                    topic: publish.topic.clone(),
                    payload: publish.payload.to_vec(),
                    packet_id: publish.packet_id,
                    dup: publish.dup,
                    retain: publish.retain,
                },
            );
            if let Some(packet_id) = publish.packet_id {
                if behavior.drop_on_first_publish && !*dropped_once {
                    *dropped_once = true;
                    log(events, BrokerEvent::ConnectionClosed);
                    return false;
                }
                if *withheld < behavior.withhold_pubacks {
                    *withheld += 1;
                } else {
                    send(stream, &Packet::PubAck(PubAckPacket::new(packet_id))).await;
                }
            }
        }
        Packet::PubAck(ack) => {
            log(events, BrokerEvent::PubAck { packet_id: ack.packet_id });
        }
        Packet::PingReq => {
            log(events, BrokerEvent::PingReq);
            if !behavior.ignore_pings {
                send(stream, &Packet::PingResp).await;
            }
        }
        Packet::Disconnect => {
            log(events, BrokerEvent::Disconnect);
            return false;
        }
        other => panic!("client sent unexpected packet: {other:?}"),
    }
    true
}

/// Frames one packet out of the accumulation buffer, or `None` if more
/// bytes are needed.
fn try_decode(buf: &mut BytesMut) -> Option<Packet> {
    if buf.len() < 2 {
        return None;
    }
    let mut remaining: u32 = 0;
    let mut shift: u32 = 0;
    let mut idx = 1usize;
    loop {
        if idx >= buf.len() {
            return None;
        }
        let byte = buf[idx];
        remaining |= u32::from(byte & 0x7F) << shift;
        idx += 1;
        if byte & 0x80 == 0 {
            break;
        }
        shift += 7;
        assert!(shift <= 21, "malformed remaining length from client");
    }
    let total = idx + remaining as usize;
    if buf.len() < total {
        return None;
    }
    let mut frame = buf.split_to(total).freeze();
    Some(Packet::decode(&mut frame).expect("client sent a malformed packet"))
}

async fn send(stream: &mut TcpStream, packet: &Packet) {
    let mut buf = BytesMut::new();
    packet.encode(&mut buf).unwrap();
    let _ = stream.write_all(&buf).await;
    let _ = stream.flush().await;
}
