//! Shared client internals: the socket writer, the protocol serializer
//! lock, acknowledgement waiters, and the exchange state machines that the
//! public API drives.

use crate::options::Options;
use crate::session::{ConnectionStats, SessionState};
use crate::transport::{self, Reader, Writer};
use bytes::{Bytes, BytesMut};
use mqtt311_protocol::{
    ConnectPacket, ConnectReturnCode, ConnectivityEvent, ConnectivityMachine, ConnectivityState,
    MqttError, Packet, PubAckPacket, PublishPacket, QoS, Result, SubAckPacket,
    SubscribePacket, UnsubAckPacket, UnsubscribePacket,
};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::sync::{oneshot, watch, Notify};
use tokio::task::JoinHandle;
use tokio::time::Instant;

use super::reader;

#[derive(Default)]
pub(crate) struct TaskHandles {
    pub(crate) dispatcher: Option<JoinHandle<()>>,
    pub(crate) pinger: Option<JoinHandle<()>>,
    pub(crate) supervisor: Option<JoinHandle<()>>,
}

pub(crate) struct ClientCore {
    pub(crate) options: Options,
    pub(crate) session: Mutex<SessionState>,
    /// The protocol serializer: held for the whole of any
    /// transmit-and-await-reply exchange so two exchanges can never
    /// interleave on the socket.
    pub(crate) op_lock: tokio::sync::Mutex<()>,
    pub(crate) writer: tokio::sync::Mutex<Option<Writer>>,
    machine: Mutex<ConnectivityMachine>,
    state_tx: watch::Sender<ConnectivityState>,
    pub(crate) pending_pubacks: Mutex<HashMap<u16, oneshot::Sender<u16>>>,
    pub(crate) pending_subacks: Mutex<HashMap<u16, oneshot::Sender<SubAckPacket>>>,
    pub(crate) pending_unsubacks: Mutex<HashMap<u16, oneshot::Sender<UnsubAckPacket>>>,
    /// Pulsed by the dispatcher on every decoded packet; the pinger and
    /// `broker_up` block on it instead of polling.
    pub(crate) rx_activity: Notify,
    pub(crate) stats: Mutex<ConnectionStats>,
    pub(crate) has_connected: AtomicBool,
    pub(crate) paused: AtomicBool,
    pub(crate) shutdown: AtomicBool,
    pub(crate) shutdown_notify: Notify,
    link_reported_up: AtomicBool,
    pub(crate) tasks: Mutex<TaskHandles>,
}

impl ClientCore {
    pub(crate) fn new(options: Options) -> Self {
        let (state_tx, _) = watch::channel(ConnectivityState::Down);
        Self {
            options,
            session: Mutex::new(SessionState::new()),
            op_lock: tokio::sync::Mutex::new(()),
            writer: tokio::sync::Mutex::new(None),
            machine: Mutex::new(ConnectivityMachine::new()),
            state_tx,
            pending_pubacks: Mutex::new(HashMap::new()),
            pending_subacks: Mutex::new(HashMap::new()),
            pending_unsubacks: Mutex::new(HashMap::new()),
            rx_activity: Notify::new(),
            stats: Mutex::new(ConnectionStats::default()),
            has_connected: AtomicBool::new(false),
            paused: AtomicBool::new(false),
            shutdown: AtomicBool::new(false),
            shutdown_notify: Notify::new(),
            link_reported_up: AtomicBool::new(false),
            tasks: Mutex::new(TaskHandles::default()),
        }
    }

    pub(crate) fn state(&self) -> ConnectivityState {
        *self.state_tx.borrow()
    }

    pub(crate) fn subscribe_state(&self) -> watch::Receiver<ConnectivityState> {
        self.state_tx.subscribe()
    }

    pub(crate) fn apply_event(&self, event: ConnectivityEvent) -> ConnectivityState {
        let state = self.machine.lock().apply(event);
        self.state_tx.send_replace(state);
        state
    }

    pub(crate) fn is_shutdown(&self) -> bool {
        self.shutdown.load(Ordering::SeqCst)
    }

    pub(crate) fn is_paused(&self) -> bool {
        self.paused.load(Ordering::SeqCst)
    }

    /// Marks the connection as failing; the supervisor picks the transition
    /// up through the state watch. Idempotent once already failing or down.
    pub(crate) fn declare_failing(&self, error: &MqttError) {
        let before = self.state();
        let after = self.apply_event(ConnectivityEvent::Timeout);
        if before != after {
            tracing::warn!(error = %error, "connection failing");
        }
    }

    /// Fires the link callback on edges only.
    pub(crate) fn notify_link(&self, up: bool) {
        let was = self.link_reported_up.swap(up, Ordering::SeqCst);
        if was != up {
            if let Some(callback) = &self.options.on_link_change {
                callback(up);
            }
        }
    }

    /// Parks until the session is live. Fails with `NotConnected` once the
    /// client is shut down or if it never completed an initial connect.
    pub(crate) async fn await_connected(&self) -> Result<()> {
        if !self.has_connected.load(Ordering::SeqCst) {
            return Err(MqttError::NotConnected);
        }
        let mut rx = self.subscribe_state();
        loop {
            if self.is_shutdown() {
                return Err(MqttError::NotConnected);
            }
            if rx.borrow_and_update().is_connected() {
                return Ok(());
            }
            tokio::select! {
                changed = rx.changed() => {
                    if changed.is_err() {
                        return Err(MqttError::NotConnected);
                    }
                }
                () = self.shutdown_notify.notified() => {}
            }
        }
    }

    /// Encodes and writes one packet under the writer mutex. A transport
    /// fault flags the connection as failing before surfacing.
    pub(crate) async fn write_packet(&self, packet: &Packet) -> Result<()> {
        let mut buf = BytesMut::new();
        packet.encode(&mut buf)?;

        let mut writer_guard = self.writer.lock().await;
        let writer = writer_guard.as_mut().ok_or(MqttError::NotConnected)?;
        match transport::write_all(writer, &buf, self.options.response_time).await {
            Ok(()) => {
                self.session.lock().note_tx();
                Ok(())
            }
            Err(e) => {
                drop(writer_guard);
                self.declare_failing(&e);
                Err(e)
            }
        }
    }

    /// Opens the transport and runs the CONNECT/CONNACK handshake. On
    /// success the write half is installed and the read half is returned
    /// for the dispatcher.
    pub(crate) async fn establish(&self, clean: bool) -> Result<Reader> {
        let port = self.options.resolved_port();
        tracing::debug!(server = %self.options.server, port, clean, "opening transport");
        let stream = self
            .options
            .connector
            .connect(&self.options.server, port)
            .await?;
        let (mut reader, mut writer) = tokio::io::split(stream);

        let connect = ConnectPacket {
            client_id: self.options.client_id.clone(),
            clean_session: clean,
            keepalive: self.options.keepalive,
            will: self.options.will.clone(),
            username: self.options.username.clone(),
            password: self.options.password.clone(),
        };
        let mut buf = BytesMut::new();
        Packet::Connect(connect).encode(&mut buf)?;
        transport::write_all(&mut writer, &buf, self.options.response_time).await?;

        let packet = reader::read_packet(&mut reader, Some(self.options.response_time)).await?;
        let connack = match packet {
            Packet::ConnAck(connack) => connack,
            other => return Err(MqttError::UnexpectedPacket(other.packet_type())),
        };
        if connack.return_code != ConnectReturnCode::Accepted {
            return Err(MqttError::ConnectionRefused(connack.return_code));
        }
        tracing::debug!(
            session_present = connack.session_present,
            "CONNACK accepted"
        );

        *self.writer.lock().await = Some(writer);
        self.session.lock().reset_activity();
        Ok(reader)
    }

    /// Stops the dispatcher and pinger, optionally emits DISCONNECT (which
    /// suppresses the will broker-side), closes the socket, and fails every
    /// parked acknowledgement waiter.
    pub(crate) async fn teardown(&self, send_disconnect: bool) {
        let (dispatcher, pinger) = {
            let mut tasks = self.tasks.lock();
            (tasks.dispatcher.take(), tasks.pinger.take())
        };
        if let Some(handle) = dispatcher {
            handle.abort();
        }
        if let Some(handle) = pinger {
            handle.abort();
        }

        let mut writer_guard = self.writer.lock().await;
        if send_disconnect {
            if let Some(writer) = writer_guard.as_mut() {
                let mut buf = BytesMut::new();
                if Packet::Disconnect.encode(&mut buf).is_ok() {
                    let _ = transport::write_all(writer, &buf, Duration::from_secs(1)).await;
                }
            }
        }
        *writer_guard = None;
        drop(writer_guard);

        self.drain_waiters();
        self.notify_link(false);
    }

    pub(crate) fn drain_waiters(&self) {
        self.pending_pubacks.lock().clear();
        self.pending_subacks.lock().clear();
        self.pending_unsubacks.lock().clear();
    }

    /// Waits for `last_rx` to move past `since`, up to `window`. Used as the
    /// PINGRESP watchdog and by the `broker_up` probe; any broker traffic
    /// counts, not just PINGRESP.
    pub(crate) async fn wait_rx_advance(&self, since: Instant, window: Duration) -> bool {
        let deadline = Instant::now() + window;
        loop {
            if self.session.lock().last_rx() > since {
                return true;
            }
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            if tokio::time::timeout(deadline - now, self.rx_activity.notified())
                .await
                .is_err()
            {
                return self.session.lock().last_rx() > since;
            }
        }
    }

    fn register_puback(&self, packet_id: u16) -> oneshot::Receiver<u16> {
        let (tx, rx) = oneshot::channel();
        self.pending_pubacks.lock().insert(packet_id, tx);
        rx
    }

    fn register_suback(&self, packet_id: u16) -> oneshot::Receiver<SubAckPacket> {
        let (tx, rx) = oneshot::channel();
        self.pending_subacks.lock().insert(packet_id, tx);
        rx
    }

    fn register_unsuback(&self, packet_id: u16) -> oneshot::Receiver<UnsubAckPacket> {
        let (tx, rx) = oneshot::channel();
        self.pending_unsubacks.lock().insert(packet_id, tx);
        rx
    }

    /// Whether the supervisor should absorb this failure and the operation
    /// be re-issued once the session is back.
    fn retryable(&self, error: &MqttError) -> bool {
        error.is_transient()
            || (*error == MqttError::NotConnected && self.has_connected.load(Ordering::SeqCst))
    }

    /// QoS-0 publish: serialize only the write, re-issue across reconnects.
    pub(crate) async fn publish_qos0(
        &self,
        topic: &str,
        payload: Bytes,
        retain: bool,
    ) -> Result<()> {
        loop {
            self.await_connected().await?;
            let packet = Packet::Publish(PublishPacket::qos0(topic, payload.clone(), retain));
            match self.write_packet(&packet).await {
                Ok(()) => {
                    self.stats.lock().messages_sent += 1;
                    return Ok(());
                }
                Err(e) if self.retryable(&e) => self.declare_failing(&e),
                Err(e) => return Err(e),
            }
        }
    }

    /// The QoS-1 delivery engine. Returns only once the broker has
    /// acknowledged the publication; transient failures park the caller
    /// until the supervisor re-establishes the session, then the publish
    /// restarts under a freshly allocated packet id.
    pub(crate) async fn publish_qos1(
        &self,
        topic: &str,
        payload: &Bytes,
        retain: bool,
    ) -> Result<()> {
        loop {
            self.await_connected().await?;
            match self.publish_qos1_exchange(topic, payload, retain).await {
                Ok(()) => return Ok(()),
                Err(e) if self.retryable(&e) => self.declare_failing(&e),
                Err(e) => return Err(e),
            }
        }
    }

    async fn publish_qos1_exchange(
        &self,
        topic: &str,
        payload: &Bytes,
        retain: bool,
    ) -> Result<()> {
        let _guard = self.op_lock.lock().await;

        let packet_id = self.session.lock().next_packet_id();
        let mut publish = PublishPacket::qos1(topic, payload.clone(), retain, packet_id);
        self.session.lock().set_pending(publish.clone());

        let mut repubs = 0u32;
        loop {
            let puback = self.register_puback(packet_id);
            if let Err(e) = self.write_packet(&Packet::Publish(publish.clone())).await {
                self.pending_pubacks.lock().remove(&packet_id);
                return Err(e);
            }
            match tokio::time::timeout(self.options.response_time, puback).await {
                Ok(Ok(_)) => {
                    self.session.lock().clear_pending();
                    self.stats.lock().messages_sent += 1;
                    tracing::debug!(packet_id, "PUBACK received");
                    return Ok(());
                }
                // Waiters are only dropped wholesale at teardown.
                Ok(Err(_)) => return Err(MqttError::Disconnected),
                Err(_) => {
                    self.pending_pubacks.lock().remove(&packet_id);
                    if repubs >= self.options.max_repubs || !self.state().is_connected() {
                        return Err(MqttError::Timeout);
                    }
                    repubs += 1;
                    self.stats.lock().repub_count += 1;
                    publish.dup = true;
                    // The slot mirrors whatever is in flight, DUP included.
                    self.session.lock().set_pending(publish.clone());
                    tracing::debug!(packet_id, repubs, "PUBACK overdue, retransmitting");
                }
            }
        }
    }

    pub(crate) async fn subscribe(&self, filter: &str, qos: QoS) -> Result<QoS> {
        loop {
            self.await_connected().await?;
            match self.subscribe_exchange(filter, qos).await {
                Ok(granted) => return Ok(granted),
                Err(e) if self.retryable(&e) => self.declare_failing(&e),
                Err(e) => return Err(e),
            }
        }
    }

    async fn subscribe_exchange(&self, filter: &str, qos: QoS) -> Result<QoS> {
        let _guard = self.op_lock.lock().await;

        let packet_id = self.session.lock().next_packet_id();
        let packet = SubscribePacket::new(packet_id).add_filter(filter, qos);
        let suback = self.register_suback(packet_id);
        if let Err(e) = self.write_packet(&Packet::Subscribe(packet)).await {
            self.pending_subacks.lock().remove(&packet_id);
            return Err(e);
        }
        match tokio::time::timeout(self.options.response_time, suback).await {
            Ok(Ok(ack)) => {
                let code = ack.return_codes.first().copied().ok_or_else(|| {
                    MqttError::ProtocolError("SUBACK carries no return code".to_string())
                })?;
                let granted = code.granted_qos().ok_or_else(|| {
                    MqttError::ProtocolError(format!("broker refused subscription: {filter:?}"))
                })?;
                self.session.lock().record_subscription(filter, granted);
                Ok(granted)
            }
            Ok(Err(_)) => Err(MqttError::Disconnected),
            Err(_) => {
                self.pending_subacks.lock().remove(&packet_id);
                Err(MqttError::Timeout)
            }
        }
    }

    pub(crate) async fn unsubscribe(&self, filter: &str) -> Result<()> {
        loop {
            self.await_connected().await?;
            match self.unsubscribe_exchange(filter).await {
                Ok(()) => return Ok(()),
                Err(e) if self.retryable(&e) => self.declare_failing(&e),
                Err(e) => return Err(e),
            }
        }
    }

    async fn unsubscribe_exchange(&self, filter: &str) -> Result<()> {
        let _guard = self.op_lock.lock().await;

        let packet_id = self.session.lock().next_packet_id();
        let packet = UnsubscribePacket::new(packet_id, filter);
        let unsuback = self.register_unsuback(packet_id);
        if let Err(e) = self.write_packet(&Packet::Unsubscribe(packet)).await {
            self.pending_unsubacks.lock().remove(&packet_id);
            return Err(e);
        }
        match tokio::time::timeout(self.options.response_time, unsuback).await {
            Ok(Ok(_)) => {
                self.session.lock().remove_subscription(filter);
                Ok(())
            }
            Ok(Err(_)) => Err(MqttError::Disconnected),
            Err(_) => {
                self.pending_unsubacks.lock().remove(&packet_id);
                Err(MqttError::Timeout)
            }
        }
    }

    /// Liveness probe: PINGREQ under the serializer lock, success when any
    /// broker traffic lands within the response window.
    pub(crate) async fn ping_probe(&self) -> Result<bool> {
        let _guard = self.op_lock.lock().await;
        let since = self.session.lock().last_rx();
        if self.write_packet(&Packet::PingReq).await.is_err() {
            return Ok(false);
        }
        Ok(self.wait_rx_advance(since, self.options.response_time).await)
    }

    /// Routes a single acknowledgement to its parked waiter. Called from the
    /// dispatcher, which never takes the serializer lock.
    pub(crate) fn deliver_puback(&self, ack: PubAckPacket) {
        match self.pending_pubacks.lock().remove(&ack.packet_id) {
            Some(tx) => {
                let _ = tx.send(ack.packet_id);
            }
            None => {
                tracing::debug!(packet_id = ack.packet_id, "PUBACK with no waiter");
            }
        }
    }

    pub(crate) fn deliver_suback(&self, ack: SubAckPacket) {
        match self.pending_subacks.lock().remove(&ack.packet_id) {
            Some(tx) => {
                let _ = tx.send(ack);
            }
            None => {
                tracing::debug!(packet_id = ack.packet_id, "SUBACK with no waiter");
            }
        }
    }

    pub(crate) fn deliver_unsuback(&self, ack: UnsubAckPacket) {
        match self.pending_unsubacks.lock().remove(&ack.packet_id) {
            Some(tx) => {
                let _ = tx.send(ack);
            }
            None => {
                tracing::debug!(packet_id = ack.packet_id, "UNSUBACK with no waiter");
            }
        }
    }
}
