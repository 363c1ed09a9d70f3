//! The resilient MQTT 3.1.1 client.

use crate::options::Options;
use crate::session::ConnectionStats;
use bytes::Bytes;
use mqtt311_protocol::{
    validate_topic_filter, validate_topic_name, ConnectivityEvent, ConnectivityState, MqttError,
    QoS, Result,
};
use std::sync::atomic::Ordering;
use std::sync::Arc;
use tracing::instrument;

mod core;
mod keepalive;
mod reader;
mod supervisor;

use self::core::ClientCore;

/// A cheaply clonable handle to one MQTT session.
///
/// After the initial [`connect`](Self::connect) succeeds, every transient
/// failure (WiFi dropouts, broker timeouts, lost acknowledgements) is
/// absorbed internally: operations in flight park until the session is
/// re-established and then resume. Only [`disconnect`](Self::disconnect)
/// (or [`close`](Self::close)) ends the session for good.
///
/// One protocol exchange runs at a time on the single socket; concurrent
/// callers serialize on an internal lock. Cancelling an in-flight
/// `publish`/`subscribe` future mid-exchange strands the exchange's packet
/// id and may leave the serializer lock to the next waiter at an arbitrary
/// protocol point. Don't drop these futures; call `disconnect` first.
///
/// # Examples
///
/// ```rust,no_run
/// use mqtt311::{MqttClient, Options, QoS};
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let options = Options::new("test.mosquitto.org")
///         .with_keepalive(30)
///         .on_message(|msg| {
///             println!("{}: {:?} (retained: {})", msg.topic, msg.payload, msg.retain);
///         });
///     let client = MqttClient::new(options)?;
///
///     client.connect().await?;
///     client.subscribe("sensors/+/temp", QoS::AtLeastOnce).await?;
///     client.publish("sensors/attic/temp", &b"21.5"[..], false, QoS::AtLeastOnce).await?;
///
///     client.disconnect().await?;
///     Ok(())
/// }
/// ```
#[derive(Clone)]
pub struct MqttClient {
    core: Arc<ClientCore>,
}

impl MqttClient {
    /// Builds a client from validated options.
    ///
    /// # Errors
    ///
    /// Returns `InvalidArgument` for an empty server, a password without a
    /// username, or a non-zero `ping_interval` with `keepalive` zero.
    pub fn new(options: Options) -> Result<Self> {
        options.validate()?;
        Ok(Self {
            core: Arc::new(ClientCore::new(options)),
        })
    }

    #[must_use]
    pub fn client_id(&self) -> &str {
        &self.core.options.client_id
    }

    /// Current connectivity state.
    #[must_use]
    pub fn state(&self) -> ConnectivityState {
        self.core.state()
    }

    /// Delivery and session counters.
    #[must_use]
    pub fn stats(&self) -> ConnectionStats {
        *self.core.stats.lock()
    }

    /// Initial connection: link up, CONNECT with the `clean_init` flag,
    /// CONNACK. Unlike every later reconnect, failure here surfaces to the
    /// caller and nothing is retried. On success the supervisor task is
    /// spawned and owns the session from then on; calling `connect` again
    /// simply waits for the session to be live.
    ///
    /// # Errors
    ///
    /// Returns the underlying transport or protocol error, or
    /// `NotConnected` after `disconnect`.
    #[instrument(skip(self), fields(client_id = %self.core.options.client_id, server = %self.core.options.server))]
    pub async fn connect(&self) -> Result<()> {
        if self.core.is_shutdown() {
            return Err(MqttError::NotConnected);
        }
        if self.core.has_connected.load(Ordering::SeqCst) {
            return self.core.await_connected().await;
        }

        let _guard = self.core.op_lock.lock().await;
        if self.core.has_connected.load(Ordering::SeqCst) {
            drop(_guard);
            return self.core.await_connected().await;
        }

        tracing::info!("initiating connection");
        self.core.options.link.ensure_up().await?;
        self.core.apply_event(ConnectivityEvent::LinkUp);

        match self.core.establish(self.core.options.clean_init).await {
            Ok(reader) => {
                self.core.has_connected.store(true, Ordering::SeqCst);
                supervisor::finish_session(&self.core, self, reader);
                let core = Arc::clone(&self.core);
                let client = self.clone();
                self.core.tasks.lock().supervisor =
                    Some(tokio::spawn(supervisor::supervisor_task(core, client)));
                tracing::info!("connected");
                Ok(())
            }
            Err(e) => {
                self.core.apply_event(ConnectivityEvent::ConnectFail);
                tracing::error!(error = %e, "initial connect failed");
                Err(e)
            }
        }
    }

    /// Publishes a message. QoS 0 returns after the wire flush; QoS 1
    /// returns only once the broker has acknowledged, across however many
    /// retransmissions and reconnects that takes. Duplicates at the broker
    /// are possible when a PUBACK is lost after the broker persisted the
    /// message; that is inherent to QoS 1.
    ///
    /// # Errors
    ///
    /// Returns `InvalidTopicName` immediately on a malformed topic, and
    /// `NotConnected` before the initial connect or after `disconnect`.
    #[instrument(skip(self, topic, payload), fields(qos = ?qos, retain))]
    pub async fn publish(
        &self,
        topic: impl Into<String>,
        payload: impl Into<Bytes>,
        retain: bool,
        qos: QoS,
    ) -> Result<()> {
        let topic = topic.into();
        let payload = payload.into();
        validate_topic_name(&topic)?;
        tracing::debug!(topic = %topic, payload_len = payload.len(), "publishing");

        match qos {
            QoS::AtMostOnce => self.core.publish_qos0(&topic, payload, retain).await,
            QoS::AtLeastOnce => self.core.publish_qos1(&topic, &payload, retain).await,
        }
    }

    /// Subscribes and returns the granted QoS. The filter is recorded in
    /// the subscription registry and re-issued automatically after every
    /// reconnect.
    ///
    /// # Errors
    ///
    /// Returns `InvalidTopicFilter` immediately on a malformed filter, and
    /// `NotConnected` before the initial connect or after `disconnect`.
    #[instrument(skip(self, filter), fields(qos = ?qos))]
    pub async fn subscribe(&self, filter: impl Into<String>, qos: QoS) -> Result<QoS> {
        let filter = filter.into();
        validate_topic_filter(&filter)?;
        tracing::debug!(filter = %filter, "subscribing");

        let granted = self.core.subscribe(&filter, qos).await?;
        tracing::debug!(filter = %filter, ?granted, "subscribed");
        Ok(granted)
    }

    /// Unsubscribes and removes the filter from the registry.
    ///
    /// # Errors
    ///
    /// Returns `InvalidTopicFilter` immediately on a malformed filter, and
    /// `NotConnected` before the initial connect or after `disconnect`.
    #[instrument(skip(self, filter))]
    pub async fn unsubscribe(&self, filter: impl Into<String>) -> Result<()> {
        let filter = filter.into();
        validate_topic_filter(&filter)?;
        tracing::debug!(filter = %filter, "unsubscribing");

        self.core.unsubscribe(&filter).await
    }

    /// Synchronous connectivity check. As a side effect, a session that
    /// still looks connected over a dead link is flagged failing, which
    /// schedules the reconnect.
    #[must_use]
    pub fn is_connected(&self) -> bool {
        let state = self.core.state();
        if state.is_connected() && !self.core.options.link.is_up() {
            self.core.declare_failing(&MqttError::LinkDown);
            return false;
        }
        state.is_connected()
    }

    /// Graceful, terminal shutdown: emits DISCONNECT (so the broker
    /// suppresses the will), closes the socket, and stops every task. Any
    /// later call on this client yields `NotConnected`.
    ///
    /// # Errors
    ///
    /// Currently infallible; the signature leaves room for surfacing
    /// teardown faults.
    #[instrument(skip(self), fields(client_id = %self.core.options.client_id))]
    pub async fn disconnect(&self) -> Result<()> {
        if self.core.shutdown.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        self.core.shutdown_notify.notify_waiters();
        if let Some(handle) = self.core.tasks.lock().supervisor.take() {
            handle.abort();
        }
        self.core.teardown(true).await;
        self.core.apply_event(ConnectivityEvent::Teardown);
        tracing::info!("disconnected");
        Ok(())
    }

    /// Immediate, terminal teardown without DISCONNECT; the broker will
    /// publish the will once the keepalive window lapses.
    pub fn close(&self) {
        if self.core.shutdown.swap(true, Ordering::SeqCst) {
            return;
        }
        self.core.shutdown_notify.notify_waiters();
        let (supervisor, dispatcher, pinger) = {
            let mut tasks = self.core.tasks.lock();
            (
                tasks.supervisor.take(),
                tasks.dispatcher.take(),
                tasks.pinger.take(),
            )
        };
        for handle in [supervisor, dispatcher, pinger].into_iter().flatten() {
            handle.abort();
        }
        if let Ok(mut writer) = self.core.writer.try_lock() {
            *writer = None;
        }
        self.core.drain_waiters();
        self.core.apply_event(ConnectivityEvent::Teardown);
        tracing::info!("closed");
    }

    /// Stops maintaining the connection for a platform sleep: the session
    /// is closed gracefully and no reconnect is attempted until
    /// [`resume`](Self::resume). Pending QoS-1 state is kept.
    pub fn pause(&self) {
        self.core.paused.store(true, Ordering::SeqCst);
        tracing::debug!("pause requested");
    }

    /// Re-enables the supervisor after [`pause`](Self::pause).
    pub fn resume(&self) {
        self.core.paused.store(false, Ordering::SeqCst);
        tracing::debug!("resume requested");
    }

    pub(crate) fn link_is_up(&self) -> bool {
        self.core.options.link.is_up()
    }

    pub(crate) fn response_time(&self) -> std::time::Duration {
        self.core.options.response_time
    }

    /// Probes broker liveness. Returns `true` when traffic arrived within
    /// the last second; otherwise sends a PINGREQ and waits out the
    /// response window.
    ///
    /// # Errors
    ///
    /// Currently infallible; probe failures report as `Ok(false)`.
    pub async fn broker_up(&self) -> Result<bool> {
        if !self.is_connected() {
            return Ok(false);
        }
        if self.core.session.lock().rx_idle() < std::time::Duration::from_secs(1) {
            return Ok(true);
        }
        self.core.ping_probe().await
    }
}
