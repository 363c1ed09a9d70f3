//! Client configuration.

use crate::callback::{ConnectCallback, LinkCallback, MessageCallback};
use crate::link::{AlwaysUp, NetworkLink};
use crate::transport::{Connector, TcpConnector};
use mqtt311_protocol::{
    validate_topic_name, Message, MqttError, ReconnectConfig, Result, WillMessage,
};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use ulid::Ulid;

/// Everything the client needs to reach and speak to a broker.
///
/// Built with the `with_*` methods; validated once when handed to
/// [`MqttClient::new`](crate::MqttClient::new).
#[derive(Clone)]
pub struct Options {
    /// Broker hostname or address. Mandatory.
    pub server: String,
    /// Broker port; zero resolves through the connector's default (1883
    /// plain, 8883 for a TLS connector).
    pub port: u16,
    /// Client identifier; auto-generated when not supplied.
    pub client_id: String,
    pub username: Option<String>,
    pub password: Option<Vec<u8>>,
    /// Broker-side inactivity window, seconds. Zero disables keepalive and
    /// suppresses PINGREQ emission entirely.
    pub keepalive: u16,
    /// Lower bound on ping frequency, seconds. Zero means `keepalive / 4`.
    pub ping_interval: u16,
    /// Deadline for acknowledgement waits and handshake socket operations.
    pub response_time: Duration,
    /// Clean-session flag for the very first CONNECT.
    pub clean_init: bool,
    /// Clean-session flag for reconnect CONNECTs.
    pub clean: bool,
    /// DUP retransmissions of one publish before escalating to reconnect.
    pub max_repubs: u32,
    pub will: Option<WillMessage>,
    pub reconnect: ReconnectConfig,
    pub(crate) on_message: Option<MessageCallback>,
    pub(crate) on_link_change: Option<LinkCallback>,
    pub(crate) on_connect: Option<ConnectCallback>,
    pub(crate) connector: Arc<dyn Connector>,
    pub(crate) link: Arc<dyn NetworkLink>,
}

impl Options {
    #[must_use]
    pub fn new(server: impl Into<String>) -> Self {
        Self {
            server: server.into(),
            port: 0,
            client_id: format!("mqtt311-{}", Ulid::new()),
            username: None,
            password: None,
            keepalive: 60,
            ping_interval: 0,
            response_time: Duration::from_secs(10),
            clean_init: true,
            clean: true,
            max_repubs: 4,
            will: None,
            reconnect: ReconnectConfig::default(),
            on_message: None,
            on_link_change: None,
            on_connect: None,
            connector: Arc::new(TcpConnector),
            link: Arc::new(AlwaysUp),
        }
    }

    #[must_use]
    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    #[must_use]
    pub fn with_client_id(mut self, client_id: impl Into<String>) -> Self {
        self.client_id = client_id.into();
        self
    }

    #[must_use]
    pub fn with_credentials(
        mut self,
        username: impl Into<String>,
        password: impl AsRef<[u8]>,
    ) -> Self {
        self.username = Some(username.into());
        self.password = Some(password.as_ref().to_vec());
        self
    }

    #[must_use]
    pub fn with_keepalive(mut self, seconds: u16) -> Self {
        self.keepalive = seconds;
        self
    }

    #[must_use]
    pub fn with_ping_interval(mut self, seconds: u16) -> Self {
        self.ping_interval = seconds;
        self
    }

    #[must_use]
    pub fn with_response_time(mut self, response_time: Duration) -> Self {
        self.response_time = response_time;
        self
    }

    /// Clean-session flag for the first CONNECT.
    #[must_use]
    pub fn with_clean_init(mut self, clean_init: bool) -> Self {
        self.clean_init = clean_init;
        self
    }

    /// Clean-session flag for reconnect CONNECTs. Set false to let the
    /// broker queue QoS-1 traffic across outages.
    #[must_use]
    pub fn with_clean(mut self, clean: bool) -> Self {
        self.clean = clean;
        self
    }

    #[must_use]
    pub fn with_max_repubs(mut self, max_repubs: u32) -> Self {
        self.max_repubs = max_repubs;
        self
    }

    #[must_use]
    pub fn with_will(mut self, will: WillMessage) -> Self {
        self.will = Some(will);
        self
    }

    #[must_use]
    pub fn with_reconnect(mut self, reconnect: ReconnectConfig) -> Self {
        self.reconnect = reconnect;
        self
    }

    /// Subscription callback: (topic, payload, retained) for every inbound
    /// application message.
    #[must_use]
    pub fn on_message<F>(mut self, callback: F) -> Self
    where
        F: Fn(Message) + Send + Sync + 'static,
    {
        self.on_message = Some(Arc::new(callback));
        self
    }

    /// Link-state callback, `true` on session establishment and `false` on
    /// loss.
    #[must_use]
    pub fn on_link_change<F>(mut self, callback: F) -> Self
    where
        F: Fn(bool) + Send + Sync + 'static,
    {
        self.on_link_change = Some(Arc::new(callback));
        self
    }

    /// Called with a client handle after every successful CONNACK.
    #[must_use]
    pub fn on_connect<F>(mut self, callback: F) -> Self
    where
        F: Fn(crate::client::MqttClient) + Send + Sync + 'static,
    {
        self.on_connect = Some(Arc::new(callback));
        self
    }

    #[must_use]
    pub fn with_connector(mut self, connector: impl Connector + 'static) -> Self {
        self.connector = Arc::new(connector);
        self
    }

    #[must_use]
    pub fn with_link(mut self, link: impl NetworkLink + 'static) -> Self {
        self.link = Arc::new(link);
        self
    }

    pub(crate) fn resolved_port(&self) -> u16 {
        if self.port == 0 {
            self.connector.default_port()
        } else {
            self.port
        }
    }

    pub(crate) fn validate(&self) -> Result<()> {
        if self.server.is_empty() {
            return Err(MqttError::InvalidArgument("no server specified".to_string()));
        }
        if self.client_id.is_empty() {
            return Err(MqttError::InvalidArgument("empty client id".to_string()));
        }
        if self.password.is_some() && self.username.is_none() {
            return Err(MqttError::InvalidArgument(
                "password requires a username".to_string(),
            ));
        }
        if self.keepalive == 0 && self.ping_interval != 0 {
            // A zero keepalive tells the broker not to expect liveness
            // traffic; emitting pings anyway would contradict it.
            return Err(MqttError::InvalidArgument(
                "ping_interval requires a non-zero keepalive".to_string(),
            ));
        }
        if let Some(will) = &self.will {
            validate_topic_name(&will.topic)?;
        }
        Ok(())
    }
}

impl fmt::Debug for Options {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Options")
            .field("server", &self.server)
            .field("port", &self.port)
            .field("client_id", &self.client_id)
            .field("username", &self.username)
            .field("keepalive", &self.keepalive)
            .field("ping_interval", &self.ping_interval)
            .field("response_time", &self.response_time)
            .field("clean_init", &self.clean_init)
            .field("clean", &self.clean)
            .field("max_repubs", &self.max_repubs)
            .field("will", &self.will)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mqtt311_protocol::QoS;

    #[test]
    fn defaults_match_contract() {
        let options = Options::new("192.0.2.10");
        assert_eq!(options.port, 0);
        assert_eq!(options.resolved_port(), 1883);
        assert_eq!(options.keepalive, 60);
        assert_eq!(options.ping_interval, 0);
        assert_eq!(options.response_time, Duration::from_secs(10));
        assert!(options.clean_init);
        assert!(options.clean);
        assert_eq!(options.max_repubs, 4);
        assert!(options.client_id.starts_with("mqtt311-"));
        assert!(options.validate().is_ok());
    }

    #[test]
    fn generated_client_ids_are_unique() {
        assert_ne!(
            Options::new("h").client_id,
            Options::new("h").client_id
        );
    }

    #[test]
    fn empty_server_rejected() {
        assert!(matches!(
            Options::new("").validate(),
            Err(MqttError::InvalidArgument(_))
        ));
    }

    #[test]
    fn password_without_username_rejected() {
        let mut options = Options::new("h");
        options.password = Some(b"p".to_vec());
        assert!(matches!(
            options.validate(),
            Err(MqttError::InvalidArgument(_))
        ));
        assert!(Options::new("h")
            .with_credentials("user", b"p")
            .validate()
            .is_ok());
    }

    #[test]
    fn zero_keepalive_forbids_ping_interval() {
        let options = Options::new("h").with_keepalive(0).with_ping_interval(5);
        assert!(matches!(
            options.validate(),
            Err(MqttError::InvalidArgument(_))
        ));
        assert!(Options::new("h").with_keepalive(0).validate().is_ok());
    }

    #[test]
    fn will_topic_validated() {
        let options =
            Options::new("h").with_will(WillMessage::new("bad/#", &b"x"[..]).with_qos(QoS::AtMostOnce));
        assert!(matches!(
            options.validate(),
            Err(MqttError::InvalidTopicName(_))
        ));
    }
}
