//! # Resilient MQTT 3.1.1 client
//!
//! An asynchronous MQTT 3.1.1 client built for devices on unreliable
//! wireless networks. The framing is ordinary; the point of this crate is
//! the machinery around it:
//!
//! - a **connection supervisor** owning the link + TCP + session lifecycle,
//!   detecting dead connections via pings and reconnecting transparently
//!   with bounded backoff, restoring subscriptions on every re-CONNACK;
//! - a **QoS-1 delivery engine** that keeps a publish in flight across
//!   retransmissions and reconnects until the broker acknowledges it,
//!   reassigning the packet identifier after each reconnect;
//! - a **protocol serializer** guaranteeing at most one request/response
//!   exchange on the socket at a time, so concurrent publishes, subscribes,
//!   and pings cannot interleave on the wire.
//!
//! QoS 2 is intentionally not implemented; duplicate deliveries are the
//! application's concern, as inherent to QoS 1.
//!
//! ## Quick start
//!
//! ```rust,no_run
//! use mqtt311::{MqttClient, Options, QoS, WillMessage};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let options = Options::new("192.0.2.10")
//!         .with_keepalive(60)
//!         .with_clean(false)
//!         .with_will(WillMessage::new("t/dead", &b"bye"[..]))
//!         .on_message(|msg| {
//!             println!("{} => {:?}", msg.topic, msg.payload);
//!         });
//!
//!     let client = MqttClient::new(options)?;
//!     client.connect().await?;
//!
//!     client.subscribe("t/a", QoS::AtLeastOnce).await?;
//!     // Returns once the broker acknowledged, surviving any dropouts
//!     // in between.
//!     client.publish("t/a", &b"x"[..], false, QoS::AtLeastOnce).await?;
//!
//!     client.disconnect().await?;
//!     Ok(())
//! }
//! ```
//!
//! Publications from concurrent tasks serialize on an internal lock; for a
//! steady high-rate pipeline put a queue in front of one publishing task
//! instead.

#![warn(clippy::pedantic)]
#![allow(clippy::uninlined_format_args)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::must_use_candidate)]
#![allow(clippy::doc_markdown)]
#![allow(clippy::cast_lossless)]
#![allow(clippy::cast_possible_truncation)]

pub mod callback;
pub mod client;
pub mod link;
pub mod options;
mod probes;
mod session;
pub mod transport;

pub use callback::{ConnectCallback, LinkCallback, MessageCallback};
pub use client::MqttClient;
pub use link::{AlwaysUp, NetworkLink};
pub use options::Options;
pub use session::{ConnectionStats, Subscription};
pub use transport::{Connector, TcpConnector};

pub use mqtt311_protocol::{
    ConnectReturnCode, ConnectivityState, Message, MqttError, QoS, ReconnectConfig, Result,
    WillMessage,
};
