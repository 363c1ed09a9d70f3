//! Sans-IO MQTT 3.1.1 protocol support for the `mqtt311` client.
//!
//! This crate holds everything that does not touch a socket: the wire codec
//! for the 3.1.1 control packets the client speaks, packet-identifier
//! allocation, the connectivity state machine with its reconnect backoff
//! policy, keepalive arithmetic, and topic validation. No MQTT 5 features
//! (properties, reason codes) are emitted or parsed.

#![warn(clippy::pedantic)]
#![allow(clippy::uninlined_format_args)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::must_use_candidate)]
#![allow(clippy::doc_markdown)]
#![allow(clippy::cast_lossless)]

pub mod connection;
pub mod encoding;
pub mod error;
pub mod keepalive;
pub mod packet;
pub mod packet_id;
pub mod types;
pub mod validation;

pub use connection::{
    ConnectivityEvent, ConnectivityMachine, ConnectivityState, ReconnectConfig,
};
pub use error::{MqttError, Result};
pub use keepalive::PingSchedule;
pub use packet::{
    ConnAckPacket, ConnectPacket, FixedHeader, MqttPacket, Packet, PacketType, PubAckPacket,
    PublishPacket, SubAckPacket, SubAckReturnCode, SubscribePacket, TopicFilter, UnsubAckPacket,
    UnsubscribePacket,
};
pub use packet_id::PacketIdAllocator;
pub use types::{ConnectReturnCode, Message, QoS, WillMessage};
pub use validation::{validate_topic_filter, validate_topic_name};
