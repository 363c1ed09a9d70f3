//! Callback types the application hooks into the client.
//!
//! Callbacks run inline on the client's tasks and must return quickly; a
//! slow message callback delays acknowledgement of the packet that carried
//! it. Hand work off to a channel or spawned task if it can block.

use crate::client::MqttClient;
use mqtt311_protocol::Message;
use std::sync::Arc;

/// Invoked with every inbound application message: topic, payload, and the
/// retained flag from the PUBLISH fixed header.
pub type MessageCallback = Arc<dyn Fn(Message) + Send + Sync>;

/// Invoked on link-state changes: `true` when a session is established,
/// `false` when connectivity is lost.
pub type LinkCallback = Arc<dyn Fn(bool) + Send + Sync>;

/// Invoked with a client handle after every successful CONNACK, initial and
/// reconnect alike. The hook for re-registering dynamic subscriptions that
/// are intentionally kept out of the registry.
pub type ConnectCallback = Arc<dyn Fn(MqttClient) + Send + Sync>;
