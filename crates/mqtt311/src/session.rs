//! In-memory session state: packet ids, the subscription registry, the
//! pending-publish slot, and activity timestamps.
//!
//! Nothing here touches the wire. The state is shared behind a short-hold
//! mutex; every method returns without suspending.

use mqtt311_protocol::{PacketIdAllocator, PublishPacket, QoS};
use tokio::time::Instant;

/// A registry entry: the filter as subscribed and the QoS the broker granted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Subscription {
    pub filter: String,
    pub qos: QoS,
}

/// Counters exposed through `MqttClient::stats()`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ConnectionStats {
    /// QoS-1 retransmissions (DUP publishes) issued.
    pub repub_count: u64,
    /// Successful re-CONNACKs after the initial connect.
    pub reconnect_count: u64,
    pub messages_sent: u64,
    pub messages_received: u64,
}

#[derive(Debug)]
pub(crate) struct SessionState {
    packet_ids: PacketIdAllocator,
    subscriptions: Vec<Subscription>,
    /// The single in-flight QoS-1 publication. Non-empty iff exactly one
    /// publish awaits its PUBACK; retained across reconnects until acked.
    pending: Option<PublishPacket>,
    last_rx: Instant,
    last_tx: Instant,
}

impl SessionState {
    pub(crate) fn new() -> Self {
        let now = Instant::now();
        Self {
            packet_ids: PacketIdAllocator::new(),
            subscriptions: Vec::new(),
            pending: None,
            last_rx: now,
            last_tx: now,
        }
    }

    pub(crate) fn next_packet_id(&mut self) -> u16 {
        self.packet_ids.next()
    }

    pub(crate) fn note_rx(&mut self) {
        self.last_rx = Instant::now();
    }

    pub(crate) fn note_tx(&mut self) {
        self.last_tx = Instant::now();
    }

    /// Both timestamps restart at CONNACK so stale pre-outage instants can
    /// never satisfy or starve the pinger.
    pub(crate) fn reset_activity(&mut self) {
        let now = Instant::now();
        self.last_rx = now;
        self.last_tx = now;
    }

    pub(crate) fn last_rx(&self) -> Instant {
        self.last_rx
    }

    pub(crate) fn rx_idle(&self) -> std::time::Duration {
        self.last_rx.elapsed()
    }

    pub(crate) fn tx_idle(&self) -> std::time::Duration {
        self.last_tx.elapsed()
    }

    pub(crate) fn set_pending(&mut self, packet: PublishPacket) {
        self.pending = Some(packet);
    }

    pub(crate) fn clear_pending(&mut self) {
        self.pending = None;
    }

    /// Packet id of the in-flight publish, zero when the slot is empty.
    pub(crate) fn pending_packet_id(&self) -> u16 {
        self.pending
            .as_ref()
            .and_then(|p| p.packet_id)
            .unwrap_or(0)
    }

    /// Appends or refreshes a registry entry. Insertion order is preserved
    /// because restoration must replay SUBSCRIBEs in the order they were
    /// established.
    pub(crate) fn record_subscription(&mut self, filter: &str, qos: QoS) {
        if let Some(existing) = self
            .subscriptions
            .iter_mut()
            .find(|s| s.filter == filter)
        {
            existing.qos = qos;
        } else {
            self.subscriptions.push(Subscription {
                filter: filter.to_string(),
                qos,
            });
        }
    }

    pub(crate) fn remove_subscription(&mut self, filter: &str) {
        self.subscriptions.retain(|s| s.filter != filter);
    }

    pub(crate) fn subscriptions(&self) -> Vec<Subscription> {
        self.subscriptions.clone()
    }
}
