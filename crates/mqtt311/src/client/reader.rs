//! The inbound dispatcher: a continuous read loop that routes each packet
//! to a parked waiter, the session state, or the user callback.

use crate::transport::{self, Reader};
use bytes::Bytes;
use mqtt311_protocol::{
    FixedHeader, Message, MqttError, Packet, PacketType, PubAckPacket, PublishPacket, QoS, Result,
};
use std::sync::Arc;
use std::time::Duration;

use super::core::ClientCore;

/// Reads one complete packet off the socket: type/flags byte, remaining
/// length one byte at a time, then exactly the declared body.
pub(crate) async fn read_packet(reader: &mut Reader, deadline: Option<Duration>) -> Result<Packet> {
    let mut byte = [0u8; 1];
    transport::read_exact(reader, &mut byte, deadline).await?;
    let packet_type = PacketType::try_from(byte[0] >> 4)?;
    let flags = byte[0] & 0x0F;

    let mut remaining: u32 = 0;
    let mut shift: u32 = 0;
    loop {
        transport::read_exact(reader, &mut byte, deadline).await?;
        remaining |= u32::from(byte[0] & 0x7F) << shift;
        if byte[0] & 0x80 == 0 {
            break;
        }
        shift += 7;
        if shift > 21 {
            return Err(MqttError::MalformedRemainingLength);
        }
    }

    let header = FixedHeader::new(packet_type, flags, remaining);
    let mut body = vec![0u8; remaining as usize];
    if remaining > 0 {
        transport::read_exact(reader, &mut body, deadline).await?;
    }
    let mut buf = Bytes::from(body);
    Packet::decode_body(&header, &mut buf)
}

/// The read loop. Started after each CONNACK, aborted at teardown. Any
/// decode fault or transport error flags the connection as failing and
/// exits; the supervisor rebuilds everything.
pub(crate) async fn dispatcher_task(core: Arc<ClientCore>, mut reader: Reader) {
    tracing::debug!("dispatcher started");
    loop {
        match read_packet(&mut reader, None).await {
            Ok(packet) => {
                core.session.lock().note_rx();
                core.rx_activity.notify_waiters();
                tracing::trace!(packet_type = ?packet.packet_type(), "packet received");
                if let Err(e) = route_packet(&core, packet).await {
                    tracing::warn!(error = %e, "inbound packet fault");
                    core.declare_failing(&e);
                    break;
                }
            }
            Err(e) => {
                if !core.is_shutdown() {
                    tracing::debug!(error = %e, "read loop ended");
                    core.declare_failing(&e);
                }
                break;
            }
        }
    }
}

/// Per-type routing. Also used during subscription restoration, before the
/// dispatcher task itself is running.
pub(crate) async fn route_packet(core: &ClientCore, packet: Packet) -> Result<()> {
    match packet {
        Packet::Publish(publish) => handle_publish(core, publish).await,
        Packet::PubAck(ack) => {
            core.deliver_puback(ack);
            Ok(())
        }
        Packet::SubAck(ack) => {
            core.deliver_suback(ack);
            Ok(())
        }
        Packet::UnsubAck(ack) => {
            core.deliver_unsuback(ack);
            Ok(())
        }
        // last_rx was already advanced; that is all a PINGRESP carries.
        Packet::PingResp => Ok(()),
        Packet::ConnAck(_) => Err(MqttError::ProtocolError(
            "CONNACK outside handshake".to_string(),
        )),
        other => Err(MqttError::UnexpectedPacket(other.packet_type())),
    }
}

/// Inbound application message: run the callback, then acknowledge QoS 1
/// with the echoed packet id. The callback runs inline; it must not block.
async fn handle_publish(core: &ClientCore, publish: PublishPacket) -> Result<()> {
    core.stats.lock().messages_received += 1;
    tracing::debug!(
        topic = %publish.topic,
        payload_len = publish.payload.len(),
        qos = ?publish.qos,
        retain = publish.retain,
        dup = publish.dup,
        "message received"
    );

    if let Some(callback) = &core.options.on_message {
        callback(Message {
            topic: publish.topic.clone(),
            payload: publish.payload.clone(),
            retain: publish.retain,
        });
    }

    if publish.qos == QoS::AtLeastOnce {
        let Some(packet_id) = publish.packet_id else {
            return Err(MqttError::MalformedPacket(
                "QoS 1 PUBLISH without packet id".to_string(),
            ));
        };
        core.write_packet(&Packet::PubAck(PubAckPacket::new(packet_id)))
            .await?;
    }
    Ok(())
}
