use crate::encoding::decode_u16;
use crate::error::{MqttError, Result};
use crate::packet::{FixedHeader, MqttPacket, PacketType};
use bytes::{Buf, BufMut};

/// MQTT PUBACK: QoS-1 publish acknowledgement. In 3.1.1 the body is just the
/// echoed packet identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PubAckPacket {
    pub packet_id: u16,
}

impl PubAckPacket {
    #[must_use]
    pub fn new(packet_id: u16) -> Self {
        Self { packet_id }
    }
}

impl MqttPacket for PubAckPacket {
    fn packet_type(&self) -> PacketType {
        PacketType::PubAck
    }

    fn encode_body<B: BufMut>(&self, buf: &mut B) -> Result<()> {
        buf.put_u16(self.packet_id);
        Ok(())
    }

    fn decode_body<B: Buf>(buf: &mut B, fixed_header: &FixedHeader) -> Result<Self> {
        if fixed_header.remaining_length != 2 {
            return Err(MqttError::MalformedPacket(format!(
                "PUBACK remaining length must be 2, got {}",
                fixed_header.remaining_length
            )));
        }
        Ok(Self {
            packet_id: decode_u16(buf)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::packet::Packet;
    use bytes::{Bytes, BytesMut};

    #[test]
    fn wire_bytes() {
        let mut buf = BytesMut::new();
        Packet::PubAck(PubAckPacket::new(0x1234))
            .encode(&mut buf)
            .unwrap();
        assert_eq!(&buf[..], &[0x40, 0x02, 0x12, 0x34]);
    }

    #[test]
    fn round_trip() {
        let packet = PubAckPacket::new(65535);
        let mut buf = BytesMut::new();
        Packet::PubAck(packet).encode(&mut buf).unwrap();
        assert_eq!(
            Packet::decode(&mut buf.freeze()).unwrap(),
            Packet::PubAck(packet)
        );
    }

    #[test]
    fn oversized_body_rejected() {
        let mut buf = Bytes::from_static(&[0x40, 0x03, 0x00, 0x01, 0x00]);
        assert!(matches!(
            Packet::decode(&mut buf),
            Err(MqttError::MalformedPacket(_))
        ));
    }
}
