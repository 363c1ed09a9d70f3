use crate::encoding::{decode_string, decode_u16, encode_string};
use crate::error::{MqttError, Result};
use crate::packet::{FixedHeader, MqttPacket, PacketType};
use bytes::{Buf, BufMut};

/// MQTT UNSUBSCRIBE. Reserved flag bits 0b0010.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnsubscribePacket {
    pub packet_id: u16,
    pub filters: Vec<String>,
}

impl UnsubscribePacket {
    #[must_use]
    pub fn new(packet_id: u16, filter: impl Into<String>) -> Self {
        Self {
            packet_id,
            filters: vec![filter.into()],
        }
    }
}

impl MqttPacket for UnsubscribePacket {
    fn packet_type(&self) -> PacketType {
        PacketType::Unsubscribe
    }

    fn flags(&self) -> u8 {
        0x02
    }

    fn encode_body<B: BufMut>(&self, buf: &mut B) -> Result<()> {
        if self.filters.is_empty() {
            return Err(MqttError::MalformedPacket(
                "UNSUBSCRIBE must contain at least one topic filter".to_string(),
            ));
        }
        buf.put_u16(self.packet_id);
        for filter in &self.filters {
            encode_string(buf, filter)?;
        }
        Ok(())
    }

    fn decode_body<B: Buf>(buf: &mut B, fixed_header: &FixedHeader) -> Result<Self> {
        if fixed_header.flags != 0x02 {
            return Err(MqttError::MalformedPacket(format!(
                "UNSUBSCRIBE reserved flags must be 0x02, got 0x{:02X}",
                fixed_header.flags
            )));
        }
        let packet_id = decode_u16(buf)?;
        let mut filters = Vec::new();
        while buf.has_remaining() {
            filters.push(decode_string(buf)?);
        }
        if filters.is_empty() {
            return Err(MqttError::MalformedPacket(
                "UNSUBSCRIBE must contain at least one topic filter".to_string(),
            ));
        }
        Ok(Self { packet_id, filters })
    }
}

/// MQTT UNSUBACK: just the echoed packet identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UnsubAckPacket {
    pub packet_id: u16,
}

impl UnsubAckPacket {
    #[must_use]
    pub fn new(packet_id: u16) -> Self {
        Self { packet_id }
    }
}

impl MqttPacket for UnsubAckPacket {
    fn packet_type(&self) -> PacketType {
        PacketType::UnsubAck
    }

    fn encode_body<B: BufMut>(&self, buf: &mut B) -> Result<()> {
        buf.put_u16(self.packet_id);
        Ok(())
    }

    fn decode_body<B: Buf>(buf: &mut B, fixed_header: &FixedHeader) -> Result<Self> {
        if fixed_header.remaining_length != 2 {
            return Err(MqttError::MalformedPacket(format!(
                "UNSUBACK remaining length must be 2, got {}",
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
    use bytes::BytesMut;

    #[test]
    fn unsubscribe_wire_bytes() {
        let packet = UnsubscribePacket::new(2, "t/a");
        let mut buf = BytesMut::new();
        packet.encode(&mut buf).unwrap();
        assert_eq!(
            &buf[..],
            &[0xA2, 0x07, 0x00, 0x02, 0x00, 0x03, b't', b'/', b'a']
        );
    }

    #[test]
    fn unsubscribe_round_trip() {
        let packet = UnsubscribePacket {
            packet_id: 300,
            filters: vec!["a/b".to_string(), "c/#".to_string()],
        };
        let mut buf = BytesMut::new();
        Packet::Unsubscribe(packet.clone())
            .encode(&mut buf)
            .unwrap();
        assert_eq!(
            Packet::decode(&mut buf.freeze()).unwrap(),
            Packet::Unsubscribe(packet)
        );
    }

    #[test]
    fn unsuback_round_trip() {
        let packet = UnsubAckPacket::new(300);
        let mut buf = BytesMut::new();
        Packet::UnsubAck(packet).encode(&mut buf).unwrap();
        assert_eq!(&buf[..], &[0xB0, 0x02, 0x01, 0x2C]);
        assert_eq!(
            Packet::decode(&mut buf.freeze()).unwrap(),
            Packet::UnsubAck(packet)
        );
    }
}
