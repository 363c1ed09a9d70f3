//! MQTT 3.1.1 control packets.
//!
//! Each packet type implements [`MqttPacket`]: `encode_body`/`decode_body`
//! over [`bytes`] buffers, with the fixed header handled generically. The
//! [`Packet`] enum is the unit the client reads and writes.

use crate::encoding::{self, variable_length_len};
use crate::error::{MqttError, Result};
use bytes::{Buf, BufMut, BytesMut};

pub mod connect;
pub mod publish;
pub mod puback;
pub mod subscribe;
pub mod unsubscribe;

pub use connect::{ConnAckPacket, ConnectPacket};
pub use puback::PubAckPacket;
pub use publish::PublishPacket;
pub use subscribe::{SubAckPacket, SubAckReturnCode, SubscribePacket, TopicFilter};
pub use unsubscribe::{UnsubAckPacket, UnsubscribePacket};

/// The 4-bit control packet type from the fixed header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum PacketType {
    Connect = 1,
    ConnAck = 2,
    Publish = 3,
    PubAck = 4,
    PubRec = 5,
    PubRel = 6,
    PubComp = 7,
    Subscribe = 8,
    SubAck = 9,
    Unsubscribe = 10,
    UnsubAck = 11,
    PingReq = 12,
    PingResp = 13,
    Disconnect = 14,
}

impl PacketType {
    #[must_use]
    pub fn as_u8(self) -> u8 {
        self as u8
    }
}

impl TryFrom<u8> for PacketType {
    type Error = MqttError;

    fn try_from(value: u8) -> Result<Self> {
        match value {
            1 => Ok(Self::Connect),
            2 => Ok(Self::ConnAck),
            3 => Ok(Self::Publish),
            4 => Ok(Self::PubAck),
            5 => Ok(Self::PubRec),
            6 => Ok(Self::PubRel),
            7 => Ok(Self::PubComp),
            8 => Ok(Self::Subscribe),
            9 => Ok(Self::SubAck),
            10 => Ok(Self::Unsubscribe),
            11 => Ok(Self::UnsubAck),
            12 => Ok(Self::PingReq),
            13 => Ok(Self::PingResp),
            14 => Ok(Self::Disconnect),
            other => Err(MqttError::MalformedPacket(format!(
                "invalid packet type: {other}"
            ))),
        }
    }
}

/// Decoded fixed header: type, flag nibble, and remaining length.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FixedHeader {
    pub packet_type: PacketType,
    pub flags: u8,
    pub remaining_length: u32,
}

impl FixedHeader {
    #[must_use]
    pub fn new(packet_type: PacketType, flags: u8, remaining_length: u32) -> Self {
        Self {
            packet_type,
            flags,
            remaining_length,
        }
    }

    /// Encodes the type/flags byte and remaining-length varint.
    ///
    /// # Errors
    ///
    /// Returns an error if the remaining length exceeds the 4-byte range.
    pub fn encode<B: BufMut>(&self, buf: &mut B) -> Result<()> {
        buf.put_u8((self.packet_type.as_u8() << 4) | (self.flags & 0x0F));
        encoding::encode_variable_length(buf, self.remaining_length)
    }

    /// Decodes a fixed header from a complete buffer.
    ///
    /// # Errors
    ///
    /// Returns an error on an invalid type nibble or malformed varint.
    pub fn decode<B: Buf>(buf: &mut B) -> Result<Self> {
        if !buf.has_remaining() {
            return Err(MqttError::MalformedPacket("empty buffer".to_string()));
        }
        let byte = buf.get_u8();
        let packet_type = PacketType::try_from(byte >> 4)?;
        let flags = byte & 0x0F;
        let remaining_length = encoding::decode_variable_length(buf)?;
        Ok(Self {
            packet_type,
            flags,
            remaining_length,
        })
    }

    /// Total encoded size of the packet this header describes.
    #[must_use]
    pub fn packet_len(&self) -> usize {
        1 + variable_length_len(self.remaining_length) + self.remaining_length as usize
    }
}

/// Common shape of every control packet.
pub trait MqttPacket: Sized {
    fn packet_type(&self) -> PacketType;

    /// Fixed-header flag nibble. Zero for every type except PUBLISH and the
    /// subscribe family (which carry 0b0010 reserved bits).
    fn flags(&self) -> u8 {
        0
    }

    /// Encodes the variable header and payload.
    ///
    /// # Errors
    ///
    /// Returns an error if a field is unrepresentable on the wire.
    fn encode_body<B: BufMut>(&self, buf: &mut B) -> Result<()>;

    /// Decodes the variable header and payload. `buf` holds exactly
    /// `fixed_header.remaining_length` bytes.
    ///
    /// # Errors
    ///
    /// Returns an error on any malformation.
    fn decode_body<B: Buf>(buf: &mut B, fixed_header: &FixedHeader) -> Result<Self>;

    /// Encodes the complete packet, fixed header included.
    ///
    /// # Errors
    ///
    /// Returns an error if the body exceeds the remaining-length range.
    fn encode<B: BufMut>(&self, buf: &mut B) -> Result<()> {
        let mut body = BytesMut::new();
        self.encode_body(&mut body)?;
        let remaining = u32::try_from(body.len())
            .map_err(|_| MqttError::MalformedRemainingLength)?;
        let header = FixedHeader::new(self.packet_type(), self.flags(), remaining);
        header.encode(buf)?;
        buf.put_slice(&body);
        Ok(())
    }
}

/// Every packet this client sends or receives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Packet {
    Connect(ConnectPacket),
    ConnAck(ConnAckPacket),
    Publish(PublishPacket),
    PubAck(PubAckPacket),
    Subscribe(SubscribePacket),
    SubAck(SubAckPacket),
    Unsubscribe(UnsubscribePacket),
    UnsubAck(UnsubAckPacket),
    PingReq,
    PingResp,
    Disconnect,
}

impl Packet {
    #[must_use]
    pub fn packet_type(&self) -> PacketType {
        match self {
            Self::Connect(_) => PacketType::Connect,
            Self::ConnAck(_) => PacketType::ConnAck,
            Self::Publish(_) => PacketType::Publish,
            Self::PubAck(_) => PacketType::PubAck,
            Self::Subscribe(_) => PacketType::Subscribe,
            Self::SubAck(_) => PacketType::SubAck,
            Self::Unsubscribe(_) => PacketType::Unsubscribe,
            Self::UnsubAck(_) => PacketType::UnsubAck,
            Self::PingReq => PacketType::PingReq,
            Self::PingResp => PacketType::PingResp,
            Self::Disconnect => PacketType::Disconnect,
        }
    }

    /// Encodes the complete packet.
    ///
    /// # Errors
    ///
    /// Returns an error if a field is unrepresentable on the wire.
    pub fn encode<B: BufMut>(&self, buf: &mut B) -> Result<()> {
        match self {
            Self::Connect(p) => p.encode(buf),
            Self::ConnAck(p) => p.encode(buf),
            Self::Publish(p) => p.encode(buf),
            Self::PubAck(p) => p.encode(buf),
            Self::Subscribe(p) => p.encode(buf),
            Self::SubAck(p) => p.encode(buf),
            Self::Unsubscribe(p) => p.encode(buf),
            Self::UnsubAck(p) => p.encode(buf),
            Self::PingReq => encode_empty(buf, PacketType::PingReq),
            Self::PingResp => encode_empty(buf, PacketType::PingResp),
            Self::Disconnect => encode_empty(buf, PacketType::Disconnect),
        }
    }

    /// Decodes a packet body. `buf` must hold exactly
    /// `header.remaining_length` bytes.
    ///
    /// # Errors
    ///
    /// Returns `UnexpectedPacket` for the QoS-2 family (not part of this
    /// client) and `MalformedPacket` on length mismatch or malformation.
    pub fn decode_body<B: Buf>(header: &FixedHeader, buf: &mut B) -> Result<Self> {
        if buf.remaining() != header.remaining_length as usize {
            return Err(MqttError::MalformedPacket(format!(
                "body length mismatch: declared {}, have {}",
                header.remaining_length,
                buf.remaining()
            )));
        }
        match header.packet_type {
            PacketType::Connect => Ok(Self::Connect(ConnectPacket::decode_body(buf, header)?)),
            PacketType::ConnAck => Ok(Self::ConnAck(ConnAckPacket::decode_body(buf, header)?)),
            PacketType::Publish => Ok(Self::Publish(PublishPacket::decode_body(buf, header)?)),
            PacketType::PubAck => Ok(Self::PubAck(PubAckPacket::decode_body(buf, header)?)),
            PacketType::Subscribe => {
                Ok(Self::Subscribe(SubscribePacket::decode_body(buf, header)?))
            }
            PacketType::SubAck => Ok(Self::SubAck(SubAckPacket::decode_body(buf, header)?)),
            PacketType::Unsubscribe => Ok(Self::Unsubscribe(UnsubscribePacket::decode_body(
                buf, header,
            )?)),
            PacketType::UnsubAck => Ok(Self::UnsubAck(UnsubAckPacket::decode_body(buf, header)?)),
            PacketType::PingReq => decode_empty(header).map(|()| Self::PingReq),
            PacketType::PingResp => decode_empty(header).map(|()| Self::PingResp),
            PacketType::Disconnect => decode_empty(header).map(|()| Self::Disconnect),
            PacketType::PubRec | PacketType::PubRel | PacketType::PubComp => {
                Err(MqttError::UnexpectedPacket(header.packet_type))
            }
        }
    }

    /// Decodes one complete packet, fixed header included.
    ///
    /// # Errors
    ///
    /// Returns an error on any malformation.
    pub fn decode<B: Buf>(buf: &mut B) -> Result<Self> {
        let header = FixedHeader::decode(buf)?;
        if buf.remaining() < header.remaining_length as usize {
            return Err(MqttError::MalformedPacket(format!(
                "truncated packet: declared {}, have {}",
                header.remaining_length,
                buf.remaining()
            )));
        }
        let mut body = buf.copy_to_bytes(header.remaining_length as usize);
        Self::decode_body(&header, &mut body)
    }
}

fn encode_empty<B: BufMut>(buf: &mut B, packet_type: PacketType) -> Result<()> {
    FixedHeader::new(packet_type, 0, 0).encode(buf)
}

fn decode_empty(header: &FixedHeader) -> Result<()> {
    if header.remaining_length != 0 {
        return Err(MqttError::MalformedPacket(format!(
            "{:?} must have an empty body",
            header.packet_type
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;

    #[test]
    fn fixed_header_round_trip() {
        let header = FixedHeader::new(PacketType::Publish, 0x0B, 1234);
        let mut buf = BytesMut::new();
        header.encode(&mut buf).unwrap();
        let decoded = FixedHeader::decode(&mut buf.freeze()).unwrap();
        assert_eq!(decoded, header);
    }

    #[test]
    fn empty_packets_round_trip() {
        for packet in [Packet::PingReq, Packet::PingResp, Packet::Disconnect] {
            let mut buf = BytesMut::new();
            packet.encode(&mut buf).unwrap();
            assert_eq!(buf.len(), 2);
            assert_eq!(Packet::decode(&mut buf.freeze()).unwrap(), packet);
        }
    }

    #[test]
    fn pingreq_wire_bytes() {
        let mut buf = BytesMut::new();
        Packet::PingReq.encode(&mut buf).unwrap();
        assert_eq!(&buf[..], &[0xC0, 0x00]);
    }

    #[test]
    fn disconnect_wire_bytes() {
        let mut buf = BytesMut::new();
        Packet::Disconnect.encode(&mut buf).unwrap();
        assert_eq!(&buf[..], &[0xE0, 0x00]);
    }

    #[test]
    fn qos2_family_rejected() {
        // PUBREC for packet id 7
        let mut buf = Bytes::from_static(&[0x50, 0x02, 0x00, 0x07]);
        assert_eq!(
            Packet::decode(&mut buf),
            Err(MqttError::UnexpectedPacket(PacketType::PubRec))
        );
    }

    #[test]
    fn invalid_type_nibble() {
        let mut buf = Bytes::from_static(&[0xF0, 0x00]);
        assert!(matches!(
            Packet::decode(&mut buf),
            Err(MqttError::MalformedPacket(_))
        ));
    }

    #[test]
    fn truncated_body_detected() {
        // PUBACK claiming 2 body bytes with only 1 present
        let mut buf = Bytes::from_static(&[0x40, 0x02, 0x00]);
        assert!(matches!(
            Packet::decode(&mut buf),
            Err(MqttError::MalformedPacket(_))
        ));
    }
}
