use crate::encoding::{decode_string, decode_u16, encode_string};
use crate::error::{MqttError, Result};
use crate::packet::{FixedHeader, MqttPacket, PacketType};
use crate::types::QoS;
use bytes::{Buf, BufMut, Bytes};

const DUP_FLAG: u8 = 0x08;
const QOS_SHIFT: u8 = 1;
const RETAIN_FLAG: u8 = 0x01;

/// MQTT PUBLISH. The payload is a zero-copy slice of the read buffer on the
/// inbound path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishPacket {
    pub topic: String,
    /// Present iff `qos` is [`QoS::AtLeastOnce`]. Never zero.
    pub packet_id: Option<u16>,
    pub payload: Bytes,
    pub qos: QoS,
    pub retain: bool,
    pub dup: bool,
}

impl PublishPacket {
    #[must_use]
    pub fn qos0(topic: impl Into<String>, payload: impl Into<Bytes>, retain: bool) -> Self {
        Self {
            topic: topic.into(),
            packet_id: None,
            payload: payload.into(),
            qos: QoS::AtMostOnce,
            retain,
            dup: false,
        }
    }

    #[must_use]
    pub fn qos1(
        topic: impl Into<String>,
        payload: impl Into<Bytes>,
        retain: bool,
        packet_id: u16,
    ) -> Self {
        Self {
            topic: topic.into(),
            packet_id: Some(packet_id),
            payload: payload.into(),
            qos: QoS::AtLeastOnce,
            retain,
            dup: false,
        }
    }
}

impl MqttPacket for PublishPacket {
    fn packet_type(&self) -> PacketType {
        PacketType::Publish
    }

    fn flags(&self) -> u8 {
        let mut flags = self.qos.as_u8() << QOS_SHIFT;
        if self.dup {
            flags |= DUP_FLAG;
        }
        if self.retain {
            flags |= RETAIN_FLAG;
        }
        flags
    }

    fn encode_body<B: BufMut>(&self, buf: &mut B) -> Result<()> {
        encode_string(buf, &self.topic)?;
        match (self.qos, self.packet_id) {
            (QoS::AtMostOnce, None) => {}
            (QoS::AtLeastOnce, Some(packet_id)) if packet_id != 0 => {
                buf.put_u16(packet_id);
            }
            _ => {
                return Err(MqttError::MalformedPacket(
                    "PUBLISH packet id must be present and non-zero exactly for QoS 1"
                        .to_string(),
                ));
            }
        }
        buf.put_slice(&self.payload);
        Ok(())
    }

    fn decode_body<B: Buf>(buf: &mut B, fixed_header: &FixedHeader) -> Result<Self> {
        let qos = QoS::try_from((fixed_header.flags >> QOS_SHIFT) & 0x03)?;
        let dup = fixed_header.flags & DUP_FLAG != 0;
        let retain = fixed_header.flags & RETAIN_FLAG != 0;

        let topic = decode_string(buf)?;
        let packet_id = match qos {
            QoS::AtMostOnce => None,
            QoS::AtLeastOnce => {
                let packet_id = decode_u16(buf)?;
                if packet_id == 0 {
                    return Err(MqttError::MalformedPacket(
                        "PUBLISH packet id is zero".to_string(),
                    ));
                }
                Some(packet_id)
            }
        };
        let payload = buf.copy_to_bytes(buf.remaining());

        Ok(Self {
            topic,
            packet_id,
            payload,
            qos,
            retain,
            dup,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::packet::Packet;
    use bytes::{Bytes, BytesMut};
    use proptest::prelude::*;

    #[test]
    fn qos1_wire_bytes() {
        let packet = PublishPacket::qos1("t/a", &b"x"[..], false, 1);
        let mut buf = BytesMut::new();
        packet.encode(&mut buf).unwrap();
        assert_eq!(
            &buf[..],
            &[0x32, 0x08, 0x00, 0x03, b't', b'/', b'a', 0x00, 0x01, b'x']
        );
    }

    #[test]
    fn dup_retransmission_sets_flag_bit() {
        let mut packet = PublishPacket::qos1("t/a", &b"x"[..], false, 9);
        packet.dup = true;
        let mut buf = BytesMut::new();
        packet.encode(&mut buf).unwrap();
        assert_eq!(buf[0], 0x3A);
    }

    #[test]
    fn retained_flag_survives_decode() {
        let packet = PublishPacket::qos0("status", &b"online"[..], true);
        let mut buf = BytesMut::new();
        Packet::Publish(packet).encode(&mut buf).unwrap();
        let Packet::Publish(decoded) = Packet::decode(&mut buf.freeze()).unwrap() else {
            panic!("expected PUBLISH");
        };
        assert!(decoded.retain);
        assert_eq!(decoded.qos, QoS::AtMostOnce);
        assert_eq!(decoded.packet_id, None);
    }

    #[test]
    fn empty_payload_round_trip() {
        let packet = PublishPacket::qos1("t", Bytes::new(), false, 42);
        let mut buf = BytesMut::new();
        Packet::Publish(packet.clone()).encode(&mut buf).unwrap();
        assert_eq!(
            Packet::decode(&mut buf.freeze()).unwrap(),
            Packet::Publish(packet)
        );
    }

    #[test]
    fn qos2_flags_rejected() {
        // PUBLISH with QoS 2 bits: type 3, flags 0b0100
        let mut buf = Bytes::from_static(&[0x34, 0x05, 0x00, 0x01, b't', 0x00, 0x07]);
        assert_eq!(Packet::decode(&mut buf), Err(MqttError::InvalidQoS(2)));
    }

    #[test]
    fn zero_packet_id_rejected() {
        let mut buf = Bytes::from_static(&[0x32, 0x05, 0x00, 0x01, b't', 0x00, 0x00]);
        assert!(matches!(
            Packet::decode(&mut buf),
            Err(MqttError::MalformedPacket(_))
        ));
    }

    #[test]
    fn qos0_with_packet_id_rejected_on_encode() {
        let packet = PublishPacket {
            topic: "t".to_string(),
            packet_id: Some(3),
            payload: Bytes::new(),
            qos: QoS::AtMostOnce,
            retain: false,
            dup: false,
        };
        let mut buf = BytesMut::new();
        assert!(packet.encode(&mut buf).is_err());
    }

    proptest! {
        #[test]
        fn prop_publish_round_trip(
            topic in "[a-z0-9/]{1,32}",
            payload in proptest::collection::vec(any::<u8>(), 0..256),
            retain in any::<bool>(),
            dup in any::<bool>(),
            packet_id in 1u16..,
            qos1 in any::<bool>(),
        ) {
            let mut packet = if qos1 {
                PublishPacket::qos1(topic, payload, retain, packet_id)
            } else {
                PublishPacket::qos0(topic, payload, retain)
            };
            packet.dup = dup && qos1;
            let mut buf = BytesMut::new();
            Packet::Publish(packet.clone()).encode(&mut buf).unwrap();
            prop_assert_eq!(
                Packet::decode(&mut buf.freeze()).unwrap(),
                Packet::Publish(packet)
            );
        }
    }
}
