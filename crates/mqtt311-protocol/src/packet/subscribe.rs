use crate::encoding::{decode_string, decode_u16, encode_string};
use crate::error::{MqttError, Result};
use crate::packet::{FixedHeader, MqttPacket, PacketType};
use crate::types::QoS;
use bytes::{Buf, BufMut};

/// One requested subscription within a SUBSCRIBE packet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TopicFilter {
    pub filter: String,
    pub qos: QoS,
}

impl TopicFilter {
    #[must_use]
    pub fn new(filter: impl Into<String>, qos: QoS) -> Self {
        Self {
            filter: filter.into(),
            qos,
        }
    }
}

/// MQTT SUBSCRIBE. Reserved flag bits 0b0010.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubscribePacket {
    pub packet_id: u16,
    pub filters: Vec<TopicFilter>,
}

impl SubscribePacket {
    #[must_use]
    pub fn new(packet_id: u16) -> Self {
        Self {
            packet_id,
            filters: Vec::new(),
        }
    }

    #[must_use]
    pub fn add_filter(mut self, filter: impl Into<String>, qos: QoS) -> Self {
        self.filters.push(TopicFilter::new(filter, qos));
        self
    }
}

impl MqttPacket for SubscribePacket {
    fn packet_type(&self) -> PacketType {
        PacketType::Subscribe
    }

    fn flags(&self) -> u8 {
        0x02
    }

    fn encode_body<B: BufMut>(&self, buf: &mut B) -> Result<()> {
        if self.filters.is_empty() {
            return Err(MqttError::MalformedPacket(
                "SUBSCRIBE must contain at least one topic filter".to_string(),
            ));
        }
        buf.put_u16(self.packet_id);
        for filter in &self.filters {
            encode_string(buf, &filter.filter)?;
            buf.put_u8(filter.qos.as_u8());
        }
        Ok(())
    }

    fn decode_body<B: Buf>(buf: &mut B, fixed_header: &FixedHeader) -> Result<Self> {
        if fixed_header.flags != 0x02 {
            return Err(MqttError::MalformedPacket(format!(
                "SUBSCRIBE reserved flags must be 0x02, got 0x{:02X}",
                fixed_header.flags
            )));
        }
        let packet_id = decode_u16(buf)?;
        let mut filters = Vec::new();
        while buf.has_remaining() {
            let filter = decode_string(buf)?;
            if !buf.has_remaining() {
                return Err(MqttError::MalformedPacket(
                    "SUBSCRIBE filter missing requested QoS".to_string(),
                ));
            }
            let qos = QoS::try_from(buf.get_u8())?;
            filters.push(TopicFilter { filter, qos });
        }
        if filters.is_empty() {
            return Err(MqttError::MalformedPacket(
                "SUBSCRIBE must contain at least one topic filter".to_string(),
            ));
        }
        Ok(Self { packet_id, filters })
    }
}

/// SUBACK return code: granted QoS, or 0x80 for refusal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubAckReturnCode {
    Granted(QoS),
    Failure,
}

impl SubAckReturnCode {
    #[must_use]
    pub fn as_u8(self) -> u8 {
        match self {
            Self::Granted(qos) => qos.as_u8(),
            Self::Failure => 0x80,
        }
    }

    #[must_use]
    pub fn granted_qos(self) -> Option<QoS> {
        match self {
            Self::Granted(qos) => Some(qos),
            Self::Failure => None,
        }
    }
}

impl TryFrom<u8> for SubAckReturnCode {
    type Error = MqttError;

    fn try_from(value: u8) -> Result<Self> {
        match value {
            0..=2 => Ok(Self::Granted(QoS::try_from(value)?)),
            0x80 => Ok(Self::Failure),
            other => Err(MqttError::MalformedPacket(format!(
                "invalid SUBACK return code: 0x{other:02X}"
            ))),
        }
    }
}

/// MQTT SUBACK: one return code per requested filter, in order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubAckPacket {
    pub packet_id: u16,
    pub return_codes: Vec<SubAckReturnCode>,
}

impl MqttPacket for SubAckPacket {
    fn packet_type(&self) -> PacketType {
        PacketType::SubAck
    }

    fn encode_body<B: BufMut>(&self, buf: &mut B) -> Result<()> {
        buf.put_u16(self.packet_id);
        for code in &self.return_codes {
            buf.put_u8(code.as_u8());
        }
        Ok(())
    }

    fn decode_body<B: Buf>(buf: &mut B, _fixed_header: &FixedHeader) -> Result<Self> {
        let packet_id = decode_u16(buf)?;
        let mut return_codes = Vec::new();
        while buf.has_remaining() {
            return_codes.push(SubAckReturnCode::try_from(buf.get_u8())?);
        }
        if return_codes.is_empty() {
            return Err(MqttError::MalformedPacket(
                "SUBACK carries no return codes".to_string(),
            ));
        }
        Ok(Self {
            packet_id,
            return_codes,
        })
    }
}
