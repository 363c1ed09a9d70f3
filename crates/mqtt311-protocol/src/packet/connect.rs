use crate::encoding::{decode_binary, decode_string, decode_u16, encode_binary, encode_string};
use crate::error::{MqttError, Result};
use crate::packet::{FixedHeader, MqttPacket, PacketType};
use crate::types::{ConnectReturnCode, QoS, WillMessage};
use bytes::{Buf, BufMut};

const PROTOCOL_NAME: &str = "MQTT";
const PROTOCOL_LEVEL: u8 = 4;

mod connect_flags {
    pub const CLEAN_SESSION: u8 = 0x02;
    pub const WILL: u8 = 0x04;
    pub const WILL_QOS_SHIFT: u8 = 3;
    pub const WILL_RETAIN: u8 = 0x20;
    pub const PASSWORD: u8 = 0x40;
    pub const USERNAME: u8 = 0x80;
}

/// MQTT CONNECT: protocol name "MQTT", level 4, no v5 properties.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectPacket {
    pub client_id: String,
    pub clean_session: bool,
    pub keepalive: u16,
    pub will: Option<WillMessage>,
    pub username: Option<String>,
    pub password: Option<Vec<u8>>,
}

impl MqttPacket for ConnectPacket {
    fn packet_type(&self) -> PacketType {
        PacketType::Connect
    }

    fn encode_body<B: BufMut>(&self, buf: &mut B) -> Result<()> {
        if self.password.is_some() && self.username.is_none() {
            return Err(MqttError::MalformedPacket(
                "password requires a username".to_string(),
            ));
        }

        encode_string(buf, PROTOCOL_NAME)?;
        buf.put_u8(PROTOCOL_LEVEL);

        let mut flags = 0u8;
        if self.clean_session {
            flags |= connect_flags::CLEAN_SESSION;
        }
        if let Some(will) = &self.will {
            flags |= connect_flags::WILL;
            flags |= will.qos.as_u8() << connect_flags::WILL_QOS_SHIFT;
            if will.retain {
                flags |= connect_flags::WILL_RETAIN;
            }
        }
        if self.username.is_some() {
            flags |= connect_flags::USERNAME;
        }
        if self.password.is_some() {
            flags |= connect_flags::PASSWORD;
        }
        buf.put_u8(flags);
        buf.put_u16(self.keepalive);

        encode_string(buf, &self.client_id)?;
        if let Some(will) = &self.will {
            encode_string(buf, &will.topic)?;
            encode_binary(buf, &will.payload)?;
        }
        if let Some(username) = &self.username {
            encode_string(buf, username)?;
        }
        if let Some(password) = &self.password {
            encode_binary(buf, password)?;
        }
        Ok(())
    }

    fn decode_body<B: Buf>(buf: &mut B, _fixed_header: &FixedHeader) -> Result<Self> {
        let protocol_name = decode_string(buf)?;
        if protocol_name != PROTOCOL_NAME {
            return Err(MqttError::ProtocolError(format!(
                "unknown protocol name: {protocol_name:?}"
            )));
        }
        if !buf.has_remaining() {
            return Err(MqttError::MalformedPacket(
                "truncated CONNECT".to_string(),
            ));
        }
        let level = buf.get_u8();
        if level != PROTOCOL_LEVEL {
            return Err(MqttError::ProtocolError(format!(
                "unsupported protocol level: {level}"
            )));
        }
        if !buf.has_remaining() {
            return Err(MqttError::MalformedPacket(
                "truncated CONNECT".to_string(),
            ));
        }
        let flags = buf.get_u8();
        if flags & 0x01 != 0 {
            return Err(MqttError::MalformedPacket(
                "CONNECT reserved flag set".to_string(),
            ));
        }
        let keepalive = decode_u16(buf)?;
        let client_id = decode_string(buf)?;

        let will = if flags & connect_flags::WILL != 0 {
            let topic = decode_string(buf)?;
            let payload = decode_binary(buf)?;
            let qos = QoS::try_from((flags >> connect_flags::WILL_QOS_SHIFT) & 0x03)?;
            Some(WillMessage {
                topic,
                payload,
                qos,
                retain: flags & connect_flags::WILL_RETAIN != 0,
            })
        } else {
            None
        };
        let username = if flags & connect_flags::USERNAME != 0 {
            Some(decode_string(buf)?)
        } else {
            None
        };
        let password = if flags & connect_flags::PASSWORD != 0 {
            Some(decode_binary(buf)?.to_vec())
        } else {
            None
        };

        Ok(Self {
            client_id,
            clean_session: flags & connect_flags::CLEAN_SESSION != 0,
            keepalive,
            will,
            username,
            password,
        })
    }
}

/// MQTT CONNACK: session-present flag and return code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnAckPacket {
    pub session_present: bool,
    pub return_code: ConnectReturnCode,
}

impl MqttPacket for ConnAckPacket {
    fn packet_type(&self) -> PacketType {
        PacketType::ConnAck
    }

    fn encode_body<B: BufMut>(&self, buf: &mut B) -> Result<()> {
        buf.put_u8(u8::from(self.session_present));
        buf.put_u8(self.return_code.as_u8());
        Ok(())
    }

    fn decode_body<B: Buf>(buf: &mut B, fixed_header: &FixedHeader) -> Result<Self> {
        if fixed_header.remaining_length != 2 {
            return Err(MqttError::MalformedPacket(format!(
                "CONNACK remaining length must be 2, got {}",
                fixed_header.remaining_length
            )));
        }
        let ack_flags = buf.get_u8();
        if ack_flags & !0x01 != 0 {
            return Err(MqttError::MalformedPacket(
                "CONNACK reserved flags set".to_string(),
            ));
        }
        let return_code = ConnectReturnCode::try_from(buf.get_u8())?;
        Ok(Self {
            session_present: ack_flags & 0x01 != 0,
            return_code,
        })
    }
}
