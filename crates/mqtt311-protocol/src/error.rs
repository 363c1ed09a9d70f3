use crate::packet::PacketType;
use crate::types::ConnectReturnCode;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, MqttError>;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MqttError {
    #[error("IO error: {0}")]
    Io(String),

    #[error("protocol error: {0}")]
    ProtocolError(String),

    #[error("malformed packet: {0}")]
    MalformedPacket(String),

    #[error("malformed remaining length")]
    MalformedRemainingLength,

    #[error("unexpected packet type: {0:?}")]
    UnexpectedPacket(PacketType),

    #[error("connection refused: {0:?}")]
    ConnectionRefused(ConnectReturnCode),

    #[error("timeout")]
    Timeout,

    #[error("disconnected")]
    Disconnected,

    #[error("network link down")]
    LinkDown,

    #[error("not connected")]
    NotConnected,

    #[error("invalid topic name: {0}")]
    InvalidTopicName(String),

    #[error("invalid topic filter: {0}")]
    InvalidTopicFilter(String),

    #[error("invalid QoS: {0}")]
    InvalidQoS(u8),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),
}

impl MqttError {
    /// Whether the connection supervisor absorbs this error by tearing the
    /// session down and reconnecting. Argument and state errors surface to
    /// the caller instead.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::Io(_)
                | Self::ProtocolError(_)
                | Self::MalformedPacket(_)
                | Self::MalformedRemainingLength
                | Self::UnexpectedPacket(_)
                | Self::Timeout
                | Self::Disconnected
                | Self::LinkDown
        )
    }
}

impl From<std::io::Error> for MqttError {
    fn from(err: std::io::Error) -> Self {
        use std::io::ErrorKind;
        match err.kind() {
            ErrorKind::TimedOut | ErrorKind::WouldBlock => Self::Timeout,
            ErrorKind::UnexpectedEof
            | ErrorKind::ConnectionReset
            | ErrorKind::ConnectionAborted
            | ErrorKind::BrokenPipe
            | ErrorKind::NotConnected => Self::Disconnected,
            _ => Self::Io(err.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transient_classification() {
        assert!(MqttError::Timeout.is_transient());
        assert!(MqttError::Disconnected.is_transient());
        assert!(MqttError::LinkDown.is_transient());
        assert!(MqttError::ProtocolError("bad CONNACK".into()).is_transient());

        assert!(!MqttError::NotConnected.is_transient());
        assert!(!MqttError::InvalidQoS(2).is_transient());
        assert!(!MqttError::InvalidTopicName("a/#".into()).is_transient());
        assert!(!MqttError::ConnectionRefused(ConnectReturnCode::NotAuthorized).is_transient());
    }

    #[test]
    fn io_error_mapping() {
        let eof = std::io::Error::new(std::io::ErrorKind::UnexpectedEof, "eof");
        assert_eq!(MqttError::from(eof), MqttError::Disconnected);

        let timed_out = std::io::Error::new(std::io::ErrorKind::TimedOut, "slow");
        assert_eq!(MqttError::from(timed_out), MqttError::Timeout);
    }
}
