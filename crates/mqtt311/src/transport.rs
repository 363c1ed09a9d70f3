//! Byte-level socket access: the connector seam and deadline-bounded I/O.
//!
//! The adapter never retries; every failure is surfaced as [`Timeout`] or
//! [`Disconnected`] and retry policy lives entirely in the supervisor.
//!
//! [`Timeout`]: MqttError::Timeout
//! [`Disconnected`]: MqttError::Disconnected

use async_trait::async_trait;
use mqtt311_protocol::{MqttError, Result};
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;

/// Object-safe alias for the byte streams the client runs over.
pub trait StreamIo: AsyncRead + AsyncWrite + Unpin + Send {}

impl<T: AsyncRead + AsyncWrite + Unpin + Send> StreamIo for T {}

/// Read half of an established connection.
pub type Reader = tokio::io::ReadHalf<Box<dyn StreamIo>>;
/// Write half of an established connection.
pub type Writer = tokio::io::WriteHalf<Box<dyn StreamIo>>;

/// Establishes byte streams to the broker.
///
/// TLS is supplied by the application as an alternative implementation
/// wrapping its configured TLS stack; the client itself only speaks plain
/// TCP. `default_port` feeds the `port = 0` resolution rule (1883 plain,
/// 8883 TLS).
#[async_trait]
pub trait Connector: Send + Sync {
    /// Opens a connection to `host:port`.
    ///
    /// # Errors
    ///
    /// Returns an error if the connection cannot be established.
    async fn connect(&self, host: &str, port: u16) -> Result<Box<dyn StreamIo>>;

    /// Port used when the configured port is zero.
    fn default_port(&self) -> u16 {
        1883
    }
}

/// Plain TCP connector, the default transport.
#[derive(Debug, Clone, Copy, Default)]
pub struct TcpConnector;

#[async_trait]
impl Connector for TcpConnector {
    async fn connect(&self, host: &str, port: u16) -> Result<Box<dyn StreamIo>> {
        let stream = TcpStream::connect((host, port))
            .await
            .map_err(MqttError::from)?;
        // Latency matters more than throughput for control traffic.
        let _ = stream.set_nodelay(true);
        Ok(Box::new(stream))
    }
}

/// Reads exactly `buf.len()` bytes, failing with `Timeout` when the deadline
/// expires and `Disconnected` on EOF or reset. A deadline of `None` waits
/// indefinitely (the dispatcher's read posture; liveness is the pinger's
/// job).
///
/// # Errors
///
/// Returns `Timeout`, `Disconnected`, or `Io`.
pub async fn read_exact(
    reader: &mut Reader,
    buf: &mut [u8],
    deadline: Option<Duration>,
) -> Result<()> {
    let read = reader.read_exact(buf);
    let outcome = match deadline {
        Some(deadline) => tokio::time::timeout(deadline, read)
            .await
            .map_err(|_| MqttError::Timeout)?,
        None => read.await,
    };
    outcome.map(|_| ()).map_err(MqttError::from)
}

/// Writes all of `bytes` within the deadline.
///
/// # Errors
///
/// Returns `Timeout`, `Disconnected`, or `Io`.
pub async fn write_all(writer: &mut Writer, bytes: &[u8], deadline: Duration) -> Result<()> {
    let write = async {
        writer.write_all(bytes).await?;
        writer.flush().await
    };
    tokio::time::timeout(deadline, write)
        .await
        .map_err(|_| MqttError::Timeout)?
        .map_err(MqttError::from)
}
