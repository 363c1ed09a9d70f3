//! Network reachability probes beyond the broker session itself.

use crate::client::MqttClient;
use mqtt311_protocol::{MqttError, Result};
use tokio::net::UdpSocket;

/// DNS A query for www.google.com; any well-formed answer proves WAN
/// reachability.
const DNS_QUERY: &[u8] = &[
    0x24, 0x1A, 0x01, 0x00, 0x00, 0x01, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x03, b'w', b'w',
    b'w', 0x06, b'g', b'o', b'o', b'g', b'l', b'e', 0x03, b'c', b'o', b'm', 0x00, 0x00, 0x01,
    0x00, 0x01,
];
const DNS_RESOLVER: &str = "8.8.8.8:53";
const DNS_HEADER_LEN: usize = 12;

impl MqttClient {
    /// Checks internet connectivity independently of the broker by sending
    /// a DNS query to a public resolver. `false` on a down link, no
    /// response within the response window, or a short datagram.
    ///
    /// # Errors
    ///
    /// Returns `Io` if no local UDP socket can be opened.
    pub async fn wan_ok(&self) -> Result<bool> {
        if !self.link_is_up() {
            return Ok(false);
        }
        let socket = UdpSocket::bind("0.0.0.0:0")
            .await
            .map_err(MqttError::from)?;
        socket
            .connect(DNS_RESOLVER)
            .await
            .map_err(MqttError::from)?;
        if socket.send(DNS_QUERY).await.is_err() {
            return Ok(false);
        }

        let mut buf = [0u8; 512];
        match tokio::time::timeout(self.response_time(), socket.recv(&mut buf)).await {
            Ok(Ok(n)) => Ok(n >= DNS_HEADER_LEN),
            Ok(Err(_)) | Err(_) => Ok(false),
        }
    }
}
