//! The network-link seam.
//!
//! WiFi association is an external collaborator: on embedded targets an
//! implementation drives the platform's WLAN interface, waits out DHCP, and
//! holds the association steady before reporting up. The client only ever
//! asks two things: is the link up right now, and bring it up (blocking
//! until it is).

use async_trait::async_trait;
use mqtt311_protocol::Result;

/// Link-layer connectivity as seen by the connection supervisor.
#[async_trait]
pub trait NetworkLink: Send + Sync {
    /// Non-blocking link status. Polled from `is_connected()` and the
    /// supervisor's watchdog tick.
    fn is_up(&self) -> bool;

    /// Associates the link, suspending until it is usable.
    ///
    /// # Errors
    ///
    /// Returns `LinkDown` if the link cannot be brought up; the supervisor
    /// backs off and calls again.
    async fn ensure_up(&self) -> Result<()>;
}

/// A link that is always associated: wired or hosted environments.
#[derive(Debug, Clone, Copy, Default)]
pub struct AlwaysUp;

#[async_trait]
impl NetworkLink for AlwaysUp {
    fn is_up(&self) -> bool {
        true
    }

    async fn ensure_up(&self) -> Result<()> {
        Ok(())
    }
}
