//! Keepalive arithmetic: when a PINGREQ is due.

use std::time::Duration;

/// Resolved ping schedule for a live connection.
///
/// The base interval is a quarter of the keepalive window, so a single lost
/// ping still leaves three opportunities before the broker-side timeout. A
/// non-zero configured `ping_interval` may only shorten the interval (a lower
/// bound on ping frequency, useful for subscribe-only applications); it never
/// stretches it past `keepalive / 4`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PingSchedule {
    interval: Duration,
}

impl PingSchedule {
    /// Builds the schedule, or `None` when `keepalive_secs` is zero: a zero
    /// keepalive disables broker-side liveness and no pings are emitted.
    #[must_use]
    pub fn new(keepalive_secs: u16, ping_interval_secs: u16) -> Option<Self> {
        if keepalive_secs == 0 {
            return None;
        }
        let base = Duration::from_millis(u64::from(keepalive_secs) * 1000 / 4);
        let interval = if ping_interval_secs > 0 {
            base.min(Duration::from_secs(u64::from(ping_interval_secs)))
        } else {
            base
        };
        Some(Self { interval })
    }

    #[must_use]
    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Whether the broker has been silent long enough to warrant a PINGREQ.
    #[must_use]
    pub fn ping_due(&self, idle: Duration) -> bool {
        idle > self.interval
    }
}
