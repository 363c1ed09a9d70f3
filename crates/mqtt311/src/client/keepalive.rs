//! The keepalive pinger: emits PINGREQ on broker silence and acts as the
//! watchdog that declares the connection dead when nothing comes back.

use mqtt311_protocol::{MqttError, Packet, PingSchedule};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::MissedTickBehavior;

use super::core::ClientCore;

/// Runs for the lifetime of one connection; not spawned at all when the
/// keepalive is zero. Sends PINGREQ once `last_rx` has been idle past the
/// schedule's interval, then requires broker traffic within
/// `response_time`, otherwise the connection is declared failing and the
/// supervisor takes over.
pub(crate) async fn pinger_task(core: Arc<ClientCore>, schedule: PingSchedule) {
    let tick_period =
        (schedule.interval() / 2).clamp(Duration::from_millis(50), Duration::from_secs(1));
    let mut tick = tokio::time::interval(tick_period);
    tick.set_missed_tick_behavior(MissedTickBehavior::Skip);
    tick.tick().await;

    tracing::debug!(interval_ms = schedule.interval().as_millis() as u64, "pinger started");
    loop {
        tick.tick().await;
        if !core.state().is_connected() {
            break;
        }
        // Ping on silence in either direction: a quiet broker needs the
        // liveness probe, and a receive-heavy session must still show the
        // broker outbound traffic inside its keepalive window.
        let (rx_idle, tx_idle) = {
            let session = core.session.lock();
            (session.rx_idle(), session.tx_idle())
        };
        if !schedule.ping_due(rx_idle) && !schedule.ping_due(tx_idle) {
            continue;
        }

        let since = core.session.lock().last_rx();
        if let Err(e) = core.write_packet(&Packet::PingReq).await {
            // write_packet already flagged the connection.
            tracing::debug!(error = %e, "PINGREQ write failed");
            break;
        }
        tracing::trace!("PINGREQ sent");

        if !core
            .wait_rx_advance(since, core.options.response_time)
            .await
        {
            tracing::warn!("no broker traffic after PINGREQ");
            core.declare_failing(&MqttError::Timeout);
            break;
        }
    }
    tracing::debug!("pinger exited");
}
