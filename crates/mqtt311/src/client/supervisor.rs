//! The connection supervisor: watches a live session for trouble and, on
//! any failure, tears down and reconnects forever with bounded backoff.

use crate::transport::Reader;
use mqtt311_protocol::{
    ConnectivityEvent, MqttError, Packet, PingSchedule, Result, SubscribePacket,
};
use std::sync::Arc;
use std::time::Duration;

use super::core::ClientCore;
use super::{keepalive, reader, MqttClient};

const WATCHDOG_TICK: Duration = Duration::from_secs(1);

/// Spawned once, on the first successful connect. Runs until shutdown.
pub(crate) async fn supervisor_task(core: Arc<ClientCore>, client: MqttClient) {
    let mut state_rx = core.subscribe_state();
    loop {
        if core.is_shutdown() {
            break;
        }

        if core.state().is_connected() {
            tokio::select! {
                _ = state_rx.changed() => {}
                () = tokio::time::sleep(WATCHDOG_TICK) => {
                    if core.is_paused() {
                        // Graceful: DISCONNECT suppresses the will, pending
                        // QoS-1 state stays parked for resume.
                        tracing::info!("pausing: closing session");
                        core.teardown(true).await;
                        core.apply_event(ConnectivityEvent::Teardown);
                    } else if !core.options.link.is_up() {
                        core.declare_failing(&MqttError::LinkDown);
                    }
                }
            }
            continue;
        }

        core.teardown(false).await;
        core.apply_event(ConnectivityEvent::Teardown);

        if core.is_paused() {
            tokio::time::sleep(WATCHDOG_TICK).await;
            continue;
        }

        let mut attempt: u32 = 0;
        loop {
            if core.is_shutdown() || core.is_paused() {
                break;
            }
            match reconnect_once(&core, &client).await {
                Ok(()) => {
                    core.stats.lock().reconnect_count += 1;
                    tracing::info!(attempt, "reconnected");
                    break;
                }
                Err(e) => {
                    core.teardown(false).await;
                    core.apply_event(ConnectivityEvent::Teardown);
                    let delay = core.options.reconnect.calculate_delay(attempt);
                    tracing::warn!(
                        error = %e,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        "reconnect attempt failed"
                    );
                    attempt = attempt.saturating_add(1);
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }
    tracing::debug!("supervisor exited");
}

/// One reconnect attempt: link up, CONNECT with the reconnect clean flag,
/// registry restoration, tasks. A parked QoS-1 publisher resumes itself
/// with a fresh packet id once the state watch flips to connected.
async fn reconnect_once(core: &Arc<ClientCore>, client: &MqttClient) -> Result<()> {
    core.options.link.ensure_up().await?;
    core.apply_event(ConnectivityEvent::LinkUp);

    let mut reader = match core.establish(core.options.clean).await {
        Ok(reader) => reader,
        Err(e) => {
            core.apply_event(ConnectivityEvent::ConnectFail);
            return Err(e);
        }
    };

    if let Err(e) = restore_subscriptions(core, &mut reader).await {
        core.apply_event(ConnectivityEvent::ConnectFail);
        return Err(e);
    }

    let abandoned = core.session.lock().pending_packet_id();
    if abandoned != 0 {
        // Some brokers silently drop retransmissions that reuse the
        // pre-disconnect id; the parked publisher allocates a fresh one.
        tracing::debug!(abandoned, "in-flight publish resumes under a fresh packet id");
    }

    finish_session(core, client, reader);
    Ok(())
}

/// Replays the subscription registry in insertion order, before the session
/// is announced as connected, so every registered filter is live again
/// ahead of the first application publish.
async fn restore_subscriptions(core: &ClientCore, reader: &mut Reader) -> Result<()> {
    let subscriptions = core.session.lock().subscriptions();
    for subscription in subscriptions {
        let packet_id = core.session.lock().next_packet_id();
        let packet =
            SubscribePacket::new(packet_id).add_filter(subscription.filter.clone(), subscription.qos);
        core.write_packet(&Packet::Subscribe(packet)).await?;

        // The dispatcher is not running yet; consume inbound packets here
        // until the matching SUBACK. A persistent session may deliver queued
        // publishes first; route them normally.
        loop {
            let packet = reader::read_packet(reader, Some(core.options.response_time)).await?;
            core.session.lock().note_rx();
            match packet {
                Packet::SubAck(ack) if ack.packet_id == packet_id => {
                    let granted = ack
                        .return_codes
                        .first()
                        .and_then(|code| code.granted_qos())
                        .ok_or_else(|| {
                            MqttError::ProtocolError(format!(
                                "subscription refused on restore: {:?}",
                                subscription.filter
                            ))
                        })?;
                    core.session
                        .lock()
                        .record_subscription(&subscription.filter, granted);
                    tracing::debug!(filter = %subscription.filter, ?granted, "subscription restored");
                    break;
                }
                other => reader::route_packet(core, other).await?,
            }
        }
    }
    Ok(())
}

/// Brings a freshly established session live: dispatcher, pinger (unless
/// keepalive is zero), state flip, callbacks.
pub(crate) fn finish_session(core: &Arc<ClientCore>, client: &MqttClient, reader: Reader) {
    {
        let mut tasks = core.tasks.lock();
        tasks.dispatcher = Some(tokio::spawn(reader::dispatcher_task(
            Arc::clone(core),
            reader,
        )));
        tasks.pinger = PingSchedule::new(core.options.keepalive, core.options.ping_interval)
            .map(|schedule| tokio::spawn(keepalive::pinger_task(Arc::clone(core), schedule)));
    }
    core.apply_event(ConnectivityEvent::ConnectOk);
    core.notify_link(true);
    if let Some(callback) = &core.options.on_connect {
        callback(client.clone());
    }
}
