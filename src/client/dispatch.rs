//! The receive pump: a blocking loop that owns the transport's receive half,
//! routes every inbound frame, and does link housekeeping between frames.
//!
//! Runs on `spawn_blocking` since serial reads are blocking; everything it
//! shares with caller tasks goes through [`LinkShared`]. Each pump carries
//! its own stop token; the loop exits only when that token is raised, and
//! the token is never reused for a later pump.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use log::{debug, info, trace, warn};
use mavlink::common::MavMessage;
use mavlink::Message;

use super::connection::{ConnectionState, LinkShared};
use crate::cache::ParamRecord;
use crate::link::wire::{self, WireType};
use crate::link::{FrameSink, FrameSource, RxFrame};

/// How a dead transport gets replaced during automatic reconnect.
pub(crate) type Reopener =
    Box<dyn Fn() -> Option<(Box<dyn FrameSource>, Box<dyn FrameSink>)> + Send>;

pub(crate) struct DispatchConfig {
    /// Per-iteration read timeout; also the housekeeping cadence when idle.
    pub drain_timeout: Duration,
    /// A connected link with no heartbeat for this long is considered dead.
    pub heartbeat_timeout: Duration,
    pub auto_reconnect: bool,
    pub reconnect_backoff: Duration,
    /// Minimum gap between automatic PARAM_REQUEST_LIST retransmits.
    pub list_throttle: Duration,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            drain_timeout: Duration::from_millis(100),
            heartbeat_timeout: Duration::from_secs(10),
            auto_reconnect: true,
            reconnect_backoff: Duration::from_secs(2),
            list_throttle: Duration::from_secs(2),
        }
    }
}

/// Loop body. Blocks until this pump's stop token is raised.
pub(crate) fn run(
    shared: Arc<LinkShared>,
    stop: Arc<AtomicBool>,
    mut source: Option<Box<dyn FrameSource>>,
    reopener: Option<Reopener>,
    cfg: DispatchConfig,
) {
    let mut last_list_request: Option<Instant> = None;
    let mut last_reopen: Option<Instant> = None;
    let mut waiting_since: Option<Instant> = None;

    debug!("dispatch loop started");
    while !stop.load(Ordering::SeqCst) {
        let Some(src) = source.as_mut() else {
            // No transport. Either reconnect or wait for the stop flag.
            match (&reopener, cfg.auto_reconnect) {
                (Some(reopen), true) => {
                    let backoff_over = last_reopen
                        .map(|t| t.elapsed() >= cfg.reconnect_backoff)
                        .unwrap_or(true);
                    if backoff_over {
                        last_reopen = Some(Instant::now());
                        if let Some((new_source, new_sink)) = reopen() {
                            info!("transport reopened, waiting for heartbeat");
                            shared.install_sink(Some(new_sink));
                            shared.set_state(ConnectionState::Connecting);
                            waiting_since = Some(Instant::now());
                            source = Some(new_source);
                            continue;
                        }
                        debug!(
                            "reconnect attempt failed, next in {:?}",
                            cfg.reconnect_backoff
                        );
                    }
                }
                _ => {}
            }
            std::thread::sleep(Duration::from_millis(200));
            continue;
        };

        match src.receive_next(cfg.drain_timeout) {
            Ok(Some(frame)) => {
                handle_frame(&shared, frame);
                continue; // stay hot while frames are flowing
            }
            Ok(None) => {}
            Err(e) => {
                warn!("transport read failed: {}", e);
                src.close();
                source = None;
                shared.mark_link_down();
                waiting_since = None;
                continue;
            }
        }

        // Idle housekeeping.
        match shared.state() {
            ConnectionState::Connected => {
                waiting_since = None;
                if let Some(age) = shared.heartbeat_age() {
                    if age > cfg.heartbeat_timeout {
                        warn!("no heartbeat for {:?}, dropping link", age);
                        src.close();
                        source = None;
                        shared.mark_link_down();
                        continue;
                    }
                }
                // Keep the cache warm: an empty cache on a live link means
                // the full list was never received (or was just cleared).
                if shared.cache.is_empty() {
                    let throttled = last_list_request
                        .map(|t| t.elapsed() < cfg.list_throttle)
                        .unwrap_or(false);
                    if !throttled {
                        last_list_request = Some(Instant::now());
                        if let Err(e) = shared.send_request_list() {
                            debug!("parameter list request failed: {}", e);
                        }
                    }
                }
            }
            ConnectionState::Connecting => {
                // Reopened transport that never produced a heartbeat.
                let stale = waiting_since
                    .map(|t| t.elapsed() > cfg.heartbeat_timeout)
                    .unwrap_or(false);
                if stale {
                    warn!(
                        "no heartbeat within {:?} after reopen, dropping link",
                        cfg.heartbeat_timeout
                    );
                    src.close();
                    source = None;
                    shared.mark_link_down();
                    waiting_since = None;
                }
            }
            _ => {}
        }
    }

    if let Some(mut src) = source.take() {
        src.close();
    }
    debug!("dispatch loop stopped");
}

fn handle_frame(shared: &LinkShared, (header, msg): RxFrame) {
    match msg {
        MavMessage::PARAM_VALUE(data) => {
            let name = wire::decode_param_id(&data.param_id);
            if name.is_empty() {
                trace!("ignoring PARAM_VALUE with empty name");
                return;
            }
            let Some(wire_type) = WireType::from_mav(data.param_type) else {
                debug!(
                    "ignoring {} with unsupported wire type {:?}",
                    name, data.param_type
                );
                return;
            };
            let record = ParamRecord {
                value: wire::decode_value(wire_type, data.param_value),
                name,
                wire_type,
                index: data.param_index,
                total_count: data.param_count,
                last_updated: chrono::Utc::now(),
            };
            trace!(
                "PARAM_VALUE {} = {} ({}/{})",
                record.name,
                record.value,
                record.index,
                record.total_count
            );
            // Cache before waking waiters, so a woken caller that looks at
            // the cache always finds the value it was woken for.
            shared.cache.upsert(record.clone());
            let woken = shared.pending.resolve(&record.name, &record);
            if woken > 0 {
                trace!("{} waiter(s) woken for {}", woken, record.name);
            }
        }
        MavMessage::HEARTBEAT(_) => {
            shared.observe_heartbeat(header.system_id, header.component_id);
        }
        MavMessage::COMMAND_ACK(ack) => {
            trace!("COMMAND_ACK {:?}: {:?}", ack.command, ack.result);
        }
        MavMessage::STATUSTEXT(status) => {
            let text: String = String::from_utf8_lossy(&status.text)
                .trim_end_matches('\0')
                .to_string();
            debug!("autopilot status [{:?}]: {}", status.severity, text);
        }
        other => {
            trace!("ignoring message id {}", other.message_id());
        }
    }
}
