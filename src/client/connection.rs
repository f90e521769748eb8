//! Connection state shared between caller tasks and the dispatch loop.
//!
//! State machine:
//!
//! ```text
//! DISCONNECTED --connect()--> CONNECTING --heartbeat--> CONNECTED
//! CONNECTING --timeout/error--> ERROR --retries exhausted--> DISCONNECTED
//! CONNECTED --I/O failure, stale heartbeat, or disconnect()--> DISCONNECTED
//! ```

use std::fmt;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use log::{debug, info};
use mavlink::common::{
    MavMessage, PARAM_REQUEST_LIST_DATA, PARAM_REQUEST_READ_DATA, PARAM_SET_DATA,
};
use serde::Serialize;

use super::pending::PendingRegistry;
use crate::cache::ParamCache;
use crate::error::{ConnectError, OperationError, TransportError};
use crate::link::wire::{self, WireType};
use crate::link::{FrameSink, FrameSource};

/// Target ids assumed until the first heartbeat identifies the autopilot.
const DEFAULT_TARGET: (u8, u8) = (1, 1);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Error,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Connected => "connected",
            ConnectionState::Error => "error",
        };
        f.write_str(s)
    }
}

/// Snapshot of the link for status displays.
#[derive(Debug, Clone, Serialize)]
pub struct LinkStatus {
    pub state: ConnectionState,
    pub port: Option<String>,
    pub baud_rate: Option<u32>,
    pub target: Option<(u8, u8)>,
    pub cached_params: usize,
    pub last_heartbeat_age_ms: Option<u64>,
}

/// Everything the dispatch loop and caller tasks share. The transport's
/// receive half is deliberately NOT here: the loop owns it exclusively.
pub(crate) struct LinkShared {
    state: Mutex<ConnectionState>,
    last_heartbeat: Mutex<Option<Instant>>,
    target: Mutex<Option<(u8, u8)>>,
    endpoint: Mutex<Option<(String, u32)>>,
    sink: Mutex<Option<Box<dyn FrameSink>>>,
    pub cache: ParamCache,
    pub pending: PendingRegistry,
}

impl LinkShared {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(ConnectionState::Disconnected),
            last_heartbeat: Mutex::new(None),
            target: Mutex::new(None),
            endpoint: Mutex::new(None),
            sink: Mutex::new(None),
            cache: ParamCache::new(),
            pending: PendingRegistry::new(),
        }
    }

    pub fn state(&self) -> ConnectionState {
        *lock(&self.state)
    }

    pub fn set_state(&self, next: ConnectionState) {
        let mut state = lock(&self.state);
        if *state != next {
            debug!("connection state {} -> {}", *state, next);
            *state = next;
        }
    }

    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    pub fn set_endpoint(&self, endpoint: Option<(String, u32)>) {
        *lock(&self.endpoint) = endpoint;
    }

    pub fn endpoint(&self) -> Option<(String, u32)> {
        lock(&self.endpoint).clone()
    }

    pub fn set_target(&self, target: Option<(u8, u8)>) {
        *lock(&self.target) = target;
    }

    pub fn target_or_default(&self) -> (u8, u8) {
        lock(&self.target).unwrap_or(DEFAULT_TARGET)
    }

    pub fn install_sink(&self, sink: Option<Box<dyn FrameSink>>) {
        *lock(&self.sink) = sink;
    }

    pub fn note_heartbeat(&self) {
        *lock(&self.last_heartbeat) = Some(Instant::now());
    }

    pub fn heartbeat_age(&self) -> Option<Duration> {
        lock(&self.last_heartbeat).map(|t| t.elapsed())
    }

    /// Record a heartbeat seen by the dispatch loop; promotes a connecting
    /// (or silently re-opened) link to CONNECTED.
    pub fn observe_heartbeat(&self, system_id: u8, component_id: u8) {
        self.note_heartbeat();
        {
            let mut target = lock(&self.target);
            if target.is_none() {
                *target = Some((system_id, component_id));
            }
        }
        if !self.is_connected() {
            info!(
                "heartbeat from system {} component {}; link is up",
                system_id, component_id
            );
            self.set_state(ConnectionState::Connected);
        }
    }

    pub fn status(&self) -> LinkStatus {
        let endpoint = self.endpoint();
        LinkStatus {
            state: self.state(),
            port: endpoint.as_ref().map(|(p, _)| p.clone()),
            baud_rate: endpoint.map(|(_, b)| b),
            target: *lock(&self.target),
            cached_params: self.cache.len(),
            last_heartbeat_age_ms: self.heartbeat_age().map(|d| d.as_millis() as u64),
        }
    }

    /// Send through the installed sink, or `NotConnected` when there is none.
    pub fn send(&self, msg: &MavMessage) -> Result<(), OperationError> {
        let sink = lock(&self.sink);
        match sink.as_ref() {
            Some(s) => s.send(msg).map_err(|e| match e {
                TransportError::Closed => OperationError::NotConnected,
                other => OperationError::Transport(other),
            }),
            None => Err(OperationError::NotConnected),
        }
    }

    pub fn send_request_list(&self) -> Result<(), OperationError> {
        let (target_system, target_component) = self.target_or_default();
        self.send(&MavMessage::PARAM_REQUEST_LIST(PARAM_REQUEST_LIST_DATA {
            target_system,
            target_component,
        }))
    }

    pub fn send_request_read(&self, name: &str) -> Result<(), OperationError> {
        let (target_system, target_component) = self.target_or_default();
        self.send(&MavMessage::PARAM_REQUEST_READ(PARAM_REQUEST_READ_DATA {
            param_index: -1,
            target_system,
            target_component,
            param_id: wire::encode_param_id(name),
        }))
    }

    pub fn send_param_set(
        &self,
        name: &str,
        raw: f32,
        wire_type: WireType,
    ) -> Result<(), OperationError> {
        let (target_system, target_component) = self.target_or_default();
        self.send(&MavMessage::PARAM_SET(PARAM_SET_DATA {
            param_value: raw,
            target_system,
            target_component,
            param_id: wire::encode_param_id(name),
            param_type: wire_type.to_mav(),
        }))
    }

    /// Drop link-scoped state after the transport went away. Pending waiters
    /// are failed so callers resolve immediately instead of timing out.
    pub fn mark_link_down(&self) {
        self.install_sink(None);
        self.pending.fail_all();
        self.set_state(ConnectionState::Disconnected);
    }

}

/// Drain frames from a freshly opened source until the autopilot's first
/// heartbeat, or fail once `timeout` elapses. Used during the connect
/// handshake, before the dispatch loop owns the source.
pub(crate) fn wait_for_heartbeat(
    source: &mut dyn FrameSource,
    timeout: Duration,
) -> Result<(u8, u8), ConnectError> {
    let deadline = Instant::now() + timeout;
    loop {
        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            return Err(ConnectError::HeartbeatTimeout(timeout));
        }
        let slice = remaining.min(Duration::from_millis(100));
        match source.receive_next(slice) {
            Ok(Some((header, MavMessage::HEARTBEAT(_)))) => {
                debug!(
                    "heartbeat during handshake from system {} component {}",
                    header.system_id, header.component_id
                );
                return Ok((header.system_id, header.component_id));
            }
            Ok(Some(_)) => continue, // other traffic before the first heartbeat
            Ok(None) => continue,
            Err(TransportError::Io(e)) => return Err(ConnectError::Io(e)),
            Err(TransportError::Closed) => {
                return Err(ConnectError::Io(std::io::Error::new(
                    std::io::ErrorKind::NotConnected,
                    "link closed during handshake",
                )))
            }
        }
    }
}

fn lock<T>(m: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|e| e.into_inner())
}
