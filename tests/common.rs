//! Test utilities & fixtures.
//! Provides channel-backed transports and a scripted vehicle thread that
//! answers parameter traffic the way a PX4 autopilot does, so the full
//! client stack runs without hardware.

#![allow(dead_code)] // Not every test file uses every helper.

use std::sync::mpsc;
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use mavlink::common::{
    MavAutopilot, MavMessage, MavModeFlag, MavParamType, MavState, MavType, HEARTBEAT_DATA,
    PARAM_VALUE_DATA,
};
use mavlink::MavHeader;

use px4param::client::Px4Client;
use px4param::config::Config;
use px4param::error::TransportError;
use px4param::link::wire;
use px4param::link::{FrameSink, FrameSource, RxFrame};

/// Receive half backed by an in-process channel.
pub struct ChannelSource {
    rx: mpsc::Receiver<RxFrame>,
}

impl FrameSource for ChannelSource {
    fn receive_next(&mut self, timeout: Duration) -> Result<Option<RxFrame>, TransportError> {
        match self.rx.recv_timeout(timeout) {
            Ok(frame) => Ok(Some(frame)),
            Err(mpsc::RecvTimeoutError::Timeout) => Ok(None),
            Err(mpsc::RecvTimeoutError::Disconnected) => Err(TransportError::Closed),
        }
    }

    fn close(&mut self) {}
}

/// Send half that records everything the client transmits and forwards it
/// to the vehicle thread.
#[derive(Clone)]
pub struct ChannelSink {
    tx: mpsc::Sender<MavMessage>,
    sent: Arc<Mutex<Vec<MavMessage>>>,
}

impl FrameSink for ChannelSink {
    fn send(&self, msg: &MavMessage) -> Result<(), TransportError> {
        self.sent.lock().unwrap().push(msg.clone());
        self.tx.send(msg.clone()).map_err(|_| TransportError::Closed)
    }
}

#[derive(Debug, Clone)]
pub struct SimParam {
    pub name: String,
    pub value: f32,
    pub wire_type: MavParamType,
}

impl SimParam {
    pub fn new(name: &str, value: f32, wire_type: MavParamType) -> Self {
        Self {
            name: name.to_string(),
            value,
            wire_type,
        }
    }
}

/// Behavior knobs for the scripted vehicle.
pub struct SimOptions {
    /// Delay before a PARAM_SET is echoed.
    pub echo_delay: Duration,
    /// Onboard range limits: (name, min, max). Out-of-range sets are clamped
    /// silently, like PX4's own parameter validation.
    pub clamp: Vec<(String, f32, f32)>,
    /// Names whose PARAM_SET is swallowed with no echo at all.
    pub drop_set_for: Vec<String>,
    pub heartbeat_interval: Duration,
}

impl Default for SimOptions {
    fn default() -> Self {
        Self {
            echo_delay: Duration::ZERO,
            clamp: Vec::new(),
            drop_set_for: Vec::new(),
            heartbeat_interval: Duration::from_millis(300),
        }
    }
}

/// Handle on the scripted vehicle; `params` reflects its live onboard state.
pub struct SimVehicle {
    pub params: Arc<Mutex<Vec<SimParam>>>,
    handle: Option<JoinHandle<()>>,
}

impl SimVehicle {
    pub fn value_of(&self, name: &str) -> Option<f32> {
        self.params
            .lock()
            .unwrap()
            .iter()
            .find(|p| p.name == name)
            .map(|p| p.value)
    }
}

impl Drop for SimVehicle {
    fn drop(&mut self) {
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

fn heartbeat() -> HEARTBEAT_DATA {
    HEARTBEAT_DATA {
        custom_mode: 0,
        mavtype: MavType::MAV_TYPE_QUADROTOR,
        autopilot: MavAutopilot::MAV_AUTOPILOT_PX4,
        base_mode: MavModeFlag::empty(),
        system_status: MavState::MAV_STATE_STANDBY,
        mavlink_version: 3,
    }
}

fn vehicle_header(sequence: u8) -> MavHeader {
    MavHeader {
        system_id: 1,
        component_id: 1,
        sequence,
    }
}

fn param_value_msg(param: &SimParam, index: u16, count: u16) -> MavMessage {
    MavMessage::PARAM_VALUE(PARAM_VALUE_DATA {
        param_value: param.value,
        param_count: count,
        param_index: index,
        param_id: wire::encode_param_id(&param.name),
        param_type: param.wire_type,
    })
}

fn run_vehicle(
    params: Arc<Mutex<Vec<SimParam>>>,
    rx: mpsc::Receiver<MavMessage>,
    tx: mpsc::Sender<RxFrame>,
    opts: SimOptions,
) {
    let mut sequence = 0u8;
    let mut send = |msg: MavMessage, seq: &mut u8| {
        let header = vehicle_header(*seq);
        *seq = seq.wrapping_add(1);
        let _ = tx.send((header, msg));
    };

    loop {
        let msg = match rx.recv_timeout(opts.heartbeat_interval) {
            Ok(msg) => msg,
            Err(mpsc::RecvTimeoutError::Timeout) => {
                send(MavMessage::HEARTBEAT(heartbeat()), &mut sequence);
                continue;
            }
            Err(mpsc::RecvTimeoutError::Disconnected) => return,
        };

        match msg {
            MavMessage::PARAM_REQUEST_LIST(_) => {
                let snapshot = params.lock().unwrap().clone();
                let count = snapshot.len() as u16;
                for (i, param) in snapshot.iter().enumerate() {
                    send(param_value_msg(param, i as u16, count), &mut sequence);
                }
            }
            MavMessage::PARAM_REQUEST_READ(req) => {
                let name = wire::decode_param_id(&req.param_id);
                let snapshot = params.lock().unwrap().clone();
                let count = snapshot.len() as u16;
                // Unknown names get no reply, matching PX4.
                if let Some((i, param)) =
                    snapshot.iter().enumerate().find(|(_, p)| p.name == name)
                {
                    send(param_value_msg(param, i as u16, count), &mut sequence);
                }
            }
            MavMessage::PARAM_SET(set) => {
                let name = wire::decode_param_id(&set.param_id);
                if opts.drop_set_for.contains(&name) {
                    continue;
                }
                if !opts.echo_delay.is_zero() {
                    thread::sleep(opts.echo_delay);
                }
                let mut value = set.param_value;
                if let Some((_, min, max)) =
                    opts.clamp.iter().find(|(n, _, _)| *n == name)
                {
                    value = value.clamp(*min, *max);
                }
                let mut locked = params.lock().unwrap();
                let count = locked.len() as u16;
                let echo = match locked.iter().position(|p| p.name == name) {
                    Some(i) => {
                        locked[i].value = value;
                        param_value_msg(&locked[i], i as u16, count)
                    }
                    None => {
                        // New parameter; PX4 would reject, but accepting lets
                        // tests exercise never-seen names.
                        let param = SimParam::new(&name, value, set.param_type);
                        locked.push(param.clone());
                        param_value_msg(&param, count, count + 1)
                    }
                };
                drop(locked);
                send(echo, &mut sequence);
            }
            _ => {}
        }
    }
}

/// Configuration with deadlines short enough for tests.
pub fn test_config() -> Config {
    let mut config = Config::default();
    config.operations.timeout_secs = 2;
    config.operations.stable_window_ms = 200;
    config.operations.list_timeout_secs = 5;
    config.operations.min_expected_params = 1;
    config.reconnect.auto = false;
    config
}

/// Channel transport pair wired to a freshly spawned scripted vehicle.
/// Returns the two halves for `Px4Client::attach`, the vehicle handle,
/// and the transmit log.
pub fn sim_transport(
    params: Vec<SimParam>,
    opts: SimOptions,
) -> (
    ChannelSource,
    ChannelSink,
    SimVehicle,
    Arc<Mutex<Vec<MavMessage>>>,
) {
    let (to_client_tx, to_client_rx) = mpsc::channel();
    let (to_sim_tx, to_sim_rx) = mpsc::channel();

    let sent = Arc::new(Mutex::new(Vec::new()));
    let sink = ChannelSink {
        tx: to_sim_tx,
        sent: Arc::clone(&sent),
    };
    let source = ChannelSource { rx: to_client_rx };

    let shared_params = Arc::new(Mutex::new(params));
    let thread_params = Arc::clone(&shared_params);
    let handle = thread::spawn(move || run_vehicle(thread_params, to_sim_rx, to_client_tx, opts));

    (
        source,
        sink,
        SimVehicle {
            params: shared_params,
            handle: Some(handle),
        },
        sent,
    )
}

/// A connected client talking to a scripted vehicle over channels. Also
/// returns the transmit log for asserting on what went over the wire.
pub async fn connected_client_with_config(
    params: Vec<SimParam>,
    opts: SimOptions,
    config: Config,
) -> (Px4Client, SimVehicle, Arc<Mutex<Vec<MavMessage>>>) {
    let (source, sink, vehicle, sent) = sim_transport(params, opts);
    let client = Px4Client::new(config);
    client.attach(Box::new(source), Box::new(sink)).await;
    (client, vehicle, sent)
}

pub async fn connected_client(
    params: Vec<SimParam>,
    opts: SimOptions,
) -> (Px4Client, SimVehicle, Arc<Mutex<Vec<MavMessage>>>) {
    connected_client_with_config(params, opts, test_config()).await
}

/// A small but realistic parameter set.
pub fn default_params() -> Vec<SimParam> {
    vec![
        SimParam::new("SYS_AUTOSTART", 4001.0, MavParamType::MAV_PARAM_TYPE_UINT16),
        SimParam::new("SYS_AUTOCONFIG", 0.0, MavParamType::MAV_PARAM_TYPE_INT32),
        SimParam::new("MC_ROLLRATE_P", 0.15, MavParamType::MAV_PARAM_TYPE_REAL32),
        SimParam::new("MC_PITCHRATE_P", 0.15, MavParamType::MAV_PARAM_TYPE_REAL32),
        SimParam::new("EKF2_AID_MASK", 1.0, MavParamType::MAV_PARAM_TYPE_INT32),
    ]
}
