//! # PX4 Parameter Client
//!
//! [`Px4Client`] ties the pieces together: it owns the shared link state,
//! runs the connection lifecycle (open, heartbeat handshake, retries,
//! reconnect), hosts the background dispatch loop, and exposes the parameter
//! operations.
//!
//! ```rust,no_run
//! use px4param::client::Px4Client;
//! use px4param::config::Config;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let client = Px4Client::new(Config::default());
//!     client.connect().await?;
//!     let record = client.read("SYS_AUTOSTART").await?;
//!     println!("{} = {}", record.name, record.value);
//!     client.disconnect().await;
//!     Ok(())
//! }
//! ```

mod connection;
mod dispatch;
mod ops;
mod pending;

use std::collections::HashMap;
use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use log::{debug, info, warn};
use tokio::task::JoinHandle;

use crate::cache::{ListenerId, ParamRecord};
use crate::config::Config;
use crate::error::{ConnectError, OperationError};
use crate::link::{serial, FrameSink, FrameSource};
use crate::ports;

use connection::LinkShared;
use dispatch::{DispatchConfig, Reopener};

pub use connection::{ConnectionState, LinkStatus};
pub use ops::{BatchOutcome, StableOutcome, WriteOptions, WriteOutcome};

/// One running dispatch loop with its own stop token. The token is never
/// shared between pump generations, so a replaced pump cannot consume a
/// later pump's shutdown signal.
struct Pump {
    handle: JoinHandle<()>,
    stop: Arc<AtomicBool>,
}

impl Pump {
    async fn shutdown(self) {
        self.stop.store(true, Ordering::SeqCst);
        if let Err(e) = self.handle.await {
            debug!("dispatch task ended abnormally: {}", e);
        }
    }
}

/// Handle to one autopilot over one link. Cheap to share behind an `Arc`;
/// all methods take `&self`.
pub struct Px4Client {
    shared: Arc<LinkShared>,
    cfg: Config,
    pump: tokio::sync::Mutex<Option<Pump>>,
}

impl Px4Client {
    pub fn new(cfg: Config) -> Self {
        Self {
            shared: Arc::new(LinkShared::new()),
            cfg,
            pump: tokio::sync::Mutex::new(None),
        }
    }

    pub fn config(&self) -> &Config {
        &self.cfg
    }

    /// Open the configured (or discovered) serial port, wait for the first
    /// heartbeat, and start the dispatch loop. Retries up to the configured
    /// attempt count; already-connected calls return immediately.
    pub async fn connect(&self) -> Result<(), ConnectError> {
        if self.shared.is_connected() {
            debug!("connect() on a live link is a no-op");
            return Ok(());
        }

        let port = match self.cfg.link.port.clone() {
            Some(p) => p,
            None => ports::find_candidate().ok_or(ConnectError::NoPortFound)?,
        };
        let baud = self.cfg.link.baud_rate;
        let io_timeout = self.cfg.link.io_timeout();
        let heartbeat_timeout = self.cfg.link.heartbeat_timeout();

        self.shared.set_endpoint(Some((port.clone(), baud)));
        self.shared.set_state(ConnectionState::Connecting);

        let mut last_err: Option<ConnectError> = None;
        for attempt in 1..=self.cfg.link.connect_retries {
            let port_name = port.clone();
            let opened = tokio::task::spawn_blocking(move || {
                let (mut source, sink) = serial::open(&port_name, baud, io_timeout)?;
                let target = connection::wait_for_heartbeat(&mut source, heartbeat_timeout)?;
                Ok::<_, ConnectError>((source, sink, target))
            })
            .await;

            match opened {
                Ok(Ok((source, sink, target))) => {
                    info!(
                        "connected to {} at {} baud (autopilot system {} component {})",
                        port, baud, target.0, target.1
                    );
                    self.shared.set_target(Some(target));
                    self.shared.install_sink(Some(Box::new(sink)));
                    self.shared.note_heartbeat();
                    self.shared.set_state(ConnectionState::Connected);

                    let reopener = reopener_for(port.clone(), baud, io_timeout);
                    self.start_pump(Some(Box::new(source)), Some(reopener)).await;
                    return Ok(());
                }
                Ok(Err(e)) => {
                    warn!(
                        "connect attempt {}/{} to {} failed: {}",
                        attempt, self.cfg.link.connect_retries, port, e
                    );
                    self.shared.set_state(ConnectionState::Error);
                    last_err = Some(e);
                }
                Err(join_err) => {
                    last_err = Some(ConnectError::Io(io::Error::new(
                        io::ErrorKind::Other,
                        join_err,
                    )));
                }
            }
        }

        self.shared.set_state(ConnectionState::Disconnected);
        self.shared.set_endpoint(None);
        Err(last_err.unwrap_or(ConnectError::NoPortFound))
    }

    /// Run against an already-open transport pair. Used with in-process
    /// simulators and non-serial streams; the heartbeat handshake is skipped
    /// and the autopilot is assumed at the conventional (1, 1) address.
    pub async fn attach(&self, source: Box<dyn FrameSource>, sink: Box<dyn FrameSink>) {
        self.shared.set_target(Some((1, 1)));
        self.shared.install_sink(Some(sink));
        self.shared.note_heartbeat();
        self.shared.set_state(ConnectionState::Connected);
        self.start_pump(Some(source), None).await;
    }

    /// Stop the dispatch loop, drop the transport, and fail anything still
    /// pending. Safe to call repeatedly and on a never-connected client.
    pub async fn disconnect(&self) {
        let pump = self.pump.lock().await.take();
        if let Some(pump) = pump {
            pump.shutdown().await;
        }
        self.shared.install_sink(None);
        self.shared.set_target(None);
        self.shared.set_endpoint(None);
        self.shared.pending.fail_all();
        self.shared.set_state(ConnectionState::Disconnected);
    }

    async fn start_pump(&self, source: Option<Box<dyn FrameSource>>, reopener: Option<Reopener>) {
        let mut slot = self.pump.lock().await;
        // A previous pump may still be alive (auto-reconnect keeps it running
        // after a link drop); stop and join it before replacing it.
        if let Some(old) = slot.take() {
            old.shutdown().await;
        }

        let shared = Arc::clone(&self.shared);
        let stop = Arc::new(AtomicBool::new(false));
        let token = Arc::clone(&stop);
        let cfg = DispatchConfig {
            heartbeat_timeout: self.cfg.link.heartbeat_timeout(),
            auto_reconnect: self.cfg.reconnect.auto,
            reconnect_backoff: self.cfg.reconnect.backoff(),
            ..DispatchConfig::default()
        };
        let handle =
            tokio::task::spawn_blocking(move || dispatch::run(shared, token, source, reopener, cfg));
        *slot = Some(Pump { handle, stop });
    }

    pub fn state(&self) -> ConnectionState {
        self.shared.state()
    }

    pub fn is_connected(&self) -> bool {
        self.shared.is_connected()
    }

    pub fn status(&self) -> LinkStatus {
        self.shared.status()
    }

    /// Read a parameter, served from the cache when possible.
    pub async fn read(&self, name: &str) -> Result<ParamRecord, OperationError> {
        ops::read(&self.shared, name, self.cfg.operations.timeout()).await
    }

    /// Read a parameter straight from the autopilot, bypassing the cache.
    pub async fn read_fresh(&self, name: &str) -> Result<ParamRecord, OperationError> {
        ops::read_fresh(&self.shared, name, self.cfg.operations.timeout()).await
    }

    /// Write a parameter. Defaults to write-then-verify; see [`WriteOptions`].
    pub async fn write(
        &self,
        name: &str,
        value: f64,
        opts: WriteOptions,
    ) -> Result<WriteOutcome, OperationError> {
        let verify = opts.verify.unwrap_or(self.cfg.operations.verify_writes);
        let timeout = opts.timeout.unwrap_or_else(|| self.cfg.operations.timeout());
        ops::write(&self.shared, name, value, opts.range, verify, timeout).await
    }

    /// Apply several writes in order, collecting per-name failures.
    pub async fn batch_write(&self, entries: &[(String, f64)]) -> BatchOutcome {
        ops::batch_write(
            &self.shared,
            entries,
            self.cfg.operations.verify_writes,
            self.cfg.operations.timeout(),
        )
        .await
    }

    /// Drop the cache, request the full parameter list, and wait for it to
    /// stabilize. Returns the number of parameters received.
    pub async fn refresh(&self) -> Result<usize, OperationError> {
        ops::refresh(
            &self.shared,
            self.cfg.operations.min_expected_params,
            self.cfg.operations.stable_window(),
            self.cfg.operations.list_timeout(),
        )
        .await
    }

    /// Wait for the background parameter download (kicked off by the dispatch
    /// loop on connect) to stabilize, without clearing anything.
    pub async fn await_parameters(&self) -> StableOutcome {
        ops::await_stable_count(
            &self.shared,
            self.cfg.operations.min_expected_params,
            self.cfg.operations.stable_window(),
            self.cfg.operations.list_timeout(),
        )
        .await
    }

    pub fn cached(&self, name: &str) -> Option<ParamRecord> {
        self.shared.cache.get(name)
    }

    pub fn cached_snapshot(&self) -> HashMap<String, ParamRecord> {
        self.shared.cache.snapshot()
    }

    pub fn cached_len(&self) -> usize {
        self.shared.cache.len()
    }

    /// Cached parameters whose name contains `term` (case-insensitive),
    /// sorted by name.
    pub fn search(&self, term: &str) -> Vec<ParamRecord> {
        let needle = term.to_uppercase();
        let mut hits: Vec<ParamRecord> = self
            .shared
            .cache
            .snapshot()
            .into_values()
            .filter(|r| r.name.to_uppercase().contains(&needle))
            .collect();
        hits.sort_by(|a, b| a.name.cmp(&b.name));
        hits
    }

    /// Subscribe to parameter updates for one name, or
    /// [`crate::cache::WILDCARD`] for all of them.
    pub fn on_param_update<F>(&self, pattern: &str, listener: F) -> ListenerId
    where
        F: Fn(&ParamRecord) + Send + Sync + 'static,
    {
        self.shared.cache.add_listener(pattern, listener)
    }

    pub fn remove_param_listener(&self, id: ListenerId) {
        self.shared.cache.remove_listener(id);
    }
}

fn reopener_for(port: String, baud: u32, io_timeout: Duration) -> Reopener {
    Box::new(move || match serial::open(&port, baud, io_timeout) {
        Ok((source, sink)) => Some((
            Box::new(source) as Box<dyn FrameSource>,
            Box::new(sink) as Box<dyn FrameSink>,
        )),
        Err(e) => {
            debug!("reopen of {} failed: {}", port, e);
            None
        }
    })
}
