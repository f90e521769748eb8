//! # px4param - PX4 Parameter Client over MAVLink Serial
//!
//! px4param keeps a ground-side mirror of a PX4 autopilot's onboard
//! parameters and pushes changes back to the vehicle over a serial MAVLink
//! link. It is built for headless use: companion computers, bench scripts,
//! and CI rigs that need `get`/`set`/`sync` without a full ground station.
//!
//! ## Features
//!
//! - **Connection Management**: Port discovery, heartbeat handshake with
//!   retries, liveness monitoring, and automatic reconnection with backoff.
//! - **Parameter Cache**: Concurrent-safe mirror of the autopilot's
//!   parameter table with per-name and wildcard change listeners.
//! - **Verified Writes**: Every write is read back and compared under the
//!   wire type's equality rule; type-aware value validation happens before
//!   anything is transmitted.
//! - **Full List Sync**: Burst download of the complete parameter list with
//!   stability detection, since the protocol has no end-of-list marker.
//! - **Async Design**: Built with Tokio; blocking serial I/O is isolated on
//!   a dedicated dispatch task.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use px4param::client::Px4Client;
//! use px4param::config::Config;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Config::load("config.toml").await?;
//!     let client = Px4Client::new(config);
//!     client.connect().await?;
//!
//!     client.write("SYS_AUTOSTART", 4010.0, Default::default()).await?;
//!     let record = client.read("SYS_AUTOSTART").await?;
//!     println!("{} = {}", record.name, record.value);
//!
//!     client.disconnect().await;
//!     Ok(())
//! }
//! ```
//!
//! ## Module Organization
//!
//! - [`client`] - connection lifecycle, dispatch loop, and parameter operations
//! - [`cache`] - the parameter mirror and change notification
//! - [`link`] - transport traits, the serial implementation, and wire encoding
//! - [`ports`] - serial port discovery for autopilot boards
//! - [`config`] - configuration management and validation
//! - [`error`] - error types for each layer
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────┐
//! │    Px4Client     │ ← operations: read / write / refresh
//! └──────────────────┘
//!          │
//! ┌──────────────────┐
//! │  Dispatch Loop   │ ← routes PARAM_VALUE / HEARTBEAT, reconnects
//! └──────────────────┘
//!          │
//! ┌──────────────────┐
//! │   Serial Link    │ ← MAVLink framing over the serial port
//! └──────────────────┘
//! ```

pub mod cache;
pub mod client;
pub mod config;
pub mod error;
pub mod link;
pub mod ports;

pub use cache::{ParamCache, ParamRecord};
pub use client::{ConnectionState, Px4Client, WriteOptions};
pub use error::{ConnectError, OperationError, TransportError};
