//! Error types for the connection, operation, and transport layers.
//!
//! The split mirrors the call boundaries: [`ConnectError`] comes out of
//! `connect()`, [`OperationError`] out of every parameter operation, and
//! [`TransportError`] out of the raw link. Background drain errors are logged
//! and fed into the reconnect path instead of surfacing here.

use std::time::Duration;
use thiserror::Error;

/// Errors raised while establishing a connection to the autopilot.
#[derive(Debug, Error)]
pub enum ConnectError {
    /// No port was supplied and discovery found no candidate serial device.
    #[error("no candidate serial port found")]
    NoPortFound,

    /// The port opened but the autopilot never sent a heartbeat.
    #[error("no heartbeat received within {0:?}")]
    HeartbeatTimeout(Duration),

    /// Wrapper around serial/stream I/O failures.
    #[error("serial I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors raised by parameter operations (`read`, `write`, `refresh`, ...).
#[derive(Debug, Error)]
pub enum OperationError {
    /// The client has no live link; connect first.
    #[error("not connected to the autopilot")]
    NotConnected,

    /// The operation deadline elapsed. `partial` is true when at least one
    /// related message arrived before the deadline.
    #[error("timed out after {elapsed:?} (partial response seen: {partial})")]
    Timeout { elapsed: Duration, partial: bool },

    /// A write for this parameter is already in flight. Wait for it to
    /// resolve or time out, then retry; requests are never queued silently.
    #[error("operation already pending for {0}; wait for it to resolve and retry")]
    AlreadyPending(String),

    /// The autopilot accepted the set message but applied a different value,
    /// typically because onboard range/validation logic rejected it.
    #[error("verification failed for {name}: requested {requested}, autopilot reports {actual}")]
    VerificationFailed {
        name: String,
        requested: f64,
        actual: f64,
    },

    /// The value cannot be sent as-is. Nothing was transmitted.
    #[error("invalid value {value} for {name}: allowed range [{min}, {max}], suggested {suggested}")]
    InvalidValue {
        name: String,
        value: f64,
        min: f64,
        max: f64,
        suggested: f64,
    },

    /// The parameter is absent from a fully loaded parameter list.
    #[error("unknown parameter {0}")]
    UnknownParameter(String),

    /// Wrapper around link-level failures during a send.
    #[error(transparent)]
    Transport(#[from] TransportError),
}

/// Errors raised by the raw transport link.
#[derive(Debug, Error)]
pub enum TransportError {
    /// Wrapper around stream I/O failures.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The link has been closed and cannot carry traffic.
    #[error("link closed")]
    Closed,
}
