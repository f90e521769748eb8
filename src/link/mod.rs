//! # Transport Link
//!
//! Raw byte-level framing over the serial connection to the autopilot. This
//! layer is purely mechanical: open the stream, serialize outgoing messages,
//! and hand back the next fully framed incoming message within a bounded
//! timeout. No retry or correlation logic lives here.
//!
//! The link is split along its two directions:
//!
//! - [`FrameSource`] is the receive half. After connection it has exactly one
//!   owner, the message dispatch loop, so per-name message ordering is
//!   well-defined.
//! - [`FrameSink`] is the send half, safe to call from any task concurrently
//!   with the loop's reads.
//!
//! [`serial::open`] produces both halves over a real serial port; the test
//! harness supplies channel-backed implementations of the same traits.

use std::time::Duration;

use mavlink::common::MavMessage;
use mavlink::MavHeader;

use crate::error::TransportError;

pub mod serial;
pub mod wire;

/// A framed incoming message together with its routing header.
pub type RxFrame = (MavHeader, MavMessage);

/// Receive half of the link. Single-owner after connection.
pub trait FrameSource: Send {
    /// Return the next fully framed message, or `None` once `timeout` has
    /// elapsed with nothing decodable. Malformed frames are dropped and
    /// logged, never surfaced. Must not block the caller beyond `timeout`.
    fn receive_next(&mut self, timeout: Duration) -> Result<Option<RxFrame>, TransportError>;

    /// Release the underlying stream. Idempotent.
    fn close(&mut self);
}

/// Send half of the link. Serializes and writes; no response correlation.
pub trait FrameSink: Send + Sync {
    fn send(&self, msg: &MavMessage) -> Result<(), TransportError>;
}
