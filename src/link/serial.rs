//! Serial implementation of the transport link.
//!
//! Opens the port the way USB autopilot boards expect: explicit 8N1 framing
//! on unix, a DTR/RTS toggle to wake the device, a short settle delay, and a
//! purge of any boot noise sitting in the OS buffer. The opened port is split
//! with `try_clone` so the reader stays single-owner while sends can come
//! from any task.

use std::io::{self, Read, Write};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use log::{debug, trace};
use mavlink::common::MavMessage;
use mavlink::error::MessageReadError;
use mavlink::peek_reader::PeekReader;
use mavlink::{read_versioned_msg, write_versioned_msg, MavHeader, MavlinkVersion};
use serialport::SerialPort;

use super::{FrameSink, FrameSource, RxFrame};
use crate::error::{ConnectError, TransportError};

/// MAVLink system id this client identifies as (conventional GCS id).
pub const GCS_SYSTEM_ID: u8 = 255;
/// MAVLink component id this client identifies as.
pub const GCS_COMPONENT_ID: u8 = 190;

/// Receive half over a serial port.
pub struct SerialSource {
    reader: Option<PeekReader<Box<dyn SerialPort>>>,
}

/// Send half over a cloned handle of the same port. Cheap to clone; all
/// clones share one write lock and one outgoing sequence counter.
#[derive(Clone)]
pub struct SerialSink {
    shared: Arc<Mutex<SinkInner>>,
}

struct SinkInner {
    port: Box<dyn SerialPort>,
    sequence: u8,
}

/// Open the serial stream and split it into its receive and send halves.
pub fn open(
    port_name: &str,
    baud_rate: u32,
    io_timeout: Duration,
) -> Result<(SerialSource, SerialSink), ConnectError> {
    debug!("opening {} at {} baud", port_name, baud_rate);

    let mut builder = serialport::new(port_name, baud_rate).timeout(io_timeout);
    #[cfg(unix)]
    {
        builder = builder
            .data_bits(serialport::DataBits::Eight)
            .stop_bits(serialport::StopBits::One)
            .parity(serialport::Parity::None);
    }
    let mut port = builder.open().map_err(io::Error::from)?;

    // Toggle DTR/RTS so USB-CDC boards wake up and start streaming.
    let _ = port.write_data_terminal_ready(true);
    let _ = port.write_request_to_send(true);
    std::thread::sleep(Duration::from_millis(150));

    // Drop whatever boot/console noise is already buffered.
    if let Ok(available) = port.bytes_to_read() {
        if available > 0 {
            let mut purge = vec![0u8; available as usize];
            let _ = port.read(&mut purge);
            debug!("purged {} buffered bytes from {}", available, port_name);
        }
    }

    let writer = port.try_clone().map_err(io::Error::from)?;
    Ok((
        SerialSource {
            reader: Some(PeekReader::new(port)),
        },
        SerialSink {
            shared: Arc::new(Mutex::new(SinkInner {
                port: writer,
                sequence: 0,
            })),
        },
    ))
}

impl FrameSource for SerialSource {
    fn receive_next(&mut self, timeout: Duration) -> Result<Option<RxFrame>, TransportError> {
        let reader = match self.reader.as_mut() {
            Some(r) => r,
            None => return Err(TransportError::Closed),
        };
        let deadline = Instant::now() + timeout;
        reader
            .reader_mut()
            .set_timeout(timeout)
            .map_err(io::Error::from)?;

        loop {
            match read_versioned_msg::<MavMessage, _>(reader, MavlinkVersion::V2) {
                Ok(frame) => return Ok(Some(frame)),
                Err(MessageReadError::Io(e))
                    if matches!(
                        e.kind(),
                        io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock
                    ) =>
                {
                    return Ok(None);
                }
                Err(MessageReadError::Io(e)) if e.kind() == io::ErrorKind::Interrupted => {
                    if Instant::now() >= deadline {
                        return Ok(None);
                    }
                }
                Err(MessageReadError::Io(e)) => return Err(TransportError::Io(e)),
                Err(_) => {
                    // Bad magic or CRC. Drop it and keep scanning until the
                    // timeout budget is spent; never propagate as fatal.
                    trace!("dropping malformed frame");
                    if Instant::now() >= deadline {
                        return Ok(None);
                    }
                }
            }
        }
    }

    fn close(&mut self) {
        if self.reader.take().is_some() {
            debug!("serial receive half closed");
        }
    }
}

impl FrameSink for SerialSink {
    fn send(&self, msg: &MavMessage) -> Result<(), TransportError> {
        let mut inner = self.shared.lock().map_err(|_| TransportError::Closed)?;
        let header = MavHeader {
            system_id: GCS_SYSTEM_ID,
            component_id: GCS_COMPONENT_ID,
            sequence: inner.sequence,
        };
        inner.sequence = inner.sequence.wrapping_add(1);
        write_versioned_msg(&mut inner.port, MavlinkVersion::V2, header, msg)
            .map_err(|e| TransportError::Io(io::Error::new(io::ErrorKind::Other, e)))?;
        inner.port.flush().map_err(TransportError::Io)?;
        Ok(())
    }
}
