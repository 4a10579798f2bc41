//! Byte transports between the driver and the module UART.
//!
//! Reads never block: a poll returns whatever bytes are available, possibly
//! none. Writes hand one buffer to the device in a single call.

use bytes::Bytes;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;
use tracing::trace;

use crate::error::{Error, Result};

/// A bidirectional byte pipe to the module.
///
/// Methods take `&self` so the reader and the writer can share one
/// transport; implementations synchronize internally.
pub trait Transport: Send + Sync {
    /// Return all bytes currently available, possibly none.
    fn read(&self) -> Result<Bytes>;

    /// Write a buffer, returning the number of bytes accepted.
    fn write(&self, data: &[u8]) -> Result<usize>;

    /// Largest buffer accepted by a single [`write`](Transport::write).
    fn max_write_size(&self) -> usize;
}

#[derive(Default)]
struct MemoryState {
    inbound: VecDeque<u8>,
    outbound: Vec<Vec<u8>>,
    auto_reply: Option<Vec<u8>>,
    read_chunk: Option<usize>,
    fail_writes: bool,
    fail_reads: bool,
}

/// In-process transport for tests and demos.
///
/// Clones share the same buffers, so one handle can be given to the driver
/// while another plays the module side.
#[derive(Clone)]
pub struct MemoryTransport {
    state: Arc<Mutex<MemoryState>>,
    max_write_size: usize,
}

impl Default for MemoryTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryTransport {
    /// Default single-write limit.
    pub const DEFAULT_MAX_WRITE_SIZE: usize = 1024;

    /// Create an empty transport.
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(MemoryState::default())),
            max_write_size: Self::DEFAULT_MAX_WRITE_SIZE,
        }
    }

    /// Set the single-write limit.
    pub fn with_max_write_size(mut self, size: usize) -> Self {
        self.max_write_size = size;
        self
    }

    /// Queue bytes as if the module had sent them.
    pub fn push_inbound(&self, data: &[u8]) {
        self.state.lock().inbound.extend(data.iter().copied());
    }

    /// Reply with `reply` every time something is written.
    pub fn set_auto_reply(&self, reply: Option<&[u8]>) {
        self.state.lock().auto_reply = reply.map(<[u8]>::to_vec);
    }

    /// Limit how many bytes a single read returns.
    pub fn set_read_chunk(&self, chunk: Option<usize>) {
        self.state.lock().read_chunk = chunk.filter(|n| *n > 0);
    }

    /// Make subsequent writes fail with a broken pipe.
    pub fn set_fail_writes(&self, fail: bool) {
        self.state.lock().fail_writes = fail;
    }

    /// Make subsequent reads fail as if the UART had gone away.
    pub fn set_fail_reads(&self, fail: bool) {
        self.state.lock().fail_reads = fail;
    }

    /// Every buffer written so far, one entry per write call.
    pub fn writes(&self) -> Vec<Vec<u8>> {
        self.state.lock().outbound.clone()
    }

    /// Every write decoded as text.
    pub fn written_lines(&self) -> Vec<String> {
        self.state
            .lock()
            .outbound
            .iter()
            .map(|w| String::from_utf8_lossy(w).into_owned())
            .collect()
    }

    /// Remove and return the recorded writes.
    pub fn take_writes(&self) -> Vec<Vec<u8>> {
        std::mem::take(&mut self.state.lock().outbound)
    }
}

impl Transport for MemoryTransport {
    fn read(&self) -> Result<Bytes> {
        let mut state = self.state.lock();
        if state.fail_reads {
            return Err(Error::Transport(std::io::Error::new(
                std::io::ErrorKind::NotConnected,
                "memory transport unplugged",
            )));
        }
        let available = state.inbound.len();
        let n = state
            .read_chunk
            .map_or(available, |chunk| chunk.min(available));
        let data: Vec<u8> = state.inbound.drain(..n).collect();
        Ok(Bytes::from(data))
    }

    fn write(&self, data: &[u8]) -> Result<usize> {
        let mut state = self.state.lock();
        if state.fail_writes {
            return Err(Error::Transport(std::io::Error::new(
                std::io::ErrorKind::BrokenPipe,
                "memory transport closed",
            )));
        }

        trace!("Memory transport write: {} bytes", data.len());
        state.outbound.push(data.to_vec());

        if let Some(reply) = state.auto_reply.clone() {
            state.inbound.extend(reply);
        }

        Ok(data.len())
    }

    fn max_write_size(&self) -> usize {
        self.max_write_size
    }
}

#[cfg(feature = "serial")]
pub use serial::SerialTransport;

#[cfg(feature = "serial")]
mod serial {
    use bytes::Bytes;
    use parking_lot::Mutex;
    use serialport::{DataBits, FlowControl, Parity, SerialPort, StopBits};
    use std::io::{Read, Write};
    use std::time::Duration;
    use tracing::{debug, trace};

    use super::Transport;
    use crate::config::SerialConfig;
    use crate::error::Result;

    /// UART transport backed by the `serialport` crate.
    pub struct SerialTransport {
        /// Handle used for polling reads.
        reader: Mutex<Box<dyn SerialPort>>,
        /// Cloned handle used for writes.
        writer: Mutex<Box<dyn SerialPort>>,
    }

    impl SerialTransport {
        /// Largest single write handed to the port.
        pub const MAX_WRITE_SIZE: usize = 256;

        /// Open the port with 8N1 framing.
        pub fn open(config: &SerialConfig) -> Result<Self> {
            let flow_control = if config.hardware_flow_control {
                FlowControl::Hardware
            } else {
                FlowControl::None
            };

            let port = serialport::new(&config.port, config.baud_rate)
                .data_bits(DataBits::Eight)
                .parity(Parity::None)
                .stop_bits(StopBits::One)
                .flow_control(flow_control)
                .timeout(Duration::from_millis(100))
                .open()?;
            let writer = port.try_clone()?;

            debug!("Opened {} at {} baud", config.port, config.baud_rate);

            Ok(Self {
                reader: Mutex::new(port),
                writer: Mutex::new(writer),
            })
        }
    }

    impl Transport for SerialTransport {
        fn read(&self) -> Result<Bytes> {
            let mut port = self.reader.lock();
            let available = port.bytes_to_read()? as usize;
            if available == 0 {
                return Ok(Bytes::new());
            }

            let mut buf = vec![0u8; available];
            let n = port.read(&mut buf)?;
            buf.truncate(n);
            trace!("Serial read: {} bytes", n);
            Ok(Bytes::from(buf))
        }

        fn write(&self, data: &[u8]) -> Result<usize> {
            let mut port = self.writer.lock();
            let n = port.write(data)?;
            port.flush()?;
            Ok(n)
        }

        fn max_write_size(&self) -> usize {
            Self::MAX_WRITE_SIZE
        }
    }
}
