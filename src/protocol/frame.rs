//! Line framing for the module's hybrid data/command stream.
//!
//! The module interleaves three kinds of traffic on one UART:
//! - status tokens wrapped in `%` (e.g. `%RFCOMM_OPEN%`)
//! - command-mode output (`CMD> ` prompts and `AOK` acknowledgements)
//! - transparent SPP data from the paired device, one line per `\r\n`
//!
//! [`FrameParser`] accepts one byte at a time and reports at most one
//! [`ParserEvent`] per byte. Boundaries are checked after every byte, so a
//! marker is always detected on the byte that completes it and checking the
//! tail of the buffer is equivalent to searching all of it.

use bytes::BytesMut;
use tracing::trace;

/// Substring emitted by the module when it is ready for the next command.
pub const COMMAND_PROMPT: &[u8] = b"CMD> ";

/// Substring emitted by the module when a configuration command succeeds.
pub const ACKNOWLEDGEMENT: &[u8] = b"AOK\r\n";

/// Line terminator for data lines.
pub const LINE_TERMINATOR: &[u8] = b"\r\n";

/// Delimiter around status tokens.
pub const STATUS_DELIMITER: u8 = b'%';

/// Initial capacity of the accumulation buffer.
const INITIAL_BUFFER_CAPACITY: usize = 256;

/// An event recognized in the inbound byte stream.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum ParserEvent {
    /// A complete `%...%` status token, delimiters included.
    Status(String),
    /// The module printed its command-mode prompt.
    CommandPrompt,
    /// An `AOK` acknowledgement line with line terminators removed.
    Acknowledgement(String),
    /// Any other `\r\n`-terminated line with line terminators removed.
    DataLine(String),
}

/// Byte-at-a-time parser for the module stream.
#[derive(Debug)]
pub struct FrameParser {
    /// Bytes received since the last recognized boundary.
    buffer: BytesMut,
}

impl Default for FrameParser {
    fn default() -> Self {
        Self::new()
    }
}

impl FrameParser {
    /// Create a parser with an empty buffer.
    pub fn new() -> Self {
        Self {
            buffer: BytesMut::with_capacity(INITIAL_BUFFER_CAPACITY),
        }
    }

    /// Number of bytes waiting for a boundary.
    pub fn buffered_len(&self) -> usize {
        self.buffer.len()
    }

    /// Feed one byte and return the event it completes, if any.
    ///
    /// Rules are evaluated in order: status token, command prompt,
    /// acknowledgement, generic line. The first match clears the buffer.
    pub fn feed(&mut self, byte: u8) -> Option<ParserEvent> {
        self.buffer.extend_from_slice(&[byte]);

        if self.buffer.len() < 2 {
            return None;
        }

        if byte == STATUS_DELIMITER && self.buffer[0] == STATUS_DELIMITER {
            let token = self.take();
            trace!("Status token: {}", token);
            return Some(ParserEvent::Status(token));
        }

        if self.buffer.ends_with(COMMAND_PROMPT) {
            self.buffer.clear();
            trace!("Command prompt");
            return Some(ParserEvent::CommandPrompt);
        }

        if self.buffer.ends_with(ACKNOWLEDGEMENT) {
            let line = strip_terminators(&self.take());
            trace!("Acknowledgement: {:?}", line);
            return Some(ParserEvent::Acknowledgement(line));
        }

        if self.buffer.ends_with(LINE_TERMINATOR) {
            let line = strip_terminators(&self.take());
            trace!("Data line: {:?}", line);
            return Some(ParserEvent::DataLine(line));
        }

        None
    }

    /// Feed a chunk and collect every event it completes, in order.
    pub fn feed_all(&mut self, data: &[u8]) -> Vec<ParserEvent> {
        data.iter().filter_map(|&byte| self.feed(byte)).collect()
    }

    /// Drop any partially accumulated bytes.
    pub fn reset(&mut self) {
        self.buffer.clear();
    }

    /// Drain the buffer as text, one char per byte.
    fn take(&mut self) -> String {
        let bytes = self.buffer.split();
        bytes.iter().map(|&b| b as char).collect()
    }
}

fn strip_terminators(text: &str) -> String {
    text.replace("\r\n", "")
}
