//! Error types for the bt-serial-link crate.

use thiserror::Error;

/// The main error type for this crate.
#[derive(Error, Debug)]
pub enum Error {
    /// I/O error from the underlying transport.
    #[error("Transport error: {0}")]
    Transport(#[from] std::io::Error),

    /// Error from the serial port backend.
    #[cfg(feature = "serial")]
    #[error("Serial port error: {0}")]
    Serial(#[from] serialport::Error),

    /// The remote side has not opened the RFCOMM channel.
    #[error("Link not ready")]
    NotReady,

    /// A discardable telemetry payload was offered while telemetry is off.
    #[error("Performance data disabled")]
    PerfDataDisabled,

    /// The encoded payload does not fit a single module write.
    #[error("Payload too long: {len} bytes (limit {max})")]
    PayloadTooLong {
        /// Encoded length including the line terminator.
        len: usize,
        /// Exclusive upper bound on the encoded length.
        max: usize,
    },

    /// A line that is neither a keyword nor a `key:value` pair.
    #[error("Invalid command: {line}")]
    InvalidCommand {
        /// The offending line.
        line: String,
    },

    /// A `key:value` command whose value could not be parsed.
    #[error("Invalid value for {key}: {value}")]
    InvalidValue {
        /// The command key.
        key: String,
        /// The value that failed to parse.
        value: String,
    },

    /// The settings store failed to read or persist.
    #[error("Settings error: {reason}")]
    Settings {
        /// Description of the failure.
        reason: String,
    },

    /// A hardware capability (pins, controller) reported a failure.
    #[error("Hardware error: {reason}")]
    Hardware {
        /// Description of the failure.
        reason: String,
    },

    /// The driver tasks are already running.
    #[error("Driver already running")]
    AlreadyRunning,

    /// An internal error occurred.
    #[error("Internal error: {0}")]
    Internal(String),
}

/// A specialized Result type for this crate.
pub type Result<T> = std::result::Result<T, Error>;
