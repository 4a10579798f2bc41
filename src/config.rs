//! Driver configuration.
//!
//! Timings and limits used by the reader loop, the writer and the
//! first-boot initialization sequence.

use std::time::Duration;

/// Exclusive upper bound on the encoded length of a single outbound line.
pub const MAX_PAYLOAD_LEN: usize = 255;

/// Baud rate of the module UART.
pub const DEFAULT_BAUD_RATE: u32 = 115_200;

/// Configuration for a [`LinkDriver`](crate::LinkDriver).
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct DriverConfig {
    /// Interval between transport polls in the reader loop.
    pub poll_interval: Duration,
    /// Delay between entering initialization and taking the write lock.
    pub settle_delay: Duration,
    /// How long to wait for `CMD> ` after each configuration command.
    pub prompt_timeout: Duration,
    /// Payloads whose encoded length reaches this value are refused.
    pub max_payload_len: usize,
    /// Name the module advertises after initialization.
    pub device_name: String,
    /// Initial state of the telemetry gate.
    pub perf_data_enabled: bool,
    /// Depth of the parser and status broadcast channels.
    pub event_capacity: usize,
}

impl Default for DriverConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(20),
            settle_delay: Duration::from_millis(500),
            prompt_timeout: Duration::from_secs(10),
            max_payload_len: MAX_PAYLOAD_LEN,
            device_name: "PID-Controller".to_string(),
            perf_data_enabled: false,
            event_capacity: 64,
        }
    }
}

impl DriverConfig {
    /// Create a configuration with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the advertised device name.
    pub fn with_device_name(mut self, name: impl Into<String>) -> Self {
        self.device_name = name.into();
        self
    }

    /// Set the reader poll interval.
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Set the initialization settle delay and per-command prompt timeout.
    pub fn with_init_timing(mut self, settle_delay: Duration, prompt_timeout: Duration) -> Self {
        self.settle_delay = settle_delay;
        self.prompt_timeout = prompt_timeout;
        self
    }

    /// Set the initial telemetry gate.
    pub fn with_perf_data(mut self, enabled: bool) -> Self {
        self.perf_data_enabled = enabled;
        self
    }
}

/// Serial line settings for the module UART.
///
/// 8 data bits, no parity and one stop bit are fixed by the module; only
/// the port and baud rate vary.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct SerialConfig {
    /// Port path (e.g. `/dev/ttyS0` or `COM3`).
    pub port: String,
    /// Baud rate.
    pub baud_rate: u32,
    /// Whether RTS/CTS hardware flow control is enabled.
    pub hardware_flow_control: bool,
}

impl SerialConfig {
    /// Settings for the given port at the module's default line rate.
    pub fn new(port: impl Into<String>) -> Self {
        Self {
            port: port.into(),
            baud_rate: DEFAULT_BAUD_RATE,
            hardware_flow_control: true,
        }
    }
}
