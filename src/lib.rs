//! # bt-serial-link
//!
//! A driver for RN4678-class Bluetooth serial modules attached over a UART.
//!
//! The module multiplexes three kinds of traffic on one serial line:
//! connection status tokens (`%RFCOMM_OPEN%`), command-mode output
//! (`CMD> `, `AOK`), and transparent SPP data from the paired device. This
//! crate turns that byte stream into events, dispatches the application
//! command set, and writes replies and telemetry back within the module's
//! line length limit.
//!
//! ## Features
//!
//! - **Framing**: byte-at-a-time parser, independent of how reads are split
//! - **Status tracking**: writes are only attempted while RFCOMM is open
//! - **Command dispatch**: `help`, `go`/`stop`, `save`, `defaults`,
//!   `perf:<0|1>` and PID gain commands (`svp:2.5`, ...)
//! - **Serialized writes**: one write lock shared by replies, telemetry and
//!   module configuration
//! - **First-boot configuration**: a one-shot command-mode sequence gated
//!   by a persisted flag
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use bt_serial_link::{
//!     AlwaysOn, DriverConfig, LinkDriver, MemorySettingsStore, MemoryTransport, Result,
//!     SharedGains,
//! };
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<()> {
//!     let transport = MemoryTransport::new();
//!     let driver = LinkDriver::new(
//!         DriverConfig::default().with_device_name("Bench"),
//!         Arc::new(transport),
//!         Arc::new(MemorySettingsStore::default()),
//!         Arc::new(SharedGains::default()),
//!         Arc::new(AlwaysOn),
//!     );
//!
//!     driver.start().await?;
//!
//!     // Stream telemetry; dropped unless the peer sent `go`.
//!     let writer = driver.writer();
//!     writer.send_telemetry("v=12.01,i=0.48").await;
//!
//!     driver.shutdown().await?;
//!     Ok(())
//! }
//! ```
//!
//! ## Feature Flags
//!
//! - `serde`: serialization for config and settings, JSON settings file
//! - `serial`: [`SerialTransport`](link::SerialTransport) over a real UART

pub mod config;
pub mod dispatcher;
pub mod driver;
pub mod error;
pub mod hardware;
pub mod initializer;
pub mod link;
pub mod protocol;
pub mod settings;

// Re-exports for convenience
pub use config::{DriverConfig, SerialConfig, DEFAULT_BAUD_RATE, MAX_PAYLOAD_LEN};
pub use dispatcher::CommandDispatcher;
pub use driver::LinkDriver;
pub use error::{Error, Result};
pub use hardware::{AlwaysOn, GainController, ModuleLines, PowerControl, SharedGains};
pub use initializer::{InitReport, InitSequencer, InitStep, PromptWait, StepOutcome};
pub use link::{MemoryTransport, Transport, Writer};
pub use protocol::{
    apply_token, Command, ConnectionStatus, FrameParser, GainKind, ModuleCommand, ParserEvent,
    StatusChange, StatusTracker,
};
pub use settings::{MemorySettingsStore, PidGains, Settings, SettingsStore};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_public_exports() {
        let _ = std::any::TypeId::of::<LinkDriver>();
        let _ = std::any::TypeId::of::<Writer>();
        let _ = std::any::TypeId::of::<Error>();
        let _ = std::any::TypeId::of::<FrameParser>();
        let _ = std::any::TypeId::of::<InitReport>();
        let _ = std::any::TypeId::of::<MemorySettingsStore>();
    }

    #[test]
    fn test_payload_limit_constant() {
        assert_eq!(MAX_PAYLOAD_LEN, 255);
        assert_eq!(DriverConfig::default().max_payload_len, MAX_PAYLOAD_LEN);
    }
}
