//! Serial link to the module.
//!
//! This module provides the byte transport, the polling reader that feeds
//! the frame parser, and the gated writer that owns the write lock.

pub mod reader;
pub mod transport;
pub mod writer;

pub use reader::Reader;
pub use transport::{MemoryTransport, Transport};
pub use writer::{CommandSession, Writer};

#[cfg(feature = "serial")]
pub use transport::SerialTransport;
