//! Protocol module for the module's serial stream.
//!
//! This module contains the implementations for:
//! - Byte-stream framing into status tokens, prompts, acknowledgements and lines
//! - Connection status tracking
//! - Inbound command decoding and outbound configuration commands

pub mod commands;
pub mod frame;
pub mod status;

pub use commands::{init_sequence, Command, GainKind, Keyword, ModuleCommand};
pub use frame::{FrameParser, ParserEvent};
pub use status::{apply_token, ConnectionStatus, StatusChange, StatusToken, StatusTracker};
