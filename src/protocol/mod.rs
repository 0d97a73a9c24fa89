//! Protocol module - message header and frame layout.
//!
//! This module defines what travels on the data plane after the handshake:
//! - [`Header`] envelope (service method, sequence, error)
//! - 8-byte length prefix in front of every encoded header/body pair

mod header;
mod wire_format;

pub use header::Header;
pub use wire_format::{FramePrefix, DEFAULT_MAX_FRAME_SIZE, FRAME_PREFIX_SIZE};
