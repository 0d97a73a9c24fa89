//! Control plane module - the connection handshake.
//!
//! The control plane is a single JSON line sent by the dialing side before
//! anything else. After it, all communication happens on the data plane
//! (codec frames).
//!
//! # Workflow
//!
//! 1. Client resolves its codec tag (unknown tag: nothing is sent)
//! 2. Client writes [`HandshakeOption`] as one JSON line
//! 3. Server reads the line and checks [`MAGIC_NUMBER`]
//! 4. Server resolves the codec tag
//! 5. Both sides switch to framed (header, body) traffic
//!
//! Any failure ends the connection; there is no retry or negotiation.

mod option;

pub use option::{read_option, write_option, HandshakeOption, MAGIC_NUMBER, MAX_OPTION_LEN};
