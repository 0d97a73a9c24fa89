//! Transport module - where connections come from.
//!
//! The RPC core only needs an open, reliable, ordered byte stream. This
//! module provides the [`Listener`] abstraction the server's accept loop
//! runs over, plus Unix socket helpers.

mod listener;

pub use listener::{generate_socket_path, Listener};

#[cfg(unix)]
pub use listener::{bind_unix, SocketCleanup};
