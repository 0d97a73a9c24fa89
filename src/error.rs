//! Error types for rpcwire.

use std::sync::Arc;

use thiserror::Error;

/// Main error type for all rpcwire operations.
#[derive(Debug, Error)]
pub enum RpcError {
    /// I/O error on the underlying stream.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization error (handshake and JSON codec).
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// MsgPack serialization error.
    #[error("MsgPack encode error: {0}")]
    MsgPackEncode(#[from] rmp_serde::encode::Error),

    /// MsgPack deserialization error.
    #[error("MsgPack decode error: {0}")]
    MsgPackDecode(#[from] rmp_serde::decode::Error),

    /// Protocol error (malformed handshake, bad frame prefix, etc.).
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// A frame announced more bytes than the reader accepts.
    #[error("Frame of {size} bytes exceeds maximum {max}")]
    FrameTooLarge {
        /// Announced frame size.
        size: usize,
        /// Configured limit.
        max: usize,
    },

    /// Handshake carried the wrong magic number.
    #[error("invalid magic number {0:#x}")]
    InvalidMagic(u32),

    /// Handshake named a codec that is not registered.
    #[error("invalid codec type {0}")]
    UnknownCodec(String),

    /// The client is closing or already shut down.
    #[error("connection is shut down")]
    Shutdown,

    /// Write attempted on a stream that was already closed.
    #[error("Connection closed")]
    ConnectionClosed,

    /// Error reported by the server in the response header.
    #[error("{0}")]
    Remote(String),

    /// Response body could not be decoded into the reply type.
    #[error("reading body {0}")]
    ReadingBody(String),

    /// A server handler failed without producing an error value (e.g. panicked).
    #[error("handler failed: {0}")]
    Handler(String),

    /// The connection failed; broadcast to every call that was still pending.
    #[error("connection terminated: {0}")]
    Terminated(#[source] Arc<RpcError>),
}

impl RpcError {
    /// Returns true if this error marks a clean end of the stream.
    ///
    /// `read_exact` reports both a close between frames and a close in the
    /// middle of one as `UnexpectedEof`; both end the read loop quietly.
    pub fn is_eof(&self) -> bool {
        matches!(self, RpcError::Io(e) if e.kind() == std::io::ErrorKind::UnexpectedEof)
    }
}

/// Result type alias using RpcError.
pub type Result<T> = std::result::Result<T, RpcError>;
