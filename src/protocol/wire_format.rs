//! Frame prefix encoding and decoding.
//!
//! Every message after the handshake is one frame:
//! ```text
//! ┌────────────┬────────────┬──────────────┬────────────┐
//! │ Header len │ Body len   │ Header       │ Body       │
//! │ 4 bytes    │ 4 bytes    │ header_len   │ body_len   │
//! │ uint32 BE  │ uint32 BE  │ codec bytes  │ codec bytes│
//! └────────────┴────────────┴──────────────┴────────────┘
//! ```
//!
//! All multi-byte integers are Big Endian.

use crate::error::{RpcError, Result};

/// Prefix size in bytes (fixed, exactly 8).
pub const FRAME_PREFIX_SIZE: usize = 8;

/// Default maximum frame size, header plus body (16 MiB).
pub const DEFAULT_MAX_FRAME_SIZE: usize = 16 * 1024 * 1024;

/// Decoded length prefix of a frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FramePrefix {
    /// Encoded header length in bytes.
    pub header_len: u32,
    /// Encoded body length in bytes.
    pub body_len: u32,
}

impl FramePrefix {
    /// Build a prefix for the given part lengths.
    ///
    /// Fails if either part does not fit in a `u32`.
    pub fn for_parts(header_len: usize, body_len: usize) -> Result<Self> {
        let to_u32 = |len: usize| {
            u32::try_from(len).map_err(|_| RpcError::FrameTooLarge {
                size: len,
                max: u32::MAX as usize,
            })
        };
        Ok(Self {
            header_len: to_u32(header_len)?,
            body_len: to_u32(body_len)?,
        })
    }

    /// Encode the prefix to bytes (Big Endian).
    ///
    /// # Example
    ///
    /// ```
    /// use rpcwire::protocol::FramePrefix;
    ///
    /// let prefix = FramePrefix { header_len: 3, body_len: 5 };
    /// assert_eq!(prefix.encode(), [0, 0, 0, 3, 0, 0, 0, 5]);
    /// ```
    pub fn encode(&self) -> [u8; FRAME_PREFIX_SIZE] {
        let mut buf = [0u8; FRAME_PREFIX_SIZE];
        buf[0..4].copy_from_slice(&self.header_len.to_be_bytes());
        buf[4..8].copy_from_slice(&self.body_len.to_be_bytes());
        buf
    }

    /// Decode the prefix from bytes (Big Endian).
    pub fn decode(buf: &[u8; FRAME_PREFIX_SIZE]) -> Self {
        Self {
            header_len: u32::from_be_bytes([buf[0], buf[1], buf[2], buf[3]]),
            body_len: u32::from_be_bytes([buf[4], buf[5], buf[6], buf[7]]),
        }
    }

    /// Total bytes following the prefix.
    #[inline]
    pub fn frame_len(&self) -> usize {
        self.header_len as usize + self.body_len as usize
    }

    /// Validate the prefix against a maximum frame size.
    ///
    /// A zero-length header can never decode and is rejected as well.
    pub fn validate(&self, max_frame_size: usize) -> Result<()> {
        if self.header_len == 0 {
            return Err(RpcError::Protocol("frame header is empty".to_string()));
        }

        let size = self.frame_len();
        if size > max_frame_size {
            return Err(RpcError::FrameTooLarge {
                size,
                max: max_frame_size,
            });
        }

        Ok(())
    }
}
