//! Handshake option exchanged once per connection.
//!
//! The option is one JSON object followed by `\n`:
//!
//! ```text
//! {"magicNumber":3927900,"codecType":"application/msgpack"}\n
//! ```
//!
//! It is encoded with JSON regardless of the codec it selects, so the
//! receiver can read it before any codec exists.
//!
//! # Example
//!
//! ```
//! use rpcwire::codec::CodecType;
//! use rpcwire::control::{HandshakeOption, MAGIC_NUMBER};
//!
//! let option = HandshakeOption::new(CodecType::Json);
//! assert_eq!(option.magic_number, MAGIC_NUMBER);
//! assert_eq!(option.validate().unwrap(), CodecType::Json);
//! ```

use serde::{Deserialize, Serialize};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::codec::CodecType;
use crate::error::{RpcError, Result};

/// Magic number identifying the protocol.
pub const MAGIC_NUMBER: u32 = 0x3bef5c;

/// Longest accepted handshake line, newline included.
pub const MAX_OPTION_LEN: usize = 1024;

/// Handshake payload: protocol marker plus codec selection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HandshakeOption {
    /// Must equal [`MAGIC_NUMBER`].
    pub magic_number: u32,
    /// Tag of the codec for every frame after the handshake.
    pub codec_type: String,
}

impl HandshakeOption {
    /// Create an option selecting the given codec.
    pub fn new(codec_type: CodecType) -> Self {
        Self {
            magic_number: MAGIC_NUMBER,
            codec_type: codec_type.tag().to_string(),
        }
    }

    /// Fill in defaults the way a dialing client does.
    ///
    /// The magic number is always forced to [`MAGIC_NUMBER`]; an empty codec
    /// tag becomes the default codec. Unknown tags are left for
    /// [`codec`](Self::codec) to reject.
    pub fn normalized(option: Option<Self>) -> Self {
        let mut option = option.unwrap_or_default();
        option.magic_number = MAGIC_NUMBER;
        if option.codec_type.is_empty() {
            option.codec_type = CodecType::default().tag().to_string();
        }
        option
    }

    /// Resolve the codec tag.
    pub fn codec(&self) -> Result<CodecType> {
        self.codec_type.parse()
    }

    /// Check the magic number, then resolve the codec tag.
    pub fn validate(&self) -> Result<CodecType> {
        if self.magic_number != MAGIC_NUMBER {
            return Err(RpcError::InvalidMagic(self.magic_number));
        }
        self.codec()
    }
}

impl Default for HandshakeOption {
    fn default() -> Self {
        Self::new(CodecType::default())
    }
}

/// Write the option as one JSON line and flush.
pub async fn write_option<W>(writer: &mut W, option: &HandshakeOption) -> Result<()>
where
    W: AsyncWrite + Unpin + ?Sized,
{
    let mut line = serde_json::to_vec(option)?;
    line.push(b'\n');
    writer.write_all(&line).await?;
    writer.flush().await?;
    Ok(())
}

/// Read one option line.
///
/// Reads a byte at a time so nothing past the newline is consumed; the
/// first codec frame may already be queued behind it.
///
/// # Errors
///
/// `Io(UnexpectedEof)` if the stream ends first, `Protocol` if the line is
/// longer than [`MAX_OPTION_LEN`], `Json` if it is not a valid option.
pub async fn read_option<R>(reader: &mut R) -> Result<HandshakeOption>
where
    R: AsyncRead + Unpin + ?Sized,
{
    let mut line = Vec::with_capacity(128);
    loop {
        let byte = reader.read_u8().await?;
        if byte == b'\n' {
            break;
        }
        line.push(byte);
        if line.len() >= MAX_OPTION_LEN {
            return Err(RpcError::Protocol(format!(
                "handshake option exceeds {} bytes",
                MAX_OPTION_LEN
            )));
        }
    }
    Ok(serde_json::from_slice(&line)?)
}
