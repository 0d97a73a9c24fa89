//! Codec module - serialization of (header, body) pairs over a stream.
//!
//! This module provides:
//!
//! - [`CodecType`] - the registry of negotiable formats, keyed by tag
//! - [`MsgPackCodec`] / [`JsonCodec`] - the formats themselves
//! - [`Codec`] - a stream wrapped with a format, splittable into a
//!   [`CodecReader`] and a [`CodecWriter`]
//!
//! # Design
//!
//! The set of formats is closed, so the registry is an enum rather than a map
//! of constructors. `CodecType::from_tag` resolves a handshake tag and
//! `Codec::new` is the constructor every tag maps to.
//!
//! `CodecWriter::write` is not synchronized. Server and client wrap the writer
//! in their own mutex so frames from different tasks never interleave.
//!
//! # Example
//!
//! ```
//! use rpcwire::codec::CodecType;
//!
//! let codec = CodecType::from_tag("application/json").unwrap();
//! let encoded = codec.encode("hello").unwrap();
//! let decoded: String = codec.decode(&encoded).unwrap();
//! assert_eq!(decoded, "hello");
//! ```

mod json;
mod msgpack;
mod stream;

use std::fmt;
use std::str::FromStr;

use bytes::Bytes;
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::{RpcError, Result};

pub use json::JsonCodec;
pub use msgpack::MsgPackCodec;
pub use stream::{BoxedReader, BoxedWriter, Codec, CodecReader, CodecWriter};

/// Format negotiated during the handshake.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum CodecType {
    /// MessagePack, structs as maps.
    #[default]
    MsgPack,
    /// JSON.
    Json,
}

impl CodecType {
    /// Handshake tag for [`CodecType::MsgPack`].
    pub const MSGPACK_TAG: &'static str = "application/msgpack";
    /// Handshake tag for [`CodecType::Json`].
    pub const JSON_TAG: &'static str = "application/json";

    /// All registered formats.
    pub const ALL: [CodecType; 2] = [CodecType::MsgPack, CodecType::Json];

    /// Tag sent in the handshake option.
    pub fn tag(self) -> &'static str {
        match self {
            CodecType::MsgPack => Self::MSGPACK_TAG,
            CodecType::Json => Self::JSON_TAG,
        }
    }

    /// Look up a format by its handshake tag.
    pub fn from_tag(tag: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|c| c.tag() == tag)
    }

    /// Encode a value with this format.
    pub fn encode<T: Serialize + ?Sized>(self, value: &T) -> Result<Vec<u8>> {
        match self {
            CodecType::MsgPack => MsgPackCodec::encode(value),
            CodecType::Json => JsonCodec::encode(value),
        }
    }

    /// Decode a value with this format.
    pub fn decode<T: DeserializeOwned>(self, bytes: &[u8]) -> Result<T> {
        match self {
            CodecType::MsgPack => MsgPackCodec::decode(bytes),
            CodecType::Json => JsonCodec::decode(bytes),
        }
    }
}

impl fmt::Display for CodecType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.tag())
    }
}

impl FromStr for CodecType {
    type Err = RpcError;

    fn from_str(tag: &str) -> Result<Self> {
        Self::from_tag(tag).ok_or_else(|| RpcError::UnknownCodec(tag.to_string()))
    }
}

/// Encoded body of one frame, not yet decoded.
///
/// Keeps the format it was read with so it can be decoded later by whoever
/// knows the target type.
#[derive(Debug, Clone)]
pub struct Body {
    codec_type: CodecType,
    bytes: Bytes,
}

impl Body {
    /// Wrap encoded bytes.
    pub fn new(codec_type: CodecType, bytes: Bytes) -> Self {
        Self { codec_type, bytes }
    }

    /// Decode into the target type.
    pub fn decode<T: DeserializeOwned>(&self) -> Result<T> {
        self.codec_type.decode(&self.bytes)
    }

    /// Raw encoded bytes.
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Encoded length in bytes.
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    /// True if no body bytes were received.
    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}
