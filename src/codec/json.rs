//! JSON format using `serde_json`.

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::Result;

/// JSON format for headers and bodies.
///
/// Larger on the wire than MsgPack but readable in a packet capture.
pub struct JsonCodec;

impl JsonCodec {
    /// Encode a value to JSON bytes.
    #[inline]
    pub fn encode<T: Serialize + ?Sized>(value: &T) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(value)?)
    }

    /// Decode JSON bytes to a value.
    #[inline]
    pub fn decode<T: DeserializeOwned>(bytes: &[u8]) -> Result<T> {
        Ok(serde_json::from_slice(bytes)?)
    }
}
