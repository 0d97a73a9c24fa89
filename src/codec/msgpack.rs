//! MsgPack format using `rmp-serde`.
//!
//! Structs are written with `to_vec_named` so they travel as maps keyed by
//! field name. Peers in other languages can then decode headers without
//! knowing field order.

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::Result;

/// MessagePack format for headers and bodies.
pub struct MsgPackCodec;

impl MsgPackCodec {
    /// Encode a value to MsgPack bytes.
    ///
    /// # Errors
    ///
    /// Returns error if the value cannot be serialized.
    #[inline]
    pub fn encode<T: Serialize + ?Sized>(value: &T) -> Result<Vec<u8>> {
        Ok(rmp_serde::to_vec_named(value)?)
    }

    /// Decode MsgPack bytes to a value.
    ///
    /// # Errors
    ///
    /// Returns error if the bytes cannot be deserialized to type T.
    #[inline]
    pub fn decode<T: DeserializeOwned>(bytes: &[u8]) -> Result<T> {
        Ok(rmp_serde::from_slice(bytes)?)
    }
}
