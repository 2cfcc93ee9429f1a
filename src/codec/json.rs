//! JSON codec using `serde_json`.
//!
//! Useful when the peer is easier to debug with a human-readable format or
//! lacks a MessagePack implementation.

use serde::de::DeserializeOwned;
use serde::Serialize;

use super::Codec;
use crate::error::Result;

/// JSON codec for structured data.
pub struct JsonCodec;

impl Codec for JsonCodec {
    const NAME: &'static str = "json";

    #[inline]
    fn encode<T: Serialize + ?Sized>(value: &T) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(value)?)
    }

    #[inline]
    fn decode<T: DeserializeOwned>(bytes: &[u8]) -> Result<T> {
        Ok(serde_json::from_slice(bytes)?)
    }
}
