//! Codec module - serialization of message headers and bodies.
//!
//! Every frame on the wire carries two codec-encoded values: a header
//! (`RequestHeader` / `ResponseHeader`) and a body (call arguments or the
//! response payload). Both ends of a connection must agree on the codec.
//!
//! - [`MsgPackCodec`] - MessagePack using `rmp-serde` (default, struct-as-map)
//! - [`JsonCodec`] - JSON using `serde_json`
//!
//! # Design
//!
//! Codecs are zero-sized marker types implementing [`Codec`] with associated
//! functions rather than trait objects. The client and server are generic over
//! the codec, so the choice is made at compile time.
//!
//! # Example
//!
//! ```
//! use muxwire_client::codec::{Codec, JsonCodec, MsgPackCodec};
//!
//! let encoded = MsgPackCodec::encode("hello").unwrap();
//! let decoded: String = MsgPackCodec::decode(&encoded).unwrap();
//! assert_eq!(decoded, "hello");
//!
//! let encoded = JsonCodec::encode(&[1, 2, 3]).unwrap();
//! assert_eq!(encoded, b"[1,2,3]");
//! ```

mod json;
mod msgpack;

pub use json::JsonCodec;
pub use msgpack::MsgPackCodec;

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::Result;

/// A serialization format for header and body values.
pub trait Codec: Send + Sync + 'static {
    /// Short name used in logs.
    const NAME: &'static str;

    /// Encode a value to bytes.
    fn encode<T: Serialize + ?Sized>(value: &T) -> Result<Vec<u8>>;

    /// Decode a value from bytes.
    fn decode<T: DeserializeOwned>(bytes: &[u8]) -> Result<T>;
}
