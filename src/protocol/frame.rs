//! Frame struct with typed accessors.
//!
//! Represents a complete protocol frame: prefix, header section and body
//! section. Sections are `bytes::Bytes` slices of the read buffer, so
//! handing a body to a waiting caller never copies it.
//!
//! # Example
//!
//! ```
//! use muxwire_client::protocol::{build_frame, flags, FrameBuffer};
//!
//! let bytes = build_frame(flags::RESPONSE, b"header", b"body").unwrap();
//! let mut buffer = FrameBuffer::new();
//! let frames = buffer.push(&bytes).unwrap();
//!
//! assert_eq!(frames[0].header(), b"header");
//! assert_eq!(frames[0].body(), b"body");
//! ```

use bytes::Bytes;

use super::wire_format::{FramePrefix, FRAME_PREFIX_SIZE};
use crate::codec::Codec;
use crate::error::Result;

/// A complete protocol frame.
#[derive(Debug, Clone)]
pub struct Frame {
    /// Decoded prefix.
    pub prefix: FramePrefix,
    /// Encoded header section.
    pub header: Bytes,
    /// Encoded body section.
    pub body: Bytes,
}

impl Frame {
    /// Create a new frame from its parts.
    pub fn new(prefix: FramePrefix, header: Bytes, body: Bytes) -> Self {
        Self {
            prefix,
            header,
            body,
        }
    }

    /// Get a reference to the header bytes.
    #[inline]
    pub fn header(&self) -> &[u8] {
        &self.header
    }

    /// Get a reference to the body bytes.
    #[inline]
    pub fn body(&self) -> &[u8] {
        &self.body
    }

    /// Check if this is a response.
    #[inline]
    pub fn is_response(&self) -> bool {
        self.prefix.is_response()
    }

    /// Decode the header section with codec `C`.
    pub fn decode_header<C: Codec, H: serde::de::DeserializeOwned>(&self) -> Result<H> {
        C::decode(&self.header)
    }
}

/// Build a complete frame as a single byte vector.
///
/// # Errors
///
/// Returns `Protocol` if a section does not fit in a frame.
///
/// # Example
///
/// ```
/// use muxwire_client::protocol::{build_frame, flags, FRAME_PREFIX_SIZE};
///
/// let bytes = build_frame(flags::REQUEST, b"hdr", b"hello").unwrap();
/// assert_eq!(bytes.len(), FRAME_PREFIX_SIZE + 3 + 5);
/// ```
pub fn build_frame(frame_flags: u8, header: &[u8], body: &[u8]) -> Result<Vec<u8>> {
    let prefix = FramePrefix::for_sections(frame_flags, header.len(), body.len())?;
    let mut buf = Vec::with_capacity(FRAME_PREFIX_SIZE + header.len() + body.len());
    buf.extend_from_slice(&prefix.encode());
    buf.extend_from_slice(header);
    buf.extend_from_slice(body);
    Ok(buf)
}

/// Encode `header` and `body` with codec `C` and build a frame.
pub fn encode_frame<C, H, B>(frame_flags: u8, header: &H, body: &B) -> Result<Vec<u8>>
where
    C: Codec,
    H: serde::Serialize,
    B: serde::Serialize + ?Sized,
{
    let header = C::encode(header)?;
    let body = C::encode(body)?;
    build_frame(frame_flags, &header, &body)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::MsgPackCodec;
    use crate::protocol::{flags, FrameBuffer, RequestHeader};

    #[test]
    fn test_build_frame_layout() {
        let bytes = build_frame(flags::RESPONSE, b"abc", b"hello").unwrap();

        assert_eq!(bytes.len(), FRAME_PREFIX_SIZE + 8);
        let prefix = FramePrefix::decode(&bytes).unwrap();
        assert_eq!(prefix, FramePrefix::new(flags::RESPONSE, 3, 5));
        assert_eq!(&bytes[FRAME_PREFIX_SIZE..FRAME_PREFIX_SIZE + 3], b"abc");
        assert_eq!(&bytes[FRAME_PREFIX_SIZE + 3..], b"hello");
    }

    #[test]
    fn test_encode_frame_then_decode_header() {
        let header = RequestHeader::new("Echo.Do", 1);
        let bytes = encode_frame::<MsgPackCodec, _, _>(flags::REQUEST, &header, "hello").unwrap();

        let mut buffer = FrameBuffer::new();
        let frames = buffer.push(&bytes).unwrap();
        assert_eq!(frames.len(), 1);

        let frame = &frames[0];
        assert!(!frame.is_response());
        let decoded: RequestHeader = frame.decode_header::<MsgPackCodec, _>().unwrap();
        assert_eq!(decoded, header);
        let body: String = MsgPackCodec::decode(frame.body()).unwrap();
        assert_eq!(body, "hello");
    }

    #[test]
    fn test_sections_share_read_buffer() {
        let bytes = build_frame(flags::RESPONSE, b"h", b"body").unwrap();
        let mut buffer = FrameBuffer::new();
        let frame = buffer.push(&bytes).unwrap().remove(0);

        // Cheap clone, same memory
        let body = frame.body.clone();
        assert_eq!(body.as_ptr(), frame.body.as_ptr());
    }
}
