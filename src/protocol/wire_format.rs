//! Wire format encoding and decoding.
//!
//! Every message is a single frame: a 9-byte prefix followed by two
//! codec-encoded sections, the message header and the message body.
//! ```text
//! ┌───────┬────────────┬────────────┬──────────────┬──────────────┐
//! │ Flags │ Header len │ Body len   │ Header bytes │ Body bytes   │
//! │ 1 byte│ uint32 BE  │ uint32 BE  │ header len   │ body len     │
//! └───────┴────────────┴────────────┴──────────────┴──────────────┘
//! ```
//!
//! All multi-byte integers are Big Endian.

use crate::error::{MuxwireError, Result};

/// Prefix size in bytes (fixed, exactly 9).
pub const FRAME_PREFIX_SIZE: usize = 9;

/// Default maximum size of a single section (1 GB).
pub const DEFAULT_MAX_SECTION_SIZE: u32 = 1_073_741_824;

/// Absolute maximum section size (~2 GB, max i32).
pub const ABSOLUTE_MAX_SECTION_SIZE: u32 = 2_147_483_647;

/// Flag constants for the protocol.
pub mod flags {
    /// Request frame (client to server).
    pub const REQUEST: u8 = 0b0000_0000;
    /// Message type: response (1) or request (0).
    pub const IS_RESPONSE: u8 = 0b0000_0001;

    /// Reserved bits mask (bits 1-7).
    pub const RESERVED_MASK: u8 = 0b1111_1110;

    /// Response frame (server to client).
    pub const RESPONSE: u8 = IS_RESPONSE;

    /// Check if a specific flag is set.
    #[inline]
    pub fn has_flag(flags: u8, flag: u8) -> bool {
        flags & flag != 0
    }
}

/// Decoded frame prefix.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FramePrefix {
    /// Flags byte (see `flags` module).
    pub flags: u8,
    /// Length of the encoded header section.
    pub header_length: u32,
    /// Length of the encoded body section.
    pub body_length: u32,
}

impl FramePrefix {
    /// Create a new prefix.
    pub fn new(flags: u8, header_length: u32, body_length: u32) -> Self {
        Self {
            flags,
            header_length,
            body_length,
        }
    }

    /// Create a prefix for sections of the given byte lengths.
    ///
    /// # Errors
    ///
    /// Returns `Protocol` if either section is longer than
    /// [`ABSOLUTE_MAX_SECTION_SIZE`].
    pub fn for_sections(flags: u8, header_length: usize, body_length: usize) -> Result<Self> {
        let checked = |name: &str, len: usize| {
            u32::try_from(len)
                .ok()
                .filter(|&len| len <= ABSOLUTE_MAX_SECTION_SIZE)
                .ok_or_else(|| {
                    MuxwireError::Protocol(format!(
                        "{} size {} exceeds maximum {}",
                        name, len, ABSOLUTE_MAX_SECTION_SIZE
                    ))
                })
        };
        Ok(Self::new(
            flags,
            checked("Header", header_length)?,
            checked("Body", body_length)?,
        ))
    }

    /// Encode prefix to bytes (Big Endian).
    ///
    /// # Example
    ///
    /// ```
    /// use muxwire_client::protocol::{flags, FramePrefix};
    ///
    /// let prefix = FramePrefix::new(flags::RESPONSE, 12, 5);
    /// assert_eq!(prefix.encode(), [1, 0, 0, 0, 12, 0, 0, 0, 5]);
    /// ```
    pub fn encode(&self) -> [u8; FRAME_PREFIX_SIZE] {
        let mut buf = [0u8; FRAME_PREFIX_SIZE];
        self.encode_into(&mut buf);
        buf
    }

    /// Encode prefix into an existing buffer.
    ///
    /// # Panics
    ///
    /// Panics if buffer is smaller than `FRAME_PREFIX_SIZE` (9 bytes).
    pub fn encode_into(&self, buf: &mut [u8]) {
        buf[0] = self.flags;
        buf[1..5].copy_from_slice(&self.header_length.to_be_bytes());
        buf[5..9].copy_from_slice(&self.body_length.to_be_bytes());
    }

    /// Decode prefix from bytes (Big Endian).
    ///
    /// Returns `None` if buffer is too short.
    pub fn decode(buf: &[u8]) -> Option<Self> {
        if buf.len() < FRAME_PREFIX_SIZE {
            return None;
        }
        Some(Self {
            flags: buf[0],
            header_length: u32::from_be_bytes([buf[1], buf[2], buf[3], buf[4]]),
            body_length: u32::from_be_bytes([buf[5], buf[6], buf[7], buf[8]]),
        })
    }

    /// Validate the prefix for protocol compliance.
    ///
    /// Checks:
    /// - Reserved flag bits are 0
    /// - The header section is not empty
    /// - Neither section exceeds `max_section_size`
    pub fn validate(&self, max_section_size: u32) -> Result<()> {
        if self.flags & flags::RESERVED_MASK != 0 {
            return Err(MuxwireError::Protocol(
                "Reserved flag bits must be 0".to_string(),
            ));
        }

        if self.header_length == 0 {
            return Err(MuxwireError::Protocol(
                "Header section must not be empty".to_string(),
            ));
        }

        for (name, len) in [("Header", self.header_length), ("Body", self.body_length)] {
            if len > max_section_size {
                return Err(MuxwireError::Protocol(format!(
                    "{} size {} exceeds maximum {}",
                    name, len, max_section_size
                )));
            }
        }

        Ok(())
    }

    /// Total length of both sections.
    #[inline]
    pub fn sections_len(&self) -> usize {
        self.header_length as usize + self.body_length as usize
    }

    /// Check if this is a response.
    #[inline]
    pub fn is_response(&self) -> bool {
        flags::has_flag(self.flags, flags::IS_RESPONSE)
    }
}
