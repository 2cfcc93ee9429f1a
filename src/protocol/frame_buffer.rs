//! Frame buffer for accumulating partial reads.
//!
//! Uses `bytes::BytesMut` for zero-copy buffer management.
//! Implements a state machine for handling fragmented frames:
//! - `WaitingForPrefix`: Need at least 9 bytes
//! - `WaitingForSections`: Prefix parsed, need header + body bytes
//!
//! # Example
//!
//! ```ignore
//! use muxwire_client::protocol::FrameBuffer;
//!
//! let mut buffer = FrameBuffer::new();
//!
//! // Data arrives in chunks from the socket
//! let n = reader.read(&mut chunk).await?;
//! for frame in buffer.push(&chunk[..n])? {
//!     println!("Got frame with {} body bytes", frame.body.len());
//! }
//! ```

use bytes::BytesMut;

use super::wire_format::{FramePrefix, DEFAULT_MAX_SECTION_SIZE, FRAME_PREFIX_SIZE};
use super::Frame;
use crate::error::{MuxwireError, Result};

/// Default initial buffer capacity (64KB).
const DEFAULT_CAPACITY: usize = 64 * 1024;

/// State machine for frame parsing.
#[derive(Debug, Clone)]
enum State {
    /// Waiting for a complete prefix (need 9 bytes).
    WaitingForPrefix,
    /// Prefix parsed, waiting for both sections.
    WaitingForSections { prefix: FramePrefix },
}

/// Buffer for accumulating incoming bytes and extracting complete frames.
pub struct FrameBuffer {
    /// Accumulated bytes from socket reads.
    buffer: BytesMut,
    /// Current parsing state.
    state: State,
    /// Maximum allowed size of each section.
    max_section_size: u32,
}

impl FrameBuffer {
    /// Create a new frame buffer with default settings.
    ///
    /// Default capacity: 64KB, max section: 1GB.
    pub fn new() -> Self {
        Self::with_max_section(DEFAULT_MAX_SECTION_SIZE)
    }

    /// Create a new frame buffer with a custom max section size.
    pub fn with_max_section(max_section_size: u32) -> Self {
        Self {
            buffer: BytesMut::with_capacity(DEFAULT_CAPACITY),
            state: State::WaitingForPrefix,
            max_section_size,
        }
    }

    /// Push data into the buffer and extract all complete frames.
    ///
    /// Partial data is kept for the next push.
    ///
    /// # Errors
    ///
    /// Returns error if a prefix fails validation. The stream cannot be
    /// resynchronized after that, so callers treat it as connection loss.
    pub fn push(&mut self, data: &[u8]) -> Result<Vec<Frame>> {
        self.buffer.extend_from_slice(data);

        let mut frames = Vec::new();
        while let Some(frame) = self.try_extract_one()? {
            frames.push(frame);
        }

        Ok(frames)
    }

    fn try_extract_one(&mut self) -> Result<Option<Frame>> {
        loop {
            match self.state {
                State::WaitingForPrefix => {
                    let Some(prefix) = FramePrefix::decode(&self.buffer) else {
                        return Ok(None);
                    };
                    prefix.validate(self.max_section_size)?;

                    let _ = self.buffer.split_to(FRAME_PREFIX_SIZE);
                    self.state = State::WaitingForSections { prefix };
                }

                State::WaitingForSections { prefix } => {
                    if self.buffer.len() < prefix.sections_len() {
                        return Ok(None);
                    }

                    let header = self.buffer.split_to(prefix.header_length as usize).freeze();
                    let body = self.buffer.split_to(prefix.body_length as usize).freeze();
                    self.state = State::WaitingForPrefix;

                    return Ok(Some(Frame::new(prefix, header, body)));
                }
            }
        }
    }

    /// Get the number of buffered bytes.
    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    /// Check if the buffer is empty.
    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    /// Check if a frame is partially received.
    pub fn is_mid_frame(&self) -> bool {
        !self.buffer.is_empty() || matches!(self.state, State::WaitingForSections { .. })
    }

    /// Clear the buffer and reset state.
    pub fn clear(&mut self) {
        self.buffer.clear();
        self.state = State::WaitingForPrefix;
    }
}

impl Default for FrameBuffer {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for FrameBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FrameBuffer")
            .field("buffered", &self.buffer.len())
            .field("state", &self.state)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{build_frame, flags};

    #[test]
    fn test_single_complete_frame() {
        let mut buffer = FrameBuffer::new();
        let frames = buffer
            .push(&build_frame(flags::RESPONSE, b"hdr", b"hello").unwrap())
            .unwrap();

        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].header(), b"hdr");
        assert_eq!(frames[0].body(), b"hello");
        assert!(buffer.is_empty());
        assert!(!buffer.is_mid_frame());
    }

    #[test]
    fn test_multiple_frames_in_one_push() {
        let mut buffer = FrameBuffer::new();
        let mut combined = Vec::new();
        for body in [&b"first"[..], b"second", b"third"] {
            combined.extend(build_frame(flags::REQUEST, b"h", body).unwrap());
        }

        let frames = buffer.push(&combined).unwrap();

        assert_eq!(frames.len(), 3);
        assert_eq!(frames[0].body(), b"first");
        assert_eq!(frames[1].body(), b"second");
        assert_eq!(frames[2].body(), b"third");
    }

    #[test]
    fn test_fragmented_prefix() {
        let mut buffer = FrameBuffer::new();
        let bytes = build_frame(flags::REQUEST, b"h", b"test").unwrap();

        assert!(buffer.push(&bytes[..4]).unwrap().is_empty());
        assert!(buffer.is_mid_frame());

        let frames = buffer.push(&bytes[4..]).unwrap();
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].body(), b"test");
    }

    #[test]
    fn test_fragmented_sections() {
        let mut buffer = FrameBuffer::new();
        let body = b"this is a longer body that will be fragmented";
        let bytes = build_frame(flags::RESPONSE, b"header", body).unwrap();

        // Prefix plus part of the header
        assert!(buffer.push(&bytes[..FRAME_PREFIX_SIZE + 2]).unwrap().is_empty());
        // Rest of the header plus part of the body
        assert!(buffer
            .push(&bytes[FRAME_PREFIX_SIZE + 2..FRAME_PREFIX_SIZE + 20])
            .unwrap()
            .is_empty());

        let frames = buffer.push(&bytes[FRAME_PREFIX_SIZE + 20..]).unwrap();
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].header(), b"header");
        assert_eq!(frames[0].body(), body);
        assert!(!buffer.is_mid_frame());
    }

    #[test]
    fn test_empty_body() {
        let mut buffer = FrameBuffer::new();
        let frames = buffer.push(&build_frame(flags::RESPONSE, b"h", b"").unwrap()).unwrap();

        assert_eq!(frames.len(), 1);
        assert!(frames[0].body.is_empty());
    }

    #[test]
    fn test_oversized_section_rejected() {
        let mut buffer = FrameBuffer::with_max_section(100);
        let prefix = FramePrefix::new(flags::RESPONSE, 1, 1000);

        let err = buffer.push(&prefix.encode()).unwrap_err();
        assert!(err.to_string().contains("exceeds maximum"));
    }

    #[test]
    fn test_reserved_flags_rejected() {
        let mut buffer = FrameBuffer::new();
        let bytes = build_frame(0x80, b"h", b"").unwrap();
        assert!(matches!(buffer.push(&bytes), Err(MuxwireError::Protocol(_))));
    }

    #[test]
    fn test_mixed_complete_and_partial() {
        let mut buffer = FrameBuffer::new();
        let frame1 = build_frame(flags::RESPONSE, b"1", b"first").unwrap();
        let frame2 = build_frame(flags::RESPONSE, b"2", b"second").unwrap();

        let mut data = frame1.clone();
        data.extend_from_slice(&frame2[..5]);

        let frames = buffer.push(&data).unwrap();
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].header(), b"1");

        let frames = buffer.push(&frame2[5..]).unwrap();
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].header(), b"2");
    }

    #[test]
    fn test_byte_at_a_time() {
        let mut buffer = FrameBuffer::new();
        let bytes = build_frame(flags::RESPONSE, b"hdr", b"hi").unwrap();

        let mut all_frames = Vec::new();
        for byte in &bytes {
            all_frames.extend(buffer.push(&[*byte]).unwrap());
        }

        assert_eq!(all_frames.len(), 1);
        assert_eq!(all_frames[0].body(), b"hi");
    }

    #[test]
    fn test_clear_resets_state() {
        let mut buffer = FrameBuffer::new();
        let bytes = build_frame(flags::RESPONSE, b"hdr", b"body").unwrap();
        buffer.push(&bytes[..FRAME_PREFIX_SIZE + 1]).unwrap();
        assert!(buffer.is_mid_frame());

        buffer.clear();
        assert!(!buffer.is_mid_frame());

        let frames = buffer.push(&bytes).unwrap();
        assert_eq!(frames.len(), 1);
    }
}
