//! Protocol module - wire format, framing, and message headers.
//!
//! This module implements the framing for the shared stream:
//! - 9-byte frame prefix encoding/decoding
//! - Frame buffer for accumulating partial reads
//! - Request/response headers carried in every frame

mod frame;
mod frame_buffer;
mod message;
mod wire_format;

pub use frame::{build_frame, encode_frame, Frame};
pub use frame_buffer::FrameBuffer;
pub use message::{RequestHeader, ResponseHeader};
pub use wire_format::{
    flags, FramePrefix, ABSOLUTE_MAX_SECTION_SIZE, DEFAULT_MAX_SECTION_SIZE, FRAME_PREFIX_SIZE,
};
