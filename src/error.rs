//! Error types for muxwire-client.

use thiserror::Error;

/// Main error type for all muxwire operations.
#[derive(Debug, Error)]
pub enum MuxwireError {
    /// I/O error during socket/pipe operations.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// MsgPack serialization error.
    #[error("MsgPack encode error: {0}")]
    MsgPackEncode(#[from] rmp_serde::encode::Error),

    /// MsgPack deserialization error.
    #[error("MsgPack decode error: {0}")]
    MsgPackDecode(#[from] rmp_serde::decode::Error),

    /// Protocol error (invalid frame, wrong flags, oversized section, etc.).
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// The service method name was empty.
    #[error("Invalid service method: {0:?}")]
    InvalidServiceMethod(String),

    /// No handler is registered for the requested service method.
    #[error("unknown service method: {0}")]
    UnknownServiceMethod(String),

    /// `call` was invoked after the connection was closed.
    #[error("Connection closed")]
    ConnectionClosed,

    /// The stream failed or was closed while the call was outstanding.
    #[error("Connection broken")]
    ConnectionBroken,

    /// The call did not receive a response before its deadline.
    #[error("Call {seq} timed out")]
    Timeout {
        /// Sequence number of the abandoned call.
        seq: u64,
    },

    /// Application-level error reported by the remote side.
    #[error("Remote error: {0}")]
    Remote(String),

    /// Backpressure timeout - write queue full.
    #[error("Backpressure timeout")]
    BackpressureTimeout,
}

/// Result type alias using MuxwireError.
pub type Result<T> = std::result::Result<T, MuxwireError>;
