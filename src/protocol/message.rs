//! Request and response headers.
//!
//! Field names are serialized in PascalCase (`ServiceMethod`, `Seq`, `Error`)
//! so peers written against the classic `net/rpc`-style header layout can
//! decode them by name.

use serde::{Deserialize, Serialize};

/// Header written before the arguments of every request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct RequestHeader {
    /// Name of the remote operation, e.g. `"Echo.Do"`.
    pub service_method: String,
    /// Per-connection sequence number (starts at 1).
    pub seq: u64,
}

impl RequestHeader {
    /// Create a new request header.
    pub fn new(service_method: impl Into<String>, seq: u64) -> Self {
        Self {
            service_method: service_method.into(),
            seq,
        }
    }
}

/// Header written before the payload of every response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ResponseHeader {
    /// Echo of the request's service method.
    pub service_method: String,
    /// Sequence number of the request this response answers.
    pub seq: u64,
    /// Application error, empty on success.
    #[serde(default)]
    pub error: String,
}

impl ResponseHeader {
    /// Create a new response header.
    pub fn new(service_method: impl Into<String>, seq: u64, error: impl Into<String>) -> Self {
        Self {
            service_method: service_method.into(),
            seq,
            error: error.into(),
        }
    }

    /// Header for a successful response to `request`.
    pub fn ok(request: &RequestHeader) -> Self {
        Self::new(request.service_method.clone(), request.seq, String::new())
    }

    /// The application error, or `None` when the response is a success.
    #[inline]
    pub fn error(&self) -> Option<&str> {
        if self.error.is_empty() {
            None
        } else {
            Some(&self.error)
        }
    }
}
