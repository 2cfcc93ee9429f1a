//! Pending-call table and per-call completion handles.
//!
//! Each outstanding call is split into two halves backed by a one-shot
//! channel:
//!
//! - [`PendingCall`] stays in the [`PendingTable`] and is resolved by the
//!   response reader. Both resolve methods take `self` by value, so a call
//!   can be resolved at most once.
//! - [`CallHandle`] is held by the caller, who waits on it.
//!
//! If the waiter has already given up (timeout, dropped future), resolving
//! is a no-op.

use std::collections::HashMap;

use bytes::Bytes;
use tokio::sync::oneshot;

use crate::error::{MuxwireError, Result};

/// Undecoded response delivered to a waiting caller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawReply {
    /// Service method echoed by the server.
    pub service_method: String,
    /// Sequence number of the call.
    pub seq: u64,
    /// Application error, `None` on success.
    pub error: Option<String>,
    /// Codec-encoded response body. Present even when `error` is set.
    pub body: Bytes,
}

#[derive(Debug)]
enum Outcome {
    Response(RawReply),
    ConnectionBroken,
}

/// Resolver half of an outstanding call.
#[derive(Debug)]
pub(crate) struct PendingCall {
    seq: u64,
    tx: oneshot::Sender<Outcome>,
}

impl PendingCall {
    pub(crate) fn seq(&self) -> u64 {
        self.seq
    }

    /// Deliver the decoded response to the waiting caller.
    pub(crate) fn resolve_with_response(self, reply: RawReply) {
        debug_assert_eq!(reply.seq, self.seq);
        if self.tx.send(Outcome::Response(reply)).is_err() {
            tracing::debug!(seq = self.seq, "Caller stopped waiting before response");
        }
    }

    /// Fail the waiting caller because the stream died.
    pub(crate) fn resolve_with_connection_broken(self) {
        let _ = self.tx.send(Outcome::ConnectionBroken);
    }
}

/// Waiter half of an outstanding call.
#[derive(Debug)]
pub struct CallHandle {
    seq: u64,
    rx: oneshot::Receiver<Outcome>,
}

impl CallHandle {
    /// Sequence number assigned to this call.
    #[inline]
    pub fn seq(&self) -> u64 {
        self.seq
    }

    /// Wait until the call is resolved.
    ///
    /// Returns immediately if it already was.
    ///
    /// # Errors
    ///
    /// `ConnectionBroken` if the stream failed or was closed before the
    /// response arrived. An application error is not an `Err` here; it is
    /// carried in [`RawReply::error`].
    pub async fn wait(self) -> Result<RawReply> {
        match self.rx.await {
            Ok(Outcome::Response(reply)) => Ok(reply),
            Ok(Outcome::ConnectionBroken) | Err(_) => Err(MuxwireError::ConnectionBroken),
        }
    }
}

/// Create the two halves of a call with sequence number `seq`.
pub(crate) fn call_pair(seq: u64) -> (PendingCall, CallHandle) {
    let (tx, rx) = oneshot::channel();
    (PendingCall { seq, tx }, CallHandle { seq, rx })
}

/// Map from sequence number to outstanding call.
#[derive(Debug, Default)]
pub(crate) struct PendingTable {
    calls: HashMap<u64, PendingCall>,
}

impl PendingTable {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn insert(&mut self, call: PendingCall) {
        let previous = self.calls.insert(call.seq(), call);
        debug_assert!(previous.is_none(), "sequence number reused");
    }

    pub(crate) fn remove(&mut self, seq: u64) -> Option<PendingCall> {
        self.calls.remove(&seq)
    }

    /// Remove and return every outstanding call.
    pub(crate) fn drain_all(&mut self) -> Vec<PendingCall> {
        self.calls.drain().map(|(_, call)| call).collect()
    }

    pub(crate) fn len(&self) -> usize {
        self.calls.len()
    }
}
