//! Request context for service handlers.
//!
//! Every request gets exactly one [`RequestContext`]. Its reply methods take
//! `self` by value, so a handler can answer a request at most once:
//!
//! - `respond` - successful reply with a payload
//! - `error` - application error with an empty (nil) payload
//! - `error_with` - application error that still carries a payload
//!
//! # Example
//!
//! ```ignore
//! async fn get(key: String, ctx: RequestContext) -> Result<()> {
//!     match lookup(&key) {
//!         Some(value) => ctx.respond(&value).await,
//!         None => ctx.error("not found").await,
//!     }
//! }
//! ```

use std::marker::PhantomData;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use serde::Serialize;

use crate::codec::{Codec, MsgPackCodec};
use crate::error::{MuxwireError, Result};
use crate::protocol::{flags, RequestHeader, ResponseHeader};
use crate::writer::{OutboundFrame, WriterHandle};

/// Context passed to service handlers.
pub struct RequestContext<C = MsgPackCodec> {
    request: RequestHeader,
    writer: Option<WriterHandle>,
    responded: Arc<AtomicBool>,
    _codec: PhantomData<fn() -> C>,
}

impl<C: Codec> RequestContext<C> {
    /// Create a context that is not attached to a connection.
    ///
    /// Replies are accepted and discarded. Useful for unit-testing handlers.
    pub fn new(request: RequestHeader) -> Self {
        Self {
            request,
            writer: None,
            responded: Arc::new(AtomicBool::new(false)),
            _codec: PhantomData,
        }
    }

    pub(crate) fn with_writer(request: RequestHeader, writer: WriterHandle) -> Self {
        Self {
            writer: Some(writer),
            ..Self::new(request)
        }
    }

    /// Service method named in the request.
    #[inline]
    pub fn service_method(&self) -> &str {
        &self.request.service_method
    }

    /// Sequence number of the request.
    #[inline]
    pub fn seq(&self) -> u64 {
        self.request.seq
    }

    /// Reply successfully with `payload`.
    pub async fn respond<T: Serialize + ?Sized>(self, payload: &T) -> Result<()> {
        let body = C::encode(payload)?;
        self.send("", body).await
    }

    /// Reply with an application error and a nil payload.
    pub async fn error(self, message: &str) -> Result<()> {
        self.error_with(message, &()).await
    }

    /// Reply with an application error and `payload`.
    ///
    /// The caller still receives the payload alongside the error.
    pub async fn error_with<T: Serialize + ?Sized>(self, message: &str, payload: &T) -> Result<()> {
        let body = C::encode(payload)?;
        self.send(message, body).await
    }

    /// Flag that turns true once the writer has accepted a reply.
    pub(crate) fn responded_flag(&self) -> Arc<AtomicBool> {
        self.responded.clone()
    }

    async fn send(self, error: &str, body: Vec<u8>) -> Result<()> {
        let header = ResponseHeader::new(self.request.service_method, self.request.seq, error);
        let header = Bytes::from(C::encode(&header)?);
        let frame = OutboundFrame::new(flags::RESPONSE, header, Bytes::from(body))?;

        if let Some(writer) = self.writer {
            writer.send(frame).await?;
        }
        self.responded.store(true, Ordering::Release);
        Ok(())
    }
}

impl<C> std::fmt::Debug for RequestContext<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RequestContext")
            .field("service_method", &self.request.service_method)
            .field("seq", &self.request.seq)
            .field("responded", &self.responded.load(Ordering::Acquire))
            .finish()
    }
}
