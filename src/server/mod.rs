//! Minimal server side of the protocol.
//!
//! Serves calls on one connection at a time: reads request frames, runs the
//! registered handler for each on its own task and writes responses in
//! completion order. Used by the demos and the integration tests, and as a
//! reference peer for the client.
//!
//! Every request receives exactly one response. If a handler returns without
//! replying, or fails, the server replies with an application error. An
//! unknown service method gets `unknown service method: <name>`.
//!
//! # Example
//!
//! ```ignore
//! use muxwire_client::server::{RequestContext, Server};
//!
//! let server = Server::builder()
//!     .handle("Echo.Do", |text: String, ctx: RequestContext| async move {
//!         ctx.respond(&text).await
//!     })
//!     .build();
//!
//! let (stream, _) = listener.accept().await?;
//! server.serve_connection(stream).await?;
//! ```

mod context;
mod registry;

pub use context::RequestContext;
pub use registry::{BoxFuture, Handler, HandlerResult, ServiceRegistry, TypedHandler};

use std::future::Future;
use std::sync::atomic::Ordering;
use std::sync::Arc;

use bytes::Bytes;
use serde::de::DeserializeOwned;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite};
use tokio::sync::Semaphore;

use crate::codec::{Codec, MsgPackCodec};
use crate::error::{MuxwireError, Result};
use crate::protocol::{FrameBuffer, RequestHeader, DEFAULT_MAX_SECTION_SIZE};
use crate::shutdown::Shutdown;
use crate::writer::{spawn_writer_task, WriterConfig, WriterHandle};

/// Default number of handlers allowed to run at once per connection.
pub const DEFAULT_MAX_CONCURRENT_HANDLERS: usize = 256;

/// Size of the server's socket buffer (64KB).
const READ_BUFFER_SIZE: usize = 64 * 1024;

/// Builder for configuring and creating a [`Server`].
pub struct ServerBuilder<C = MsgPackCodec> {
    registry: ServiceRegistry<C>,
    writer_config: WriterConfig,
    max_concurrent_handlers: usize,
    max_section_size: u32,
}

impl ServerBuilder<MsgPackCodec> {
    /// Create a new server builder using the MsgPack codec.
    pub fn new() -> Self {
        Self::with_codec()
    }
}

impl Default for ServerBuilder<MsgPackCodec> {
    fn default() -> Self {
        Self::new()
    }
}

impl<C: Codec> ServerBuilder<C> {
    /// Create a new server builder using codec `C`.
    pub fn with_codec() -> Self {
        Self {
            registry: ServiceRegistry::new(),
            writer_config: WriterConfig::default(),
            max_concurrent_handlers: DEFAULT_MAX_CONCURRENT_HANDLERS,
            max_section_size: DEFAULT_MAX_SECTION_SIZE,
        }
    }

    /// Register a handler for a service method.
    pub fn handle<F, T, Fut>(mut self, service_method: &str, handler: F) -> Self
    where
        F: Fn(T, RequestContext<C>) -> Fut + Send + Sync + 'static,
        T: DeserializeOwned + Send + 'static,
        Fut: Future<Output = HandlerResult> + Send + 'static,
    {
        self.registry.register(service_method, handler);
        self
    }

    /// Set how many handlers may run at once per connection.
    ///
    /// When the limit is reached the server stops reading new requests until
    /// a handler finishes.
    ///
    /// Default: 256
    pub fn max_concurrent_handlers(mut self, max: usize) -> Self {
        self.max_concurrent_handlers = max.clamp(1, Semaphore::MAX_PERMITS.min(u32::MAX as usize));
        self
    }

    /// Set the response queue capacity.
    ///
    /// Default: 1024
    pub fn channel_capacity(mut self, capacity: usize) -> Self {
        self.writer_config.channel_capacity = capacity;
        self
    }

    /// Set the largest accepted header or body section of a request.
    ///
    /// Default: 1 GB
    pub fn max_section_size(mut self, size: u32) -> Self {
        self.max_section_size = size;
        self
    }

    /// Build the server.
    pub fn build(self) -> Server<C> {
        Server {
            registry: Arc::new(self.registry),
            writer_config: self.writer_config,
            max_concurrent_handlers: self.max_concurrent_handlers,
            max_section_size: self.max_section_size,
        }
    }
}

/// Serves registered handlers over connected streams.
///
/// Cheap to clone; clones share the handler registry.
pub struct Server<C = MsgPackCodec> {
    registry: Arc<ServiceRegistry<C>>,
    writer_config: WriterConfig,
    max_concurrent_handlers: usize,
    max_section_size: u32,
}

impl<C> Clone for Server<C> {
    fn clone(&self) -> Self {
        Self {
            registry: self.registry.clone(),
            writer_config: self.writer_config.clone(),
            max_concurrent_handlers: self.max_concurrent_handlers,
            max_section_size: self.max_section_size,
        }
    }
}

impl Server<MsgPackCodec> {
    /// Create a new server builder.
    pub fn builder() -> ServerBuilder {
        ServerBuilder::new()
    }
}

impl<C: Codec> Server<C> {
    /// Registered service method names, sorted.
    pub fn service_methods(&self) -> Vec<&str> {
        self.registry.service_methods()
    }

    /// Serve one connection until the peer closes it.
    ///
    /// Returns after every started handler has finished and its response
    /// has been flushed.
    pub async fn serve_connection<S>(&self, stream: S) -> Result<()>
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        let (reader, writer) = tokio::io::split(stream);
        self.serve_split(reader, writer).await
    }

    /// Serve one connection given as separate read and write halves.
    pub async fn serve_split<R, W>(&self, reader: R, writer: W) -> Result<()>
    where
        R: AsyncRead + Unpin + Send,
        W: AsyncWrite + Unpin + Send + 'static,
    {
        // Never triggered: the writer exits once every handle is dropped.
        let shutdown = Shutdown::new();
        let (writer, writer_task) =
            spawn_writer_task(writer, self.writer_config.clone(), shutdown.subscribe());
        let semaphore = Arc::new(Semaphore::new(self.max_concurrent_handlers));

        let result = self.read_requests(reader, &writer, &semaphore).await;
        match &result {
            Ok(()) => tracing::debug!("Client disconnected"),
            Err(e) => tracing::warn!(error = %e, "Request stream failed"),
        }

        // Wait for in-flight handlers so their responses are queued.
        let _all = semaphore
            .acquire_many(self.max_concurrent_handlers as u32)
            .await;
        drop(writer);

        match writer_task.await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => tracing::debug!(error = %e, "Response writer stopped"),
            Err(e) => tracing::error!(error = %e, "Response writer panicked"),
        }
        drop(shutdown);

        result
    }

    async fn read_requests<R>(
        &self,
        mut reader: R,
        writer: &WriterHandle,
        semaphore: &Arc<Semaphore>,
    ) -> Result<()>
    where
        R: AsyncRead + Unpin,
    {
        let mut frame_buffer = FrameBuffer::with_max_section(self.max_section_size);
        let mut buf = vec![0u8; READ_BUFFER_SIZE];

        loop {
            let n = reader.read(&mut buf).await?;
            if n == 0 {
                if frame_buffer.is_mid_frame() {
                    return Err(MuxwireError::Protocol(
                        "Stream ended mid-frame".to_string(),
                    ));
                }
                return Ok(());
            }

            for frame in frame_buffer.push(&buf[..n])? {
                if frame.is_response() {
                    tracing::warn!("Received response frame on server connection");
                    continue;
                }

                let request: RequestHeader = frame.decode_header::<C, _>()?;
                let permit = semaphore
                    .clone()
                    .acquire_owned()
                    .await
                    .map_err(|_| MuxwireError::Protocol("Handler limit closed".to_string()))?;

                tracing::trace!(
                    seq = request.seq,
                    service_method = %request.service_method,
                    "Request received"
                );

                let registry = self.registry.clone();
                let writer = writer.clone();
                let args = frame.body.clone();
                tokio::spawn(async move {
                    let _permit = permit;
                    run_handler(&registry, request, args, writer).await;
                });
            }
        }
    }
}

/// Run one handler and make sure the request gets exactly one response.
async fn run_handler<C: Codec>(
    registry: &ServiceRegistry<C>,
    request: RequestHeader,
    args: Bytes,
    writer: WriterHandle,
) {
    let ctx = RequestContext::with_writer(request.clone(), writer.clone());
    let responded = ctx.responded_flag();
    let result = registry.dispatch(&request.service_method, &args, ctx).await;

    if responded.load(Ordering::Acquire) {
        if let Err(e) = result {
            tracing::debug!(seq = request.seq, error = %e, "Handler failed after responding");
        }
        return;
    }

    let message = match result {
        Ok(()) => "handler returned without a response".to_string(),
        Err(e) => e.to_string(),
    };
    tracing::debug!(
        seq = request.seq,
        service_method = %request.service_method,
        error = %message,
        "Replying with error"
    );

    let seq = request.seq;
    let fallback = RequestContext::<C>::with_writer(request, writer);
    if let Err(e) = fallback.error(&message).await {
        tracing::debug!(seq, error = %e, "Failed to send error response");
    }
}
