//! Client builder, call path and response reader loop.
//!
//! A [`Client`] wraps one connected duplex stream and lets any number of
//! tasks issue calls on it concurrently:
//!
//! 1. `call` takes the connection lock, assigns the next sequence number,
//!    registers a [`CallHandle`] and queues the request frame, all atomically
//! 2. the writer task puts the frame on the wire
//! 3. the reader task decodes responses and resolves the handle whose
//!    sequence number matches, in whatever order responses arrive
//! 4. if the stream dies, the reader fails every outstanding call with
//!    `ConnectionBroken` and the client is closed for good
//!
//! # Example
//!
//! ```ignore
//! use muxwire_client::Client;
//!
//! #[tokio::main]
//! async fn main() -> muxwire_client::Result<()> {
//!     let stream = tokio::net::TcpStream::connect("127.0.0.1:4000").await?;
//!     let client = Client::new(stream);
//!
//!     let reply = client.call::<_, String>("Echo.Do", "hello").await?;
//!     assert_eq!(reply.into_result()?, "hello");
//!
//!     client.close().await;
//!     Ok(())
//! }
//! ```

use std::marker::PhantomData;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use bytes::Bytes;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite};

use crate::codec::{Codec, MsgPackCodec};
use crate::error::{MuxwireError, Result};
use crate::pending::{call_pair, CallHandle, PendingTable, RawReply};
use crate::protocol::{
    flags, Frame, FrameBuffer, RequestHeader, ResponseHeader, ABSOLUTE_MAX_SECTION_SIZE,
    DEFAULT_MAX_SECTION_SIZE,
};
use crate::shutdown::{Shutdown, ShutdownSignal};
use crate::writer::{spawn_writer_task, OutboundFrame, WriterConfig, WriterHandle};

/// Size of the reader's socket buffer (64KB).
const READ_BUFFER_SIZE: usize = 64 * 1024;

/// Decoded response returned by [`Client::call`].
///
/// An application error does not fail the call: `error` is set and `result`
/// still holds the body if it could be decoded as `R`.
#[derive(Debug, Clone, PartialEq)]
pub struct Reply<R> {
    /// Decoded response body.
    pub result: Option<R>,
    /// Application error reported by the server, `None` on success.
    pub error: Option<String>,
}

impl<R: DeserializeOwned> Reply<R> {
    /// Decode a raw reply with codec `C`.
    ///
    /// # Errors
    ///
    /// Fails only when the call succeeded and its body does not decode as
    /// `R`. For an application error an undecodable body becomes `None`.
    pub fn decode<C: Codec>(raw: RawReply) -> Result<Self> {
        match raw.error {
            None => Ok(Self {
                result: Some(C::decode(&raw.body)?),
                error: None,
            }),
            Some(error) => Ok(Self {
                result: C::decode(&raw.body).ok(),
                error: Some(error),
            }),
        }
    }
}

impl<R> Reply<R> {
    /// True when the server reported no application error.
    #[inline]
    pub fn is_ok(&self) -> bool {
        self.error.is_none()
    }

    /// Convert into a plain `Result`, turning an application error into
    /// [`MuxwireError::Remote`].
    pub fn into_result(self) -> Result<R> {
        match (self.error, self.result) {
            (Some(error), _) => Err(MuxwireError::Remote(error)),
            (None, Some(result)) => Ok(result),
            (None, None) => Err(MuxwireError::Protocol(
                "successful reply without a result".to_string(),
            )),
        }
    }
}

/// State guarded by the connection lock.
///
/// The closed flag, the sequence counter and the pending table always
/// change together under one lock.
#[derive(Debug)]
struct ConnState {
    closed: bool,
    next_seq: u64,
    pending: PendingTable,
}

impl ConnState {
    fn new() -> Self {
        Self {
            closed: false,
            next_seq: 1,
            pending: PendingTable::new(),
        }
    }
}

fn lock(state: &Mutex<ConnState>) -> MutexGuard<'_, ConnState> {
    state.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Builder for configuring and creating a [`Client`].
pub struct ClientBuilder<C = MsgPackCodec> {
    writer_config: WriterConfig,
    max_section_size: u32,
    call_timeout: Option<Duration>,
    _codec: PhantomData<fn() -> C>,
}

impl ClientBuilder<MsgPackCodec> {
    /// Create a new client builder using the MsgPack codec.
    pub fn new() -> Self {
        Self {
            writer_config: WriterConfig::default(),
            max_section_size: DEFAULT_MAX_SECTION_SIZE,
            call_timeout: None,
            _codec: PhantomData,
        }
    }
}

impl Default for ClientBuilder<MsgPackCodec> {
    fn default() -> Self {
        Self::new()
    }
}

impl<C: Codec> ClientBuilder<C> {
    /// Switch the wire codec. The server must use the same one.
    pub fn codec<D: Codec>(self) -> ClientBuilder<D> {
        ClientBuilder {
            writer_config: self.writer_config,
            max_section_size: self.max_section_size,
            call_timeout: self.call_timeout,
            _codec: PhantomData,
        }
    }

    /// Set the writer queue capacity.
    ///
    /// Default: 1024
    pub fn channel_capacity(mut self, capacity: usize) -> Self {
        self.writer_config.channel_capacity = capacity;
        self
    }

    /// Set how long a call waits for room in a full writer queue.
    ///
    /// Default: 5 seconds
    pub fn backpressure_timeout(mut self, timeout: Duration) -> Self {
        self.writer_config.backpressure_timeout = timeout;
        self
    }

    /// Set the largest header or body section, for requests and responses.
    ///
    /// A request over the limit fails on its own without touching the
    /// connection; a response over the limit breaks the connection.
    ///
    /// Default: 1 GB
    pub fn max_section_size(mut self, size: u32) -> Self {
        self.max_section_size = size.min(ABSOLUTE_MAX_SECTION_SIZE);
        self
    }

    /// Set a deadline applied to every [`Client::call`] and
    /// [`Client::call_raw`].
    ///
    /// Default: none (wait until a response arrives or the connection dies)
    pub fn call_timeout(mut self, timeout: Duration) -> Self {
        self.call_timeout = Some(timeout);
        self
    }

    /// Build a client over a connected duplex stream.
    ///
    /// Spawns the reader and writer tasks, so this must be called from
    /// within a Tokio runtime.
    pub fn build<S>(self, stream: S) -> Client<C>
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        let (reader, writer) = tokio::io::split(stream);
        self.build_split(reader, writer)
    }

    /// Build a client over separate read and write halves.
    pub fn build_split<R, W>(self, reader: R, writer: W) -> Client<C>
    where
        R: AsyncRead + Unpin + Send + 'static,
        W: AsyncWrite + Unpin + Send + 'static,
    {
        let shutdown = Arc::new(Shutdown::new());
        let reader_done = Shutdown::new();
        let state = Arc::new(Mutex::new(ConnState::new()));

        let (writer, writer_task) =
            spawn_writer_task(writer, self.writer_config, shutdown.subscribe());

        let writer_shutdown = shutdown.clone();
        tokio::spawn(async move {
            let failure = match writer_task.await {
                Ok(Ok(())) => return,
                Ok(Err(e)) => e.to_string(),
                Err(e) => e.to_string(),
            };
            tracing::error!(error = %failure, "Writer task failed");
            writer_shutdown.trigger();
        });

        let done = reader_done.subscribe();
        let reader_state = state.clone();
        let reader_shutdown = shutdown.clone();
        let signal = shutdown.subscribe();
        let max_section_size = self.max_section_size;
        tokio::spawn(async move {
            match read_loop::<C, _>(reader, &reader_state, signal, max_section_size).await {
                Ok(()) => tracing::debug!("Response reader stopped"),
                Err(e) => tracing::warn!(error = %e, "Response stream failed"),
            }
            drain_pending(&reader_state);
            reader_shutdown.trigger();
            reader_done.trigger();
        });

        Client {
            shared: Arc::new(Shared {
                state,
                writer,
                shutdown,
                done,
                call_timeout: self.call_timeout,
                max_section_size,
            }),
            _codec: PhantomData,
        }
    }
}

/// Connection shared by every clone of a [`Client`].
struct Shared {
    state: Arc<Mutex<ConnState>>,
    writer: WriterHandle,
    shutdown: Arc<Shutdown>,
    done: ShutdownSignal,
    call_timeout: Option<Duration>,
    max_section_size: u32,
}

impl Drop for Shared {
    fn drop(&mut self) {
        // Last client handle gone: stop the background tasks.
        self.shutdown.trigger();
    }
}

/// A multiplexed RPC client over one stream.
///
/// Cloning is cheap; all clones share the connection. The connection shuts
/// down when [`close`](Client::close) is called, when the stream fails, or
/// when the last clone is dropped.
pub struct Client<C = MsgPackCodec> {
    shared: Arc<Shared>,
    _codec: PhantomData<fn() -> C>,
}

impl<C> Clone for Client<C> {
    fn clone(&self) -> Self {
        Self {
            shared: self.shared.clone(),
            _codec: PhantomData,
        }
    }
}

impl Client<MsgPackCodec> {
    /// Create a client with default settings over a connected stream.
    pub fn new<S>(stream: S) -> Self
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        ClientBuilder::new().build(stream)
    }

    /// Create a new client builder.
    pub fn builder() -> ClientBuilder {
        ClientBuilder::new()
    }
}

impl<C: Codec> Client<C> {
    /// Create a client with default settings using codec `C`.
    pub fn with_codec<S>(stream: S) -> Self
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        ClientBuilder::new().codec::<C>().build(stream)
    }

    /// Call `service_method` with `args` and wait for the decoded reply.
    ///
    /// # Errors
    ///
    /// - `ConnectionClosed` if the client was already closed
    /// - `ConnectionBroken` if the stream died before the response arrived
    /// - `Timeout` if a call timeout is configured and expired
    /// - codec errors if `args` cannot be encoded or a successful body does
    ///   not decode as `R`
    ///
    /// An application error is returned inside [`Reply`], not as `Err`.
    pub async fn call<A, R>(&self, service_method: &str, args: &A) -> Result<Reply<R>>
    where
        A: Serialize + ?Sized,
        R: DeserializeOwned,
    {
        let raw = self.call_raw(service_method, args).await?;
        Reply::decode::<C>(raw)
    }

    /// Like [`call`](Client::call) with an explicit deadline for this call.
    pub async fn call_timeout<A, R>(
        &self,
        service_method: &str,
        args: &A,
        timeout: Duration,
    ) -> Result<Reply<R>>
    where
        A: Serialize + ?Sized,
        R: DeserializeOwned,
    {
        let handle = self.start_call(service_method, args).await?;
        let raw = self.wait_reply(handle, Some(timeout)).await?;
        Reply::decode::<C>(raw)
    }

    /// Call `service_method` and return the undecoded reply.
    pub async fn call_raw<A>(&self, service_method: &str, args: &A) -> Result<RawReply>
    where
        A: Serialize + ?Sized,
    {
        let handle = self.start_call(service_method, args).await?;
        self.wait_reply(handle, self.shared.call_timeout).await
    }

    /// Send a request and return its handle without waiting for the reply.
    ///
    /// The closed check, sequence allocation, handle registration and
    /// enqueueing of the frame happen atomically under the connection lock.
    /// A call racing with [`close`](Client::close) is therefore either
    /// fully registered (and later failed with `ConnectionBroken`) or
    /// rejected with `ConnectionClosed` without writing anything.
    pub async fn start_call<A>(&self, service_method: &str, args: &A) -> Result<CallHandle>
    where
        A: Serialize + ?Sized,
    {
        if service_method.is_empty() {
            return Err(MuxwireError::InvalidServiceMethod(service_method.to_string()));
        }
        if self.is_closed() {
            return Err(MuxwireError::ConnectionClosed);
        }

        let body = Bytes::from(C::encode(args)?);
        check_section("Body", body.len(), self.shared.max_section_size)?;
        let permit = self.shared.writer.reserve().await?;

        let mut state = lock(&self.shared.state);
        if state.closed {
            return Err(MuxwireError::ConnectionClosed);
        }

        let seq = state.next_seq;
        let header = Bytes::from(C::encode(&RequestHeader::new(service_method, seq))?);
        check_section("Header", header.len(), self.shared.max_section_size)?;
        let frame = OutboundFrame::new(flags::REQUEST, header, body)?;
        state.next_seq += 1;

        let (pending, handle) = call_pair(seq);
        state.pending.insert(pending);
        permit.send(frame);
        drop(state);

        tracing::trace!(seq, service_method, codec = C::NAME, "Request queued");
        Ok(handle)
    }

    async fn wait_reply(&self, handle: CallHandle, timeout: Option<Duration>) -> Result<RawReply> {
        let Some(timeout) = timeout else {
            return handle.wait().await;
        };

        let seq = handle.seq();
        match tokio::time::timeout(timeout, handle.wait()).await {
            Ok(result) => result,
            Err(_) => {
                // A late response finds no entry and is dropped by the reader.
                lock(&self.shared.state).pending.remove(seq);
                tracing::debug!(seq, ?timeout, "Call timed out");
                Err(MuxwireError::Timeout { seq })
            }
        }
    }

    /// Close the connection.
    ///
    /// Marks the client closed, shuts the stream down in both directions and
    /// returns once every outstanding call has been failed with
    /// `ConnectionBroken`. Calling it again is a no-op.
    pub async fn close(&self) {
        lock(&self.shared.state).closed = true;
        if self.shared.shutdown.trigger() {
            tracing::debug!("Closing connection");
        }
        self.closed().await;
    }

    /// Wait until the connection has shut down, without initiating it.
    pub async fn closed(&self) {
        let mut done = self.shared.done.clone();
        done.recv().await;
    }

    /// Check whether new calls are rejected.
    pub fn is_closed(&self) -> bool {
        lock(&self.shared.state).closed
    }

    /// Number of calls waiting for a response.
    pub fn pending_calls(&self) -> usize {
        lock(&self.shared.state).pending.len()
    }
}

/// Reject an outgoing section the peer would refuse.
fn check_section(name: &str, len: usize, max_section_size: u32) -> Result<()> {
    if len > max_section_size as usize {
        return Err(MuxwireError::Protocol(format!(
            "{} size {} exceeds maximum {}",
            name, len, max_section_size
        )));
    }
    Ok(())
}

/// Response reader loop.
///
/// Returns `Ok` on local shutdown or a clean end of stream, `Err` on any
/// transport or decoding failure. Either way the caller drains the table.
async fn read_loop<C, R>(
    mut reader: R,
    state: &Mutex<ConnState>,
    mut shutdown: ShutdownSignal,
    max_section_size: u32,
) -> Result<()>
where
    C: Codec,
    R: AsyncRead + Unpin,
{
    let mut frame_buffer = FrameBuffer::with_max_section(max_section_size);
    let mut buf = vec![0u8; READ_BUFFER_SIZE];

    loop {
        let n = tokio::select! {
            biased;
            _ = shutdown.recv() => return Ok(()),
            read = reader.read(&mut buf) => read?,
        };

        if n == 0 {
            if frame_buffer.is_mid_frame() {
                return Err(MuxwireError::Io(std::io::Error::new(
                    std::io::ErrorKind::UnexpectedEof,
                    "stream ended mid-frame",
                )));
            }
            return Ok(());
        }

        for frame in frame_buffer.push(&buf[..n])? {
            deliver_response::<C>(&frame, state)?;
        }
    }
}

/// Hand one response frame to the call waiting for its sequence number.
fn deliver_response<C: Codec>(frame: &Frame, state: &Mutex<ConnState>) -> Result<()> {
    if !frame.is_response() {
        return Err(MuxwireError::Protocol(
            "Received request frame on client connection".to_string(),
        ));
    }

    let ResponseHeader {
        service_method,
        seq,
        error,
    } = frame.decode_header::<C, ResponseHeader>()?;

    let Some(call) = lock(state).pending.remove(seq) else {
        tracing::debug!(seq, %service_method, "Dropping response with no pending call");
        return Ok(());
    };

    tracing::trace!(seq, %service_method, body_len = frame.body.len(), "Response received");
    call.resolve_with_response(RawReply {
        service_method,
        seq,
        error: (!error.is_empty()).then_some(error),
        body: frame.body.clone(),
    });
    Ok(())
}

/// Mark the connection closed and fail every outstanding call.
fn drain_pending(state: &Mutex<ConnState>) {
    let calls = {
        let mut state = lock(state);
        state.closed = true;
        state.pending.drain_all()
    };

    if !calls.is_empty() {
        tracing::debug!(count = calls.len(), "Failing pending calls");
    }
    for call in calls {
        call.resolve_with_connection_broken();
    }
}
