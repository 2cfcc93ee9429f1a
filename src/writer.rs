//! Dedicated writer task for the shared stream.
//!
//! Every frame goes through one writer task that owns the write half of the
//! stream, so bytes of two frames are never interleaved on the wire.
//! Callers first reserve a slot in the bounded channel (this is where
//! backpressure applies), then hand over the frame synchronously through the
//! returned [`WritePermit`]. The client does that hand-over while holding the
//! connection lock, which makes wire order equal sequence-number order.
//!
//! # Architecture
//!
//! ```text
//! Caller 1 ─┐
//! Caller 2 ─┼─► mpsc::Sender<OutboundFrame> ─► Writer Task ─► Stream
//! Caller N ─┘
//! ```

use std::io::IoSlice;
use std::time::Duration;

use bytes::Bytes;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::error::{MuxwireError, Result};
use crate::protocol::{FramePrefix, FRAME_PREFIX_SIZE};
use crate::shutdown::ShutdownSignal;

/// Default channel capacity.
pub const DEFAULT_CHANNEL_CAPACITY: usize = 1024;

/// Default backpressure timeout.
pub const DEFAULT_BACKPRESSURE_TIMEOUT: Duration = Duration::from_secs(5);

/// Maximum frames to batch in a single write operation.
const MAX_BATCH_SIZE: usize = 64;

/// Upper bound on shutting down the write half once the loop has stopped.
const WRITE_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(1);

/// A frame ready to be written to the stream.
#[derive(Debug)]
pub struct OutboundFrame {
    /// Pre-encoded prefix (9 bytes).
    pub prefix: [u8; FRAME_PREFIX_SIZE],
    /// Encoded header section.
    pub header: Bytes,
    /// Encoded body section.
    pub body: Bytes,
}

impl OutboundFrame {
    /// Create a new outbound frame.
    ///
    /// Fails if a section does not fit in a frame.
    #[inline]
    pub fn new(flags: u8, header: Bytes, body: Bytes) -> Result<Self> {
        let prefix = FramePrefix::for_sections(flags, header.len(), body.len())?;
        Ok(Self {
            prefix: prefix.encode(),
            header,
            body,
        })
    }

    /// Total size of this frame on the wire.
    #[inline]
    pub fn size(&self) -> usize {
        FRAME_PREFIX_SIZE + self.header.len() + self.body.len()
    }

    fn slices(&self) -> [&[u8]; 3] {
        [&self.prefix, &self.header, &self.body]
    }
}

/// Configuration for the writer task.
#[derive(Debug, Clone)]
pub struct WriterConfig {
    /// Channel capacity for the frame queue.
    pub channel_capacity: usize,
    /// Timeout when waiting for a free slot in the queue.
    pub backpressure_timeout: Duration,
}

impl Default for WriterConfig {
    fn default() -> Self {
        Self {
            channel_capacity: DEFAULT_CHANNEL_CAPACITY,
            backpressure_timeout: DEFAULT_BACKPRESSURE_TIMEOUT,
        }
    }
}

/// Handle for sending frames to the writer task.
///
/// This is cheaply cloneable and can be shared across tasks.
#[derive(Clone)]
pub struct WriterHandle {
    tx: mpsc::Sender<OutboundFrame>,
    timeout: Duration,
}

/// A reserved slot in the writer queue.
///
/// Sending through a permit never waits and never fails, so it is safe to do
/// while holding a synchronous lock. Dropping an unused permit releases the
/// slot without writing anything.
pub struct WritePermit<'a> {
    permit: mpsc::Permit<'a, OutboundFrame>,
}

impl WritePermit<'_> {
    /// Queue the frame in the reserved slot.
    #[inline]
    pub fn send(self, frame: OutboundFrame) {
        self.permit.send(frame);
    }
}

impl WriterHandle {
    /// Reserve a slot in the writer queue.
    ///
    /// Waits while the queue is full, up to the configured backpressure
    /// timeout.
    ///
    /// # Errors
    ///
    /// - `BackpressureTimeout` if no slot freed up in time
    /// - `ConnectionClosed` if the writer task has exited
    pub async fn reserve(&self) -> Result<WritePermit<'_>> {
        match tokio::time::timeout(self.timeout, self.tx.reserve()).await {
            Ok(Ok(permit)) => Ok(WritePermit { permit }),
            Ok(Err(_)) => Err(MuxwireError::ConnectionClosed),
            Err(_) => Err(MuxwireError::BackpressureTimeout),
        }
    }

    /// Send a frame to the writer task, waiting for backpressure to clear.
    pub async fn send(&self, frame: OutboundFrame) -> Result<()> {
        self.reserve().await?.send(frame);
        Ok(())
    }
}

/// Spawn the writer task and return a handle for sending frames.
///
/// The task exits when `shutdown` fires, when every handle is dropped, or
/// when a write fails. It shuts down the write half on the way out, unless
/// shutdown interrupted a write in progress; then the half is just dropped.
pub fn spawn_writer_task<W>(
    writer: W,
    config: WriterConfig,
    shutdown: ShutdownSignal,
) -> (WriterHandle, JoinHandle<Result<()>>)
where
    W: AsyncWrite + Unpin + Send + 'static,
{
    let (tx, rx) = mpsc::channel(config.channel_capacity);
    let handle = WriterHandle {
        tx,
        timeout: config.backpressure_timeout,
    };
    let task = tokio::spawn(writer_loop(rx, writer, shutdown));

    (handle, task)
}

/// Main writer loop - receives frames and writes them to the stream.
async fn writer_loop<W>(
    mut rx: mpsc::Receiver<OutboundFrame>,
    mut writer: W,
    mut shutdown: ShutdownSignal,
) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    let result = loop {
        let first = tokio::select! {
            biased;
            _ = shutdown.recv() => break Ok(()),
            frame = rx.recv() => match frame {
                Some(f) => f,
                // Every handle dropped
                None => break Ok(()),
            },
        };

        let mut batch = Vec::with_capacity(MAX_BATCH_SIZE);
        batch.push(first);
        while batch.len() < MAX_BATCH_SIZE {
            match rx.try_recv() {
                Ok(frame) => batch.push(frame),
                Err(_) => break,
            }
        }

        // Shutdown also interrupts a write to a peer that stopped reading.
        let written = tokio::select! {
            biased;
            _ = shutdown.recv() => {
                tracing::debug!(frames = batch.len(), "Shutdown during write, dropping stream");
                rx.close();
                return Ok(());
            }
            written = write_batch(&mut writer, &batch) => written,
        };
        if let Err(e) = written {
            break Err(e);
        }
        tracing::trace!(frames = batch.len(), "Wrote batch");
    };

    rx.close();
    match tokio::time::timeout(WRITE_SHUTDOWN_TIMEOUT, writer.shutdown()).await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => tracing::debug!(error = %e, "Write half shutdown failed"),
        Err(_) => tracing::debug!("Write half shutdown timed out"),
    }

    result
}

/// Write a batch of frames using scatter/gather I/O (write_vectored).
async fn write_batch<W>(writer: &mut W, batch: &[OutboundFrame]) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    if batch.is_empty() {
        return Ok(());
    }

    let total_size: usize = batch.iter().map(OutboundFrame::size).sum();
    let mut total_written = 0;

    while total_written < total_size {
        let slices = build_remaining_slices(batch, total_written);
        let written = writer.write_vectored(&slices).await?;
        if written == 0 {
            return Err(MuxwireError::Io(std::io::Error::new(
                std::io::ErrorKind::WriteZero,
                "write_vectored returned 0",
            )));
        }
        total_written += written;
    }

    writer.flush().await?;
    Ok(())
}

/// Build IoSlice array for the data not yet written.
fn build_remaining_slices(batch: &[OutboundFrame], skip_bytes: usize) -> Vec<IoSlice<'_>> {
    let mut slices = Vec::with_capacity(batch.len() * 3);
    let mut offset = 0;

    for part in batch.iter().flat_map(OutboundFrame::slices) {
        let end = offset + part.len();
        if !part.is_empty() && skip_bytes < end {
            let start_in_part = skip_bytes.saturating_sub(offset);
            slices.push(IoSlice::new(&part[start_in_part..]));
        }
        offset = end;
    }

    slices
}
