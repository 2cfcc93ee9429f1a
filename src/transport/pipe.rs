//! Local stream transport.
//!
//! - Unix: Unix domain socket
//! - Windows: named pipe
//!
//! Both sides get a [`PipeStream`] that implements `AsyncRead + AsyncWrite`
//! and can be handed straight to a client or server.
//!
//! # Example
//!
//! ```ignore
//! use muxwire_client::transport::{generate_pipe_path, PipeListener, PipeStream};
//!
//! let path = generate_pipe_path();
//! let listener = PipeListener::bind(&path).await?;
//! let (accepted, connected) = tokio::join!(listener.accept(), PipeStream::connect(&path));
//! ```

use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::task::{Context, Poll};

use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};

use crate::error::Result;

/// Generate a pipe path unique to this process and call.
///
/// Format:
/// - Unix: `{tmp}/muxwire-{pid}-{n}-{nanos}.sock`
/// - Windows: `\\.\pipe\muxwire-{pid}-{n}-{nanos}`
pub fn generate_pipe_path() -> String {
    static COUNTER: AtomicU64 = AtomicU64::new(0);

    let pid = std::process::id();
    let n = COUNTER.fetch_add(1, Ordering::Relaxed);
    let nanos = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.subsec_nanos())
        .unwrap_or(0);
    let name = format!("muxwire-{}-{}-{:x}", pid, n, nanos);

    #[cfg(unix)]
    {
        std::env::temp_dir()
            .join(format!("{}.sock", name))
            .to_string_lossy()
            .into_owned()
    }

    #[cfg(windows)]
    {
        format!(r"\\.\pipe\{}", name)
    }
}

#[cfg(unix)]
mod unix_impl {
    use super::*;
    use std::path::Path;
    use tokio::net::{UnixListener, UnixStream};

    /// Unix domain socket listener. Removes its socket file on drop.
    pub struct PipeListener {
        listener: UnixListener,
        path: String,
    }

    impl PipeListener {
        /// Bind to a socket path, replacing a stale socket file.
        pub async fn bind(path: &str) -> Result<Self> {
            if Path::new(path).exists() {
                std::fs::remove_file(path)?;
            }

            let listener = UnixListener::bind(path)?;
            tracing::debug!(path, "Listening");

            Ok(Self {
                listener,
                path: path.to_string(),
            })
        }

        /// Accept one connection.
        pub async fn accept(&self) -> Result<PipeStream> {
            let (stream, _addr) = self.listener.accept().await?;
            Ok(PipeStream { stream })
        }

        /// Get the socket path.
        pub fn path(&self) -> &str {
            &self.path
        }
    }

    impl Drop for PipeListener {
        fn drop(&mut self) {
            let _ = std::fs::remove_file(&self.path);
        }
    }

    /// Connected Unix domain socket.
    pub struct PipeStream {
        pub(super) stream: UnixStream,
    }

    impl PipeStream {
        /// Connect to a listening socket.
        pub async fn connect(path: &str) -> Result<Self> {
            let stream = UnixStream::connect(path).await?;
            Ok(Self { stream })
        }

        /// Get a reference to the underlying socket.
        pub fn inner(&self) -> &UnixStream {
            &self.stream
        }
    }

    impl From<UnixStream> for PipeStream {
        fn from(stream: UnixStream) -> Self {
            Self { stream }
        }
    }
}

#[cfg(windows)]
mod windows_impl {
    use super::*;
    use tokio::net::windows::named_pipe::{
        ClientOptions, NamedPipeClient, NamedPipeServer, ServerOptions,
    };
    use tokio::sync::Mutex;

    /// Named pipe listener.
    ///
    /// Keeps one unconnected pipe instance ready so a client can connect
    /// between two `accept` calls.
    pub struct PipeListener {
        next: Mutex<NamedPipeServer>,
        path: String,
    }

    impl PipeListener {
        /// Create the first pipe instance.
        pub async fn bind(path: &str) -> Result<Self> {
            let first = ServerOptions::new().first_pipe_instance(true).create(path)?;
            tracing::debug!(path, "Listening");

            Ok(Self {
                next: Mutex::new(first),
                path: path.to_string(),
            })
        }

        /// Accept one connection.
        pub async fn accept(&self) -> Result<PipeStream> {
            let mut next = self.next.lock().await;
            next.connect().await?;

            let fresh = ServerOptions::new().create(&self.path)?;
            let connected = std::mem::replace(&mut *next, fresh);
            Ok(PipeStream {
                pipe: Pipe::Server(connected),
            })
        }

        /// Get the pipe path.
        pub fn path(&self) -> &str {
            &self.path
        }
    }

    pub(super) enum Pipe {
        Server(NamedPipeServer),
        Client(NamedPipeClient),
    }

    /// Connected named pipe, either end.
    pub struct PipeStream {
        pub(super) pipe: Pipe,
    }

    impl PipeStream {
        /// Connect to a listening pipe.
        pub async fn connect(path: &str) -> Result<Self> {
            let client = ClientOptions::new().open(path)?;
            Ok(Self {
                pipe: Pipe::Client(client),
            })
        }
    }
}

#[cfg(unix)]
pub use unix_impl::{PipeListener, PipeStream};

#[cfg(windows)]
pub use windows_impl::{PipeListener, PipeStream};

#[cfg(windows)]
use windows_impl::Pipe;

/// Forward an I/O call to whichever platform stream is inside.
macro_rules! forward {
    ($self:ident, $s:ident => $call:expr) => {{
        #[cfg(unix)]
        {
            let $s = Pin::new(&mut $self.get_mut().stream);
            $call
        }
        #[cfg(windows)]
        {
            match &mut $self.get_mut().pipe {
                Pipe::Server(p) => {
                    let $s = Pin::new(p);
                    $call
                }
                Pipe::Client(p) => {
                    let $s = Pin::new(p);
                    $call
                }
            }
        }
    }};
}

impl AsyncRead for PipeStream {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<std::io::Result<()>> {
        forward!(self, s => s.poll_read(cx, buf))
    }
}

impl AsyncWrite for PipeStream {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<std::io::Result<usize>> {
        forward!(self, s => s.poll_write(cx, buf))
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        forward!(self, s => s.poll_flush(cx))
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        forward!(self, s => s.poll_shutdown(cx))
    }
}
