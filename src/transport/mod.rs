//! Transport module - local duplex streams.
//!
//! The client and server accept any `AsyncRead + AsyncWrite` stream (TCP,
//! in-memory duplex, ...). This module adds a portable local transport:
//! - Unix domain sockets (Linux/macOS)
//! - Named pipes (Windows)

mod pipe;

pub use pipe::{generate_pipe_path, PipeListener, PipeStream};
