//! # muxwire-client
//!
//! Multiplexed request/response RPC client over a single ordered byte stream.
//!
//! Many tasks (or threads, through [`BlockingClient`]) share one connection.
//! Each call gets a unique sequence number, the request is framed and
//! written, and the caller waits until the response carrying the same
//! sequence number comes back. Responses may arrive in any order.
//!
//! ## Architecture
//!
//! - **Writer task**: owns the write half, drains a bounded queue of frames
//! - **Reader task**: owns the read half, routes responses to waiting calls
//! - **Pending table**: sequence number -> waiting call, guarded together
//!   with the closed flag and the sequence counter by one lock
//!
//! ## Wire format
//!
//! ```text
//! +-------+------------+----------+-----------------+-----------------+
//! | flags | header_len | body_len | header          | body            |
//! |  u8   |   u32 BE   |  u32 BE  | (codec-encoded) | (codec-encoded) |
//! +-------+------------+----------+-----------------+-----------------+
//! ```
//!
//! ## Example
//!
//! ```ignore
//! use muxwire_client::Client;
//!
//! #[tokio::main]
//! async fn main() -> muxwire_client::Result<()> {
//!     let stream = muxwire_client::transport::PipeStream::connect("/tmp/kv.sock").await?;
//!     let client = Client::new(stream);
//!
//!     let reply = client.call::<_, Option<String>>("KV.Get", "answer").await?;
//!     match reply.error {
//!         None => println!("value: {:?}", reply.result),
//!         Some(e) => println!("server said: {}", e),
//!     }
//!
//!     client.close().await;
//!     Ok(())
//! }
//! ```

pub mod codec;
pub mod error;
pub mod protocol;
pub mod server;
pub mod transport;

mod blocking;
mod client;
mod pending;
mod shutdown;
mod writer;

pub use blocking::BlockingClient;
pub use client::{Client, ClientBuilder, Reply};
pub use error::{MuxwireError, Result};
pub use pending::{CallHandle, RawReply};
pub use server::{RequestContext, Server, ServerBuilder};
