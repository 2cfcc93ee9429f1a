//! Blocking facade over [`Client`] for synchronous callers.
//!
//! Each method parks the calling thread on a Tokio runtime handle until the
//! underlying async call completes. Any number of threads may share one
//! [`BlockingClient`] (it is `Clone`); their calls are still multiplexed over
//! the same connection.
//!
//! # Example
//!
//! ```ignore
//! let runtime = tokio::runtime::Runtime::new()?;
//! let client = runtime.block_on(async { Client::new(connect().await?) });
//! let client = BlockingClient::new(client, runtime.handle().clone());
//!
//! let sum: Reply<i64> = client.call("Arith.Add", &(2, 3))?;
//! ```

use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::runtime::Handle;

use crate::client::{Client, Reply};
use crate::codec::{Codec, MsgPackCodec};
use crate::error::Result;
use crate::pending::RawReply;

/// A [`Client`] driven from synchronous code.
///
/// # Panics
///
/// Every method panics if called from inside an asynchronous execution
/// context, as [`Handle::block_on`] does.
pub struct BlockingClient<C = MsgPackCodec> {
    client: Client<C>,
    handle: Handle,
}

impl<C> Clone for BlockingClient<C> {
    fn clone(&self) -> Self {
        Self {
            client: self.client.clone(),
            handle: self.handle.clone(),
        }
    }
}

impl<C: Codec> BlockingClient<C> {
    /// Wrap `client`, running its calls on the runtime behind `handle`.
    pub fn new(client: Client<C>, handle: Handle) -> Self {
        Self { client, handle }
    }

    /// Blocking version of [`Client::call`].
    pub fn call<A, R>(&self, service_method: &str, args: &A) -> Result<Reply<R>>
    where
        A: Serialize + ?Sized,
        R: DeserializeOwned,
    {
        self.handle.block_on(self.client.call(service_method, args))
    }

    /// Blocking version of [`Client::call_timeout`].
    pub fn call_timeout<A, R>(
        &self,
        service_method: &str,
        args: &A,
        timeout: Duration,
    ) -> Result<Reply<R>>
    where
        A: Serialize + ?Sized,
        R: DeserializeOwned,
    {
        self.handle
            .block_on(self.client.call_timeout(service_method, args, timeout))
    }

    /// Blocking version of [`Client::call_raw`].
    pub fn call_raw<A>(&self, service_method: &str, args: &A) -> Result<RawReply>
    where
        A: Serialize + ?Sized,
    {
        self.handle.block_on(self.client.call_raw(service_method, args))
    }

    /// Close the connection and wait for outstanding calls to fail.
    pub fn close(&self) {
        self.handle.block_on(self.client.close());
    }

    /// Check whether new calls are rejected.
    pub fn is_closed(&self) -> bool {
        self.client.is_closed()
    }

    /// Get the async client behind this facade.
    pub fn client(&self) -> &Client<C> {
        &self.client
    }
}
