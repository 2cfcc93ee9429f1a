//! Service registry for dispatching requests by service method name.
//!
//! # Example
//!
//! ```ignore
//! use muxwire_client::server::{RequestContext, ServiceRegistry};
//!
//! let mut registry = ServiceRegistry::new();
//!
//! registry.register("Echo.Do", |text: String, ctx: RequestContext| async move {
//!     ctx.respond(&text).await
//! });
//! ```

use std::collections::HashMap;
use std::future::Future;
use std::marker::PhantomData;
use std::pin::Pin;

use serde::de::DeserializeOwned;

use super::RequestContext;
use crate::codec::{Codec, MsgPackCodec};
use crate::error::{MuxwireError, Result};

/// Result type for handler functions.
pub type HandlerResult = Result<()>;

/// Boxed future for handler results.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Trait for service handlers.
pub trait Handler<C>: Send + Sync + 'static {
    /// Handle a request with its codec-encoded argument bytes.
    fn call(&self, args: &[u8], ctx: RequestContext<C>) -> BoxFuture<'static, HandlerResult>;
}

/// Wrapper that decodes the arguments before calling the handler.
pub struct TypedHandler<F, T, Fut> {
    handler: F,
    _phantom: PhantomData<fn(T) -> Fut>,
}

impl<F, T, Fut> TypedHandler<F, T, Fut> {
    /// Create a new typed handler.
    pub fn new(handler: F) -> Self {
        Self {
            handler,
            _phantom: PhantomData,
        }
    }
}

impl<C, F, T, Fut> Handler<C> for TypedHandler<F, T, Fut>
where
    C: Codec,
    F: Fn(T, RequestContext<C>) -> Fut + Send + Sync + 'static,
    T: DeserializeOwned + Send + 'static,
    Fut: Future<Output = HandlerResult> + Send + 'static,
{
    fn call(&self, args: &[u8], ctx: RequestContext<C>) -> BoxFuture<'static, HandlerResult> {
        let parsed: T = match C::decode(args) {
            Ok(v) => v,
            Err(e) => {
                let e = MuxwireError::Protocol(format!(
                    "invalid arguments for {}: {}",
                    ctx.service_method(),
                    e
                ));
                return Box::pin(async move { Err(e) });
            }
        };

        Box::pin((self.handler)(parsed, ctx))
    }
}

/// Registry mapping service method names to handlers.
pub struct ServiceRegistry<C = MsgPackCodec> {
    methods: HashMap<String, Box<dyn Handler<C>>>,
}

impl<C: Codec> ServiceRegistry<C> {
    /// Create a new empty registry.
    pub fn new() -> Self {
        Self {
            methods: HashMap::new(),
        }
    }

    /// Register a handler for `service_method`, replacing any previous one.
    pub fn register<F, T, Fut>(&mut self, service_method: &str, handler: F)
    where
        F: Fn(T, RequestContext<C>) -> Fut + Send + Sync + 'static,
        T: DeserializeOwned + Send + 'static,
        Fut: Future<Output = HandlerResult> + Send + 'static,
    {
        let previous = self
            .methods
            .insert(service_method.to_string(), Box::new(TypedHandler::new(handler)));
        if previous.is_some() {
            tracing::warn!(service_method, "Replacing registered handler");
        }
    }

    /// Get a handler by service method name.
    pub fn get_handler(&self, service_method: &str) -> Option<&dyn Handler<C>> {
        self.methods.get(service_method).map(|h| h.as_ref())
    }

    /// Check whether a handler is registered for `service_method`.
    pub fn contains(&self, service_method: &str) -> bool {
        self.methods.contains_key(service_method)
    }

    /// Registered service method names, sorted.
    pub fn service_methods(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.methods.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    /// Dispatch a request to the handler registered for `service_method`.
    ///
    /// # Errors
    ///
    /// `UnknownServiceMethod` if no handler is registered. The context is
    /// dropped unanswered in that case.
    pub async fn dispatch(
        &self,
        service_method: &str,
        args: &[u8],
        ctx: RequestContext<C>,
    ) -> Result<()> {
        let handler = self
            .get_handler(service_method)
            .ok_or_else(|| MuxwireError::UnknownServiceMethod(service_method.to_string()))?;

        handler.call(args, ctx).await
    }
}

impl<C: Codec> Default for ServiceRegistry<C> {
    fn default() -> Self {
        Self::new()
    }
}
