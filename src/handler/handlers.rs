//! Handler trait and the built-in handlers.

use std::future::Future;
use std::pin::Pin;

use serde::Serialize;

use crate::error::Result;
use crate::protocol::Header;

/// Result type for handler functions.
pub type HandlerResult = Result<String>;

/// Boxed future for handler results.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// One request received by the server.
///
/// The argument is decoded into a `String`; richer argument types need
/// method resolution, which is left to the handler.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request {
    /// Header as sent by the client.
    pub header: Header,
    /// Decoded argument.
    pub argv: String,
}

/// Trait for request handlers.
///
/// The server calls a handler exactly once per request, on its own task,
/// and sends whatever it returns back under the request's sequence number.
pub trait Handler: Send + Sync + 'static {
    /// Produce a reply for the request, or an error for `Header.error`.
    fn call(&self, request: Request) -> BoxFuture<'static, HandlerResult>;
}

/// Wrapper that turns an async closure into a [`Handler`].
pub struct FnHandler<F> {
    handler: F,
}

/// Build a [`Handler`] from an async closure.
pub fn handler_fn<F, Fut>(handler: F) -> FnHandler<F>
where
    F: Fn(Request) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = HandlerResult> + Send + 'static,
{
    FnHandler { handler }
}

impl<F, Fut> Handler for FnHandler<F>
where
    F: Fn(Request) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = HandlerResult> + Send + 'static,
{
    fn call(&self, request: Request) -> BoxFuture<'static, HandlerResult> {
        Box::pin((self.handler)(request))
    }
}

/// Default handler: logs the request and replies `"rpcwire resp <seq>"`.
///
/// Stands in for method dispatch; it never fails and ignores
/// `service_method`.
#[derive(Debug, Clone, Copy, Default)]
pub struct PlaceholderHandler;

impl PlaceholderHandler {
    /// Reply produced for a given sequence number.
    pub fn reply_for(seq: u64) -> String {
        format!("rpcwire resp {}", seq)
    }
}

impl Handler for PlaceholderHandler {
    fn call(&self, request: Request) -> BoxFuture<'static, HandlerResult> {
        tracing::info!(
            service_method = %request.header.service_method,
            seq = request.header.seq,
            argv = %request.argv,
            "rpc server: request"
        );
        let reply = Self::reply_for(request.header.seq);
        Box::pin(async move { Ok(reply) })
    }
}

/// Placeholder body sent with every error response.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct InvalidRequest {}
