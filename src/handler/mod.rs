//! Handler module - what the server runs for each request.
//!
//! Provides:
//! - [`Request`] - one decoded request, owned by the task processing it
//! - [`Handler`] - produces a reply or an error for a request
//! - [`PlaceholderHandler`] - the default, answers every request
//!
//! Resolving `service_method` to real service code is outside this crate;
//! anything that implements [`Handler`] can do it, and a "method not found"
//! outcome is just an `Err` travelling back in `Header.error`.
//!
//! # Example
//!
//! ```
//! use rpcwire::handler::{handler_fn, Request};
//!
//! let upper = handler_fn(|req: Request| async move { Ok::<_, rpcwire::RpcError>(req.argv.to_uppercase()) });
//! # let _ = upper;
//! ```

mod handlers;

pub use handlers::{
    handler_fn, BoxFuture, FnHandler, Handler, HandlerResult, InvalidRequest, PlaceholderHandler,
    Request,
};
