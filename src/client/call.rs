//! One submitted request and the way its outcome reaches the caller.

use serde::de::DeserializeOwned;
use tokio::sync::mpsc::UnboundedSender;

use crate::codec::Body;
use crate::error::{RpcError, Result};

/// A request submitted through [`Client::go`](super::Client::go), as handed
/// back on the completion channel.
///
/// Exactly one of `reply` and `error` is set once the call completes.
#[derive(Debug)]
pub struct Call<R> {
    /// Sequence number; 0 if the call was never registered.
    pub seq: u64,
    /// `"Service.Method"` the request was sent to.
    pub service_method: String,
    /// Decoded reply.
    pub reply: Option<R>,
    /// Why the call failed.
    pub error: Option<RpcError>,
}

impl<R> Call<R> {
    pub(crate) fn new(service_method: &str) -> Self {
        Self {
            seq: 0,
            service_method: service_method.to_string(),
            reply: None,
            error: None,
        }
    }

    /// Check if the call completed without error.
    #[inline]
    pub fn is_ok(&self) -> bool {
        self.error.is_none()
    }

    /// Convert into the reply or the error.
    pub fn into_result(self) -> Result<R> {
        if let Some(e) = self.error {
            return Err(e);
        }
        self.reply.ok_or_else(|| {
            RpcError::Protocol(format!("call {} completed without a reply", self.seq))
        })
    }
}

/// Type-erased pending call stored in the client's table.
///
/// The receive task only sees raw bodies; the typed side decodes them into
/// the caller's reply type.
pub(crate) trait Completion: Send {
    /// Record the outcome and signal the caller. Consumes the entry, so a
    /// call completes at most once.
    fn complete(self: Box<Self>, outcome: Result<Body>);
}

/// A [`Call`] together with the channel it is delivered on.
pub(crate) struct PendingCall<R> {
    pub(crate) call: Call<R>,
    done: UnboundedSender<Call<R>>,
}

impl<R> PendingCall<R> {
    pub(crate) fn new(service_method: &str, done: UnboundedSender<Call<R>>) -> Self {
        Self {
            call: Call::new(service_method),
            done,
        }
    }
}

impl<R: DeserializeOwned + Send + 'static> Completion for PendingCall<R> {
    fn complete(self: Box<Self>, outcome: Result<Body>) {
        let PendingCall { mut call, done } = *self;
        match outcome.and_then(|body| {
            body.decode::<R>()
                .map_err(|e| RpcError::ReadingBody(e.to_string()))
        }) {
            Ok(reply) => call.reply = Some(reply),
            Err(e) => call.error = Some(e),
        }

        // The receiver may be gone if the caller stopped waiting.
        if done.send(call).is_err() {
            tracing::debug!("rpc client: completion dropped, caller went away");
        }
    }
}
