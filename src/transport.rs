//! The transport capability and the terminal stage that calls it.
//!
//! A [`Transport`] performs the actual network exchange. It receives the
//! call's [`Context`], so it sees the headers and parameters as rewritten by
//! every interceptor, and returns the raw response payload. Decoding happens
//! in the parsing stage above it.

use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use tracing::debug;

use crate::context::Context;
use crate::error::{Result, TransportError};
use crate::interceptor::{BoxFuture, Handler};
use crate::request::Request;
use crate::response::Response;

/// Performs the network exchange for one attempt.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Sends the request described by `ctx` and returns the raw payload.
    async fn execute(&self, ctx: &Context) -> Result<Bytes, TransportError>;

    /// Called when an attempt is abandoned before `execute` returned.
    fn cancel(&self, _request: &Request) {}
}

/// Notifies the transport if the attempt is dropped mid-flight.
struct CancelOnDrop {
    transport: Arc<dyn Transport>,
    request: Arc<Request>,
    armed: bool,
}

impl Drop for CancelOnDrop {
    fn drop(&mut self) {
        if self.armed {
            debug!(url = %self.request.url(), "transport call abandoned");
            self.transport.cancel(&self.request);
        }
    }
}

/// Builds the innermost handler of a chain: one transport call per invocation,
/// wrapped as an unparsed envelope.
pub fn terminal(transport: Arc<dyn Transport>) -> Handler {
    let handler: Handler = Arc::new(move |ctx: Context| -> BoxFuture<Result<Response>> {
        let transport = Arc::clone(&transport);
        Box::pin(async move {
            let request = Arc::clone(ctx.request());
            let mut guard = CancelOnDrop {
                transport: Arc::clone(&transport),
                request: Arc::clone(&request),
                armed: true,
            };
            let outcome = transport.execute(&ctx).await;
            guard.armed = false;
            Ok(Response::unparsed(request, outcome?))
        })
    });
    handler
}
