//! Application hooks invoked by a connection.
//!
//! Implement [`Handler`] for full control, or wrap an async closure with [`make_handler`] when
//! only plain requests matter. Every hook except [`Handler::call`] has a default matching the
//! behavior of a server with no listener for that event.

use std::fmt;
use std::future::Future;

use async_trait::async_trait;
use bytes::Bytes;
use tracing::{debug, warn};

use crate::connection::{ConnectionId, Upgraded};
use crate::protocol::{HttpError, Request, RequestHead, Response};

/// How a connection reacts to a request it could not parse.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientErrorAction {
    /// Write a bare `400 Bad Request`, then close the connection
    BadRequest,
    /// Write these bytes as-is, then close the connection
    Reply(Bytes),
    /// Close the connection without writing anything
    Destroy,
}

#[async_trait]
pub trait Handler: Send + Sync + 'static {
    /// Handles one request. The response must be ended, or dropped, to let the next pipelined
    /// response through.
    async fn call(&self, req: Request, res: Response);

    /// Handles a HTTP/1.1 request carrying `Expect: 100-continue`.
    ///
    /// The default sends `100 Continue` and proceeds with [`Handler::call`]. Sending a final
    /// status without the interim response disables keep-alive for the connection.
    async fn check_continue(&self, req: Request, mut res: Response) {
        if let Err(e) = res.write_continue() {
            debug!(cause = %e, "can't send 100 continue");
        }
        self.call(req, res).await;
    }

    /// Handles a HTTP/1.1 request with an expectation other than `100-continue`.
    ///
    /// The default answers `417 Expectation Failed`.
    async fn check_expectation(&self, _req: Request, mut res: Response) {
        if let Err(e) = res.write_head(417, None, &[]).and_then(|()| res.end(None)) {
            debug!(cause = %e, "can't send 417 response");
        }
    }

    /// Takes over the connection after a request asking for a protocol upgrade.
    ///
    /// `socket` carries the raw halves and the bytes received after the request head. The
    /// default drops it, closing the connection.
    async fn upgrade(&self, head: RequestHead, socket: Upgraded) {
        debug!(url = head.url(), "no upgrade handler, closing the connection");
        drop(socket);
    }

    /// Takes over the connection after a `CONNECT` request, see [`Handler::upgrade`].
    async fn connect(&self, head: RequestHead, socket: Upgraded) {
        debug!(authority = head.url(), "no connect handler, closing the connection");
        drop(socket);
    }

    /// Decides what to write back for a malformed request.
    ///
    /// Transport errors are reported too, but the connection is destroyed whatever the answer.
    fn client_error(&self, error: &HttpError) -> ClientErrorAction {
        warn!(cause = %error, "client error");
        ClientErrorAction::BadRequest
    }

    /// Observes a connection timeout. Returning true claims it and keeps the connection open
    /// until the next I/O activity.
    fn timeout(&self, _connection: ConnectionId) -> bool {
        false
    }
}

/// A [`Handler`] built from an async closure.
pub struct HandlerFn<F> {
    f: F,
}

impl<F> fmt::Debug for HandlerFn<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HandlerFn").finish_non_exhaustive()
    }
}

#[async_trait]
impl<F, Fut> Handler for HandlerFn<F>
where
    F: Fn(Request, Response) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    async fn call(&self, req: Request, res: Response) {
        (self.f)(req, res).await;
    }
}

pub fn make_handler<F, Fut>(f: F) -> HandlerFn<F>
where
    F: Fn(Request, Response) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    HandlerFn { f }
}
