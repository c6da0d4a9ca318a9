//! Incoming request types.
//!
//! [`RequestHead`] is what the parser produces once the request line and all header lines have
//! been read. [`Request`] is what application code receives: the head plus the streaming body
//! and the signals tied to the connection the request arrived on.

use bytes::Bytes;
use http::{Method, Version};
use tokio_util::sync::{CancellationToken, WaitForCancellationFuture};

use crate::protocol::body::ReqBody;
use crate::protocol::timeout_hook::TimeoutHook;
use crate::protocol::{Headers, ParseError};

/// The parsed head of a request.
#[derive(Debug, Clone)]
pub struct RequestHead {
    pub(crate) method: Method,
    pub(crate) url: String,
    pub(crate) version: Version,
    pub(crate) headers: Headers,
    pub(crate) raw_headers: Vec<(String, String)>,
    pub(crate) upgrade: bool,
    pub(crate) keep_alive: bool,
}

impl RequestHead {
    pub fn method(&self) -> &Method {
        &self.method
    }

    /// The request target exactly as it appeared on the request line.
    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn version(&self) -> Version {
        self.version
    }

    /// Returns the `(major, minor)` pair of the request's HTTP version.
    pub fn http_version(&self) -> (u8, u8) {
        match self.version {
            Version::HTTP_09 => (0, 9),
            Version::HTTP_10 => (1, 0),
            Version::HTTP_2 => (2, 0),
            Version::HTTP_3 => (3, 0),
            _ => (1, 1),
        }
    }

    /// The canonical, aggregated header map.
    pub fn headers(&self) -> &Headers {
        &self.headers
    }

    /// Header lines in wire order, names with their original casing.
    pub fn raw_headers(&self) -> &[(String, String)] {
        &self.raw_headers
    }

    /// True for `CONNECT` requests and requests asking for a protocol upgrade.
    pub fn is_upgrade(&self) -> bool {
        self.upgrade
    }

    /// The parser's keep-alive hint for this request.
    pub fn should_keep_alive(&self) -> bool {
        self.keep_alive
    }

    pub(crate) fn is_http_11(&self) -> bool {
        self.version == Version::HTTP_11
    }

    /// The `Expect` header, if any.
    pub fn expect(&self) -> Option<&str> {
        self.headers.get_str("expect")
    }
}

/// A request delivered to application code.
#[derive(Debug)]
pub struct Request {
    head: RequestHead,
    body: ReqBody,
    aborted: CancellationToken,
    timeout: TimeoutHook,
}

impl Request {
    pub(crate) fn new(head: RequestHead, body: ReqBody, aborted: CancellationToken, timeout: TimeoutHook) -> Self {
        Self { head, body, aborted, timeout }
    }

    pub fn head(&self) -> &RequestHead {
        &self.head
    }

    pub fn method(&self) -> &Method {
        self.head.method()
    }

    pub fn url(&self) -> &str {
        self.head.url()
    }

    pub fn version(&self) -> Version {
        self.head.version()
    }

    pub fn headers(&self) -> &Headers {
        self.head.headers()
    }

    pub fn body_mut(&mut self) -> &mut ReqBody {
        &mut self.body
    }

    pub fn into_body(self) -> ReqBody {
        self.body
    }

    pub fn into_parts(self) -> (RequestHead, ReqBody) {
        (self.head, self.body)
    }

    /// Reads the whole body into memory.
    pub async fn body_bytes(&mut self) -> Result<Bytes, ParseError> {
        self.body.to_bytes().await
    }

    /// True once the connection closed before this request's response finished.
    pub fn is_aborted(&self) -> bool {
        self.aborted.is_cancelled()
    }

    /// Resolves when the connection closes before this request's response finished.
    pub fn aborted(&self) -> WaitForCancellationFuture<'_> {
        self.aborted.cancelled()
    }

    /// Observes the socket timeout while this request is still being received.
    ///
    /// Registering an observer claims the timeout: the connection is not destroyed, and the
    /// callback is expected to take action, e.g. by ending the response.
    pub fn on_timeout<F>(&self, f: F)
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.timeout.set(f);
    }
}
