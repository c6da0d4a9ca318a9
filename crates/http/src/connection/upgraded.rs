use std::fmt;

use bytes::Bytes;
use tokio::io::{AsyncRead, AsyncWrite};

/// The raw socket handed over after an upgrade or `CONNECT` request.
///
/// Once handed over, the connection no longer parses or writes anything: the new owner speaks
/// whatever protocol was negotiated. Dropping it closes the connection.
pub struct Upgraded {
    reader: Box<dyn AsyncRead + Send + Unpin>,
    writer: Box<dyn AsyncWrite + Send + Unpin>,
    body_head: Bytes,
}

impl Upgraded {
    pub(crate) fn new(reader: Box<dyn AsyncRead + Send + Unpin>, writer: Box<dyn AsyncWrite + Send + Unpin>, body_head: Bytes) -> Self {
        Self { reader, writer, body_head }
    }

    /// Bytes the peer sent after the request head, already read from the socket.
    pub fn body_head(&self) -> &Bytes {
        &self.body_head
    }

    pub fn into_parts(self) -> (Box<dyn AsyncRead + Send + Unpin>, Box<dyn AsyncWrite + Send + Unpin>, Bytes) {
        (self.reader, self.writer, self.body_head)
    }
}

impl fmt::Debug for Upgraded {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Upgraded").field("body_head", &self.body_head.len()).finish_non_exhaustive()
    }
}
