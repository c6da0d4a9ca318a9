//! Connection handling.
//!
//! - [`HttpConnection`]: drives one socket, decoding pipelined requests, dispatching them to a
//!   [`Handler`](crate::handler::Handler) and writing the responses back in request order
//! - [`Upgraded`]: the raw socket handed over after an upgrade or `CONNECT` request
//! - [`ConnectionId`]: identifies a connection in hooks and logs

use std::fmt;

mod http_connection;
pub(crate) mod pipeline;
mod upgraded;

pub use http_connection::{ConnectionState, HttpConnection};
pub use upgraded::Upgraded;

/// Identifies a connection accepted by a [`Listener`](crate::server::Listener).
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(u64);

impl ConnectionId {
    pub fn new(id: u64) -> Self {
        Self(id)
    }

    pub fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
