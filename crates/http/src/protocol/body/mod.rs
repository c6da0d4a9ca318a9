//! HTTP request body handling.
//!
//! The connection decodes body bytes and pushes them through a bounded channel; the request
//! handler pulls them out of [`ReqBody`], which implements `http_body::Body`.
//!
//! The channel bound is the backpressure: when the handler stops reading, the channel fills up
//! and the connection stops parsing (and so stops reading) until there is room again. When the
//! handler drops the body, or its response finishes first, the remaining bytes are discarded so
//! the next pipelined request can be parsed.

mod req_body;

pub use req_body::ReqBody;
pub(crate) use req_body::BodySender;
