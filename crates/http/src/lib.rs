//! A minimal HTTP/1.1 server transport with pipelining.
//!
//! This crate sits directly on top of a byte stream: it decodes requests, hands each one to
//! application code together with a [`Response`](protocol::Response), and serializes the
//! responses back in request order, whatever order the application finishes them in.
//!
//! # Features
//!
//! - Pipelined requests with strictly ordered responses
//! - Streaming request bodies with backpressure, content-length or chunked
//! - Response framing decided from the status, the request and the headers set:
//!   `Content-Length`, chunked with trailers, or close-delimited
//! - Keep-alive, `Expect: 100-continue`, inactivity and keep-alive timeouts
//! - Socket hand-over for upgrades and `CONNECT`
//!
//! # Example
//!
//! ```no_run
//! use http_minimal::handler::make_handler;
//! use http_minimal::protocol::{Request, Response};
//! use http_minimal::server::create_server;
//! use tracing::error;
//!
//! #[tokio::main]
//! async fn main() {
//!     let server = create_server(make_handler(hello_world));
//!     let listener = match server.listen("127.0.0.1:8080").await {
//!         Ok(listener) => listener,
//!         Err(e) => {
//!             error!(cause = %e, "bind server error");
//!             return;
//!         }
//!     };
//!     listener.serve().await;
//! }
//!
//! async fn hello_world(mut request: Request, mut response: Response) {
//!     let body = request.body_bytes().await.unwrap_or_default();
//!     response.set_status_code(200);
//!     if let Err(e) = response.end(Some(format!("Hello World! ({} bytes received)\r\n", body.len()).into())) {
//!         error!(cause = %e, "can't send response");
//!     }
//! }
//! ```
//!
//! # Architecture
//!
//! - [`server`]: TCP listener, one connection task per socket
//! - [`connection`]: the per-connection state machine and response ordering
//! - [`protocol`]: request and response types, header aggregation, errors
//! - [`codec`]: request decoding and response encoding
//! - [`handler`]: the application hooks
//! - [`config`]: timeouts and limits

pub mod codec;
pub mod config;
pub mod connection;
pub mod handler;
pub mod protocol;
pub mod server;

mod utils;
pub(crate) use utils::ensure;
