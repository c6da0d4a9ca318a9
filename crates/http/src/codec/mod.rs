//! HTTP codec module for encoding and decoding HTTP messages
//!
//! This module provides functionality for streaming HTTP message processing,
//! including request decoding and response encoding. It uses a state machine
//! pattern to handle both heads and payload data.
//!
//! # Architecture
//!
//! - Request handling:
//!   - [`RequestDecoder`]: Decodes incoming HTTP requests, pipelined or not
//!   - Head parsing via [`HeaderDecoder`]
//!   - Payload decoding via [`PayloadDecoder`] (content-length or chunked)
//!
//! - Response handling:
//!   - [`ResponseEncoder`]: Encodes outgoing HTTP responses
//!   - Head encoding via [`HeaderEncoder`]
//!   - Payload encoding via [`PayloadEncoder`] (content-length, chunked, close-delimited)
//!
//! # Example
//!
//! ```
//! use bytes::BytesMut;
//! use http_minimal::codec::RequestDecoder;
//! use http_minimal::protocol::Message;
//! use tokio_util::codec::Decoder;
//!
//! let mut decoder = RequestDecoder::new();
//! let mut buffer = BytesMut::from(&b"GET / HTTP/1.1\r\nHost: localhost\r\n\r\n"[..]);
//! let message = decoder.decode(&mut buffer).unwrap();
//! assert!(matches!(message, Some(Message::Header(_))));
//! ```

mod body;
mod header;
mod request_decoder;
mod response_encoder;

pub use body::{ChunkedDecoder, ChunkedEncoder, LengthDecoder, LengthEncoder, PayloadDecoder, PayloadEncoder};
pub use header::{DEFAULT_MAX_HEADER_BYTES, DEFAULT_MAX_HEADER_PAIRS, HeaderDecoder, HeaderEncoder};
pub(crate) use header::title_case;
pub use request_decoder::RequestDecoder;
pub use response_encoder::ResponseEncoder;
