//! HTTP request decoder module
//!
//! This module provides functionality for decoding HTTP requests using a streaming approach.
//! It handles both header parsing and payload decoding through a state machine pattern.
//!
//! # Components
//!
//! - [`RequestDecoder`]: Main decoder that coordinates header and payload parsing
//! - Header parsing: Uses [`HeaderDecoder`] for parsing request heads
//! - Payload handling: Uses [`PayloadDecoder`] for handling request bodies if any
//!
//! Pipelined requests are decoded back to back from the same buffer: the decoder consumes
//! exactly one message and leaves the bytes of the next one untouched.

use crate::codec::body::PayloadDecoder;
use crate::codec::header::HeaderDecoder;
use crate::protocol::{Message, ParseError, PayloadItem, PayloadSize, RequestHead};
use bytes::BytesMut;
use tokio_util::codec::Decoder;
use tracing::trace;

/// A decoder for HTTP requests that handles both heads and payload
///
/// The decoder operates in two phases:
/// 1. Head parsing: Decodes the request head using [`HeaderDecoder`]
/// 2. Payload parsing: If the head announced a body, decodes it using [`PayloadDecoder`]
///
/// # State Machine
///
/// The decoder maintains its state through the `payload_decoder` field:
/// - `None`: Currently parsing a head
/// - `Some(PayloadDecoder)`: Currently parsing payload
///
/// Requests without a body yield only a `Message::Header`.
#[derive(Debug, Default)]
pub struct RequestDecoder {
    header_decoder: HeaderDecoder,
    payload_decoder: Option<PayloadDecoder>,
}

impl RequestDecoder {
    /// Creates a new `RequestDecoder` instance with the default limits
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a decoder with custom head limits.
    pub fn with_limits(max_header_pairs: usize, max_header_bytes: usize) -> Self {
        Self { header_decoder: HeaderDecoder::new(max_header_pairs, max_header_bytes), payload_decoder: None }
    }

    /// True while the body of the last decoded head is still being read.
    pub fn in_body(&self) -> bool {
        self.payload_decoder.is_some()
    }
}

impl Decoder for RequestDecoder {
    type Item = Message<(RequestHead, PayloadSize)>;
    type Error = ParseError;

    /// Attempts to decode an HTTP request from the provided buffer
    ///
    /// # Returns
    ///
    /// - `Ok(Some(Message::Header(_)))`: Successfully decoded a request head
    /// - `Ok(Some(Message::Payload(_)))`: Successfully decoded a payload chunk or the end of the body
    /// - `Ok(None)`: Need more data to proceed
    /// - `Err(_)`: Encountered a parsing error
    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        // parse payload if have payload_decoder
        if let Some(payload_decoder) = &mut self.payload_decoder {
            let message = match payload_decoder.decode(src)? {
                Some(item @ PayloadItem::Chunk(_)) => Some(Message::Payload(item)),
                Some(item @ PayloadItem::Eof) => {
                    // no need payload decoder in this request now
                    self.payload_decoder.take();
                    Some(Message::Payload(item))
                }
                None => None,
            };

            return Ok(message);
        }

        // parse request
        let message = match self.header_decoder.decode(src)? {
            Some((header, payload_size)) => {
                if !payload_size.is_empty() {
                    self.payload_decoder = Some(payload_size.into());
                }
                trace!(method = %header.method(), url = header.url(), ?payload_size, "decoded request head");
                Some(Message::Header((header, payload_size)))
            }
            None => None,
        };

        Ok(message)
    }

    /// Called once the peer closed its side: a message cut short is an error.
    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        if let Some(message) = self.decode(src)? {
            return Ok(Some(message));
        }

        // blank lines between messages are tolerated
        if src.iter().all(|b| *b == b'\r' || *b == b'\n') {
            src.clear();
        }

        if self.payload_decoder.is_some() || !src.is_empty() {
            return Err(ParseError::Incomplete);
        }
        Ok(None)
    }
}
