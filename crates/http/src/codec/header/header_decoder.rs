//! HTTP header decoder implementation for parsing HTTP request heads
//!
//! The request line and header lines are tokenized by `httparse`. Every header line is then
//! folded into the canonical [`Headers`] map through [`add_header_line`], in wire order, and
//! kept verbatim in the raw header list.
//!
//! # Limits
//!
//! - Maximum number of header lines: configurable, 2000 by default
//! - Maximum size of the whole head: configurable, 80KB by default
//! - Only HTTP/1.0 and HTTP/1.1
//!
//! Up to 64 header lines are parsed into a stack array; larger heads fall back to a heap
//! allocated array bounded by the header line limit.

use bytes::{Buf, BytesMut};
use http::{Method, Version};
use httparse::{Error, Status};
use tokio_util::codec::Decoder;
use tracing::trace;

use crate::ensure;
use crate::protocol::headers::{contains_token, is_chunked};
use crate::protocol::{Headers, ParseError, PayloadSize, RequestHead, add_header_line};

/// Default maximum number of header lines in a request head
pub const DEFAULT_MAX_HEADER_PAIRS: usize = 2000;

/// Default maximum size in bytes of a request head
pub const DEFAULT_MAX_HEADER_BYTES: usize = 80 * 1024;

/// Number of header slots tried before falling back to the heap
const FAST_HEADER_NUM: usize = 64;

/// Decoder for HTTP request heads implementing the [`Decoder`] trait.
///
/// Produces the [`RequestHead`] together with the [`PayloadSize`] announced by its
/// `Content-Length` / `Transfer-Encoding` headers.
#[derive(Debug, Clone, Copy)]
pub struct HeaderDecoder {
    max_header_pairs: usize,
    max_header_bytes: usize,
}

impl Default for HeaderDecoder {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_HEADER_PAIRS, DEFAULT_MAX_HEADER_BYTES)
    }
}

impl HeaderDecoder {
    pub fn new(max_header_pairs: usize, max_header_bytes: usize) -> Self {
        Self { max_header_pairs, max_header_bytes }
    }

    /// Parses the head at the start of `src` without consuming it.
    ///
    /// Returns the head, its payload size and the number of bytes it spans.
    fn parse(&self, src: &[u8]) -> Result<Option<(RequestHead, PayloadSize, usize)>, ParseError> {
        let mut headers = [httparse::EMPTY_HEADER; FAST_HEADER_NUM];
        let mut req = httparse::Request::new(&mut headers);

        match req.parse(src) {
            Ok(status) => self.complete(&req, status, src.len()),
            Err(Error::TooManyHeaders) if self.max_header_pairs > FAST_HEADER_NUM => {
                trace!(limit = self.max_header_pairs, "head exceeds the stack header array, retrying on the heap");
                let mut headers = vec![httparse::EMPTY_HEADER; self.max_header_pairs];
                let mut req = httparse::Request::new(&mut headers);
                match req.parse(src) {
                    Ok(status) => self.complete(&req, status, src.len()),
                    Err(Error::TooManyHeaders) => Err(ParseError::too_many_headers(self.max_header_pairs)),
                    Err(e) => Err(ParseError::invalid_header(e)),
                }
            }
            Err(Error::TooManyHeaders) => Err(ParseError::too_many_headers(self.max_header_pairs)),
            Err(e) => Err(ParseError::invalid_header(e)),
        }
    }

    fn complete(
        &self,
        req: &httparse::Request<'_, '_>,
        status: Status<usize>,
        available: usize,
    ) -> Result<Option<(RequestHead, PayloadSize, usize)>, ParseError> {
        let body_offset = match status {
            Status::Complete(body_offset) => body_offset,
            Status::Partial => {
                ensure!(available <= self.max_header_bytes, ParseError::too_large_header(available, self.max_header_bytes));
                return Ok(None);
            }
        };

        trace!(head_size = body_offset, "parsed request head");
        ensure!(body_offset <= self.max_header_bytes, ParseError::too_large_header(body_offset, self.max_header_bytes));
        ensure!(req.headers.len() <= self.max_header_pairs, ParseError::too_many_headers(self.max_header_pairs));

        let version = match req.version {
            Some(0) => Version::HTTP_10,
            Some(1) => Version::HTTP_11,
            // HTTP/2 and HTTP/3 are not spoken over this transport
            v => return Err(ParseError::InvalidVersion(v)),
        };
        let method = req.method.ok_or(ParseError::InvalidMethod)?;
        let method = Method::from_bytes(method.as_bytes()).map_err(|_| ParseError::InvalidMethod)?;
        let url = req.path.ok_or(ParseError::InvalidUri)?.to_owned();

        let mut headers = Headers::with_capacity(req.headers.len());
        let mut raw_headers = Vec::with_capacity(req.headers.len());
        for header in req.headers.iter() {
            let value = latin1(header.value);
            add_header_line(header.name, &value, &mut headers);
            raw_headers.push((header.name.to_owned(), value));
        }

        let connection = headers.get_str("connection").map(str::as_bytes);
        let keep_alive = match version {
            Version::HTTP_11 => !connection.is_some_and(|value| contains_token(value, "close")),
            _ => connection.is_some_and(|value| contains_token(value, "keep-alive")),
        };
        let upgrade = method == Method::CONNECT
            || (headers.contains("upgrade") && connection.is_some_and(|value| contains_token(value, "upgrade")));

        let payload_size = parse_payload(&headers, &raw_headers)?;

        let head = RequestHead { method, url, version, headers, raw_headers, upgrade, keep_alive };
        Ok(Some((head, payload_size, body_offset)))
    }
}

impl Decoder for HeaderDecoder {
    type Item = (RequestHead, PayloadSize);
    type Error = ParseError;

    /// Attempts to decode a request head from the provided bytes buffer.
    ///
    /// # Returns
    ///
    /// - `Ok(Some((head, payload_size)))` if a complete head was parsed, the head bytes are consumed
    /// - `Ok(None)` if more data is needed
    /// - `Err(ParseError)` if the head is malformed or exceeds a limit
    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        if src.is_empty() {
            return Ok(None);
        }

        match self.parse(src)? {
            Some((head, payload_size, body_offset)) => {
                src.advance(body_offset);
                Ok(Some((head, payload_size)))
            }
            None => Ok(None),
        }
    }
}

/// Header values are octets; bytes outside ASCII are taken as ISO-8859-1.
fn latin1(value: &[u8]) -> String {
    value.iter().map(|&b| char::from(b)).collect()
}

/// Determines the payload size from the framing headers.
///
/// refer: <https://www.rfc-editor.org/rfc/rfc9112.html#name-message-body-length>
///
/// # Errors
///
/// Returns `ParseError` if:
/// - Both Content-Length and Transfer-Encoding headers are present
/// - Transfer-Encoding does not end with `chunked`
/// - Content-Length value is invalid
/// - Content-Length is repeated with different values
fn parse_payload(headers: &Headers, raw_headers: &[(String, String)]) -> Result<PayloadSize, ParseError> {
    let te_header = headers.get_str("transfer-encoding");
    let cl_header = headers.get_str("content-length");

    // the folded map keeps one content-length, the raw lines tell whether the peer sent more
    let mut lengths = raw_headers.iter().filter(|(name, _)| name.eq_ignore_ascii_case("content-length")).map(|(_, value)| value.trim());
    if let Some(first) = lengths.next() {
        ensure!(lengths.all(|value| value == first), ParseError::invalid_content_length("conflicting content-length headers"));
    }

    match (te_header, cl_header) {
        (None, None) => Ok(PayloadSize::new_empty()),

        (Some(te_value), None) => {
            // a request body whose length can't be determined is unrecoverable
            ensure!(is_chunked(te_value.as_bytes()), ParseError::invalid_header(format!("unsupported transfer-encoding {te_value}")));
            Ok(PayloadSize::new_chunked())
        }

        (None, Some(cl_value)) => {
            let length = cl_value
                .trim()
                .parse::<u64>()
                .map_err(|_| ParseError::invalid_content_length(format!("value {cl_value} is not u64")))?;

            Ok(PayloadSize::new_length(length))
        }

        (Some(_), Some(_)) => Err(ParseError::invalid_content_length("transfer_encoding and content_length both present in headers")),
    }
}
