//! The outgoing side of an exchange.
//!
//! A [`Response`] is created by the connection in lock-step with every request and handed to
//! application code. It owns the response state machine: status, header buffer, framing choice
//! and the payload encoder. Serialized bytes are not written to the socket directly; they are
//! sent back to the connection as [`ResponseEvent`]s tagged with the response id, and the
//! connection writes them in request order.

use std::fmt;

use bytes::{Bytes, BytesMut};
use http::header::{CONNECTION, CONTENT_LENGTH, DATE, TRAILER, TRANSFER_ENCODING};
use http::{HeaderMap, HeaderName, HeaderValue, Method, StatusCode};
use tokio::sync::{mpsc, oneshot};
use tokio_util::codec::Encoder;
use tracing::{debug, trace, warn};

use crate::codec::ResponseEncoder;
use crate::ensure;
use crate::protocol::headers::{contains_token, is_chunked};
use crate::protocol::timeout_hook::TimeoutHook;
use crate::protocol::{Message, OutgoingMessage, PayloadItem, RequestHead, SendError};

const CONTINUE: &[u8] = b"HTTP/1.1 100 Continue\r\n\r\n";
const PROCESSING: &[u8] = b"HTTP/1.1 102 Processing\r\n\r\n";

/// Status line and header block of a response, as handed to the [`ResponseEncoder`].
#[derive(Debug, Clone)]
pub struct ResponseHead {
    status_code: u16,
    reason: String,
    headers: HeaderMap,
}

impl ResponseHead {
    pub fn new(status_code: u16, reason: String, headers: HeaderMap) -> Self {
        Self { status_code, reason, headers }
    }

    pub fn status_code(&self) -> u16 {
        self.status_code
    }

    pub fn reason(&self) -> &str {
        &self.reason
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    pub fn into_headers(self) -> HeaderMap {
        self.headers
    }
}

/// How the body of a response is delimited on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BodyFraming {
    /// `Content-Length` framing
    Length(u64),
    /// `Transfer-Encoding: chunked`
    Chunked,
    /// Body bytes are written as-is; unless the application declared its own framing, the end
    /// of the body is signaled by closing the connection.
    CloseDelimited,
    /// The response must not carry a body (HEAD, 1xx, 204, 304)
    NoBody,
}

/// What a [`Response`] reports back to its connection.
#[derive(Debug)]
pub(crate) enum ResponseEvent {
    /// Serialized bytes, in order, for the response `id`
    Data { id: u64, bytes: Bytes },
    /// The response is complete; `last` asks the connection to close once it is flushed
    Finish { id: u64, last: bool },
}

pub(crate) type ResponseSender = mpsc::UnboundedSender<ResponseEvent>;

/// Resolved by the connection once every byte of a finished response reached the socket.
pub(crate) type FlushedSender = oneshot::Sender<Result<(), SendError>>;

/// The response paired with one request.
///
/// Either call [`Response::write_head`] explicitly or let the first [`Response::write`] /
/// [`Response::end`] send an implicit head built from the current status and header buffer.
/// Responses may be ended in any order; the connection puts them on the wire in the order their
/// requests arrived.
///
/// Dropping a response without calling [`Response::end`] finishes it automatically, with status
/// 500 if the head was never sent.
pub struct Response {
    id: u64,
    events: ResponseSender,

    status_code: u16,
    status_message: Option<String>,
    headers: HeaderMap,
    trailers: Option<HeaderMap>,

    headers_sent: bool,
    finished: bool,
    has_body: bool,
    chunked_by_default: bool,
    should_keep_alive: bool,
    expect_continue: bool,
    sent_100: bool,
    last: bool,
    send_date: bool,

    encoder: ResponseEncoder,
    corked: usize,
    cork_buffer: BytesMut,

    timeout: TimeoutHook,
    flushed: Option<oneshot::Receiver<Result<(), SendError>>>,
}

impl Response {
    pub(crate) fn new(
        id: u64,
        request: &RequestHead,
        events: ResponseSender,
        flushed: oneshot::Receiver<Result<(), SendError>>,
        timeout: TimeoutHook,
    ) -> Self {
        // HTTP/1.0 clients only understand chunked bodies when they say so
        let chunked_by_default =
            request.is_http_11() || request.headers().get_str("te").is_some_and(|te| contains_token(te.as_bytes(), "chunked"));

        Self {
            id,
            events,
            status_code: StatusCode::OK.as_u16(),
            status_message: None,
            headers: HeaderMap::new(),
            trailers: None,
            headers_sent: false,
            finished: false,
            has_body: *request.method() != Method::HEAD,
            chunked_by_default,
            should_keep_alive: request.should_keep_alive(),
            expect_continue: false,
            sent_100: false,
            last: false,
            send_date: true,
            encoder: ResponseEncoder::new(),
            corked: 0,
            cork_buffer: BytesMut::new(),
            timeout,
            flushed: Some(flushed),
        }
    }

    pub(crate) fn set_expect_continue(&mut self) {
        self.expect_continue = true;
    }

    pub fn status_code(&self) -> u16 {
        self.status_code
    }

    /// Sets the status used by the implicit head, validated when the head is sent.
    pub fn set_status_code(&mut self, status_code: u16) {
        self.status_code = status_code;
    }

    pub fn status_message(&self) -> Option<&str> {
        self.status_message.as_deref()
    }

    pub fn set_status_message<S: Into<String>>(&mut self, message: S) {
        self.status_message = Some(message.into());
    }

    pub fn send_date(&self) -> bool {
        self.send_date
    }

    /// Controls whether a `Date` header is added when the application did not set one.
    pub fn set_send_date(&mut self, send_date: bool) {
        self.send_date = send_date;
    }

    pub fn should_keep_alive(&self) -> bool {
        self.should_keep_alive
    }

    pub fn set_should_keep_alive(&mut self, keep_alive: bool) {
        self.should_keep_alive = keep_alive;
    }

    /// True once the connection will be closed after this response.
    pub fn is_last(&self) -> bool {
        self.last
    }

    pub fn is_finished(&self) -> bool {
        self.finished
    }

    /// True when the response is framed with `Transfer-Encoding: chunked`.
    pub fn is_chunked(&self) -> bool {
        self.encoder.is_chunked()
    }

    /// Sends the status line and the header block.
    ///
    /// `headers` are merged into the header buffer, replacing fields of the same name. The reason
    /// phrase defaults to the status message set earlier, then to the registered reason of the
    /// code, then to `"unknown"`.
    ///
    /// # Errors
    ///
    /// Nothing is written when an error is returned:
    /// - [`SendError::InvalidStatusCode`] unless `100 <= status_code <= 999`
    /// - [`SendError::HeadersAlreadySent`] if a status line was already serialized
    /// - [`SendError::InvalidHeaderChar`] / [`SendError::InvalidHeaderName`] for bad input
    pub fn write_head(&mut self, status_code: u16, reason: Option<&str>, headers: &[(&str, &str)]) -> Result<(), SendError> {
        ensure!(StatusCode::from_u16(status_code).is_ok(), SendError::InvalidStatusCode(status_code));
        ensure!(!self.headers_sent, SendError::HeadersAlreadySent);

        let reason = match reason {
            Some(reason) => reason.to_owned(),
            None => self.status_message.clone().unwrap_or_else(|| reason_phrase(status_code).unwrap_or("unknown").to_owned()),
        };
        ensure!(!has_invalid_char(reason.as_bytes()), SendError::invalid_header_char("statusMessage"));

        let fields = headers.iter().map(|(name, value)| parse_field(name, value)).collect::<Result<Vec<_>, _>>()?;
        for (name, _) in &fields {
            self.headers.remove(name);
        }
        for (name, value) in fields {
            self.headers.append(name, value);
        }

        self.store_head(status_code, reason, None)
    }

    /// Writes a chunk of the body, sending an implicit head first if needed.
    ///
    /// Data written to a response that must not carry a body is discarded.
    ///
    /// # Errors
    ///
    /// [`SendError::WriteAfterEnd`] once [`Response::end`] was called; the connection is not
    /// affected. An I/O error if the connection is gone.
    pub fn write<B: Into<Bytes>>(&mut self, chunk: B) -> Result<(), SendError> {
        if self.finished {
            warn!(id = self.id, "write after end");
            return Err(SendError::WriteAfterEnd);
        }

        if !self.headers_sent {
            self.implicit_head(None)?;
        }

        let chunk = chunk.into();
        if !self.has_body {
            debug!(id = self.id, status = self.status_code, "response must not have a body, write ignored");
            return Ok(());
        }
        if chunk.is_empty() {
            return Ok(());
        }

        let mut dst = BytesMut::with_capacity(chunk.len() + 16);
        self.encode_payload(PayloadItem::Chunk(chunk), &mut dst)?;
        self.push(dst.freeze())
    }

    /// Finishes the response, optionally with a last chunk of body data.
    ///
    /// Without an explicit head, `Content-Length` is computed from `body`. Calling `end` again
    /// is a no-op.
    pub fn end(&mut self, body: Option<Bytes>) -> Result<(), SendError> {
        if self.finished {
            return Ok(());
        }

        let body = body.filter(|body| !body.is_empty());
        if !self.headers_sent {
            let length = body.as_ref().map_or(0, |body| body.len() as u64);
            self.implicit_head(Some(length))?;
        }

        let mut dst = BytesMut::new();
        if self.has_body {
            if let Some(body) = body {
                self.encode_payload(PayloadItem::Chunk(body), &mut dst)?;
            }
            self.encode_payload(PayloadItem::Eof, &mut dst)?;

            // the peer would wait for the missing bytes and misread whatever follows
            if !self.encoder.is_finish() {
                debug!(id = self.id, "body shorter than its content-length, closing after this response");
                self.last = true;
            }
        }

        self.finished = true;
        self.cork_buffer.extend_from_slice(&dst);
        self.corked = 0;
        self.flush_cork()?;

        trace!(id = self.id, last = self.last, "response finished");
        self.send(ResponseEvent::Finish { id: self.id, last: self.last })
    }

    /// Sends the interim `100 Continue` response.
    pub fn write_continue(&mut self) -> Result<(), SendError> {
        self.sent_100 = true;
        self.push(Bytes::from_static(CONTINUE))
    }

    /// Sends the interim `102 Processing` response.
    pub fn write_processing(&mut self) -> Result<(), SendError> {
        self.push(Bytes::from_static(PROCESSING))
    }

    /// Trailer fields sent after the last chunk; ignored unless the body is chunked.
    pub fn add_trailers(&mut self, trailers: &[(&str, &str)]) -> Result<(), SendError> {
        let map = self.trailers.get_or_insert_with(HeaderMap::new);
        for (name, value) in trailers {
            let (name, value) = parse_field(name, value)?;
            map.append(name, value);
        }
        let trailers = map.clone();
        self.encoder.set_trailers(trailers);
        Ok(())
    }

    /// Observes the socket timeout while this response is attached to the connection.
    ///
    /// Registering an observer claims the timeout, the connection is left open.
    pub fn on_timeout<F>(&self, f: F)
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.timeout.set(f);
    }

    /// Waits until every byte of this response has been handed to the socket.
    ///
    /// # Errors
    ///
    /// [`SendError::InvalidBody`] if the response was not ended yet, an I/O error if the
    /// connection was destroyed first.
    pub async fn flushed(&mut self) -> Result<(), SendError> {
        ensure!(self.finished, SendError::invalid_body("flushed awaited before end"));
        match self.flushed.take() {
            Some(receiver) => receiver.await.unwrap_or_else(|_| Err(SendError::connection_closed())),
            None => Ok(()),
        }
    }

    fn implicit_head(&mut self, content_length: Option<u64>) -> Result<(), SendError> {
        ensure!(StatusCode::from_u16(self.status_code).is_ok(), SendError::InvalidStatusCode(self.status_code));
        let reason =
            self.status_message.clone().unwrap_or_else(|| reason_phrase(self.status_code).unwrap_or("unknown").to_owned());
        ensure!(!has_invalid_char(reason.as_bytes()), SendError::invalid_header_char("statusMessage"));
        self.store_head(self.status_code, reason, content_length)
    }

    fn store_head(&mut self, status_code: u16, reason: String, content_length: Option<u64>) -> Result<(), SendError> {
        self.status_code = status_code;
        self.status_message = Some(reason.clone());

        if status_code == 204 || status_code == 304 || (100..200).contains(&status_code) {
            self.has_body = false;
        }

        // the client may still send the body it was holding back
        if self.expect_continue && !self.sent_100 {
            self.should_keep_alive = false;
        }

        let framing = self.prepare_framing(content_length);

        let head = ResponseHead::new(status_code, reason, std::mem::take(&mut self.headers));
        let mut dst = BytesMut::new();
        let result = self.encoder.encode(Message::<_, Bytes>::Header((&head, framing)), &mut dst);
        self.headers = head.into_headers();
        result?;

        self.headers_sent = true;
        trace!(id = self.id, status = status_code, ?framing, last = self.last, "response head serialized");
        self.push(dst.freeze())
    }

    /// Adds the `Date`, `Connection` and framing headers the application did not set and picks the
    /// body framing.
    fn prepare_framing(&mut self, content_length: Option<u64>) -> BodyFraming {
        let user_length = self.headers.get(CONTENT_LENGTH).map(|value| parse_length(value.as_bytes()));
        let user_chunked = self.headers.get(TRANSFER_ENCODING).map(|value| is_chunked(value.as_bytes()));

        if self.send_date && !self.headers.contains_key(DATE) {
            if let Some(date) = http_date() {
                self.headers.insert(DATE, date);
            }
        }

        match self.headers.get(CONNECTION) {
            Some(value) if contains_token(value.as_bytes(), "close") => self.last = true,
            Some(_) => self.should_keep_alive = true,
            None => {
                if self.should_keep_alive && (user_length.is_some() || self.chunked_by_default) {
                    self.headers.insert(CONNECTION, HeaderValue::from_static("keep-alive"));
                } else {
                    self.last = true;
                    self.headers.insert(CONNECTION, HeaderValue::from_static("close"));
                }
            }
        }

        if !self.has_body {
            return BodyFraming::NoBody;
        }

        match (user_length, user_chunked) {
            (Some(Some(length)), _) => BodyFraming::Length(length),
            (_, Some(true)) => BodyFraming::Chunked,
            // framing declared by the application but not one we can encode
            (Some(None), _) | (_, Some(false)) => BodyFraming::CloseDelimited,
            (None, None) => {
                if !self.chunked_by_default {
                    self.last = true;
                    BodyFraming::CloseDelimited
                } else if let (Some(length), false) = (content_length, self.headers.contains_key(TRAILER)) {
                    self.headers.insert(CONTENT_LENGTH, HeaderValue::from(length));
                    BodyFraming::Length(length)
                } else {
                    self.headers.insert(TRANSFER_ENCODING, HeaderValue::from_static("chunked"));
                    BodyFraming::Chunked
                }
            }
        }
    }

    fn encode_payload(&mut self, item: PayloadItem, dst: &mut BytesMut) -> Result<(), SendError> {
        self.encoder.encode(Message::<(&ResponseHead, BodyFraming)>::Payload(item), dst)
    }

    /// Queues bytes for the connection, or holds them while the response is corked.
    fn push(&mut self, bytes: Bytes) -> Result<(), SendError> {
        if self.corked > 0 {
            self.cork_buffer.extend_from_slice(&bytes);
            return Ok(());
        }
        self.flush_cork()?;
        self.send(ResponseEvent::Data { id: self.id, bytes })
    }

    fn flush_cork(&mut self) -> Result<(), SendError> {
        if self.cork_buffer.is_empty() {
            return Ok(());
        }
        let bytes = self.cork_buffer.split().freeze();
        self.send(ResponseEvent::Data { id: self.id, bytes })
    }

    fn send(&self, event: ResponseEvent) -> Result<(), SendError> {
        self.events.send(event).map_err(|_| SendError::connection_closed())
    }
}

impl OutgoingMessage for Response {
    fn set_header(&mut self, name: &str, value: &str) -> Result<(), SendError> {
        ensure!(!self.headers_sent, SendError::HeadersAlreadySent);
        let (name, value) = parse_field(name, value)?;
        self.headers.insert(name, value);
        Ok(())
    }

    fn append_header(&mut self, name: &str, value: &str) -> Result<(), SendError> {
        ensure!(!self.headers_sent, SendError::HeadersAlreadySent);
        let (name, value) = parse_field(name, value)?;
        self.headers.append(name, value);
        Ok(())
    }

    fn get_header(&self, name: &str) -> Option<&HeaderValue> {
        self.headers.get(name)
    }

    fn remove_header(&mut self, name: &str) -> Result<(), SendError> {
        ensure!(!self.headers_sent, SendError::HeadersAlreadySent);
        let name = HeaderName::from_bytes(name.as_bytes()).map_err(|_| SendError::invalid_header_name(name))?;
        self.headers.remove(name);
        Ok(())
    }

    fn has_header(&self, name: &str) -> bool {
        self.headers.contains_key(name)
    }

    fn headers_sent(&self) -> bool {
        self.headers_sent
    }

    fn write_raw(&mut self, bytes: Bytes) -> Result<(), SendError> {
        self.push(bytes)
    }

    fn cork(&mut self) {
        self.corked += 1;
    }

    fn uncork(&mut self) -> Result<(), SendError> {
        self.corked = self.corked.saturating_sub(1);
        if self.corked == 0 { self.flush_cork() } else { Ok(()) }
    }
}

impl Drop for Response {
    fn drop(&mut self) {
        if self.finished {
            return;
        }

        warn!(id = self.id, headers_sent = self.headers_sent, "response dropped without end, finishing it");
        if !self.headers_sent {
            self.status_code = StatusCode::INTERNAL_SERVER_ERROR.as_u16();
            self.status_message = None;
        }

        if let Err(e) = self.end(None) {
            debug!(id = self.id, cause = %e, "can't finish dropped response, closing the connection");
            let _ = self.events.send(ResponseEvent::Finish { id: self.id, last: true });
        }
    }
}

impl fmt::Debug for Response {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Response")
            .field("id", &self.id)
            .field("status_code", &self.status_code)
            .field("headers", &self.headers)
            .field("headers_sent", &self.headers_sent)
            .field("finished", &self.finished)
            .field("last", &self.last)
            .finish_non_exhaustive()
    }
}

fn parse_field(name: &str, value: &str) -> Result<(HeaderName, HeaderValue), SendError> {
    let name = HeaderName::from_bytes(name.as_bytes()).map_err(|_| SendError::invalid_header_name(name))?;
    let value = HeaderValue::from_bytes(value.as_bytes()).map_err(|_| SendError::invalid_header_char(format!("header \"{name}\"")))?;
    Ok((name, value))
}

/// Field values may hold tab, visible ASCII and obs-text.
fn has_invalid_char(value: &[u8]) -> bool {
    value.iter().any(|&b| !(b == b'\t' || (0x20..0x7f).contains(&b) || b >= 0x80))
}

fn parse_length(value: &[u8]) -> Option<u64> {
    std::str::from_utf8(value).ok()?.trim().parse().ok()
}

fn http_date() -> Option<HeaderValue> {
    let mut buf = faf_http_date::get_date_buff_no_key();
    faf_http_date::get_date_no_key(&mut buf);
    HeaderValue::from_bytes(&buf).ok()
}

/// Reason phrases sent when the application does not provide one.
fn reason_phrase(status_code: u16) -> Option<&'static str> {
    let reason = match status_code {
        100 => "Continue",
        101 => "Switching Protocols",
        102 => "Processing",
        103 => "Early Hints",
        200 => "OK",
        201 => "Created",
        202 => "Accepted",
        203 => "Non-Authoritative Information",
        204 => "No Content",
        205 => "Reset Content",
        206 => "Partial Content",
        207 => "Multi-Status",
        208 => "Already Reported",
        226 => "IM Used",
        300 => "Multiple Choices",
        301 => "Moved Permanently",
        302 => "Found",
        303 => "See Other",
        304 => "Not Modified",
        305 => "Use Proxy",
        307 => "Temporary Redirect",
        308 => "Permanent Redirect",
        400 => "Bad Request",
        401 => "Unauthorized",
        402 => "Payment Required",
        403 => "Forbidden",
        404 => "Not Found",
        405 => "Method Not Allowed",
        406 => "Not Acceptable",
        407 => "Proxy Authentication Required",
        408 => "Request Timeout",
        409 => "Conflict",
        410 => "Gone",
        411 => "Length Required",
        412 => "Precondition Failed",
        413 => "Payload Too Large",
        414 => "URI Too Long",
        415 => "Unsupported Media Type",
        416 => "Range Not Satisfiable",
        417 => "Expectation Failed",
        418 => "I'm a teapot",
        421 => "Misdirected Request",
        422 => "Unprocessable Entity",
        423 => "Locked",
        424 => "Failed Dependency",
        425 => "Unordered Collection",
        426 => "Upgrade Required",
        428 => "Precondition Required",
        429 => "Too Many Requests",
        431 => "Request Header Fields Too Large",
        451 => "Unavailable For Legal Reasons",
        500 => "Internal Server Error",
        501 => "Not Implemented",
        502 => "Bad Gateway",
        503 => "Service Unavailable",
        504 => "Gateway Timeout",
        505 => "HTTP Version Not Supported",
        506 => "Variant Also Negotiates",
        507 => "Insufficient Storage",
        508 => "Loop Detected",
        509 => "Bandwidth Limit Exceeded",
        510 => "Not Extended",
        511 => "Network Authentication Required",
        _ => return None,
    };
    Some(reason)
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::protocol::Headers;
    use http::Version;

    pub(crate) fn request_head(method: Method, version: Version, headers: &[(&str, &str)]) -> RequestHead {
        let mut folded = Headers::new();
        for (name, value) in headers {
            folded.add_line(name, value);
        }
        let keep_alive = match version {
            Version::HTTP_11 => !folded.get_str("connection").is_some_and(|v| contains_token(v.as_bytes(), "close")),
            _ => folded.get_str("connection").is_some_and(|v| contains_token(v.as_bytes(), "keep-alive")),
        };
        RequestHead {
            method,
            url: "/".to_string(),
            version,
            headers: folded,
            raw_headers: headers.iter().map(|(n, v)| ((*n).to_string(), (*v).to_string())).collect(),
            upgrade: false,
            keep_alive,
        }
    }

    fn response_for(head: &RequestHead) -> (Response, mpsc::UnboundedReceiver<ResponseEvent>) {
        let (events, receiver) = mpsc::unbounded_channel();
        let (_flushed_tx, flushed_rx) = oneshot::channel();
        (Response::new(0, head, events, flushed_rx, TimeoutHook::default()), receiver)
    }

    fn drain(receiver: &mut mpsc::UnboundedReceiver<ResponseEvent>) -> (String, Option<bool>) {
        let mut out = Vec::new();
        let mut finish = None;
        while let Ok(event) = receiver.try_recv() {
            match event {
                ResponseEvent::Data { bytes, .. } => out.extend_from_slice(&bytes),
                ResponseEvent::Finish { last, .. } => finish = Some(last),
            }
        }
        (String::from_utf8(out).unwrap(), finish)
    }

    fn get_11() -> RequestHead {
        request_head(Method::GET, Version::HTTP_11, &[("Host", "localhost")])
    }

    #[test]
    fn status_code_out_of_range() {
        let (mut response, mut receiver) = response_for(&get_11());

        assert!(matches!(response.write_head(1000, None, &[]), Err(SendError::InvalidStatusCode(1000))));
        assert!(matches!(response.write_head(99, None, &[]), Err(SendError::InvalidStatusCode(99))));
        assert!(!response.headers_sent());
        assert_eq!(drain(&mut receiver).0, "");

        response.end(None).unwrap();
    }

    #[test]
    fn write_head_twice() {
        let (mut response, _receiver) = response_for(&get_11());

        response.write_head(200, None, &[]).unwrap();
        assert!(matches!(response.write_head(200, None, &[]), Err(SendError::HeadersAlreadySent)));
        assert!(matches!(response.write_head(404, None, &[("x-a", "b")]), Err(SendError::HeadersAlreadySent)));
        assert!(matches!(response.set_header("x-late", "1"), Err(SendError::HeadersAlreadySent)));
    }

    #[test]
    fn invalid_reason_and_header() {
        let (mut response, mut receiver) = response_for(&get_11());

        assert!(matches!(response.write_head(200, Some("O\nK"), &[]), Err(SendError::InvalidHeaderChar { .. })));
        assert!(matches!(response.set_header("bad name", "v"), Err(SendError::InvalidHeaderName { .. })));
        assert!(matches!(response.set_header("x-ok", "a\r\nb"), Err(SendError::InvalidHeaderChar { .. })));
        assert_eq!(drain(&mut receiver).0, "");
    }

    #[test]
    fn unregistered_code_reason() {
        let (mut response, mut receiver) = response_for(&get_11());
        response.set_send_date(false);

        response.write_head(599, None, &[]).unwrap();
        response.end(None).unwrap();

        let (out, _) = drain(&mut receiver);
        assert!(out.starts_with("HTTP/1.1 599 unknown\r\n"));
    }

    #[test]
    fn registered_reasons() {
        for (code, reason) in [(425, "Unordered Collection"), (509, "Bandwidth Limit Exceeded"), (418, "I'm a teapot")] {
            let (mut response, mut receiver) = response_for(&get_11());
            response.set_send_date(false);

            response.write_head(code, None, &[]).unwrap();
            response.end(None).unwrap();

            let (out, _) = drain(&mut receiver);
            assert!(out.starts_with(&format!("HTTP/1.1 {code} {reason}\r\n")), "{out}");
        }
    }

    #[test]
    fn body_shorter_than_content_length_closes() {
        let (mut response, mut receiver) = response_for(&get_11());
        response.set_send_date(false);

        response.set_header("Content-Length", "10").unwrap();
        response.end(Some(Bytes::from_static(b"short"))).unwrap();

        assert!(response.is_last());
        let (out, finish) = drain(&mut receiver);
        assert!(out.ends_with("\r\n\r\nshort"));
        assert_eq!(finish, Some(true));
    }

    #[test]
    fn end_computes_content_length() {
        let (mut response, mut receiver) = response_for(&get_11());
        response.set_send_date(false);

        response.end(Some(Bytes::from_static(b"hello"))).unwrap();

        let (out, finish) = drain(&mut receiver);
        assert_eq!(out, "HTTP/1.1 200 OK\r\nConnection: keep-alive\r\nContent-Length: 5\r\n\r\nhello");
        assert_eq!(finish, Some(false));
    }

    #[test]
    fn end_is_idempotent() {
        let (mut response, mut receiver) = response_for(&get_11());
        response.set_send_date(false);

        response.end(Some(Bytes::from_static(b"a"))).unwrap();
        let (first, finish) = drain(&mut receiver);
        assert!(finish.is_some());

        response.end(Some(Bytes::from_static(b"b"))).unwrap();
        assert_eq!(drain(&mut receiver), (String::new(), None));
        assert!(first.ends_with("\r\n\r\na"));
    }

    #[test]
    fn write_then_end_is_chunked() {
        let (mut response, mut receiver) = response_for(&get_11());
        response.set_send_date(false);

        response.write(Bytes::from_static(b"hello world, this is chunked")).unwrap();
        response.end(None).unwrap();
        assert!(matches!(response.write("more"), Err(SendError::WriteAfterEnd)));

        let (out, _) = drain(&mut receiver);
        assert_eq!(
            out,
            "HTTP/1.1 200 OK\r\nConnection: keep-alive\r\nTransfer-Encoding: chunked\r\n\r\n1c\r\nhello world, this is chunked\r\n0\r\n\r\n"
        );
    }

    #[test]
    fn bodiless_status_codes() {
        for code in [204, 304, 101] {
            let (mut response, mut receiver) = response_for(&get_11());
            response.set_send_date(false);

            response.write_head(code, None, &[]).unwrap();
            response.write("ignored").unwrap();
            response.end(Some(Bytes::from_static(b"ignored too"))).unwrap();

            let (out, _) = drain(&mut receiver);
            assert!(out.ends_with("\r\n\r\n"), "{out}");
            assert!(!out.contains("ignored"));
            assert!(!out.contains("Content-Length"));
            assert!(!out.contains("Transfer-Encoding"));
        }
    }

    #[test]
    fn head_request_has_no_body() {
        let head = request_head(Method::HEAD, Version::HTTP_11, &[]);
        let (mut response, mut receiver) = response_for(&head);
        response.set_send_date(false);

        response.end(Some(Bytes::from_static(b"body"))).unwrap();

        let (out, _) = drain(&mut receiver);
        assert_eq!(out, "HTTP/1.1 200 OK\r\nConnection: keep-alive\r\n\r\n");
    }

    #[test]
    fn final_status_without_continue_disables_keep_alive() {
        let (mut response, mut receiver) = response_for(&get_11());
        response.set_send_date(false);
        response.set_expect_continue();

        response.write_head(413, None, &[]).unwrap();
        response.end(None).unwrap();

        assert!(!response.should_keep_alive());
        let (out, finish) = drain(&mut receiver);
        assert!(out.contains("Connection: close\r\n"));
        assert_eq!(finish, Some(true));
    }

    #[test]
    fn continue_keeps_connection_alive() {
        let (mut response, mut receiver) = response_for(&get_11());
        response.set_send_date(false);
        response.set_expect_continue();

        response.write_continue().unwrap();
        response.end(None).unwrap();

        let (out, finish) = drain(&mut receiver);
        assert!(out.starts_with("HTTP/1.1 100 Continue\r\n\r\nHTTP/1.1 200 OK\r\n"));
        assert_eq!(finish, Some(false));
    }

    #[test]
    fn http_10_without_length_closes() {
        let head = request_head(Method::GET, Version::HTTP_10, &[("Connection", "keep-alive")]);
        let (mut response, mut receiver) = response_for(&head);
        response.set_send_date(false);

        response.write("abc").unwrap();
        response.end(None).unwrap();

        let (out, finish) = drain(&mut receiver);
        assert_eq!(out, "HTTP/1.1 200 OK\r\nConnection: close\r\n\r\nabc");
        assert_eq!(finish, Some(true));
    }

    #[test]
    fn http_10_with_length_keeps_alive() {
        let head = request_head(Method::GET, Version::HTTP_10, &[("Connection", "keep-alive")]);
        let (mut response, mut receiver) = response_for(&head);
        response.set_send_date(false);

        response.set_header("Content-Length", "3").unwrap();
        response.end(Some(Bytes::from_static(b"abc"))).unwrap();

        let (out, finish) = drain(&mut receiver);
        assert!(out.contains("Connection: keep-alive\r\n"));
        assert!(out.ends_with("\r\n\r\nabc"));
        assert_eq!(finish, Some(false));
    }

    #[test]
    fn application_connection_close() {
        let (mut response, mut receiver) = response_for(&get_11());
        response.set_header("connection", "close").unwrap();
        response.end(None).unwrap();

        assert!(response.is_last());
        let (out, finish) = drain(&mut receiver);
        assert!(out.contains("Date: "));
        assert_eq!(finish, Some(true));
    }

    #[test]
    fn trailers_and_cork() {
        let (mut response, mut receiver) = response_for(&get_11());
        response.set_send_date(false);
        response.set_header("Trailer", "Content-MD5").unwrap();
        response.add_trailers(&[("Content-MD5", "7895bf4b8828b55ceaf47747b4bca667")]).unwrap();

        response.cork();
        response.write("hello").unwrap();
        assert!(receiver.try_recv().is_err());
        response.uncork().unwrap();
        assert!(receiver.try_recv().is_ok());

        response.end(None).unwrap();
        let (out, _) = drain(&mut receiver);
        assert!(out.ends_with("0\r\nContent-Md5: 7895bf4b8828b55ceaf47747b4bca667\r\n\r\n"), "{out}");
    }

    #[test]
    fn dropped_response_is_finished_with_500() {
        let (response, mut receiver) = response_for(&get_11());
        drop(response);

        let (out, finish) = drain(&mut receiver);
        assert!(out.starts_with("HTTP/1.1 500 Internal Server Error\r\n"));
        assert_eq!(finish, Some(false));
    }

    #[test]
    fn writes_after_connection_closed_fail() {
        let (mut response, receiver) = response_for(&get_11());
        drop(receiver);

        assert!(matches!(response.write("data"), Err(SendError::Io { .. })));
    }
}
