use std::collections::VecDeque;
use std::fmt;
use std::future::{pending, poll_fn};
use std::io;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;

use bytes::{Buf, Bytes, BytesMut};
use futures::StreamExt;
use http::Method;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt, ReadBuf};
use tokio::select;
use tokio::sync::{mpsc, oneshot};
use tokio::time::{Instant, Sleep, sleep_until};
use tokio_util::codec::FramedRead;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, Span, debug, error, trace};

use crate::codec::RequestDecoder;
use crate::config::ServerConfig;
use crate::connection::pipeline::{Action, Pipeline, RequestSlot, ResponseSlot};
use crate::connection::{ConnectionId, Upgraded};
use crate::handler::{ClientErrorAction, Handler};
use crate::protocol::body::{BodySender, ReqBody};
use crate::protocol::headers::contains_token;
use crate::protocol::{
    FlushedSender, HttpError, Message, ParseError, PayloadItem, PayloadSize, Request, RequestHead, Response, ResponseEvent,
    ResponseSender, SendError, TimeoutHook,
};

const BAD_REQUEST: &[u8] = b"HTTP/1.1 400 Bad Request\r\n\r\n";

/// Where a connection is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// waiting for the next request head
    AcceptingHead,
    /// reading the body of the newest request
    StreamingBody,
    /// every received request is complete, some responses are not
    AwaitingResponse,
    /// flushing the last bytes before closing
    Closing,
    /// an upgrade or `CONNECT` request is pending, the socket is about to be handed over
    Upgraded,
}

type RequestFrame = Message<(RequestHead, PayloadSize)>;

/// Where decoded body chunks of the newest request go.
enum BodySink {
    None,
    /// `aborted` tells the body that the sender went away before the end of the body
    Forward { id: u64, sender: BodySender, aborted: CancellationToken, pending: Option<Result<Bytes, ParseError>> },
    Discard { id: u64 },
}

impl BodySink {
    fn id(&self) -> Option<u64> {
        match self {
            BodySink::None => None,
            BodySink::Forward { id, .. } | BodySink::Discard { id } => Some(*id),
        }
    }

    fn has_pending(&self) -> bool {
        matches!(self, BodySink::Forward { pending: Some(_), .. })
    }

    /// Resolves to false once the handler dropped the body.
    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<bool> {
        match self {
            BodySink::Forward { sender, .. } => sender.poll_ready(cx).map(|result| result.is_ok()),
            _ => Poll::Ready(false),
        }
    }

    /// Stops forwarding: whatever the handler did not receive yet is lost.
    fn discard(&mut self) {
        if let BodySink::Forward { id, aborted, .. } = self {
            aborted.cancel();
            *self = BodySink::Discard { id: *id };
        }
    }

    fn abort(&mut self) {
        if let BodySink::Forward { aborted, .. } = self {
            aborted.cancel();
        }
        *self = BodySink::None;
    }
}

/// Remembers when the socket last delivered bytes, so the inactivity timer can tell a slow
/// peer from an idle one while the decoder waits for a complete frame.
struct ReadActivity<R> {
    inner: R,
    last_read: Option<Instant>,
}

impl<R> ReadActivity<R> {
    fn new(inner: R) -> Self {
        Self { inner, last_read: None }
    }
}

impl<R: AsyncRead + Unpin> AsyncRead for ReadActivity<R> {
    fn poll_read(mut self: Pin<&mut Self>, cx: &mut Context<'_>, buf: &mut ReadBuf<'_>) -> Poll<io::Result<()>> {
        let before = buf.filled().len();
        let result = Pin::new(&mut self.inner).poll_read(cx, buf);
        if matches!(result, Poll::Ready(Ok(()))) && buf.filled().len() > before {
            self.last_read = Some(Instant::now());
        }
        result
    }
}

/// An HTTP/1.1 connection: one socket, one request decoder, and the pipeline of exchanges
/// running on it.
///
/// `HttpConnection` handles the full lifecycle of a connection:
/// - Reading and decoding pipelined requests, streaming their bodies with backpressure
/// - Dispatching each request with its paired [`Response`] to a spawned handler task
/// - Writing responses in request order whatever order they finish in
/// - Keep-alive, inactivity timeouts and half-closed peers
/// - Handing the socket over after an upgrade or `CONNECT` request
///
/// All connection state lives in the task running [`HttpConnection::process`]; handlers talk
/// back through an unbounded channel of response events.
///
/// # Type Parameters
///
/// * `R`: The async readable stream type
/// * `W`: The async writable stream type
pub struct HttpConnection<R, W> {
    id: ConnectionId,
    framed_read: FramedRead<ReadActivity<R>, RequestDecoder>,
    writer: W,
    config: ServerConfig,

    write_buf: BytesMut,

    pipeline: Pipeline,
    events_tx: ResponseSender,
    events_rx: mpsc::UnboundedReceiver<ResponseEvent>,
    body: BodySink,
    next_id: u64,
    upgrade: Option<RequestHead>,

    paused: bool,
    read_closed: bool,
    needs_flush: bool,
    closing: bool,
    destroyed: bool,
    close_error: Option<HttpError>,

    current_timeout: Duration,
    keep_alive_timeout_set: bool,
    timer: Option<Pin<Box<Sleep>>>,
    timer_armed: bool,

    /// total bytes appended to `write_buf` / written to the socket
    queued: u64,
    written: u64,
    flush_waiters: VecDeque<(u64, FlushedSender)>,
}

impl<R, W> HttpConnection<R, W>
where
    R: AsyncRead + Unpin + Send + 'static,
    W: AsyncWrite + Unpin + Send + 'static,
{
    pub fn new(reader: R, writer: W) -> Self {
        Self::with_config(reader, writer, ServerConfig::default(), ConnectionId::default())
    }

    pub fn with_config(reader: R, writer: W, config: ServerConfig, id: ConnectionId) -> Self {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        Self {
            id,
            framed_read: FramedRead::with_capacity(
                ReadActivity::new(reader),
                RequestDecoder::with_limits(config.max_header_pairs(), config.max_header_bytes()),
                config.read_buffer_size(),
            ),
            writer,
            write_buf: BytesMut::new(),
            pipeline: Pipeline::new(),
            events_tx,
            events_rx,
            body: BodySink::None,
            next_id: 0,
            upgrade: None,
            paused: false,
            read_closed: false,
            needs_flush: false,
            closing: false,
            destroyed: false,
            close_error: None,
            current_timeout: config.timeout(),
            keep_alive_timeout_set: false,
            timer: None,
            timer_armed: false,
            queued: 0,
            written: 0,
            flush_waiters: VecDeque::new(),
            config,
        }
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub fn state(&self) -> ConnectionState {
        if self.upgrade.is_some() {
            ConnectionState::Upgraded
        } else if self.closing || self.destroyed {
            ConnectionState::Closing
        } else if self.framed_read.decoder().in_body() {
            ConnectionState::StreamingBody
        } else if self.pipeline.len() > 0 {
            ConnectionState::AwaitingResponse
        } else {
            ConnectionState::AcceptingHead
        }
    }

    /// Runs the connection until it is closed or handed over.
    ///
    /// # Errors
    ///
    /// The parse error that made the connection answer `400`, or the transport error that
    /// destroyed it. A peer simply going away is not an error.
    pub async fn process<H>(mut self, handler: Arc<H>) -> Result<(), HttpError>
    where
        H: Handler + ?Sized,
    {
        self.touch();

        loop {
            if self.destroyed {
                return self.shutdown(false).await;
            }
            if self.closing && self.write_buf.is_empty() {
                return self.shutdown(true).await;
            }
            if self.pipeline.is_idle() && self.write_buf.is_empty() {
                if let Some(head) = self.upgrade.take() {
                    return self.hand_off(head, handler.as_ref()).await;
                }
            }

            select! {
                biased;

                Some(event) = self.events_rx.recv() => self.on_response_event(event),

                result = write_or_flush(&mut self.writer, &self.write_buf), if !self.write_buf.is_empty() || self.needs_flush => {
                    self.on_write(result, handler.as_ref());
                }

                open = poll_fn(|cx| self.body.poll_ready(cx)), if self.body.has_pending() => self.on_body_ready(open),

                frame = self.framed_read.next(), if self.can_read() => self.on_frame(frame, &handler),

                () = expired(&mut self.timer), if self.timer_armed => self.on_timeout(handler.as_ref()),
            }
        }
    }

    /// Decoding stops while paused, while a body chunk waits for the handler, and once an
    /// upgrade is pending so the bytes after its head stay buffered for the hand-over.
    fn can_read(&self) -> bool {
        !self.closing
            && !self.destroyed
            && !self.read_closed
            && self.upgrade.is_none()
            && !self.paused
            && !self.body.has_pending()
    }

    fn on_frame<H>(&mut self, frame: Option<Result<RequestFrame, ParseError>>, handler: &Arc<H>)
    where
        H: Handler + ?Sized,
    {
        match frame {
            Some(Ok(frame)) => {
                if self.keep_alive_timeout_set {
                    self.keep_alive_timeout_set = false;
                    self.current_timeout = self.config.timeout();
                }
                self.touch();

                match frame {
                    Message::Header((head, payload_size)) => self.on_head(head, payload_size, handler),
                    Message::Payload(PayloadItem::Chunk(bytes)) => self.on_body_chunk(bytes),
                    Message::Payload(PayloadItem::Eof) => self.on_body_end(),
                }
            }
            Some(Err(e)) => self.on_parse_error(e, handler.as_ref()),
            None => {
                trace!("peer closed its write side");
                self.read_closed = true;
                self.on_read_eof();
            }
        }
    }

    fn on_head<H>(&mut self, head: RequestHead, payload_size: PayloadSize, handler: &Arc<H>)
    where
        H: Handler + ?Sized,
    {
        if head.is_upgrade() {
            debug!(method = %head.method(), url = head.url(), "upgrade requested, handing the socket over once idle");
            self.upgrade = Some(head);
            return;
        }

        if !self.paused && self.outgoing_data() >= self.config.write_high_water_mark() {
            debug!(outgoing_data = self.outgoing_data(), "too much unflushed response data, pausing");
            self.paused = true;
        }

        let id = self.next_id;
        self.next_id += 1;

        let aborted = CancellationToken::new();
        let request_timeout = TimeoutHook::default();
        let response_timeout = TimeoutHook::default();
        let (flushed_tx, flushed_rx) = oneshot::channel();

        let body = if payload_size.is_empty() {
            ReqBody::empty()
        } else {
            let body_aborted = CancellationToken::new();
            let (sender, body) = ReqBody::channel(payload_size, self.config.body_channel_capacity(), body_aborted.clone());
            self.body = BodySink::Forward { id, sender, aborted: body_aborted, pending: None };
            body
        };

        let mut response = Response::new(id, &head, self.events_tx.clone(), flushed_rx, response_timeout.clone());
        self.pipeline.push(
            RequestSlot { id, aborted: aborted.clone(), timeout: request_timeout.clone(), complete: payload_size.is_empty() },
            ResponseSlot::new(id, flushed_tx, response_timeout),
        );

        // expectations only mean something to HTTP/1.1 servers
        let expect = head.expect().filter(|_| head.is_http_11()).map(|value| contains_token(value.as_bytes(), "100-continue"));
        if expect == Some(true) {
            response.set_expect_continue();
        }

        trace!(id, method = %head.method(), url = head.url(), ?payload_size, in_flight = self.pipeline.len(), "dispatching request");
        let request = Request::new(head, body, aborted, request_timeout);
        let handler = Arc::clone(handler);
        tokio::spawn(
            async move {
                match expect {
                    None => handler.call(request, response).await,
                    Some(true) => handler.check_continue(request, response).await,
                    Some(false) => handler.check_expectation(request, response).await,
                }
            }
            .instrument(Span::current()),
        );
    }

    fn on_body_chunk(&mut self, bytes: Bytes) {
        let disconnected = match &mut self.body {
            BodySink::Forward { sender, pending, .. } => match sender.try_send(Ok(bytes)) {
                Ok(()) => false,
                Err(e) if e.is_full() => {
                    *pending = Some(e.into_inner());
                    false
                }
                Err(_) => true,
            },
            BodySink::Discard { id } => {
                trace!(id, len = bytes.len(), "discarding request body");
                false
            }
            BodySink::None => false,
        };

        if disconnected {
            trace!("request body dropped by the handler, discarding the rest");
            self.body.discard();
        }
    }

    fn on_body_ready(&mut self, open: bool) {
        if let (true, BodySink::Forward { sender, pending, .. }) = (open, &mut self.body) {
            if let Some(item) = pending.take() {
                if sender.start_send(item).is_ok() {
                    return;
                }
            }
        }
        self.body.discard();
    }

    fn on_body_end(&mut self) {
        if let Some(id) = self.body.id() {
            if let Some(request) = self.pipeline.request_mut(id) {
                request.complete = true;
            }
        }
        // dropping the sender ends the body
        self.body = BodySink::None;
    }

    /// The decoder already turned a message cut short into an error, everything buffered was
    /// decoded.
    fn on_read_eof(&mut self) {
        if !self.config.allow_half_open() {
            let aborted = self.pipeline.abort();
            debug!(aborted, "peer closed, ending the connection");
            self.body.abort();
            self.closing = true;
        } else if self.pipeline.mark_last() {
            debug!(in_flight = self.pipeline.len(), "peer closed, closing after the last response");
        } else {
            self.closing = true;
        }
    }

    fn on_response_event(&mut self, event: ResponseEvent) {
        match event {
            ResponseEvent::Data { id, bytes } => {
                if let Some(bytes) = self.pipeline.on_data(id, bytes) {
                    self.queue_write(&bytes);
                }
            }
            ResponseEvent::Finish { id, last } => {
                let mut actions = Vec::new();
                self.pipeline.on_finish(id, last, &mut actions);
                for action in actions {
                    self.apply(action);
                }
            }
        }
        self.maybe_resume();
    }

    fn apply(&mut self, action: Action) {
        match action {
            Action::Write(bytes) => self.queue_write(&bytes),
            Action::Finished { request, flushed } => {
                if let Some(flushed) = flushed {
                    self.flush_waiters.push_back((self.queued, flushed));
                    self.resolve_flush_waiters();
                }
                if let Some(request) = request {
                    if !request.complete && self.body.id() == Some(request.id) {
                        trace!(id = request.id, "response finished before its request body, discarding the rest");
                        self.body.discard();
                    }
                }
            }
            Action::Close => {
                debug!("last response finished, closing the connection");
                self.closing = true;
            }
            Action::Idle => {
                let keep_alive_timeout = self.config.keep_alive_timeout();
                if !keep_alive_timeout.is_zero() {
                    self.current_timeout = keep_alive_timeout;
                    self.keep_alive_timeout_set = true;
                    self.touch();
                }
            }
        }
    }

    fn on_write<H>(&mut self, result: io::Result<Option<usize>>, handler: &H)
    where
        H: Handler + ?Sized,
    {
        match result {
            Ok(Some(0)) => {
                let e = io::Error::new(io::ErrorKind::WriteZero, "socket accepted no bytes");
                self.on_transport_error(SendError::io(e).into(), handler);
            }
            Ok(Some(n)) => {
                self.write_buf.advance(n);
                self.written += n as u64;
                self.needs_flush = true;
                trace!(written = n, remaining = self.write_buf.len(), "wrote response bytes");
                self.touch();
                self.resolve_flush_waiters();
                self.maybe_resume();
            }
            Ok(None) => self.needs_flush = false,
            Err(e) => self.on_transport_error(SendError::io(e).into(), handler),
        }
    }

    fn on_timeout<H>(&mut self, handler: &H)
    where
        H: Handler + ?Sized,
    {
        self.timer_armed = false;

        // bytes of a frame still being decoded count as activity too
        if let Some(last_read) = self.framed_read.get_ref().last_read {
            let deadline = last_read + self.current_timeout;
            if deadline > Instant::now() {
                if let Some(timer) = &mut self.timer {
                    timer.as_mut().reset(deadline);
                    self.timer_armed = true;
                }
                return;
            }
        }

        let request_claimed = self.pipeline.request_in_progress().is_some_and(|request| request.timeout.fire());
        let response_claimed = self.pipeline.attached_timeout().is_some_and(TimeoutHook::fire);
        let server_claimed = handler.timeout(self.id);

        if request_claimed || response_claimed || server_claimed {
            debug!(request_claimed, response_claimed, server_claimed, "timeout claimed, connection kept");
        } else {
            debug!(timeout = ?self.current_timeout, state = ?self.state(), "connection timed out");
            self.destroyed = true;
        }
    }

    fn on_parse_error<H>(&mut self, e: ParseError, handler: &H)
    where
        H: Handler + ?Sized,
    {
        if e.is_io() {
            return self.on_transport_error(e.into(), handler);
        }

        let error = HttpError::from(e);
        let action = handler.client_error(&error);
        debug!(cause = %error, ?action, state = ?self.state(), "can't parse request");

        self.pipeline.abort();
        self.body.abort();
        match action {
            ClientErrorAction::BadRequest => {
                self.queue_write(BAD_REQUEST);
                self.closing = true;
            }
            ClientErrorAction::Reply(bytes) => {
                self.queue_write(&bytes);
                self.closing = true;
            }
            ClientErrorAction::Destroy => self.destroyed = true,
        }
        self.close_error = Some(error);
    }

    fn on_transport_error<H>(&mut self, error: HttpError, handler: &H)
    where
        H: Handler + ?Sized,
    {
        error!(cause = %error, "connection failed");
        // the answer is irrelevant: the socket is gone
        let _ = handler.client_error(&error);
        self.close_error = Some(error);
        self.destroyed = true;
    }

    fn queue_write(&mut self, bytes: &[u8]) {
        self.write_buf.extend_from_slice(bytes);
        self.queued += bytes.len() as u64;
    }

    /// Response bytes produced but not handed to the socket yet.
    fn outgoing_data(&self) -> usize {
        self.write_buf.len() + self.pipeline.pending_bytes()
    }

    fn maybe_resume(&mut self) {
        if self.paused && self.outgoing_data() < self.config.write_high_water_mark() {
            debug!(outgoing_data = self.outgoing_data(), "response data drained, resuming");
            self.paused = false;
        }
    }

    fn resolve_flush_waiters(&mut self) {
        while self.flush_waiters.front().is_some_and(|(offset, _)| *offset <= self.written) {
            if let Some((_, flushed)) = self.flush_waiters.pop_front() {
                let _ = flushed.send(Ok(()));
            }
        }
    }

    /// Restarts the inactivity timer with the current timeout.
    fn touch(&mut self) {
        if self.current_timeout.is_zero() {
            self.timer_armed = false;
            return;
        }

        let deadline = Instant::now() + self.current_timeout;
        match &mut self.timer {
            Some(timer) => timer.as_mut().reset(deadline),
            None => self.timer = Some(Box::pin(sleep_until(deadline))),
        }
        self.timer_armed = true;
    }

    async fn shutdown(&mut self, graceful: bool) -> Result<(), HttpError> {
        if graceful {
            if let Err(e) = self.writer.flush().await {
                debug!(cause = %e, "can't flush before closing");
            }
            if let Err(e) = self.writer.shutdown().await {
                debug!(cause = %e, "can't shutdown the write side");
            }
        }

        let aborted = self.pipeline.abort();
        self.body.abort();
        for (_, flushed) in self.flush_waiters.drain(..) {
            let _ = flushed.send(Err(SendError::connection_closed()));
        }
        debug!(graceful, aborted, "connection closed");

        match self.close_error.take() {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    async fn hand_off<H>(mut self, head: RequestHead, handler: &H) -> Result<(), HttpError>
    where
        H: Handler + ?Sized,
    {
        self.writer.flush().await.map_err(SendError::io)?;

        let Self { framed_read, writer, .. } = self;
        let parts = framed_read.into_parts();
        let body_head = parts.read_buf.freeze();
        debug!(method = %head.method(), url = head.url(), body_head = body_head.len(), "handing the socket over");

        let socket = Upgraded::new(Box::new(parts.io.inner), Box::new(writer), body_head);
        if *head.method() == Method::CONNECT {
            handler.connect(head, socket).await;
        } else {
            handler.upgrade(head, socket).await;
        }
        Ok(())
    }
}

impl<R, W> fmt::Debug for HttpConnection<R, W> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HttpConnection")
            .field("id", &self.id)
            .field("in_flight", &self.pipeline.len())
            .field("buffered_read", &self.framed_read.read_buffer().len())
            .field("buffered_write", &self.write_buf.len())
            .field("paused", &self.paused)
            .field("closing", &self.closing)
            .finish_non_exhaustive()
    }
}

/// Writes some of `buf`, or flushes the writer once everything was written.
async fn write_or_flush<W>(writer: &mut W, buf: &[u8]) -> io::Result<Option<usize>>
where
    W: AsyncWrite + Unpin,
{
    if buf.is_empty() { writer.flush().await.map(|()| None) } else { writer.write(buf).await.map(Some) }
}

async fn expired(timer: &mut Option<Pin<Box<Sleep>>>) {
    match timer {
        Some(timer) => timer.as_mut().await,
        None => pending().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;
    use indoc::indoc;
    use tokio::io::{AsyncReadExt, DuplexStream, duplex, split};
    use tokio::sync::Notify;
    use tokio::task::JoinHandle;
    use tokio::time::sleep;

    use crate::handler::make_handler;

    type Task = JoinHandle<Result<(), HttpError>>;

    fn connect<H: Handler>(handler: H, config: ServerConfig, buffer: usize) -> (DuplexStream, Task) {
        let (client, server) = duplex(buffer);
        let (reader, writer) = split(server);
        let connection = HttpConnection::with_config(reader, writer, config, ConnectionId::new(7));
        (client, tokio::spawn(connection.process(Arc::new(handler))))
    }

    fn reply(res: &mut Response, body: &'static str) {
        res.set_send_date(false);
        res.end(Some(Bytes::from_static(body.as_bytes()))).unwrap();
    }

    async fn read_all(client: &mut DuplexStream) -> String {
        let mut received = String::new();
        client.read_to_string(&mut received).await.unwrap();
        received
    }

    async fn read_until(client: &mut DuplexStream, needle: &str) -> String {
        let mut received = Vec::new();
        let mut buf = [0u8; 256];
        while !String::from_utf8_lossy(&received).contains(needle) {
            let n = client.read(&mut buf).await.unwrap();
            assert_ne!(n, 0, "connection closed before {needle:?} arrived");
            received.extend_from_slice(&buf[..n]);
        }
        String::from_utf8(received).unwrap()
    }

    #[tokio::test(start_paused = true)]
    async fn pipelined_responses_keep_request_order() {
        let handler = make_handler(|req: Request, mut res: Response| async move {
            if req.url() == "/slow" {
                sleep(Duration::from_millis(50)).await;
                reply(&mut res, "slow");
            } else {
                reply(&mut res, "fast");
            }
        });
        let (mut client, task) = connect(handler, ServerConfig::default(), 4096);

        let requests = indoc! {"
            GET /slow HTTP/1.1\r
            Host: localhost\r
            \r
            GET /fast HTTP/1.1\r
            Host: localhost\r
            Connection: close\r
            \r
        "};
        client.write_all(requests.as_bytes()).await.unwrap();

        let received = read_all(&mut client).await;
        assert_eq!(
            received,
            "HTTP/1.1 200 OK\r\nConnection: keep-alive\r\nContent-Length: 4\r\n\r\nslow\
             HTTP/1.1 200 OK\r\nConnection: close\r\nContent-Length: 4\r\n\r\nfast"
        );
        assert!(task.await.unwrap().is_ok());
    }

    #[tokio::test]
    async fn request_body_is_streamed_to_the_handler() {
        let handler = make_handler(|mut req: Request, mut res: Response| async move {
            let body = req.body_bytes().await.unwrap();
            res.set_send_date(false);
            res.end(Some(body)).unwrap();
        });
        let (mut client, task) = connect(handler, ServerConfig::default(), 4096);

        client
            .write_all(b"POST /echo HTTP/1.1\r\nHost: localhost\r\nTransfer-Encoding: chunked\r\n\r\n5\r\nhello\r\n")
            .await
            .unwrap();
        client.write_all(b"6\r\n world\r\n0\r\n\r\n").await.unwrap();
        client.shutdown().await.unwrap();

        let received = read_all(&mut client).await;
        assert!(received.starts_with("HTTP/1.1 200 OK\r\n"));
        assert!(received.ends_with("\r\n\r\nhello world"));
        assert!(task.await.unwrap().is_ok());
    }

    #[tokio::test]
    async fn continue_is_sent_before_the_body() {
        let handler = make_handler(|mut req: Request, mut res: Response| async move {
            let body = req.body_bytes().await.unwrap();
            res.set_send_date(false);
            res.end(Some(body)).unwrap();
        });
        let (mut client, task) = connect(handler, ServerConfig::default(), 4096);

        client
            .write_all(b"PUT /upload HTTP/1.1\r\nHost: localhost\r\nExpect: 100-continue\r\nContent-Length: 5\r\n\r\n")
            .await
            .unwrap();
        let interim = read_until(&mut client, "\r\n\r\n").await;
        assert_eq!(interim, "HTTP/1.1 100 Continue\r\n\r\n");

        client.write_all(b"hello").await.unwrap();
        client.shutdown().await.unwrap();

        let received = read_all(&mut client).await;
        assert_eq!(received, "HTTP/1.1 200 OK\r\nConnection: keep-alive\r\nContent-Length: 5\r\n\r\nhello");
        assert!(task.await.unwrap().is_ok());
    }

    struct RejectUploads;

    #[async_trait]
    impl Handler for RejectUploads {
        async fn call(&self, _req: Request, mut res: Response) {
            reply(&mut res, "ok");
        }

        async fn check_continue(&self, _req: Request, mut res: Response) {
            res.set_status_code(413);
            reply(&mut res, "");
        }
    }

    #[tokio::test]
    async fn final_status_without_continue_closes_the_connection() {
        let (mut client, task) = connect(RejectUploads, ServerConfig::default(), 4096);

        // the body is never sent and the client keeps its side open
        client
            .write_all(b"PUT /upload HTTP/1.1\r\nHost: localhost\r\nExpect: 100-continue\r\nContent-Length: 5\r\n\r\n")
            .await
            .unwrap();

        let received = read_all(&mut client).await;
        assert_eq!(received, "HTTP/1.1 413 Payload Too Large\r\nConnection: close\r\nContent-Length: 0\r\n\r\n");
        assert!(task.await.unwrap().is_ok());
    }

    #[tokio::test]
    async fn unknown_expectation_gets_417() {
        let (mut client, task) = connect(RejectUploads, ServerConfig::default(), 4096);

        client
            .write_all(b"GET / HTTP/1.1\r\nHost: localhost\r\nExpect: the-unexpected\r\nConnection: close\r\n\r\n")
            .await
            .unwrap();

        let received = read_all(&mut client).await;
        assert!(received.starts_with("HTTP/1.1 417 Expectation Failed\r\n"));
        assert!(task.await.unwrap().is_ok());
    }

    #[tokio::test]
    async fn http_10_expectations_are_ignored() {
        let (mut client, task) = connect(RejectUploads, ServerConfig::default(), 4096);

        client.write_all(b"GET / HTTP/1.0\r\nExpect: 100-continue\r\n\r\n").await.unwrap();

        let received = read_all(&mut client).await;
        assert!(received.starts_with("HTTP/1.1 200 OK\r\n"));
        assert!(received.ends_with("\r\n\r\nok"));
        assert!(task.await.unwrap().is_ok());
    }

    #[derive(Default)]
    struct CountClientErrors {
        errors: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl Handler for CountClientErrors {
        async fn call(&self, _req: Request, mut res: Response) {
            reply(&mut res, "ok");
        }

        fn client_error(&self, _error: &HttpError) -> ClientErrorAction {
            self.errors.fetch_add(1, Ordering::SeqCst);
            ClientErrorAction::BadRequest
        }
    }

    #[tokio::test]
    async fn parse_error_answers_a_single_bad_request() {
        let handler = CountClientErrors::default();
        let errors = Arc::clone(&handler.errors);
        let (mut client, task) = connect(handler, ServerConfig::default(), 4096);

        client.write_all(b"NOT HTTP AT ALL\r\n\r\nGET / HTTP/1.1\r\n\r\n").await.unwrap();

        let received = read_all(&mut client).await;
        assert_eq!(received, "HTTP/1.1 400 Bad Request\r\n\r\n");
        assert_eq!(errors.load(Ordering::SeqCst), 1);
        assert!(matches!(task.await.unwrap(), Err(HttpError::RequestError { .. })));
    }

    #[tokio::test]
    async fn truncated_request_at_eof_is_a_client_error() {
        let handler = CountClientErrors::default();
        let errors = Arc::clone(&handler.errors);
        let (mut client, task) = connect(handler, ServerConfig::default(), 4096);

        client.write_all(b"GET / HTTP/1.1\r\nHost: loc").await.unwrap();
        client.shutdown().await.unwrap();

        let received = read_all(&mut client).await;
        assert_eq!(received, "HTTP/1.1 400 Bad Request\r\n\r\n");
        assert_eq!(errors.load(Ordering::SeqCst), 1);
        assert!(task.await.unwrap().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn reading_pauses_while_responses_pile_up() {
        let calls = Arc::new(AtomicUsize::new(0));
        let answered = Arc::new(Notify::new());

        let handler = {
            let calls = Arc::clone(&calls);
            let answered = Arc::clone(&answered);
            make_handler(move |_req: Request, mut res: Response| {
                let calls = Arc::clone(&calls);
                let answered = Arc::clone(&answered);
                async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    res.set_send_date(false);
                    res.end(Some(Bytes::from(vec![b'x'; 1024]))).unwrap();
                    answered.notify_one();
                }
            })
        };
        let config = ServerConfig::new().with_write_high_water_mark(256);
        // a tiny socket buffer the client does not drain
        let (mut client, task) = connect(handler, config, 64);

        client.write_all(b"GET /1 HTTP/1.1\r\nHost: localhost\r\n\r\n").await.unwrap();
        answered.notified().await;

        client
            .write_all(b"GET /2 HTTP/1.1\r\nHost: localhost\r\n\r\nGET /3 HTTP/1.1\r\nHost: localhost\r\nConnection: close\r\n\r\n")
            .await
            .unwrap();
        sleep(Duration::from_millis(100)).await;
        // the second head is dispatched, then decoding stops until the output drains
        assert_eq!(calls.load(Ordering::SeqCst), 2);

        let received = read_all(&mut client).await;
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert_eq!(received.matches("HTTP/1.1 200 OK\r\n").count(), 3);
        assert!(task.await.unwrap().is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn idle_connection_times_out() {
        let handler = make_handler(|_req: Request, mut res: Response| async move { reply(&mut res, "ok") });
        let config = ServerConfig::new().with_timeout(Duration::from_secs(3));
        let (mut client, task) = connect(handler, config, 4096);

        let start = Instant::now();
        assert_eq!(read_all(&mut client).await, "");
        assert!(start.elapsed() >= Duration::from_secs(3));
        assert!(task.await.unwrap().is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn keep_alive_timeout_applies_between_requests() {
        let handler = make_handler(|_req: Request, mut res: Response| async move { reply(&mut res, "ok") });
        let config =
            ServerConfig::new().with_timeout(Duration::from_secs(60)).with_keep_alive_timeout(Duration::from_millis(500));
        let (mut client, task) = connect(handler, config, 4096);

        client.write_all(b"GET / HTTP/1.1\r\nHost: localhost\r\n\r\n").await.unwrap();
        read_until(&mut client, "\r\n\r\nok").await;

        let start = Instant::now();
        assert_eq!(read_all(&mut client).await, "");
        let elapsed = start.elapsed();
        assert!(elapsed >= Duration::from_millis(500));
        assert!(elapsed < Duration::from_secs(60));
        assert!(task.await.unwrap().is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn claimed_timeout_keeps_the_connection() {
        let handler = make_handler(|_req: Request, mut res: Response| async move {
            let timed_out = Arc::new(Notify::new());
            let notify = Arc::clone(&timed_out);
            res.on_timeout(move || notify.notify_one());
            timed_out.notified().await;
            reply(&mut res, "late");
        });
        let config = ServerConfig::new().with_timeout(Duration::from_secs(1));
        let (mut client, task) = connect(handler, config, 4096);

        client.write_all(b"GET / HTTP/1.1\r\nHost: localhost\r\nConnection: close\r\n\r\n").await.unwrap();

        let received = read_all(&mut client).await;
        assert!(received.ends_with("\r\n\r\nlate"));
        assert!(task.await.unwrap().is_ok());
    }

    struct Echo;

    #[async_trait]
    impl Handler for Echo {
        async fn call(&self, _req: Request, mut res: Response) {
            reply(&mut res, "plain");
        }

        async fn upgrade(&self, head: RequestHead, socket: Upgraded) {
            assert_eq!(head.url(), "/chat");
            let (_reader, mut writer, body_head) = socket.into_parts();
            writer.write_all(b"HTTP/1.1 101 Switching Protocols\r\n\r\n").await.unwrap();
            writer.write_all(&body_head).await.unwrap();
            writer.shutdown().await.unwrap();
        }
    }

    #[tokio::test]
    async fn upgrade_hands_over_the_socket_with_early_bytes() {
        let (mut client, task) = connect(Echo, ServerConfig::default(), 4096);

        client
            .write_all(b"GET /chat HTTP/1.1\r\nHost: localhost\r\nConnection: Upgrade\r\nUpgrade: echo\r\n\r\nhello")
            .await
            .unwrap();

        let received = read_all(&mut client).await;
        assert_eq!(received, "HTTP/1.1 101 Switching Protocols\r\n\r\nhello");
        assert!(task.await.unwrap().is_ok());
    }

    #[tokio::test]
    async fn upgrade_without_hook_closes_the_socket() {
        let handler = make_handler(|_req: Request, mut res: Response| async move { reply(&mut res, "plain") });
        let (mut client, task) = connect(handler, ServerConfig::default(), 4096);

        client
            .write_all(b"GET /chat HTTP/1.1\r\nHost: localhost\r\nConnection: Upgrade\r\nUpgrade: echo\r\n\r\nhello")
            .await
            .unwrap();

        assert_eq!(read_all(&mut client).await, "");
        assert!(task.await.unwrap().is_ok());
    }

    struct Tunnel;

    #[async_trait]
    impl Handler for Tunnel {
        async fn call(&self, _req: Request, mut res: Response) {
            reply(&mut res, "plain");
        }

        async fn upgrade(&self, _head: RequestHead, _socket: Upgraded) {
            panic!("CONNECT must not reach the upgrade hook");
        }

        async fn connect(&self, head: RequestHead, socket: Upgraded) {
            assert_eq!(head.url(), "example.com:443");
            let (_reader, mut writer, body_head) = socket.into_parts();
            writer.write_all(b"HTTP/1.1 200 Connection Established\r\n\r\n").await.unwrap();
            writer.write_all(&body_head).await.unwrap();
            writer.shutdown().await.unwrap();
        }
    }

    #[tokio::test]
    async fn connect_hands_the_socket_to_the_connect_hook() {
        let (mut client, task) = connect(Tunnel, ServerConfig::default(), 4096);

        client.write_all(b"CONNECT example.com:443 HTTP/1.1\r\nHost: example.com:443\r\n\r\nping").await.unwrap();

        let received = read_all(&mut client).await;
        assert_eq!(received, "HTTP/1.1 200 Connection Established\r\n\r\nping");
        assert!(task.await.unwrap().is_ok());
    }

    #[derive(Default)]
    struct KeepIdle {
        timeouts: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl Handler for KeepIdle {
        async fn call(&self, _req: Request, mut res: Response) {
            reply(&mut res, "ok");
        }

        fn timeout(&self, connection: ConnectionId) -> bool {
            assert_eq!(connection, ConnectionId::new(7));
            self.timeouts.fetch_add(1, Ordering::SeqCst);
            true
        }
    }

    #[tokio::test(start_paused = true)]
    async fn handler_can_claim_a_connection_timeout() {
        let handler = KeepIdle::default();
        let timeouts = Arc::clone(&handler.timeouts);
        let config = ServerConfig::new().with_timeout(Duration::from_secs(1));
        let (mut client, task) = connect(handler, config, 4096);

        sleep(Duration::from_millis(2500)).await;
        // claimed once, then the timer waits for the next activity
        assert_eq!(timeouts.load(Ordering::SeqCst), 1);
        assert!(!task.is_finished());

        client.write_all(b"GET / HTTP/1.1\r\nHost: localhost\r\nConnection: close\r\n\r\n").await.unwrap();
        assert!(read_all(&mut client).await.ends_with("\r\n\r\nok"));
        assert!(task.await.unwrap().is_ok());
    }

    #[tokio::test]
    async fn processing_is_sent_before_the_final_response() {
        let handler = make_handler(|_req: Request, mut res: Response| async move {
            res.write_processing().unwrap();
            tokio::task::yield_now().await;
            reply(&mut res, "done");
        });
        let (mut client, task) = connect(handler, ServerConfig::default(), 4096);

        client.write_all(b"GET / HTTP/1.1\r\nHost: localhost\r\nConnection: close\r\n\r\n").await.unwrap();

        let received = read_all(&mut client).await;
        assert_eq!(
            received,
            "HTTP/1.1 102 Processing\r\n\r\nHTTP/1.1 200 OK\r\nConnection: close\r\nContent-Length: 4\r\n\r\ndone"
        );
        assert!(task.await.unwrap().is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn body_stuck_in_a_full_channel_is_aborted() {
        let (body_tx, body_rx) = oneshot::channel();
        let body_tx = Arc::new(std::sync::Mutex::new(Some(body_tx)));
        let handler = make_handler(move |mut req: Request, res: Response| {
            let body_tx = Arc::clone(&body_tx);
            async move {
                let _res = res;
                // a slow handler: the body channel fills up and the connection times out
                sleep(Duration::from_secs(10)).await;
                let body = req.body_bytes().await;
                if let Some(tx) = body_tx.lock().unwrap().take() {
                    tx.send(body).unwrap();
                }
            }
        });
        let config = ServerConfig::new().with_timeout(Duration::from_secs(1)).with_body_channel_capacity(1);
        let (mut client, task) = connect(handler, config, 64 * 1024);

        client.write_all(b"POST /upload HTTP/1.1\r\nHost: localhost\r\nContent-Length: 10000\r\n\r\n").await.unwrap();
        for _ in 0..5 {
            client.write_all(&[b'x'; 100]).await.unwrap();
            sleep(Duration::from_millis(10)).await;
        }

        assert_eq!(read_all(&mut client).await, "");
        assert!(task.await.unwrap().is_ok());
        assert!(matches!(body_rx.await.unwrap(), Err(ParseError::Aborted)));
    }

    #[tokio::test]
    async fn requests_are_aborted_when_the_peer_leaves() {
        let (aborted_tx, aborted_rx) = oneshot::channel();
        let aborted_tx = Arc::new(std::sync::Mutex::new(Some(aborted_tx)));
        let handler = make_handler(move |req: Request, res: Response| {
            let aborted_tx = Arc::clone(&aborted_tx);
            async move {
                // the response stays open until the connection goes away
                let _res = res;
                req.aborted().await;
                if let Some(tx) = aborted_tx.lock().unwrap().take() {
                    tx.send(req.is_aborted()).unwrap();
                }
            }
        });
        let config = ServerConfig::new().with_allow_half_open(false);
        let (mut client, task) = connect(handler, config, 4096);

        client.write_all(b"GET / HTTP/1.1\r\nHost: localhost\r\n\r\n").await.unwrap();
        client.shutdown().await.unwrap();

        assert!(aborted_rx.await.unwrap());
        assert_eq!(read_all(&mut client).await, "");
        assert!(task.await.unwrap().is_ok());
    }

    #[tokio::test]
    async fn half_closed_peer_still_gets_pending_responses() {
        let handler = make_handler(|_req: Request, mut res: Response| async move {
            tokio::task::yield_now().await;
            reply(&mut res, "ok");
        });
        let (mut client, task) = connect(handler, ServerConfig::default(), 4096);

        client.write_all(b"GET /a HTTP/1.1\r\nHost: localhost\r\n\r\nGET /b HTTP/1.1\r\nHost: localhost\r\n\r\n").await.unwrap();
        client.shutdown().await.unwrap();

        let received = read_all(&mut client).await;
        assert_eq!(received.matches("HTTP/1.1 200 OK\r\n").count(), 2);
        assert!(task.await.unwrap().is_ok());
    }

    #[tokio::test]
    async fn flushed_resolves_once_written() {
        let (flushed_tx, flushed_rx) = oneshot::channel();
        let flushed_tx = Arc::new(std::sync::Mutex::new(Some(flushed_tx)));
        let handler = make_handler(move |_req: Request, mut res: Response| {
            let flushed_tx = Arc::clone(&flushed_tx);
            async move {
                reply(&mut res, "ok");
                let flushed = res.flushed().await;
                if let Some(tx) = flushed_tx.lock().unwrap().take() {
                    tx.send(flushed.is_ok()).unwrap();
                }
            }
        });
        let (mut client, task) = connect(handler, ServerConfig::default(), 4096);

        client.write_all(b"GET / HTTP/1.1\r\nHost: localhost\r\nConnection: close\r\n\r\n").await.unwrap();

        assert!(flushed_rx.await.unwrap());
        assert!(read_all(&mut client).await.ends_with("ok"));
        assert!(task.await.unwrap().is_ok());
    }

    #[test]
    fn initial_state() {
        let (_client, server) = duplex(64);
        let (reader, writer) = split(server);
        let connection = HttpConnection::new(reader, writer);
        assert_eq!(connection.state(), ConnectionState::AcceptingHead);
        assert_eq!(connection.id(), ConnectionId::default());
    }
}
