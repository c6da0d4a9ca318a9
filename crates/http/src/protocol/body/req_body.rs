use std::pin::Pin;
use std::task::{Context, Poll, ready};

use bytes::Bytes;
use futures::StreamExt;
use futures::channel::mpsc;
use http_body::{Body, Frame, SizeHint};
use http_body_util::BodyExt;
use tokio_util::sync::CancellationToken;

use crate::protocol::{ParseError, PayloadSize};

/// Producer half of a request body, owned by the connection.
pub(crate) type BodySender = mpsc::Sender<Result<Bytes, ParseError>>;

/// The body of an incoming request.
///
/// Yields data frames until the end of the body, or a [`ParseError`] if the body is malformed
/// or the connection went away before the body was complete ([`ParseError::Aborted`]).
#[derive(Debug)]
pub struct ReqBody {
    kind: Kind,
}

#[derive(Debug)]
enum Kind {
    Empty,
    Channel { receiver: mpsc::Receiver<Result<Bytes, ParseError>>, size: PayloadSize, aborted: CancellationToken, eof: bool },
}

impl ReqBody {
    /// A body without any data, used for requests that carry no payload.
    pub(crate) fn empty() -> Self {
        Self { kind: Kind::Empty }
    }

    /// Creates a body fed through a channel holding at most `capacity` pending chunks.
    ///
    /// Dropping the sender ends the body. The end is reported as [`ParseError::Aborted`] when
    /// `aborted` was cancelled first, or when fewer bytes than the announced length arrived.
    ///
    /// Only used for requests that do carry a payload, see [`ReqBody::empty`] otherwise.
    pub(crate) fn channel(size: PayloadSize, capacity: usize, aborted: CancellationToken) -> (BodySender, ReqBody) {
        let (sender, receiver) = mpsc::channel(capacity);
        (sender, ReqBody { kind: Kind::Channel { receiver, size, aborted, eof: false } })
    }

    /// Reads the whole remaining body into memory.
    pub async fn to_bytes(&mut self) -> Result<Bytes, ParseError> {
        Ok(self.collect().await?.to_bytes())
    }
}

impl Body for ReqBody {
    type Data = Bytes;
    type Error = ParseError;

    fn poll_frame(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Result<Frame<Self::Data>, Self::Error>>> {
        let this = self.get_mut();
        let Kind::Channel { receiver, size, aborted, eof } = &mut this.kind else {
            return Poll::Ready(None);
        };

        if *eof {
            return Poll::Ready(None);
        }

        match ready!(receiver.poll_next_unpin(cx)) {
            Some(Ok(bytes)) => {
                if let PayloadSize::Length(remaining) = size {
                    *remaining = remaining.saturating_sub(bytes.len() as u64);
                }
                Poll::Ready(Some(Ok(Frame::data(bytes))))
            }
            Some(Err(e)) => {
                *eof = true;
                Poll::Ready(Some(Err(e)))
            }
            None => {
                *eof = true;
                let truncated = matches!(size, PayloadSize::Length(remaining) if *remaining > 0);
                if aborted.is_cancelled() || truncated {
                    return Poll::Ready(Some(Err(ParseError::Aborted)));
                }
                Poll::Ready(None)
            }
        }
    }

    fn is_end_stream(&self) -> bool {
        match &self.kind {
            Kind::Empty => true,
            Kind::Channel { eof, .. } => *eof,
        }
    }

    fn size_hint(&self) -> SizeHint {
        match &self.kind {
            Kind::Empty => SizeHint::with_exact(0),
            Kind::Channel { eof: true, .. } => SizeHint::with_exact(0),
            Kind::Channel { size: PayloadSize::Length(remaining), .. } => SizeHint::with_exact(*remaining),
            Kind::Channel { .. } => SizeHint::default(),
        }
    }
}
