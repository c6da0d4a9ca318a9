use crate::codec::body::PayloadEncoder;
use crate::codec::header::HeaderEncoder;
use crate::protocol::{BodyFraming, Message, ResponseHead, SendError};
use bytes::{Buf, BytesMut};
use http::HeaderMap;
use std::io;
use std::io::ErrorKind;
use tokio_util::codec::Encoder;
use tracing::error;

/// Encodes one response: a head message selecting the body framing, then payload items
/// framed accordingly, up to and including `PayloadItem::Eof`.
#[derive(Debug, Default)]
pub struct ResponseEncoder {
    header_encoder: HeaderEncoder,
    payload_encoder: Option<PayloadEncoder>,
    trailers: Option<HeaderMap>,
}

impl ResponseEncoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_chunked(&self) -> bool {
        self.payload_encoder.as_ref().is_some_and(PayloadEncoder::is_chunked)
    }

    /// True once the body was written in full: a `Content-Length` body ended early is not.
    pub fn is_finish(&self) -> bool {
        self.payload_encoder.as_ref().is_some_and(PayloadEncoder::is_finish)
    }

    /// Trailer fields written after the last chunk of a chunked body.
    ///
    /// May be set before or after the head; other framings ignore them.
    pub fn set_trailers(&mut self, trailers: HeaderMap) {
        match &mut self.payload_encoder {
            Some(encoder) => encoder.set_trailers(trailers),
            None => self.trailers = Some(trailers),
        }
    }
}

impl<D: Buf> Encoder<Message<(&ResponseHead, BodyFraming), D>> for ResponseEncoder {
    type Error = SendError;

    fn encode(&mut self, item: Message<(&ResponseHead, BodyFraming), D>, dst: &mut BytesMut) -> Result<(), Self::Error> {
        match item {
            Message::Header((head, framing)) => {
                if self.payload_encoder.is_some() {
                    error!("expect payload item but receive response head");
                    return Err(io::Error::from(ErrorKind::InvalidInput).into());
                }

                self.header_encoder.encode(head, dst)?;

                let mut payload_encoder = PayloadEncoder::from(framing);
                if let Some(trailers) = self.trailers.take() {
                    payload_encoder.set_trailers(trailers);
                }
                self.payload_encoder = Some(payload_encoder);
                Ok(())
            }

            Message::Payload(payload_item) => {
                let payload_encoder = if let Some(encoder) = &mut self.payload_encoder {
                    encoder
                } else {
                    error!("expect response header but receive payload item");
                    return Err(io::Error::from(ErrorKind::InvalidInput).into());
                };

                payload_encoder.encode(payload_item, dst)
            }
        }
    }
}
