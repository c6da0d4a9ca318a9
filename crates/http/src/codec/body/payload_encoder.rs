use crate::codec::body::chunked_encoder::ChunkedEncoder;
use crate::codec::body::length_encoder::LengthEncoder;
use crate::protocol::{BodyFraming, PayloadItem, SendError};
use bytes::{Buf, BufMut, BytesMut};
use http::HeaderMap;

use tokio_util::codec::Encoder;

/// encode payload for response body
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PayloadEncoder {
    kind: Kind,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Kind {
    /// content-length payload
    Length(LengthEncoder),

    /// transfer-encoding chunked payload
    Chunked(ChunkedEncoder),

    /// payload delimited by closing the connection
    CloseDelimited { eof: bool },

    /// the response must not carry a body
    NoBody,
}

impl PayloadEncoder {
    pub fn empty() -> Self {
        Self { kind: Kind::NoBody }
    }

    pub fn chunked() -> Self {
        Self { kind: Kind::Chunked(ChunkedEncoder::new()) }
    }

    pub fn fix_length(size: u64) -> Self {
        Self { kind: Kind::Length(LengthEncoder::new(size)) }
    }

    pub fn close_delimited() -> Self {
        Self { kind: Kind::CloseDelimited { eof: false } }
    }

    pub fn is_chunked(&self) -> bool {
        matches!(self.kind, Kind::Chunked(_))
    }

    /// Trailers only exist for chunked bodies, other framings ignore them.
    pub fn set_trailers(&mut self, trailers: HeaderMap) {
        if let Kind::Chunked(encoder) = &mut self.kind {
            encoder.set_trailers(trailers);
        }
    }

    pub fn is_finish(&self) -> bool {
        match &self.kind {
            Kind::Length(encoder) => encoder.is_finish(),
            Kind::Chunked(encoder) => encoder.is_finish(),
            Kind::CloseDelimited { eof } => *eof,
            Kind::NoBody => true,
        }
    }
}

impl From<BodyFraming> for PayloadEncoder {
    fn from(framing: BodyFraming) -> Self {
        match framing {
            BodyFraming::Length(size) => PayloadEncoder::fix_length(size),
            BodyFraming::Chunked => PayloadEncoder::chunked(),
            BodyFraming::CloseDelimited => PayloadEncoder::close_delimited(),
            BodyFraming::NoBody => PayloadEncoder::empty(),
        }
    }
}

impl<D: Buf> Encoder<PayloadItem<D>> for PayloadEncoder {
    type Error = SendError;

    fn encode(&mut self, item: PayloadItem<D>, dst: &mut BytesMut) -> Result<(), Self::Error> {
        match &mut self.kind {
            Kind::Length(encoder) => encoder.encode(item, dst),
            Kind::Chunked(encoder) => encoder.encode(item, dst),
            Kind::CloseDelimited { eof } => {
                match item {
                    PayloadItem::Chunk(bytes) if !*eof => dst.put(bytes),
                    PayloadItem::Chunk(_) => {}
                    PayloadItem::Eof => *eof = true,
                }
                Ok(())
            }
            Kind::NoBody => Ok(()),
        }
    }
}
