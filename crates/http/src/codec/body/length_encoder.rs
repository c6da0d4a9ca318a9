use crate::protocol::{PayloadItem, SendError};
use bytes::{Buf, BufMut, BytesMut};
use tokio_util::codec::Encoder;
use tracing::warn;

/// Writes body data as-is, never more than the announced `Content-Length`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LengthEncoder {
    length: u64,
}

impl LengthEncoder {
    pub fn new(length: u64) -> Self {
        Self { length }
    }

    pub fn is_finish(&self) -> bool {
        self.length == 0
    }
}

impl<D: Buf> Encoder<PayloadItem<D>> for LengthEncoder {
    type Error = SendError;

    fn encode(&mut self, item: PayloadItem<D>, dst: &mut BytesMut) -> Result<(), Self::Error> {
        match item {
            PayloadItem::Chunk(mut bytes) => {
                if !bytes.has_remaining() {
                    return Ok(());
                }

                if self.length == 0 {
                    warn!(dropped = bytes.remaining(), "body exceeds content-length, extra bytes dropped");
                    return Ok(());
                }

                let len = usize::try_from(self.length).unwrap_or(usize::MAX).min(bytes.remaining());
                if len < bytes.remaining() {
                    warn!(dropped = bytes.remaining() - len, "body exceeds content-length, extra bytes dropped");
                }
                dst.put((&mut bytes).take(len));
                self.length -= len as u64;
                Ok(())
            }
            PayloadItem::Eof => {
                // the response marks itself last, see `ResponseEncoder::is_finish`
                if self.length != 0 {
                    warn!(missing = self.length, "body ended before reaching content-length");
                }
                Ok(())
            }
        }
    }
}
