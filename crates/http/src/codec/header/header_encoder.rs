//! Serializes a response head: the status line followed by the header block.
//!
//! The encoder does not decide anything about framing; the `Content-Length`,
//! `Transfer-Encoding`, `Connection` and `Date` headers are chosen by the response before the
//! head reaches this point.

use crate::protocol::{ResponseHead, SendError};

use bytes::{BufMut, BytesMut};
use std::io;
use std::io::Write;
use tokio_util::codec::Encoder;

/// Initial buffer size allocated for header serialization
const INIT_HEADER_SIZE: usize = 1024;

/// Encoder writing `HTTP/1.1 <code> <reason>\r\n`, one `Name: value\r\n` per header and the
/// terminating blank line.
///
/// Header names are emitted title-cased (`content-type` becomes `Content-Type`); the casing is
/// cosmetic, peers compare names case-insensitively.
#[derive(Debug, Default, Clone, Copy)]
pub struct HeaderEncoder;

impl Encoder<&ResponseHead> for HeaderEncoder {
    type Error = SendError;

    fn encode(&mut self, head: &ResponseHead, dst: &mut BytesMut) -> Result<(), Self::Error> {
        dst.reserve(INIT_HEADER_SIZE);

        write!(FastWrite(dst), "HTTP/1.1 {} {}\r\n", head.status_code(), head.reason())?;

        for (name, value) in head.headers() {
            title_case(dst, name.as_str().as_bytes());
            dst.put_slice(b": ");
            dst.put_slice(value.as_bytes());
            dst.put_slice(b"\r\n");
        }
        dst.put_slice(b"\r\n");
        Ok(())
    }
}

/// Writes `name` upper-casing the first letter of every dash separated word.
pub(crate) fn title_case(dst: &mut BytesMut, name: &[u8]) {
    dst.reserve(name.len());

    let mut prev = b'-';
    for &(mut c) in name {
        if prev == b'-' {
            c.make_ascii_uppercase();
        }
        dst.put_u8(c);
        prev = c;
    }
}

/// Writer over `BytesMut` so `write!` can format straight into the output buffer.
struct FastWrite<'a>(&'a mut BytesMut);

impl Write for FastWrite<'_> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.put_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use http::{HeaderMap, HeaderValue, header};

    #[test]
    fn status_line_and_title_cased_headers() {
        let mut headers = HeaderMap::new();
        headers.insert(header::CONTENT_TYPE, HeaderValue::from_static("application/json"));
        headers.insert("x-benchmark", HeaderValue::from_static("true"));

        let head = ResponseHead::new(200, "OK".to_string(), headers);
        let mut dst = BytesMut::new();
        HeaderEncoder.encode(&head, &mut dst).unwrap();

        let text = std::str::from_utf8(&dst).unwrap();
        assert!(text.starts_with("HTTP/1.1 200 OK\r\n"));
        assert!(text.contains("Content-Type: application/json\r\n"));
        assert!(text.contains("X-Benchmark: true\r\n"));
        assert!(text.ends_with("\r\n\r\n"));
    }

    #[test]
    fn unregistered_status_code() {
        let head = ResponseHead::new(599, "unknown".to_string(), HeaderMap::new());
        let mut dst = BytesMut::new();
        HeaderEncoder.encode(&head, &mut dst).unwrap();

        assert_eq!(&dst[..], b"HTTP/1.1 599 unknown\r\n\r\n");
    }
}
