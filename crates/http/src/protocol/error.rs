use std::io;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum HttpError {
    #[error("request error: {source}")]
    RequestError {
        #[from]
        source: ParseError,
    },

    #[error("response error: {source}")]
    ResponseError {
        #[from]
        source: SendError,
    },
}

/// Errors raised while turning wire bytes into requests.
///
/// Every variant is fatal for the connection it happened on: framing can't be
/// recovered once the byte stream is out of sync.
#[derive(Error, Debug)]
pub enum ParseError {
    #[error("header size too large, current: {current_size} exceed the limit {max_size}")]
    TooLargeHeader { current_size: usize, max_size: usize },

    #[error("header number exceed the limit {max_num}")]
    TooManyHeaders { max_num: usize },

    #[error("invalid header: {reason}")]
    InvalidHeader { reason: String },

    #[error("invalid http version: {0:?}")]
    InvalidVersion(Option<u8>),

    #[error("invalid http method")]
    InvalidMethod,

    #[error("invalid http uri")]
    InvalidUri,

    #[error("invalid content-length header: {reason}")]
    InvalidContentLength { reason: String },

    #[error("invalid body: {reason}")]
    InvalidBody { reason: String },

    #[error("incomplete message at end of stream")]
    Incomplete,

    #[error("request aborted, connection closed before the request completed")]
    Aborted,

    #[error("io error: {source}")]
    Io {
        #[from]
        source: io::Error,
    },
}

impl ParseError {
    pub fn too_large_header(current_size: usize, max_size: usize) -> Self {
        Self::TooLargeHeader { current_size, max_size }
    }

    pub fn too_many_headers(max_num: usize) -> Self {
        Self::TooManyHeaders { max_num }
    }

    pub fn invalid_header<S: ToString>(str: S) -> Self {
        Self::InvalidHeader { reason: str.to_string() }
    }

    pub fn invalid_body<S: ToString>(str: S) -> Self {
        Self::InvalidBody { reason: str.to_string() }
    }

    pub fn invalid_content_length<S: ToString>(str: S) -> Self {
        Self::InvalidContentLength { reason: str.to_string() }
    }

    pub fn io<E: Into<io::Error>>(e: E) -> Self {
        Self::Io { source: e.into() }
    }

    /// Returns true if the error comes from the transport rather than from the bytes on it.
    pub fn is_io(&self) -> bool {
        matches!(self, ParseError::Io { .. })
    }
}

/// Errors raised while producing a response.
///
/// The validation variants (`InvalidStatusCode`, `HeadersAlreadySent`, `InvalidHeaderChar`,
/// `InvalidHeaderName`) are returned synchronously before anything is written.
#[derive(Error, Debug)]
pub enum SendError {
    #[error("invalid status code: {0}")]
    InvalidStatusCode(u16),

    #[error("cannot render headers after they are sent to the client")]
    HeadersAlreadySent,

    #[error("invalid character in {what}")]
    InvalidHeaderChar { what: String },

    #[error("invalid header name: {name:?}")]
    InvalidHeaderName { name: String },

    #[error("write after end")]
    WriteAfterEnd,

    #[error("invalid body: {reason}")]
    InvalidBody { reason: String },

    #[error("io error: {source}")]
    Io {
        #[from]
        source: io::Error,
    },
}

impl SendError {
    pub fn invalid_header_char<S: ToString>(what: S) -> Self {
        Self::InvalidHeaderChar { what: what.to_string() }
    }

    pub fn invalid_header_name<S: ToString>(name: S) -> Self {
        Self::InvalidHeaderName { name: name.to_string() }
    }

    pub fn invalid_body<S: ToString>(str: S) -> Self {
        Self::InvalidBody { reason: str.to_string() }
    }

    pub fn io<E: Into<io::Error>>(e: E) -> Self {
        Self::Io { source: e.into() }
    }

    /// The error handed to responses whose connection went away before their bytes were written.
    pub(crate) fn connection_closed() -> Self {
        Self::io(io::Error::new(io::ErrorKind::BrokenPipe, "connection closed before the response was flushed"))
    }
}
