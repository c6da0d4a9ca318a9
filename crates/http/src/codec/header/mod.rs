//! Request head decoding and response head encoding
//!
//! - [`HeaderDecoder`]: parses the request line and header lines with `httparse`, folds the
//!   lines into the canonical header map and enforces the head size and line count limits
//! - [`HeaderEncoder`]: writes the status line and the title-cased header block

mod header_decoder;
mod header_encoder;

pub use header_decoder::{DEFAULT_MAX_HEADER_BYTES, DEFAULT_MAX_HEADER_PAIRS, HeaderDecoder};
pub use header_encoder::HeaderEncoder;
pub(crate) use header_encoder::title_case;
