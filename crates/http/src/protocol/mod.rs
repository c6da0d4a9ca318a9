//! Protocol types shared by the codec and the connection.
//!
//! - [`headers`]: the canonical request header map and the header-line folding rules
//! - [`Request`] / [`RequestHead`]: what the parser produces and what handlers receive
//! - [`Response`]: the outgoing state machine paired with every request, see also
//!   [`OutgoingMessage`]
//! - [`Message`], [`PayloadItem`], [`PayloadSize`]: items flowing out of the request decoder
//! - [`body`]: the streaming request body
//! - errors: [`HttpError`], [`ParseError`], [`SendError`]

mod message;
pub use message::Message;
pub use message::PayloadItem;
pub use message::PayloadSize;

pub mod headers;
pub use headers::HeaderClass;
pub use headers::HeaderField;
pub use headers::Headers;
pub use headers::add_header_line;

mod request;
pub use request::Request;
pub use request::RequestHead;

mod response;
pub use response::BodyFraming;
pub use response::Response;
pub use response::ResponseHead;
pub(crate) use response::{FlushedSender, ResponseEvent, ResponseSender};

mod outgoing;
pub use outgoing::OutgoingMessage;

mod timeout_hook;
pub(crate) use timeout_hook::TimeoutHook;

mod error;
pub use error::HttpError;
pub use error::ParseError;
pub use error::SendError;

pub mod body;
