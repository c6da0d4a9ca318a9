use bytes::Bytes;
use http::HeaderValue;

use crate::protocol::SendError;

/// Capabilities shared by outgoing messages: a header buffer that can be edited until the head
/// is serialized, raw writes, and write batching.
pub trait OutgoingMessage {
    /// Sets a header, replacing every existing value of the same name.
    ///
    /// # Errors
    ///
    /// [`SendError::HeadersAlreadySent`] once the head is on its way, [`SendError::InvalidHeaderName`]
    /// or [`SendError::InvalidHeaderChar`] for malformed input.
    fn set_header(&mut self, name: &str, value: &str) -> Result<(), SendError>;

    /// Adds one more value for `name`, keeping the existing ones.
    fn append_header(&mut self, name: &str, value: &str) -> Result<(), SendError>;

    fn get_header(&self, name: &str) -> Option<&HeaderValue>;

    fn remove_header(&mut self, name: &str) -> Result<(), SendError>;

    fn has_header(&self, name: &str) -> bool;

    /// True once the status line has been serialized.
    fn headers_sent(&self) -> bool;

    /// Queues bytes exactly as given, bypassing body framing.
    fn write_raw(&mut self, bytes: Bytes) -> Result<(), SendError>;

    /// Holds subsequent writes back until the matching [`OutgoingMessage::uncork`].
    fn cork(&mut self);

    fn uncork(&mut self) -> Result<(), SendError>;
}
