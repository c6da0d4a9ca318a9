//! Small helpers shared by the codecs and the response state machine.

/// Returns `Err($error)` from the enclosing function unless `$predicate` holds.
///
/// Used for the validation steps that must reject input before anything is written or
/// consumed: status codes and reason phrases in a response, head limits and framing headers
/// in a request.
///
/// ```ignore
/// ensure!(!self.headers_sent, SendError::HeadersAlreadySent);
/// ```
macro_rules! ensure {
    ($predicate:expr, $error:expr $(,)?) => {
        if !$predicate {
            return Err($error);
        }
    };
}

pub(crate) use ensure;
