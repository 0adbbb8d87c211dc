// Error taxonomy for the AT-HTTP engine and the update loop.
//
// The engine never retries internally: every failure propagates to the
// orchestration loop, which runs one cleanup pass and surfaces a single
// terminal error. Whether a whole attempt is worth retrying is the
// caller's decision.

use std::time::Duration;

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    /// I/O failure on the serial byte channel. Fatal for the attempt.
    #[error("transport error: {0}")]
    Transport(String),

    /// A command or data-mode wait exceeded its deadline. Retryable by
    /// the caller, never retried internally.
    #[error("timed out waiting for {0}")]
    Timeout(&'static str),

    /// The parser could not extract the expected fields.
    #[error("malformed response: {0}")]
    MalformedResponse(String),

    /// The modem answered ERROR / +CME ERROR to a command.
    #[error("command rejected by modem: {0}")]
    CommandRejected(String),

    /// The modem refused to enter data mode for the URL upload.
    #[error("modem rejected URL upload")]
    UrlRejected,

    /// The URL upload was never acknowledged within its budget.
    #[error("URL upload timed out")]
    UrlTimeout,

    /// The modem completed the exchange but reported a transaction
    /// error (non-zero result code) before any HTTP status was valid.
    #[error("modem reported request error {0}")]
    RequestFailed(u32),

    /// The server answered with a status outside the success range.
    #[error("HTTP request failed with status {status}")]
    Http { status: u16 },

    /// The sink committed fewer bytes than it was handed.
    #[error("sink committed {committed} of {given} bytes")]
    ShortWrite { given: usize, committed: usize },

    /// No bytes arrived on the link for longer than the idle window.
    #[error("no data for {0:?} mid-transfer")]
    StallTimeout(Duration),

    /// The sink rejected the declared total size up front.
    #[error("sink rejected transfer of {0} bytes")]
    InsufficientSpace(u64),

    /// The sink failed while writing or finalizing.
    #[error("sink error: {0}")]
    Sink(String),

    /// The response body is not a firmware image.
    #[error("unexpected content type: {0}")]
    UnexpectedContentType(String),

    /// The version gate is enabled but the server sent no version header.
    #[error("response carries no firmware version header")]
    MissingVersion,

    /// The streamed image does not hash to the expected digest.
    #[error("image digest mismatch: expected {expected}, got {actual}")]
    ChecksumMismatch { expected: String, actual: String },

    /// The attempt was cancelled at a chunk boundary.
    #[error("update cancelled")]
    Cancelled,

    /// API misuse: an operation was invoked in the wrong session state.
    /// This is a programming error, not a protocol error.
    #[error("protocol misuse: {0}")]
    Protocol(&'static str),
}

/// Lightweight, copyable mirror of [`Error`] used where only the class
/// of a failure matters (e.g. `SessionState::Failed`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Transport,
    Timeout,
    MalformedResponse,
    CommandRejected,
    UrlRejected,
    UrlTimeout,
    RequestFailed,
    Http,
    ShortWrite,
    StallTimeout,
    InsufficientSpace,
    Sink,
    UnexpectedContentType,
    MissingVersion,
    ChecksumMismatch,
    Cancelled,
    Protocol,
}

impl Error {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::Transport(_) => ErrorKind::Transport,
            Error::Timeout(_) => ErrorKind::Timeout,
            Error::MalformedResponse(_) => ErrorKind::MalformedResponse,
            Error::CommandRejected(_) => ErrorKind::CommandRejected,
            Error::UrlRejected => ErrorKind::UrlRejected,
            Error::UrlTimeout => ErrorKind::UrlTimeout,
            Error::RequestFailed(_) => ErrorKind::RequestFailed,
            Error::Http { .. } => ErrorKind::Http,
            Error::ShortWrite { .. } => ErrorKind::ShortWrite,
            Error::StallTimeout(_) => ErrorKind::StallTimeout,
            Error::InsufficientSpace(_) => ErrorKind::InsufficientSpace,
            Error::Sink(_) => ErrorKind::Sink,
            Error::UnexpectedContentType(_) => ErrorKind::UnexpectedContentType,
            Error::MissingVersion => ErrorKind::MissingVersion,
            Error::ChecksumMismatch { .. } => ErrorKind::ChecksumMismatch,
            Error::Cancelled => ErrorKind::Cancelled,
            Error::Protocol(_) => ErrorKind::Protocol,
        }
    }

    /// True for failures a caller may reasonably retry from scratch.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self.kind(),
            ErrorKind::Timeout | ErrorKind::UrlTimeout | ErrorKind::StallTimeout
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_matches_variant() {
        assert_eq!(Error::Http { status: 404 }.kind(), ErrorKind::Http);
        assert_eq!(Error::UrlTimeout.kind(), ErrorKind::UrlTimeout);
        assert_eq!(
            Error::ShortWrite { given: 8, committed: 4 }.kind(),
            ErrorKind::ShortWrite
        );
    }

    #[test]
    fn retryable_classes() {
        assert!(Error::Timeout("response").is_retryable());
        assert!(Error::StallTimeout(Duration::from_secs(10)).is_retryable());
        assert!(!Error::Http { status: 500 }.is_retryable());
        assert!(!Error::MalformedResponse("x".into()).is_retryable());
    }
}
