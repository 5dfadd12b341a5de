use thiserror::Error;

/// Errors surfaced by the cache core.
///
/// A cache miss is deliberately *not* an error — view reads return
/// `Option` and `None` means "not yet available". Nothing here is fatal:
/// the worst outcome is a stale or empty view, recoverable by a later
/// fetch or push event.
#[derive(Debug, Error)]
pub enum Error {
    /// A required form field is missing or malformed. Detected locally,
    /// before any request is issued.
    #[error("{field}: {reason}")]
    Validation { field: &'static str, reason: String },

    /// Invalid credentials, or an operation that needs a session token
    /// while none is present.
    #[error("authentication failed: {0}")]
    Auth(String),

    /// The remote operation failed. The message is surfaced verbatim
    /// to the UI.
    #[error("{0}")]
    Server(String),

    /// The push channel or transport is unreachable. Triggers
    /// reconnection on the push path; never fatal.
    #[error("transport unavailable: {0}")]
    Transport(String),
}

impl Error {
    pub(crate) fn validation(field: &'static str, reason: impl Into<String>) -> Self {
        Error::Validation {
            field,
            reason: reason.into(),
        }
    }

    /// A response that did not decode is a server-side contract breach,
    /// reported with the underlying reason.
    pub(crate) fn malformed(err: serde_json::Error) -> Self {
        Error::Server(format!("malformed response: {err}"))
    }
}
