//! Error taxonomy for the dialogue relay.
//!
//! Only [`RelayError::UpstreamFailure`] is ever surfaced to the client; every
//! other variant is absorbed at the component boundary that detects it.

use thiserror::Error;

/// Errors that can occur while relaying a dialogue session.
#[derive(Debug, Error)]
pub enum RelayError {
    /// A binary frame violated the wire layout (truncated header, a declared
    /// length running past the end of the buffer, unsupported version).
    /// Fatal to the offending session only.
    #[error("Malformed frame: {0}")]
    MalformedFrame(String),

    /// Connect/socket error on the upstream link, or an upstream
    /// `ConnectionFailed`/`SessionFailed` event. Fatal to the session.
    #[error("Upstream failure: {0}")]
    UpstreamFailure(String),

    /// Unparseable, unknown or oversized client command. Logged and ignored.
    #[error("Invalid client command: {0}")]
    ClientCommandInvalid(String),

    /// Secondary completion call failed or timed out. Recovered locally.
    #[error("Suggestion service failure: {0}")]
    SuggestionServiceFailure(String),
}

/// Result type for relay operations.
pub type RelayResult<T> = Result<T, RelayError>;

impl RelayError {
    /// Whether this error should be shown to the client as an `error` message.
    pub fn is_client_visible(&self) -> bool {
        matches!(self, RelayError::UpstreamFailure(_))
    }

    /// The detail message without the variant prefix.
    pub fn reason(&self) -> &str {
        match self {
            RelayError::MalformedFrame(reason)
            | RelayError::UpstreamFailure(reason)
            | RelayError::ClientCommandInvalid(reason)
            | RelayError::SuggestionServiceFailure(reason) => reason,
        }
    }
}
