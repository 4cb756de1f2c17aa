use thiserror::Error;

/// Classified outcome of a failed remote call.
///
/// Every call settles with exactly one of these. None of them affect the
/// agent itself: the counter and prefix stay as they were and the next call
/// proceeds normally.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CallError {
    /// HTTP 401; carries the status text.
    #[error("Authorization error: {0}")]
    Authorization(String),

    /// Any other non-2xx HTTP status; carries the status text.
    #[error("Transport error: {0}")]
    Transport(String),

    /// HTTP success but the JSON-RPC envelope is malformed.
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// Server-side failure tagged as a recognized service exception.
    #[error("Service error: {0}")]
    Service(String),

    /// Untagged server error or a network-level failure.
    #[error("{0}")]
    Generic(String),

    /// The path does not begin with `/`.
    #[error("Invalid path: {0}")]
    InvalidPath(String),

    /// The payload cannot be encoded for the requested content type.
    #[error("Encode error: {0}")]
    Encode(String),
}

impl CallError {
    /// The message carried by the error, without the kind prefix.
    pub fn message(&self) -> &str {
        match self {
            Self::Authorization(m)
            | Self::Transport(m)
            | Self::Protocol(m)
            | Self::Service(m)
            | Self::Generic(m)
            | Self::InvalidPath(m)
            | Self::Encode(m) => m,
        }
    }
}
