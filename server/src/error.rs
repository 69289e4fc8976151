use thiserror::Error;

/// Why a session ended
#[derive(Debug, Error)]
pub enum SessionError {
    /// Client closed the connection or stopped reading
    #[error("connection closed")]
    ConnectionClosed,

    /// Transport failure while reading
    #[error("connection lost: {0}")]
    ConnectionLost(#[source] axum::Error),

    #[error(transparent)]
    Protocol(#[from] ProtocolError),
}

/// Malformed or out-of-order inbound frames. The session cannot resynchronize
/// after one of these, so it is closed.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ProtocolError {
    #[error("invalid request header: {0}")]
    MalformedHeader(String),

    #[error("binary frame received without a preceding request header")]
    UnexpectedBinary,

    #[error("expected a binary voice reference frame, got text")]
    ExpectedVoicePayload,

    #[error("invalid input: {0}")]
    InvalidInput(String),
}
