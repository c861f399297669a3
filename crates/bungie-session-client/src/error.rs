//! Error types for the session client

/// Failure talking to the session endpoints.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The request did not complete (connection, TLS, timeout, body read).
    #[error("session request failed: {0}")]
    Http(String),

    /// The response body was not a session payload.
    #[error("invalid session payload: {0}")]
    Decode(String),
}

/// Result alias for session client operations.
pub type Result<T> = std::result::Result<T, Error>;
