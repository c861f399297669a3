//! Error types for session flows

/// Why an authorization callback did not produce a session.
///
/// Never surfaced to the HTTP caller as an error response: every variant
/// becomes a redirect to the return URL carrying `error=<code>`.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CallbackError {
    #[error("callback state does not match the state cookie")]
    StateMismatch,

    #[error("callback carried no authorization code")]
    MissingCode,

    /// The provider redirected back with `error=<code>` or rejected the code.
    #[error("provider returned error: {code}")]
    Provider { code: String },

    /// The code exchange failed without a structured provider error.
    #[error("token exchange failed")]
    Exchange,
}

impl CallbackError {
    /// Value of the `error` query parameter appended to the return URL.
    pub fn code(&self) -> &str {
        match self {
            CallbackError::StateMismatch => "state_mismatch",
            CallbackError::MissingCode => "missing_code",
            CallbackError::Provider { code } => code,
            CallbackError::Exchange => "token_exchange_failed",
        }
    }
}

/// A session payload whose `data` does not fit its `status`.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("session payload with status {status} has mismatched data")]
pub struct PayloadError {
    pub status: &'static str,
}
