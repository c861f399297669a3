//! Error types for token endpoint operations

use serde::Deserialize;

use crate::constants::SYSTEM_DISABLED;

/// Structured OAuth error body returned by the token endpoint.
///
/// Wire shape: `{"error": "invalid_grant", "error_description": "AuthorizationRecordExpired"}`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, thiserror::Error)]
#[error("{error_code} ({error_description})")]
pub struct AuthorizationError {
    #[serde(rename = "error")]
    pub error_code: String,
    #[serde(rename = "error_description", default)]
    pub error_description: String,
}

impl AuthorizationError {
    pub fn new(error_code: impl Into<String>, error_description: impl Into<String>) -> Self {
        Self {
            error_code: error_code.into(),
            error_description: error_description.into(),
        }
    }

    /// The provider is globally unavailable; the credential itself was not judged.
    pub fn is_provider_outage(&self) -> bool {
        self.error_description == SYSTEM_DISABLED
    }
}

/// Errors from token endpoint operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The provider answered with a structured OAuth error.
    #[error("token endpoint rejected the grant: {0}")]
    Authorization(#[from] AuthorizationError),

    /// Network failure, timeout, unexpected status or unparseable body.
    #[error("token endpoint transport failure: {0}")]
    Transport(String),
}

impl Error {
    pub fn authorization(&self) -> Option<&AuthorizationError> {
        match self {
            Error::Authorization(e) => Some(e),
            Error::Transport(_) => None,
        }
    }

    pub fn is_provider_outage(&self) -> bool {
        self.authorization()
            .is_some_and(AuthorizationError::is_provider_outage)
    }
}

/// Result alias for token endpoint operations.
pub type Result<T> = std::result::Result<T, Error>;
