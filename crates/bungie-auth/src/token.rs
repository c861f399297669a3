//! Token endpoint client
//!
//! Handles the two token endpoint interactions:
//! 1. Authorization code exchange (callback after the user approved access)
//! 2. Token refresh (session derivation when the access token is near expiry)
//!
//! Both POST to the token endpoint with different grant types. Error bodies
//! are split into structured OAuth errors (`Error::Authorization`) and
//! everything else (`Error::Transport`). A rejected grant ends the session;
//! a transport failure leaves it in place.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use reqwest::StatusCode;
use serde::{Deserialize, Deserializer, Serialize};
use tracing::{debug, warn};

use crate::error::{AuthorizationError, Error, Result};
use crate::secret::Secret;

/// Grant presented to the token endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Grant<'a> {
    AuthorizationCode(&'a str),
    RefreshToken(&'a str),
}

impl Grant<'_> {
    pub fn grant_type(&self) -> &'static str {
        match self {
            Grant::AuthorizationCode(_) => "authorization_code",
            Grant::RefreshToken(_) => "refresh_token",
        }
    }

    fn value_field(&self) -> (&'static str, &str) {
        match self {
            Grant::AuthorizationCode(code) => ("code", *code),
            Grant::RefreshToken(token) => ("refresh_token", *token),
        }
    }
}

/// Response from the token endpoint for both exchange and refresh.
///
/// `expires_in` and `refresh_expires_in` are deltas in seconds from the
/// response time; `TokenBundle::from_response` turns them into timestamps.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct TokenResponse {
    pub access_token: String,
    #[serde(default)]
    pub token_type: String,
    pub expires_in: u64,
    pub refresh_token: String,
    /// Absent for public clients, in which case the refresh token lives as
    /// long as the access token.
    #[serde(default)]
    pub refresh_expires_in: Option<u64>,
    #[serde(deserialize_with = "string_or_number")]
    pub membership_id: String,
}

/// Bungie has returned `membership_id` both as a JSON string and as a number.
fn string_or_number<'de, D>(deserializer: D) -> std::result::Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Text(String),
        Number(u64),
    }
    Ok(match Raw::deserialize(deserializer)? {
        Raw::Text(s) => s,
        Raw::Number(n) => n.to_string(),
    })
}

/// Abstraction over the token endpoint so session derivation can be tested
/// without a network.
///
/// Uses `Pin<Box<dyn Future>>` return types for dyn-compatibility (`Arc<dyn TokenProvider>`).
pub trait TokenProvider: Send + Sync {
    fn exchange_token<'a>(
        &'a self,
        grant: Grant<'a>,
    ) -> Pin<Box<dyn Future<Output = Result<TokenResponse>> + Send + 'a>>;
}

impl<T: TokenProvider + ?Sized> TokenProvider for Arc<T> {
    fn exchange_token<'a>(
        &'a self,
        grant: Grant<'a>,
    ) -> Pin<Box<dyn Future<Output = Result<TokenResponse>> + Send + 'a>> {
        (**self).exchange_token(grant)
    }
}

/// Confidential OAuth client for the Bungie.net token endpoint.
#[derive(Debug, Clone)]
pub struct BungieClient {
    http: reqwest::Client,
    token_url: String,
    client_id: String,
    client_secret: Secret,
}

impl BungieClient {
    pub fn new(
        http: reqwest::Client,
        token_url: impl Into<String>,
        client_id: impl Into<String>,
        client_secret: Secret,
    ) -> Self {
        Self {
            http,
            token_url: token_url.into(),
            client_id: client_id.into(),
            client_secret,
        }
    }

    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    /// Exchange an authorization code or a refresh token for a new token set.
    pub async fn exchange_token(&self, grant: Grant<'_>) -> Result<TokenResponse> {
        let (field, value) = grant.value_field();
        let response = self
            .http
            .post(&self.token_url)
            .form(&[
                ("grant_type", grant.grant_type()),
                (field, value),
                ("client_id", self.client_id.as_str()),
                ("client_secret", self.client_secret.expose()),
            ])
            .send()
            .await
            .map_err(|e| Error::Transport(format!("token request failed: {e}")))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| Error::Transport(format!("reading token response failed: {e}")))?;

        debug!(grant_type = grant.grant_type(), %status, "token endpoint responded");
        interpret_response(status, &body)
    }
}

impl TokenProvider for BungieClient {
    fn exchange_token<'a>(
        &'a self,
        grant: Grant<'a>,
    ) -> Pin<Box<dyn Future<Output = Result<TokenResponse>> + Send + 'a>> {
        Box::pin(BungieClient::exchange_token(self, grant))
    }
}

/// Map a token endpoint status + body onto a token set or a typed error.
///
/// A structured `{"error": ...}` body is an authorization error whatever the
/// status; anything else that is not a successful token payload is transport.
fn interpret_response(status: StatusCode, body: &str) -> Result<TokenResponse> {
    if status.is_success() {
        return serde_json::from_str::<TokenResponse>(body).map_err(|e| {
            match serde_json::from_str::<AuthorizationError>(body) {
                Ok(auth) => Error::Authorization(auth),
                Err(_) => Error::Transport(format!("invalid token response: {e}")),
            }
        });
    }

    match serde_json::from_str::<AuthorizationError>(body) {
        Ok(auth) => {
            warn!(
                %status,
                error_code = %auth.error_code,
                error_description = %auth.error_description,
                "token endpoint returned OAuth error"
            );
            Err(Error::Authorization(auth))
        }
        Err(_) => Err(Error::Transport(format!(
            "token endpoint returned {status} with unparseable body"
        ))),
    }
}
