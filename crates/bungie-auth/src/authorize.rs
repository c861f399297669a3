//! Authorization request construction
//!
//! The state nonce is stored in a short-lived cookie when the flow starts and
//! compared against the `state` query parameter on the callback. The
//! authorization server returns it unchanged, so any difference means the
//! callback was not initiated by this browser.

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use rand::RngExt;
use url::Url;

/// Generate a random state nonce for CSRF protection.
///
/// 32 random bytes encoded as URL-safe base64 without padding (43 characters).
pub fn generate_state() -> String {
    let mut bytes = [0u8; 32];
    rand::rng().fill(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}

/// Provider authorize endpoint bound to one OAuth client.
#[derive(Debug, Clone)]
pub struct AuthorizeEndpoint {
    url: Url,
    client_id: String,
}

impl AuthorizeEndpoint {
    pub fn new(authorize_url: &str, client_id: impl Into<String>) -> Result<Self, url::ParseError> {
        Ok(Self {
            url: Url::parse(authorize_url)?,
            client_id: client_id.into(),
        })
    }

    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    /// Full authorization URL for a fresh flow carrying `state`.
    pub fn authorization_url(&self, state: &str) -> Url {
        let mut url = self.url.clone();
        url.query_pairs_mut()
            .append_pair("client_id", &self.client_id)
            .append_pair("response_type", "code")
            .append_pair("state", state);
        url
    }
}
