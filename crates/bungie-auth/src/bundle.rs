//! Token bundle issued by a successful exchange

use std::fmt;

use serde::{Deserialize, Serialize};
use time::{Duration, OffsetDateTime};

use crate::token::TokenResponse;

/// Access/refresh token pair plus membership identity and absolute expiries.
///
/// Never mutated in place: a refresh produces a whole new bundle.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenBundle {
    pub access_token: String,
    pub refresh_token: String,
    pub membership_id: String,
    #[serde(with = "time::serde::rfc3339")]
    pub access_expires_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub session_expires_at: OffsetDateTime,
}

impl TokenBundle {
    /// Stamp the relative lifetimes of a token response against `now`.
    pub fn from_response(response: TokenResponse, now: OffsetDateTime) -> Self {
        let refresh_secs = response.refresh_expires_in.unwrap_or(response.expires_in);
        Self {
            access_expires_at: now + Duration::seconds(clamp_secs(response.expires_in)),
            session_expires_at: now + Duration::seconds(clamp_secs(refresh_secs)),
            access_token: response.access_token,
            refresh_token: response.refresh_token,
            membership_id: response.membership_id,
        }
    }

    /// Remaining access-token lifetime (negative once expired).
    pub fn access_remaining(&self, now: OffsetDateTime) -> Duration {
        self.access_expires_at - now
    }
}

fn clamp_secs(secs: u64) -> i64 {
    i64::try_from(secs).unwrap_or(i64::MAX / 2)
}

impl fmt::Debug for TokenBundle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenBundle")
            .field("access_token", &"[REDACTED]")
            .field("refresh_token", &"[REDACTED]")
            .field("membership_id", &self.membership_id)
            .field("access_expires_at", &self.access_expires_at)
            .field("session_expires_at", &self.session_expires_at)
            .finish()
    }
}
