//! Externally visible session projection
//!
//! Serialized as `{ "status": ..., "data": ... }` where the shape of `data`
//! is fixed by `status`:
//!
//! - `unauthorized`, `expired`, `error` → `null`
//! - `stale`, `disabled` → `{ "bungieMembershipId" }`
//! - `authorized` → `{ "bungieMembershipId", "accessToken", "accessTokenExpiresAt" }`

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use crate::error::PayloadError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    Unauthorized,
    Expired,
    Error,
    Stale,
    Disabled,
    Authorized,
}

impl SessionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionStatus::Unauthorized => "unauthorized",
            SessionStatus::Expired => "expired",
            SessionStatus::Error => "error",
            SessionStatus::Stale => "stale",
            SessionStatus::Disabled => "disabled",
            SessionStatus::Authorized => "authorized",
        }
    }
}

/// The `data` member of a session payload.
///
/// Untagged: the full variant is listed first so a payload carrying an
/// access token never deserializes as membership-only.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SessionData {
    Authorized {
        #[serde(rename = "bungieMembershipId")]
        membership_id: String,
        #[serde(rename = "accessToken")]
        access_token: String,
        #[serde(rename = "accessTokenExpiresAt", with = "time::serde::rfc3339")]
        access_expires_at: OffsetDateTime,
    },
    Membership {
        #[serde(rename = "bungieMembershipId")]
        membership_id: String,
    },
}

impl SessionData {
    pub fn membership_id(&self) -> &str {
        match self {
            SessionData::Authorized { membership_id, .. }
            | SessionData::Membership { membership_id } => membership_id,
        }
    }

    pub fn access_expires_at(&self) -> Option<OffsetDateTime> {
        match self {
            SessionData::Authorized {
                access_expires_at, ..
            } => Some(*access_expires_at),
            SessionData::Membership { .. } => None,
        }
    }
}

/// Session as returned to callers. Each variant carries only the fields
/// valid for its status.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(into = "SessionPayload", try_from = "SessionPayload")]
pub enum SessionView {
    Unauthorized,
    /// The refresh token was rejected and the session cookies were cleared.
    Expired,
    /// The refresh failed for a reason other than a provider answer.
    Error,
    Stale {
        membership_id: String,
    },
    /// The provider reported a system-wide outage; cookies were kept.
    Disabled {
        membership_id: String,
    },
    Authorized {
        membership_id: String,
        access_token: String,
        access_expires_at: OffsetDateTime,
    },
}

impl SessionView {
    pub fn status(&self) -> SessionStatus {
        match self {
            SessionView::Unauthorized => SessionStatus::Unauthorized,
            SessionView::Expired => SessionStatus::Expired,
            SessionView::Error => SessionStatus::Error,
            SessionView::Stale { .. } => SessionStatus::Stale,
            SessionView::Disabled { .. } => SessionStatus::Disabled,
            SessionView::Authorized { .. } => SessionStatus::Authorized,
        }
    }

    pub fn data(&self) -> Option<SessionData> {
        match self {
            SessionView::Unauthorized | SessionView::Expired | SessionView::Error => None,
            SessionView::Stale { membership_id } | SessionView::Disabled { membership_id } => {
                Some(SessionData::Membership {
                    membership_id: membership_id.clone(),
                })
            }
            SessionView::Authorized {
                membership_id,
                access_token,
                access_expires_at,
            } => Some(SessionData::Authorized {
                membership_id: membership_id.clone(),
                access_token: access_token.clone(),
                access_expires_at: *access_expires_at,
            }),
        }
    }

    pub fn membership_id(&self) -> Option<&str> {
        match self {
            SessionView::Unauthorized | SessionView::Expired | SessionView::Error => None,
            SessionView::Stale { membership_id }
            | SessionView::Disabled { membership_id }
            | SessionView::Authorized { membership_id, .. } => Some(membership_id),
        }
    }

    /// HTTP status for a forced refresh response.
    ///
    /// 200 for authorized/stale, 401 for unauthorized/expired, 500 for error
    /// and 503 while the provider is disabled.
    pub fn http_status(&self) -> u16 {
        match self {
            SessionView::Authorized { .. } | SessionView::Stale { .. } => 200,
            SessionView::Unauthorized | SessionView::Expired => 401,
            SessionView::Error => 500,
            SessionView::Disabled { .. } => 503,
        }
    }
}

#[derive(Serialize, Deserialize)]
struct SessionPayload {
    status: SessionStatus,
    #[serde(default)]
    data: Option<SessionData>,
}

impl From<SessionView> for SessionPayload {
    fn from(view: SessionView) -> Self {
        Self {
            status: view.status(),
            data: view.data(),
        }
    }
}

impl TryFrom<SessionPayload> for SessionView {
    type Error = PayloadError;

    fn try_from(payload: SessionPayload) -> Result<Self, PayloadError> {
        let status = payload.status;
        let mismatch = || PayloadError {
            status: status.as_str(),
        };
        match (status, payload.data) {
            (SessionStatus::Unauthorized, None) => Ok(SessionView::Unauthorized),
            (SessionStatus::Expired, None) => Ok(SessionView::Expired),
            (SessionStatus::Error, None) => Ok(SessionView::Error),
            (SessionStatus::Stale, Some(data)) => Ok(SessionView::Stale {
                membership_id: data.membership_id().to_owned(),
            }),
            (SessionStatus::Disabled, Some(data)) => Ok(SessionView::Disabled {
                membership_id: data.membership_id().to_owned(),
            }),
            (
                SessionStatus::Authorized,
                Some(SessionData::Authorized {
                    membership_id,
                    access_token,
                    access_expires_at,
                }),
            ) => Ok(SessionView::Authorized {
                membership_id,
                access_token,
                access_expires_at,
            }),
            _ => Err(mismatch()),
        }
    }
}
