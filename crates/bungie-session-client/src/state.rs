//! Client-visible session state

use bungie_session::SessionData;
use serde::{Serialize, Serializer};
use time::OffsetDateTime;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ClientStatus {
    /// No authoritative answer yet.
    Pending,
    Authorized,
    /// Membership known, access token not usable right now.
    Stale,
    Unauthorized,
    /// The provider or the session server cannot answer.
    Unavailable,
}

/// Why the last operation failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum ClientError {
    /// The request failed while the client reported itself offline.
    Network,
    /// The request failed or returned garbage while online.
    Client,
    /// The server answered with status `error`.
    Server,
    /// The server answered with status `disabled`.
    ProviderOffline,
}

/// Session state plus transient flags.
///
/// `data` survives errors: a failed refresh keeps the last known payload and
/// only sets `error`. Serializes with the derived `isPending` and `isError`
/// flags alongside the stored fields.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientSessionState {
    pub status: ClientStatus,
    pub data: Option<SessionData>,
    pub is_fetching: bool,
    pub error: Option<ClientError>,
}

impl Default for ClientSessionState {
    fn default() -> Self {
        Self {
            status: ClientStatus::Pending,
            data: None,
            is_fetching: false,
            error: None,
        }
    }
}

impl ClientSessionState {
    pub fn is_pending(&self) -> bool {
        self.status == ClientStatus::Pending
    }

    pub fn is_error(&self) -> bool {
        self.error.is_some()
    }

    pub fn membership_id(&self) -> Option<&str> {
        self.data.as_ref().map(SessionData::membership_id)
    }

    pub fn access_expires_at(&self) -> Option<OffsetDateTime> {
        self.data.as_ref().and_then(SessionData::access_expires_at)
    }
}

impl Serialize for ClientSessionState {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        #[derive(Serialize)]
        #[serde(rename_all = "camelCase")]
        struct Wire<'a> {
            status: ClientStatus,
            data: Option<&'a SessionData>,
            is_pending: bool,
            is_fetching: bool,
            is_error: bool,
            error: Option<ClientError>,
        }

        Wire {
            status: self.status,
            data: self.data.as_ref(),
            is_pending: self.is_pending(),
            is_fetching: self.is_fetching,
            is_error: self.is_error(),
            error: self.error,
        }
        .serialize(serializer)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn starts_pending_without_error() {
        let state = ClientSessionState::default();
        assert!(state.is_pending());
        assert!(!state.is_error());
        assert_eq!(state.membership_id(), None);
    }

    #[test]
    fn serializes_camel_case_with_kebab_errors() {
        let state = ClientSessionState {
            status: ClientStatus::Unavailable,
            data: Some(SessionData::Membership {
                membership_id: "42".into(),
            }),
            is_fetching: false,
            error: Some(ClientError::ProviderOffline),
        };
        assert_eq!(
            serde_json::to_value(&state).unwrap(),
            json!({
                "status": "unavailable",
                "data": {"bungieMembershipId": "42"},
                "isPending": false,
                "isFetching": false,
                "isError": true,
                "error": "provider-offline"
            })
        );
    }

    #[test]
    fn pending_state_serializes_derived_flags() {
        assert_eq!(
            serde_json::to_value(ClientSessionState::default()).unwrap(),
            json!({
                "status": "pending",
                "data": null,
                "isPending": true,
                "isFetching": false,
                "isError": false,
                "error": null
            })
        );
    }
}
