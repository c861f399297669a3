//! Cookie store adapter
//!
//! Session state lives entirely in six cookies named `<prefix>.<suffix>`:
//!
//! | suffix         | value                    | lifetime                    |
//! |----------------|--------------------------|-----------------------------|
//! | `state`        | CSRF nonce               | flow max-age (15 min)       |
//! | `callback`     | return URL               | flow max-age (15 min)       |
//! | `membershipid` | plain membership id      | refresh token expiry        |
//! | `refresh`      | sealed refresh token     | refresh token expiry        |
//! | `access`       | sealed access token      | access token expiry         |
//! | `expires`      | RFC 3339 access expiry   | access token expiry         |
//!
//! The access pair expires before the refresh pair, so a browser routinely
//! presents a refresh token without an access token. That is a refreshable
//! session, not an anonymous one.

use std::collections::BTreeMap;

use bungie_auth::{TokenBundle, TokenCodec};
use serde::Deserialize;
use time::format_description::well_known::Rfc3339;
use time::{Duration, OffsetDateTime};
use tracing::debug;

/// `SameSite` cookie attribute.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SameSite {
    Strict,
    #[default]
    Lax,
    None,
}

/// Options shared by every session cookie. Only expiry differs per cookie.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CookieOptions {
    pub http_only: bool,
    pub secure: bool,
    pub same_site: SameSite,
    pub path: String,
}

impl Default for CookieOptions {
    fn default() -> Self {
        Self {
            http_only: true,
            secure: true,
            same_site: SameSite::Lax,
            path: "/".into(),
        }
    }
}

impl CookieOptions {
    pub fn with_expiry(&self, expiry: CookieExpiry) -> CookieAttributes {
        CookieAttributes {
            expiry,
            http_only: self.http_only,
            secure: self.secure,
            same_site: self.same_site,
            path: self.path.clone(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CookieExpiry {
    MaxAge(Duration),
    ExpiresAt(OffsetDateTime),
}

/// Everything a store needs to emit one `Set-Cookie`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CookieAttributes {
    pub expiry: CookieExpiry,
    pub http_only: bool,
    pub secure: bool,
    pub same_site: SameSite,
    pub path: String,
}

/// Request-scoped cookie access.
///
/// Implemented over the HTTP framework's cookie jar by the serving layer, and
/// by [`MemoryCookieStore`] in tests. Reads must observe writes made earlier
/// in the same request.
pub trait CookieStore {
    fn get(&self, name: &str) -> Option<String>;
    fn set(&mut self, name: &str, value: String, attributes: CookieAttributes);
    fn delete(&mut self, name: &str);
}

/// In-memory cookie store keeping the attributes of every write.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MemoryCookieStore {
    cookies: BTreeMap<String, (String, Option<CookieAttributes>)>,
}

impl MemoryCookieStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a cookie as if the browser had sent it.
    pub fn with(mut self, name: &str, value: impl Into<String>) -> Self {
        self.cookies.insert(name.to_owned(), (value.into(), None));
        self
    }

    /// Attributes of the last write to `name`, if it was written (not seeded).
    pub fn attributes(&self, name: &str) -> Option<&CookieAttributes> {
        self.cookies.get(name).and_then(|(_, attrs)| attrs.as_ref())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.cookies.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.cookies.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cookies.is_empty()
    }
}

impl CookieStore for MemoryCookieStore {
    fn get(&self, name: &str) -> Option<String> {
        self.cookies.get(name).map(|(value, _)| value.clone())
    }

    fn set(&mut self, name: &str, value: String, attributes: CookieAttributes) {
        self.cookies
            .insert(name.to_owned(), (value, Some(attributes)));
    }

    fn delete(&mut self, name: &str) {
        self.cookies.remove(name);
    }
}

/// Cookie names under a common prefix.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CookieNames {
    pub state: String,
    pub callback: String,
    pub membership_id: String,
    pub access: String,
    pub refresh: String,
    pub expires: String,
}

impl CookieNames {
    pub fn new(prefix: &str) -> Self {
        Self {
            state: format!("{prefix}.state"),
            callback: format!("{prefix}.callback"),
            membership_id: format!("{prefix}.membershipid"),
            access: format!("{prefix}.access"),
            refresh: format!("{prefix}.refresh"),
            expires: format!("{prefix}.expires"),
        }
    }

    /// The four cookies that make up a session (not the flow cookies).
    pub fn session(&self) -> [&str; 4] {
        [
            &self.membership_id,
            &self.access,
            &self.refresh,
            &self.expires,
        ]
    }
}

/// Session as read back from the cookie jar. Undecodable values are `None`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StoredSession {
    pub membership_id: Option<String>,
    pub refresh_token: Option<String>,
    pub access_token: Option<String>,
    pub access_expires_at: Option<OffsetDateTime>,
}

/// Reads and writes the session cookie schema through a [`CookieStore`].
#[derive(Clone)]
pub struct SessionCookies {
    names: CookieNames,
    options: CookieOptions,
    flow_max_age: Duration,
    codec: TokenCodec,
}

impl SessionCookies {
    pub fn new(
        prefix: &str,
        options: CookieOptions,
        flow_max_age: Duration,
        codec: TokenCodec,
    ) -> Self {
        Self {
            names: CookieNames::new(prefix),
            options,
            flow_max_age,
            codec,
        }
    }

    pub fn names(&self) -> &CookieNames {
        &self.names
    }

    pub fn codec(&self) -> &TokenCodec {
        &self.codec
    }

    pub fn read<S: CookieStore + ?Sized>(&self, store: &S) -> StoredSession {
        let membership_id = store
            .get(&self.names.membership_id)
            .filter(|id| !id.is_empty());
        let refresh_token = store
            .get(&self.names.refresh)
            .and_then(|v| self.codec.open(&v));
        let access_token = store
            .get(&self.names.access)
            .and_then(|v| self.codec.open(&v));
        let access_expires_at = store.get(&self.names.expires).and_then(|v| {
            OffsetDateTime::parse(&v, &Rfc3339)
                .inspect_err(|e| debug!(error = %e, "ignoring unparseable expiry cookie"))
                .ok()
        });

        StoredSession {
            membership_id,
            refresh_token,
            access_token,
            access_expires_at,
        }
    }

    /// Write all four session cookies for a freshly issued bundle.
    ///
    /// The membership and refresh cookies live as long as the refresh token;
    /// the access token and its expiry cookie only as long as the access token.
    pub fn write_bundle<S: CookieStore + ?Sized>(&self, store: &mut S, bundle: &TokenBundle) {
        let session = self
            .options
            .with_expiry(CookieExpiry::ExpiresAt(bundle.session_expires_at));
        let access = self
            .options
            .with_expiry(CookieExpiry::ExpiresAt(bundle.access_expires_at));
        let expires = bundle
            .access_expires_at
            .format(&Rfc3339)
            .unwrap_or_default();

        store.set(
            &self.names.membership_id,
            bundle.membership_id.clone(),
            session.clone(),
        );
        store.set(
            &self.names.refresh,
            self.codec.seal(&bundle.refresh_token),
            session,
        );
        store.set(
            &self.names.access,
            self.codec.seal(&bundle.access_token),
            access.clone(),
        );
        store.set(&self.names.expires, expires, access);
    }

    pub fn clear_session<S: CookieStore + ?Sized>(&self, store: &mut S) {
        for name in self.names.session() {
            store.delete(name);
        }
    }

    /// Start an authorization flow: remember the nonce and where to return.
    pub fn write_flow<S: CookieStore + ?Sized>(&self, store: &mut S, state: &str, callback: &str) {
        let attrs = self
            .options
            .with_expiry(CookieExpiry::MaxAge(self.flow_max_age));
        store.set(&self.names.state, state.to_owned(), attrs.clone());
        store.set(&self.names.callback, callback.to_owned(), attrs);
    }

    /// Read and delete the flow cookies. They are single-use.
    pub fn take_flow<S: CookieStore + ?Sized>(&self, store: &mut S) -> (Option<String>, Option<String>) {
        let state = store.get(&self.names.state);
        let callback = store.get(&self.names.callback);
        store.delete(&self.names.state);
        store.delete(&self.names.callback);
        (state, callback)
    }
}
