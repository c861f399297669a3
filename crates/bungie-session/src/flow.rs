//! Authorization code flow
//!
//! `begin_authorize` stores a fresh state nonce plus the return URL in
//! short-lived cookies and hands back the provider URL to redirect to.
//! `complete_callback` consumes both cookies whatever happens, verifies the
//! nonce, exchanges the code and persists the session. Failures never escape
//! as errors: they become a redirect to the return URL with `error=<code>`.

use bungie_auth::{Grant, TokenBundle, TokenProvider, generate_state};
use serde::Deserialize;
use time::OffsetDateTime;
use tracing::{debug, info, warn};
use url::{Position, Url};

use crate::cookies::CookieStore;
use crate::engine::SessionEngine;
use crate::error::CallbackError;
use crate::view::SessionView;

/// Query parameters of the provider redirect back to us.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct CallbackParams {
    pub code: Option<String>,
    pub state: Option<String>,
    pub error: Option<String>,
    pub error_description: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CallbackOutcome {
    Authorized {
        location: String,
        membership_id: String,
    },
    Failed {
        location: String,
        error: CallbackError,
    },
}

impl CallbackOutcome {
    /// Where to redirect the browser.
    pub fn location(&self) -> &str {
        match self {
            CallbackOutcome::Authorized { location, .. }
            | CallbackOutcome::Failed { location, .. } => location,
        }
    }

    fn label(&self) -> &'static str {
        match self {
            CallbackOutcome::Authorized { .. } => "authorized",
            CallbackOutcome::Failed { error, .. } => match error {
                CallbackError::StateMismatch => "state_mismatch",
                CallbackError::MissingCode => "missing_code",
                CallbackError::Provider { .. } => "provider_error",
                CallbackError::Exchange => "exchange_failed",
            },
        }
    }
}

impl<P: TokenProvider> SessionEngine<P> {
    /// Start a flow: set the state and callback cookies and return the
    /// provider authorize URL.
    ///
    /// `return_url` is replaced by the default when it is neither a relative
    /// path nor on an allowed origin.
    pub fn begin_authorize<S: CookieStore + ?Sized>(
        &self,
        store: &mut S,
        return_url: Option<&str>,
    ) -> Url {
        let state = generate_state();
        let callback = self.return_url(return_url);
        self.cookies.write_flow(store, &state, &callback);
        debug!(callback = %callback, "authorization flow started");
        self.authorize.authorization_url(&state)
    }

    pub async fn complete_callback<S: CookieStore + ?Sized>(
        &self,
        store: &mut S,
        params: CallbackParams,
    ) -> CallbackOutcome {
        self.complete_callback_at(store, params, OffsetDateTime::now_utc())
            .await
    }

    pub async fn complete_callback_at<S: CookieStore + ?Sized>(
        &self,
        store: &mut S,
        params: CallbackParams,
        now: OffsetDateTime,
    ) -> CallbackOutcome {
        let (expected_state, callback) = self.cookies.take_flow(store);
        let location = self.return_url(callback.as_deref());

        let outcome = match self.exchange_callback(expected_state, params, now).await {
            Ok(bundle) => {
                self.cookies.write_bundle(store, &bundle);
                info!(membership_id = %bundle.membership_id, "authorization completed");
                CallbackOutcome::Authorized {
                    location,
                    membership_id: bundle.membership_id,
                }
            }
            Err(error) => {
                warn!(error = %error, "authorization callback failed");
                CallbackOutcome::Failed {
                    location: annotate_return_url(&location, error.code()),
                    error,
                }
            }
        };
        metrics::counter!("session_callbacks_total", "outcome" => outcome.label()).increment(1);
        outcome
    }

    /// Log out: drop all session cookies.
    pub fn deauthorize<S: CookieStore + ?Sized>(&self, store: &mut S) -> SessionView {
        self.cookies.clear_session(store);
        debug!("session cookies cleared");
        SessionView::Unauthorized
    }

    async fn exchange_callback(
        &self,
        expected_state: Option<String>,
        params: CallbackParams,
        now: OffsetDateTime,
    ) -> Result<TokenBundle, CallbackError> {
        // Nothing from an unverified callback is reflected back, not even `error`
        match (expected_state, params.state) {
            (Some(expected), Some(actual)) if !expected.is_empty() && expected == actual => {}
            _ => return Err(CallbackError::StateMismatch),
        }

        if let Some(code) = params.error {
            debug!(
                error = %code,
                description = params.error_description.as_deref().unwrap_or_default(),
                "provider denied authorization"
            );
            return Err(CallbackError::Provider { code });
        }

        let code = params
            .code
            .filter(|c| !c.is_empty())
            .ok_or(CallbackError::MissingCode)?;

        let response = self
            .provider
            .exchange_token(Grant::AuthorizationCode(&code))
            .await
            .map_err(|e| match e.authorization() {
                Some(auth) => CallbackError::Provider {
                    code: auth.error_code.clone(),
                },
                None => CallbackError::Exchange,
            })?;
        Ok(TokenBundle::from_response(response, now))
    }

    fn return_url(&self, requested: Option<&str>) -> String {
        match requested {
            Some(url) if self.is_allowed_return_url(url) => url.to_owned(),
            Some(url) => {
                debug!(requested = url, "return URL not allowed, using default");
                self.settings.default_return_url.clone()
            }
            None => self.settings.default_return_url.clone(),
        }
    }

    fn is_allowed_return_url(&self, url: &str) -> bool {
        // Browsers drop tab/CR/LF and treat `\` as `/`, which can turn a path
        // into a protocol-relative URL
        if has_unsafe_bytes(url) {
            return false;
        }
        if url.starts_with('/') {
            return stays_relative(url);
        }
        let Ok(parsed) = Url::parse(url) else {
            return false;
        };
        matches!(parsed.scheme(), "http" | "https")
            && self
                .settings
                .allowed_return_origins
                .iter()
                .any(|origin| origin.trim_end_matches('/') == parsed.origin().ascii_serialization())
    }
}

const RELATIVE_BASE: &str = "http://relative.invalid";

/// Control characters or backslashes, raw or percent-encoded.
fn has_unsafe_bytes(url: &str) -> bool {
    let unsafe_byte = |b: u8| b.is_ascii_control() || b == b'\\';
    let bytes = url.as_bytes();
    bytes.iter().copied().any(unsafe_byte)
        || bytes.windows(3).any(|w| {
            w[0] == b'%'
                && std::str::from_utf8(&w[1..])
                    .ok()
                    .and_then(|hex| u8::from_str_radix(hex, 16).ok())
                    .is_some_and(unsafe_byte)
        })
}

/// A path that resolves to the current origin, not to another host.
fn stays_relative(path: &str) -> bool {
    Url::parse(RELATIVE_BASE)
        .and_then(|base| base.join(path))
        .is_ok_and(|resolved| resolved.host_str() == Some("relative.invalid"))
}

/// Append `error=<code>` to an absolute URL or a relative path.
pub fn annotate_return_url(location: &str, code: &str) -> String {
    if let Ok(mut url) = Url::parse(location) {
        url.query_pairs_mut().append_pair("error", code);
        return url.into();
    }

    // Relative: resolve against a placeholder origin and strip it again
    let Ok(mut url) = Url::parse(RELATIVE_BASE).and_then(|base| base.join(location))
    else {
        return format!("/?error={code}");
    };
    url.query_pairs_mut().append_pair("error", code);
    url[Position::BeforePath..].to_owned()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cookies::MemoryCookieStore;
    use crate::settings::SessionSettings;
    use crate::testing::{MockProvider, Script};
    use bungie_auth::{AuthorizeEndpoint, TokenCodec};

    fn now() -> OffsetDateTime {
        OffsetDateTime::from_unix_timestamp(1_700_000_000).unwrap()
    }

    fn engine(provider: MockProvider) -> SessionEngine<MockProvider> {
        let settings = SessionSettings {
            allowed_return_origins: vec!["https://app".into()],
            default_return_url: "/home".into(),
            ..SessionSettings::default()
        };
        let authorize = AuthorizeEndpoint::new("https://auth.test/authorize", "client-1").unwrap();
        SessionEngine::new(provider, authorize, TokenCodec::new(b"flow-secret"), settings)
    }

    fn flow_jar(state: &str, callback: &str) -> MemoryCookieStore {
        MemoryCookieStore::new()
            .with("bungie.state", state)
            .with("bungie.callback", callback)
    }

    fn params(code: Option<&str>, state: Option<&str>) -> CallbackParams {
        CallbackParams {
            code: code.map(str::to_owned),
            state: state.map(str::to_owned),
            ..CallbackParams::default()
        }
    }

    fn query(location: &str) -> Vec<(String, String)> {
        Url::parse(location).unwrap().query_pairs().into_owned().collect()
    }

    #[test]
    fn begin_authorize_sets_flow_cookies() {
        let engine = engine(MockProvider::succeeding());
        let mut store = MemoryCookieStore::new();
        let url = engine.begin_authorize(&mut store, Some("/dash"));

        let state = store.get("bungie.state").unwrap();
        assert_eq!(state.len(), 43);
        assert_eq!(store.get("bungie.callback").as_deref(), Some("/dash"));
        let pairs: Vec<(String, String)> = url.query_pairs().into_owned().collect();
        assert!(pairs.contains(&("state".into(), state)));
        assert!(pairs.contains(&("client_id".into(), "client-1".into())));
    }

    #[test]
    fn begin_authorize_rejects_foreign_return_url() {
        let engine = engine(MockProvider::succeeding());
        for url in ["https://evil.test/x", "//evil.test/x", "javascript:alert(1)"] {
            let mut store = MemoryCookieStore::new();
            engine.begin_authorize(&mut store, Some(url));
            assert_eq!(store.get("bungie.callback").as_deref(), Some("/home"), "{url}");
        }
    }

    #[test]
    fn begin_authorize_rejects_paths_browsers_read_as_hosts() {
        let engine = engine(MockProvider::succeeding());
        for url in [
            "/\t/evil.test/x",
            "/\n/evil.test/x",
            "/\r\n/evil.test/x",
            "/\\evil.test/x",
            "/%09/evil.test/x",
            "/%5C/evil.test/x",
            "https://app\t/dash",
        ] {
            let mut store = MemoryCookieStore::new();
            engine.begin_authorize(&mut store, Some(url));
            assert_eq!(store.get("bungie.callback").as_deref(), Some("/home"), "{url:?}");
        }
    }

    #[test]
    fn begin_authorize_keeps_plain_relative_paths() {
        let engine = engine(MockProvider::succeeding());
        for url in ["/", "/dash?tab=1", "/a%20b#frag"] {
            let mut store = MemoryCookieStore::new();
            engine.begin_authorize(&mut store, Some(url));
            assert_eq!(store.get("bungie.callback").as_deref(), Some(url), "{url:?}");
        }
    }

    #[tokio::test]
    async fn callback_from_tampered_cookie_falls_back_to_default() {
        let engine = engine(MockProvider::succeeding());
        let mut store = flow_jar("abc", "/\t/evil.test/x");
        let outcome = engine
            .complete_callback_at(&mut store, params(Some("code-1"), Some("abc")), now())
            .await;
        assert_eq!(outcome.location(), "/home");
    }

    #[test]
    fn begin_authorize_accepts_allowed_origin() {
        let engine = engine(MockProvider::succeeding());
        let mut store = MemoryCookieStore::new();
        engine.begin_authorize(&mut store, Some("https://app/dash"));
        assert_eq!(store.get("bungie.callback").as_deref(), Some("https://app/dash"));
    }

    #[tokio::test]
    async fn state_mismatch_redirects_with_error_and_clears_flow() {
        let engine = engine(MockProvider::succeeding());
        let mut store = flow_jar("abc", "https://app/dash");

        let outcome = engine
            .complete_callback_at(&mut store, params(Some("code-1"), Some("xyz")), now())
            .await;

        assert!(matches!(
            outcome,
            CallbackOutcome::Failed {
                error: CallbackError::StateMismatch,
                ..
            }
        ));
        assert!(outcome.location().starts_with("https://app/dash"));
        assert!(query(outcome.location()).contains(&("error".into(), "state_mismatch".into())));
        assert!(store.is_empty());
        assert_eq!(engine.provider.calls(), 0);
    }

    #[tokio::test]
    async fn missing_state_cookie_is_mismatch() {
        let engine = engine(MockProvider::succeeding());
        let mut store = MemoryCookieStore::new();
        let outcome = engine
            .complete_callback_at(&mut store, params(Some("code-1"), Some("abc")), now())
            .await;
        assert!(matches!(
            outcome,
            CallbackOutcome::Failed {
                error: CallbackError::StateMismatch,
                ..
            }
        ));
        assert_eq!(outcome.location(), "/home?error=state_mismatch");
    }

    #[tokio::test]
    async fn successful_callback_persists_session() {
        let engine = engine(MockProvider::succeeding());
        let mut store = flow_jar("abc", "/dash");

        let outcome = engine
            .complete_callback_at(&mut store, params(Some("code-1"), Some("abc")), now())
            .await;

        assert_eq!(
            outcome,
            CallbackOutcome::Authorized {
                location: "/dash".into(),
                membership_id: "42".into(),
            }
        );
        assert_eq!(
            engine.provider.grants(),
            vec![("authorization_code", String::from("code-1"))]
        );
        assert!(!store.contains("bungie.state"));
        assert!(!store.contains("bungie.callback"));
        let stored = engine.cookies().read(&store);
        assert_eq!(stored.access_token.as_deref(), Some("at_1"));
        assert_eq!(stored.refresh_token.as_deref(), Some("rt_1"));
    }

    #[tokio::test]
    async fn missing_code_is_reported() {
        let engine = engine(MockProvider::succeeding());
        let mut store = flow_jar("abc", "/dash");
        let outcome = engine
            .complete_callback_at(&mut store, params(None, Some("abc")), now())
            .await;
        assert_eq!(outcome.location(), "/dash?error=missing_code");
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn provider_denial_is_forwarded() {
        let engine = engine(MockProvider::succeeding());
        let mut store = flow_jar("abc", "/dash");
        let callback = CallbackParams {
            state: Some("abc".into()),
            error: Some("access_denied".into()),
            ..CallbackParams::default()
        };
        let outcome = engine.complete_callback_at(&mut store, callback, now()).await;
        assert_eq!(outcome.location(), "/dash?error=access_denied");
        assert_eq!(engine.provider.calls(), 0);
    }

    #[tokio::test]
    async fn provider_error_with_wrong_state_is_mismatch() {
        let engine = engine(MockProvider::succeeding());
        let mut store = flow_jar("abc", "/dash");
        let callback = CallbackParams {
            state: Some("forged".into()),
            error: Some("attacker_text".into()),
            ..CallbackParams::default()
        };
        let outcome = engine.complete_callback_at(&mut store, callback, now()).await;
        assert!(matches!(
            outcome,
            CallbackOutcome::Failed {
                error: CallbackError::StateMismatch,
                ..
            }
        ));
        assert_eq!(outcome.location(), "/dash?error=state_mismatch");
    }

    #[tokio::test]
    async fn rejected_code_carries_provider_code() {
        let engine = engine(MockProvider::new(Script::Reject));
        let mut store = flow_jar("abc", "/dash");
        let outcome = engine
            .complete_callback_at(&mut store, params(Some("stale-code"), Some("abc")), now())
            .await;
        assert_eq!(outcome.location(), "/dash?error=invalid_grant");
        assert!(engine.cookies().read(&store).refresh_token.is_none());
    }

    #[tokio::test]
    async fn transport_failure_is_exchange_error() {
        let engine = engine(MockProvider::new(Script::Transport));
        let mut store = flow_jar("abc", "/dash");
        let outcome = engine
            .complete_callback_at(&mut store, params(Some("code"), Some("abc")), now())
            .await;
        assert_eq!(outcome.location(), "/dash?error=token_exchange_failed");
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn deauthorize_clears_session() {
        let engine = engine(MockProvider::succeeding());
        let mut store = flow_jar("abc", "/dash");
        engine
            .complete_callback_at(&mut store, params(Some("code"), Some("abc")), now())
            .await;
        assert!(!store.is_empty());

        assert_eq!(engine.deauthorize(&mut store), SessionView::Unauthorized);
        assert!(store.is_empty());
        assert_eq!(
            engine.derive_at(&mut store, false, now()).await,
            SessionView::Unauthorized
        );
    }

    #[test]
    fn annotate_absolute_and_relative() {
        assert_eq!(
            annotate_return_url("https://app/dash?tab=1", "missing_code"),
            "https://app/dash?tab=1&error=missing_code"
        );
        assert_eq!(annotate_return_url("/dash", "x"), "/dash?error=x");
        assert_eq!(annotate_return_url("/", "x"), "/?error=x");
    }
}
