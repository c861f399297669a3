//! Session derivation engine
//!
//! Turns the cookie-backed token state of one request into a [`SessionView`],
//! refreshing through the provider when needed:
//!
//! 1. No membership id or no refresh token → `unauthorized`
//! 2. Not forced, access token present and valid beyond the grace period →
//!    `authorized` without touching the network or the store
//! 3. Otherwise refresh:
//!    - success → write all four cookies, `authorized`
//!    - provider outage → keep cookies, `disabled`
//!    - rejected refresh token → clear cookies, `expired`
//!    - transport or parse failure → keep cookies, `error`
//!
//! A missing access cookie always goes to step 3. The access cookie expires
//! with the access token, so its absence is the normal sign that a refresh is
//! due.

use bungie_auth::{AuthorizeEndpoint, Grant, TokenBundle, TokenCodec, TokenProvider};
use time::OffsetDateTime;
use tracing::{debug, info, warn};

use crate::coalesce::RefreshCoalescer;
use crate::cookies::{CookieStore, SessionCookies, StoredSession};
use crate::outcome::{self, RefreshOutcome, classify_refresh_error};
use crate::settings::{SessionSettings, to_time};
use crate::view::SessionView;

pub struct SessionEngine<P> {
    pub(crate) provider: P,
    pub(crate) cookies: SessionCookies,
    pub(crate) authorize: AuthorizeEndpoint,
    pub(crate) settings: SessionSettings,
    grace_period: time::Duration,
    coalescer: Option<RefreshCoalescer>,
}

impl<P: TokenProvider> SessionEngine<P> {
    pub fn new(
        provider: P,
        authorize: AuthorizeEndpoint,
        codec: TokenCodec,
        settings: SessionSettings,
    ) -> Self {
        let cookies = SessionCookies::new(
            &settings.cookie_prefix,
            settings.cookie_options.clone(),
            to_time(settings.flow_max_age),
            codec,
        );
        Self {
            provider,
            cookies,
            authorize,
            grace_period: to_time(settings.grace_period),
            coalescer: settings.coalesce_window.map(RefreshCoalescer::new),
            settings,
        }
    }

    pub fn cookies(&self) -> &SessionCookies {
        &self.cookies
    }

    pub fn settings(&self) -> &SessionSettings {
        &self.settings
    }

    /// Derive the session for the current request.
    ///
    /// `force` skips the fast path and always spends the refresh token.
    pub async fn derive<S: CookieStore + ?Sized>(&self, store: &mut S, force: bool) -> SessionView {
        self.derive_at(store, force, OffsetDateTime::now_utc()).await
    }

    /// [`derive`](Self::derive) against an explicit clock reading.
    pub async fn derive_at<S: CookieStore + ?Sized>(
        &self,
        store: &mut S,
        force: bool,
        now: OffsetDateTime,
    ) -> SessionView {
        let stored = self.cookies.read(store);
        let view = self.derive_stored(store, stored, force, now).await;
        metrics::counter!("session_derivations_total", "status" => view.status().as_str())
            .increment(1);
        view
    }

    async fn derive_stored<S: CookieStore + ?Sized>(
        &self,
        store: &mut S,
        stored: StoredSession,
        force: bool,
        now: OffsetDateTime,
    ) -> SessionView {
        let (Some(membership_id), Some(refresh_token)) =
            (stored.membership_id, stored.refresh_token)
        else {
            return SessionView::Unauthorized;
        };

        if !force
            && let (Some(access_token), Some(access_expires_at)) =
                (stored.access_token, stored.access_expires_at)
            && access_expires_at - now > self.grace_period
        {
            return SessionView::Authorized {
                membership_id,
                access_token,
                access_expires_at,
            };
        }

        debug!(%membership_id, force, "refreshing session");
        match self.refresh(&membership_id, &refresh_token, now).await {
            Ok((bundle, outcome)) => {
                outcome::record(outcome);
                self.cookies.write_bundle(store, &bundle);
                info!(
                    membership_id = %bundle.membership_id,
                    outcome = outcome.label(),
                    "session refreshed"
                );
                SessionView::Authorized {
                    membership_id: bundle.membership_id,
                    access_token: bundle.access_token,
                    access_expires_at: bundle.access_expires_at,
                }
            }
            Err(e) => {
                let outcome = classify_refresh_error(&e);
                outcome::record(outcome);
                if outcome.clears_session() {
                    self.cookies.clear_session(store);
                }
                match outcome {
                    RefreshOutcome::Outage => {
                        warn!(%membership_id, "provider disabled, keeping session");
                        SessionView::Disabled { membership_id }
                    }
                    RefreshOutcome::Rejected => {
                        info!(%membership_id, error = %e, "refresh token rejected, session cleared");
                        SessionView::Expired
                    }
                    _ => {
                        warn!(%membership_id, error = %e, "refresh failed, keeping session");
                        SessionView::Error
                    }
                }
            }
        }
    }

    async fn refresh(
        &self,
        membership_id: &str,
        refresh_token: &str,
        now: OffsetDateTime,
    ) -> bungie_auth::Result<(TokenBundle, RefreshOutcome)> {
        match &self.coalescer {
            Some(coalescer) => {
                let (bundle, reused) = coalescer
                    .refresh(&self.provider, membership_id, refresh_token, now)
                    .await?;
                let outcome = if reused {
                    RefreshOutcome::Coalesced
                } else {
                    RefreshOutcome::Refreshed
                };
                Ok((bundle, outcome))
            }
            None => {
                let response = self
                    .provider
                    .exchange_token(Grant::RefreshToken(refresh_token))
                    .await?;
                Ok((
                    TokenBundle::from_response(response, now),
                    RefreshOutcome::Refreshed,
                ))
            }
        }
    }
}
