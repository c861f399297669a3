//! Cookie-backed Bungie.net sessions
//!
//! Derives the externally visible session state of a request from its
//! cookies, refreshing tokens through a [`bungie_auth::TokenProvider`] when
//! the access token is missing or about to expire, and runs the
//! authorize/callback/deauthorize flow that creates and destroys sessions.
//!
//! Cookie access is always an explicit `&mut impl CookieStore` parameter;
//! the engine holds no per-request state.

pub mod coalesce;
pub mod cookies;
pub mod engine;
pub mod error;
pub mod flow;
pub mod outcome;
pub mod settings;
pub mod view;

#[cfg(test)]
pub(crate) mod testing;

pub use coalesce::RefreshCoalescer;
pub use cookies::{
    CookieAttributes, CookieExpiry, CookieNames, CookieOptions, CookieStore, MemoryCookieStore,
    SameSite, SessionCookies, StoredSession,
};
pub use engine::SessionEngine;
pub use error::{CallbackError, PayloadError};
pub use flow::{CallbackOutcome, CallbackParams, annotate_return_url};
pub use outcome::{RefreshOutcome, classify_refresh_error};
pub use settings::SessionSettings;
pub use view::{SessionData, SessionStatus, SessionView};
