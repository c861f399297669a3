//! Bungie.net OAuth authentication library
//!
//! Provides the authorization-code and refresh-token exchanges against the
//! Bungie token endpoint, the token bundle issued by those exchanges, and the
//! cookie codec used to store tokens in the browser. This crate has no notion
//! of cookies or HTTP routing; `bungie-session` builds the session lifecycle
//! on top of it.
//!
//! Token flow:
//! 1. `authorize::generate_state()` + `AuthorizeEndpoint::authorization_url()`
//! 2. Provider redirects back with a code
//! 3. `BungieClient::exchange_token(Grant::AuthorizationCode(..))`
//! 4. `TokenBundle::from_response()` stamps absolute expiries
//! 5. `TokenCodec::seal()` obfuscates tokens for cookie storage
//! 6. `BungieClient::exchange_token(Grant::RefreshToken(..))` replaces the bundle

pub mod authorize;
pub mod bundle;
pub mod codec;
pub mod constants;
pub mod error;
pub mod secret;
pub mod token;

pub use authorize::{AuthorizeEndpoint, generate_state};
pub use bundle::TokenBundle;
pub use codec::TokenCodec;
pub use constants::*;
pub use error::{AuthorizationError, Error, Result};
pub use secret::Secret;
pub use token::{BungieClient, Grant, TokenProvider, TokenResponse};
