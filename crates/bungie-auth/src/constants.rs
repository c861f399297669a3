//! Bungie.net OAuth constants
//!
//! Endpoint defaults for the public Bungie.net OAuth service. Both endpoints
//! can be overridden in configuration (useful for staging and for tests).

/// Authorization endpoint the browser is redirected to
pub const AUTHORIZE_ENDPOINT: &str = "https://www.bungie.net/en/OAuth/Authorize";

/// Token endpoint for code exchange and token refresh
pub const TOKEN_ENDPOINT: &str = "https://www.bungie.net/Platform/App/OAuth/Token/";

/// `error_description` the token endpoint returns while the whole Bungie.net
/// platform is disabled for maintenance. Individual credentials are still
/// valid in that case; retry later instead of forcing re-authorization.
pub const SYSTEM_DISABLED: &str = "SystemDisabled";
