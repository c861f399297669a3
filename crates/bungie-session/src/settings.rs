//! Tunables for session derivation and the authorization flow

use std::time::Duration;

use crate::cookies::CookieOptions;

/// Default grace period before access expiry that triggers a proactive refresh.
pub const DEFAULT_GRACE_PERIOD: Duration = Duration::from_secs(300);

/// Default lifetime of the state and callback cookies.
pub const DEFAULT_FLOW_MAX_AGE: Duration = Duration::from_secs(15 * 60);

/// Window in which a second refresh with the same token reuses the first result.
pub const DEFAULT_COALESCE_WINDOW: Duration = Duration::from_secs(30);

#[derive(Debug, Clone)]
pub struct SessionSettings {
    pub cookie_prefix: String,
    pub cookie_options: CookieOptions,
    pub grace_period: Duration,
    pub flow_max_age: Duration,
    /// Where the callback lands when no (acceptable) return URL was given.
    pub default_return_url: String,
    /// Origins an absolute return URL may point at. Relative paths are always
    /// accepted.
    pub allowed_return_origins: Vec<String>,
    /// `None` disables refresh coalescing.
    pub coalesce_window: Option<Duration>,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            cookie_prefix: "bungie".into(),
            cookie_options: CookieOptions::default(),
            grace_period: DEFAULT_GRACE_PERIOD,
            flow_max_age: DEFAULT_FLOW_MAX_AGE,
            default_return_url: "/".into(),
            allowed_return_origins: Vec::new(),
            coalesce_window: Some(DEFAULT_COALESCE_WINDOW),
        }
    }
}

/// Convert a std duration for `time` arithmetic, saturating on overflow.
pub(crate) fn to_time(duration: Duration) -> time::Duration {
    time::Duration::try_from(duration).unwrap_or(time::Duration::MAX)
}
