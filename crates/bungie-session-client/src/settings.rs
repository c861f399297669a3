//! Client refresh scheduling settings

use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientSettings {
    /// How long before access expiry the scheduled refresh fires.
    pub time_before_refresh: Duration,
    /// Retry delay while the provider is unavailable.
    pub unavailable_backoff: Duration,
    /// Minimum spacing between fetches started by timers or signals.
    pub min_refresh_interval: Duration,
    /// Keep refreshing while the page is hidden.
    pub refresh_in_background: bool,
}

impl Default for ClientSettings {
    fn default() -> Self {
        Self {
            time_before_refresh: Duration::from_secs(60),
            unavailable_backoff: Duration::from_secs(5 * 60),
            min_refresh_interval: Duration::from_secs(5),
            refresh_in_background: false,
        }
    }
}
