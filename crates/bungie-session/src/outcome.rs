//! Refresh outcome classification
//!
//! Splits a failed refresh into the three recovery policies:
//! - Provider outage → keep cookies, report `disabled`, retry later
//! - Rejected credential → clear cookies, report `expired`
//! - Transport/parse failure → keep cookies, report `error`

use bungie_auth::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefreshOutcome {
    Refreshed,
    /// Served from a concurrent refresh of the same token.
    Coalesced,
    Outage,
    Rejected,
    Transport,
}

impl RefreshOutcome {
    /// Metric label.
    pub fn label(&self) -> &'static str {
        match self {
            RefreshOutcome::Refreshed => "refreshed",
            RefreshOutcome::Coalesced => "coalesced",
            RefreshOutcome::Outage => "outage",
            RefreshOutcome::Rejected => "rejected",
            RefreshOutcome::Transport => "transport",
        }
    }

    /// Whether the session cookies must be deleted.
    pub fn clears_session(&self) -> bool {
        matches!(self, RefreshOutcome::Rejected)
    }
}

/// Classify a failed token exchange.
///
/// The outage sentinel is checked before the generic authorization case: an
/// outage arrives as a structured OAuth error too.
pub fn classify_refresh_error(err: &Error) -> RefreshOutcome {
    if err.is_provider_outage() {
        return RefreshOutcome::Outage;
    }
    match err {
        Error::Authorization(_) => RefreshOutcome::Rejected,
        Error::Transport(_) => RefreshOutcome::Transport,
    }
}

pub(crate) fn record(outcome: RefreshOutcome) {
    metrics::counter!("session_refresh_total", "outcome" => outcome.label()).increment(1);
}
