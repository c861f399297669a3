//! Client session state machine
//!
//! Pure transition core: `dispatch` applies one event and returns the I/O the
//! caller must start, `next_refresh_at` says when the caller should fire
//! `TimerFired`. No clocks, timers or network here; the controller supplies
//! `now` and executes commands.
//!
//! Guards:
//! - one fetch in flight at a time; triggers while it runs are dropped
//! - one deauthorize in flight at a time
//! - timer and signal triggers respect `min_refresh_interval` since the last
//!   fetch started
//! - a fetch that was in flight when a deauthorize succeeded is discarded

use std::time::Duration;

use bungie_session::SessionView;
use time::OffsetDateTime;
use tracing::debug;

use crate::settings::ClientSettings;
use crate::state::{ClientError, ClientSessionState, ClientStatus};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    /// The consumer mounted; fetch the session.
    Load,
    /// Explicit user refresh. Always forced, not rate limited.
    Refresh,
    /// The scheduled refresh is due.
    TimerFired,
    FetchSucceeded(SessionView),
    FetchFailed,
    Deauthorize,
    DeauthorizeSucceeded,
    DeauthorizeFailed,
    ConnectivityChanged(bool),
    VisibilityChanged(bool),
}

/// I/O requested by a transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    Fetch { force: bool },
    Deauthorize,
}

#[derive(Debug, Clone)]
pub struct SessionMachine {
    settings: ClientSettings,
    state: ClientSessionState,
    fetching: bool,
    deauthorizing: bool,
    discard_fetch: bool,
    online: bool,
    visible: bool,
    last_fetch_started: Option<OffsetDateTime>,
    last_settled: Option<OffsetDateTime>,
}

impl SessionMachine {
    pub fn new(settings: ClientSettings) -> Self {
        Self {
            settings,
            state: ClientSessionState::default(),
            fetching: false,
            deauthorizing: false,
            discard_fetch: false,
            online: true,
            visible: true,
            last_fetch_started: None,
            last_settled: None,
        }
    }

    pub fn state(&self) -> &ClientSessionState {
        &self.state
    }

    pub fn settings(&self) -> &ClientSettings {
        &self.settings
    }

    /// Apply one event. Returns the command to execute, if any.
    pub fn dispatch(&mut self, event: SessionEvent, now: OffsetDateTime) -> Option<Command> {
        let command = match event {
            SessionEvent::Load => self.start_fetch(now, self.wants_force()),
            SessionEvent::Refresh => self.start_fetch(now, true),
            SessionEvent::TimerFired => {
                if self.conditions_favorable() {
                    self.start_limited_fetch(now)
                } else {
                    None
                }
            }
            SessionEvent::FetchSucceeded(view) => {
                if self.finish_fetch(now) {
                    self.apply_view(view);
                }
                None
            }
            SessionEvent::FetchFailed => {
                if self.finish_fetch(now) {
                    self.apply_failure();
                }
                None
            }
            SessionEvent::Deauthorize => {
                if self.deauthorizing {
                    debug!("deauthorize already in flight");
                    None
                } else {
                    self.deauthorizing = true;
                    Some(Command::Deauthorize)
                }
            }
            SessionEvent::DeauthorizeSucceeded => {
                self.deauthorizing = false;
                self.discard_fetch = self.fetching;
                self.state.status = ClientStatus::Unauthorized;
                self.state.data = None;
                self.state.error = None;
                None
            }
            SessionEvent::DeauthorizeFailed => {
                self.deauthorizing = false;
                self.state.error = Some(self.failure_kind());
                None
            }
            SessionEvent::ConnectivityChanged(online) => {
                let regained = online && !self.online;
                self.online = online;
                self.on_conditions_changed(regained, now)
            }
            SessionEvent::VisibilityChanged(visible) => {
                let regained = visible && !self.visible;
                self.visible = visible;
                self.on_conditions_changed(regained, now)
            }
        };
        self.state.is_fetching = self.fetching || self.deauthorizing;
        command
    }

    /// When the next scheduled refresh is due, or `None` for no timer.
    pub fn next_refresh_at(&self, now: OffsetDateTime) -> Option<OffsetDateTime> {
        if self.fetching || self.deauthorizing || !self.conditions_favorable() {
            return None;
        }

        let due = match self.state.status {
            ClientStatus::Authorized => {
                let expires = self.state.access_expires_at()?;
                let due = expires - to_time(self.settings.time_before_refresh);
                due.max(now + time::Duration::MILLISECOND)
            }
            ClientStatus::Unavailable => {
                self.last_settled.unwrap_or(now) + to_time(self.settings.unavailable_backoff)
            }
            ClientStatus::Stale => self.last_settled.unwrap_or(now),
            ClientStatus::Pending | ClientStatus::Unauthorized => return None,
        };

        Some(match self.rate_limit_until() {
            Some(floor) if floor > due => floor,
            _ => due,
        })
    }

    /// Delay until [`next_refresh_at`](Self::next_refresh_at).
    pub fn next_refresh(&self, now: OffsetDateTime) -> Option<Duration> {
        self.next_refresh_at(now)
            .map(|at| Duration::try_from(at - now).unwrap_or(Duration::ZERO))
    }

    fn start_fetch(&mut self, now: OffsetDateTime, force: bool) -> Option<Command> {
        if self.fetching {
            debug!("fetch already in flight, dropping trigger");
            return None;
        }
        self.fetching = true;
        self.last_fetch_started = Some(now);
        Some(Command::Fetch { force })
    }

    fn start_limited_fetch(&mut self, now: OffsetDateTime) -> Option<Command> {
        if let Some(floor) = self.rate_limit_until()
            && now < floor
        {
            debug!("within minimum refresh interval, skipping fetch");
            return None;
        }
        self.start_fetch(now, self.wants_force())
    }

    fn on_conditions_changed(&mut self, regained: bool, now: OffsetDateTime) -> Option<Command> {
        if regained && self.conditions_favorable() {
            self.start_limited_fetch(now)
        } else {
            None
        }
    }

    /// Clears the in-flight flag. `false` if the result must be ignored.
    fn finish_fetch(&mut self, now: OffsetDateTime) -> bool {
        self.fetching = false;
        self.last_settled = Some(now);
        if self.discard_fetch {
            self.discard_fetch = false;
            debug!("discarding fetch result that raced a deauthorize");
            return false;
        }
        true
    }

    fn apply_view(&mut self, view: SessionView) {
        let data = view.data();
        let (status, error) = match view {
            SessionView::Authorized { .. } => (ClientStatus::Authorized, None),
            SessionView::Stale { .. } => (ClientStatus::Stale, None),
            SessionView::Disabled { .. } => {
                (ClientStatus::Unavailable, Some(ClientError::ProviderOffline))
            }
            SessionView::Unauthorized | SessionView::Expired => (ClientStatus::Unauthorized, None),
            SessionView::Error => {
                // Keep the last known status and data; only flag the error
                if self.state.status == ClientStatus::Pending {
                    self.state.status = ClientStatus::Unavailable;
                }
                self.state.error = Some(ClientError::Server);
                return;
            }
        };
        self.state.status = status;
        self.state.data = data;
        self.state.error = error;
    }

    fn apply_failure(&mut self) {
        if self.state.status == ClientStatus::Pending {
            self.state.status = ClientStatus::Unavailable;
        }
        self.state.error = Some(self.failure_kind());
    }

    fn failure_kind(&self) -> ClientError {
        if self.online {
            ClientError::Client
        } else {
            ClientError::Network
        }
    }

    /// Recovering from an error or a degraded status needs a forced refresh:
    /// a plain fetch could be answered from the server fast path.
    fn wants_force(&self) -> bool {
        self.state.error.is_some()
            || matches!(
                self.state.status,
                ClientStatus::Stale | ClientStatus::Unavailable
            )
    }

    fn conditions_favorable(&self) -> bool {
        self.online && (self.visible || self.settings.refresh_in_background)
    }

    fn rate_limit_until(&self) -> Option<OffsetDateTime> {
        self.last_fetch_started
            .map(|started| started + to_time(self.settings.min_refresh_interval))
    }
}

fn to_time(duration: Duration) -> time::Duration {
    time::Duration::try_from(duration).unwrap_or(time::Duration::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;
    use bungie_session::SessionData;

    fn t0() -> OffsetDateTime {
        OffsetDateTime::from_unix_timestamp(1_700_000_000).unwrap()
    }

    fn secs(n: i64) -> time::Duration {
        time::Duration::seconds(n)
    }

    fn authorized(expires_at: OffsetDateTime) -> SessionView {
        SessionView::Authorized {
            membership_id: "42".into(),
            access_token: "at".into(),
            access_expires_at: expires_at,
        }
    }

    fn settings() -> ClientSettings {
        ClientSettings {
            time_before_refresh: Duration::from_secs(30),
            ..ClientSettings::default()
        }
    }

    /// Machine that loaded once and received `view` at t0.
    fn settled(view: SessionView) -> SessionMachine {
        let mut machine = SessionMachine::new(settings());
        assert_eq!(
            machine.dispatch(SessionEvent::Load, t0()),
            Some(Command::Fetch { force: false })
        );
        machine.dispatch(SessionEvent::FetchSucceeded(view), t0());
        machine
    }

    #[test]
    fn load_marks_fetching_but_stays_pending() {
        let mut machine = SessionMachine::new(settings());
        machine.dispatch(SessionEvent::Load, t0());
        assert!(machine.state().is_pending());
        assert!(machine.state().is_fetching);
        assert_eq!(machine.next_refresh(t0()), None);
    }

    #[test]
    fn authorized_response_sets_data() {
        let machine = settled(authorized(t0() + secs(3600)));
        let state = machine.state();
        assert_eq!(state.status, ClientStatus::Authorized);
        assert_eq!(state.membership_id(), Some("42"));
        assert!(!state.is_fetching);
        assert!(!state.is_error());
    }

    #[test]
    fn refresh_scheduled_before_expiry() {
        let machine = settled(authorized(t0() + time::Duration::milliseconds(40_000)));
        assert_eq!(machine.next_refresh(t0()), Some(Duration::from_millis(10_000)));
    }

    #[test]
    fn overdue_refresh_is_floored_not_immediate() {
        let machine = settled(authorized(t0() + secs(10)));
        // Due 20s ago, but the fetch just started so the interval floor applies
        assert_eq!(machine.next_refresh(t0()), Some(Duration::from_secs(5)));
        // Later on the minimum delay is a millisecond, never negative
        assert_eq!(
            machine.next_refresh(t0() + secs(60)),
            Some(Duration::from_millis(1))
        );
    }

    #[test]
    fn stale_and_disabled_keep_membership() {
        let machine = settled(SessionView::Stale {
            membership_id: "42".into(),
        });
        assert_eq!(machine.state().status, ClientStatus::Stale);
        assert_eq!(machine.state().membership_id(), Some("42"));
        assert_eq!(machine.state().error, None);

        let machine = settled(SessionView::Disabled {
            membership_id: "42".into(),
        });
        assert_eq!(machine.state().status, ClientStatus::Unavailable);
        assert_eq!(
            machine.state().data,
            Some(SessionData::Membership {
                membership_id: "42".into()
            })
        );
        assert_eq!(machine.state().error, Some(ClientError::ProviderOffline));
    }

    #[test]
    fn unavailable_backs_off() {
        let machine = settled(SessionView::Disabled {
            membership_id: "42".into(),
        });
        assert_eq!(machine.next_refresh(t0()), Some(Duration::from_secs(300)));
        assert_eq!(
            machine.next_refresh(t0() + secs(100)),
            Some(Duration::from_secs(200))
        );
    }

    #[test]
    fn unauthorized_and_expired_clear_data_and_schedule_nothing() {
        for view in [SessionView::Unauthorized, SessionView::Expired] {
            let machine = settled(view);
            assert_eq!(machine.state().status, ClientStatus::Unauthorized);
            assert_eq!(machine.state().data, None);
            assert_eq!(machine.next_refresh(t0()), None);
        }
    }

    #[test]
    fn server_error_keeps_known_status_and_data() {
        let mut machine = settled(authorized(t0() + secs(3600)));
        machine.dispatch(SessionEvent::Refresh, t0() + secs(10));
        machine.dispatch(SessionEvent::FetchSucceeded(SessionView::Error), t0() + secs(11));

        let state = machine.state();
        assert_eq!(state.status, ClientStatus::Authorized);
        assert_eq!(state.membership_id(), Some("42"));
        assert_eq!(state.error, Some(ClientError::Server));
        assert!(state.is_error());
    }

    #[test]
    fn server_error_while_pending_is_unavailable() {
        let machine = settled(SessionView::Error);
        assert_eq!(machine.state().status, ClientStatus::Unavailable);
        assert_eq!(machine.state().error, Some(ClientError::Server));
    }

    #[test]
    fn transport_failure_classified_by_connectivity() {
        let mut machine = settled(authorized(t0() + secs(3600)));
        machine.dispatch(SessionEvent::Refresh, t0() + secs(10));
        machine.dispatch(SessionEvent::FetchFailed, t0() + secs(11));
        assert_eq!(machine.state().error, Some(ClientError::Client));
        assert_eq!(machine.state().membership_id(), Some("42"));

        machine.dispatch(SessionEvent::Refresh, t0() + secs(20));
        machine.dispatch(SessionEvent::ConnectivityChanged(false), t0() + secs(20));
        machine.dispatch(SessionEvent::FetchFailed, t0() + secs(21));
        assert_eq!(machine.state().error, Some(ClientError::Network));
        assert_eq!(machine.state().status, ClientStatus::Authorized);
    }

    #[test]
    fn success_clears_error() {
        let mut machine = settled(SessionView::Error);
        assert_eq!(
            machine.dispatch(SessionEvent::Refresh, t0() + secs(1)),
            Some(Command::Fetch { force: true })
        );
        machine.dispatch(
            SessionEvent::FetchSucceeded(authorized(t0() + secs(3600))),
            t0() + secs(2),
        );
        assert_eq!(machine.state().error, None);
        assert_eq!(machine.state().status, ClientStatus::Authorized);
    }

    #[test]
    fn second_trigger_while_fetching_is_dropped() {
        let mut machine = SessionMachine::new(settings());
        assert!(machine.dispatch(SessionEvent::Load, t0()).is_some());
        assert_eq!(machine.dispatch(SessionEvent::Refresh, t0()), None);
        assert_eq!(machine.dispatch(SessionEvent::Refresh, t0()), None);
        assert_eq!(machine.dispatch(SessionEvent::TimerFired, t0() + secs(60)), None);
    }

    #[test]
    fn timer_fetch_forces_after_error() {
        let mut machine = settled(SessionView::Error);
        assert_eq!(
            machine.dispatch(SessionEvent::TimerFired, t0() + secs(300)),
            Some(Command::Fetch { force: true })
        );
    }

    #[test]
    fn timer_fetch_for_healthy_session_is_not_forced() {
        let mut machine = settled(authorized(t0() + secs(3600)));
        assert_eq!(
            machine.dispatch(SessionEvent::TimerFired, t0() + secs(3570)),
            Some(Command::Fetch { force: false })
        );
    }

    #[test]
    fn reconnect_refetches_outside_floor_only() {
        let mut machine = settled(authorized(t0() + secs(3600)));
        machine.dispatch(SessionEvent::ConnectivityChanged(false), t0() + secs(1));
        assert_eq!(machine.next_refresh(t0() + secs(1)), None);

        // Back online within the interval floor: no storm
        assert_eq!(
            machine.dispatch(SessionEvent::ConnectivityChanged(true), t0() + secs(2)),
            None
        );
        machine.dispatch(SessionEvent::ConnectivityChanged(false), t0() + secs(3));
        assert_eq!(
            machine.dispatch(SessionEvent::ConnectivityChanged(true), t0() + secs(10)),
            Some(Command::Fetch { force: false })
        );
    }

    #[test]
    fn repeated_online_signal_is_not_a_transition() {
        let mut machine = settled(authorized(t0() + secs(3600)));
        assert_eq!(
            machine.dispatch(SessionEvent::ConnectivityChanged(true), t0() + secs(60)),
            None
        );
    }

    #[test]
    fn hidden_page_suppresses_timer_unless_background_enabled() {
        let mut machine = settled(authorized(t0() + secs(3600)));
        machine.dispatch(SessionEvent::VisibilityChanged(false), t0() + secs(1));
        assert_eq!(machine.next_refresh(t0() + secs(1)), None);
        assert_eq!(machine.dispatch(SessionEvent::TimerFired, t0() + secs(3570)), None);
        assert_eq!(
            machine.dispatch(SessionEvent::VisibilityChanged(true), t0() + secs(3580)),
            Some(Command::Fetch { force: false })
        );

        let mut machine = SessionMachine::new(ClientSettings {
            refresh_in_background: true,
            ..settings()
        });
        machine.dispatch(SessionEvent::Load, t0());
        machine.dispatch(SessionEvent::FetchSucceeded(authorized(t0() + secs(3600))), t0());
        machine.dispatch(SessionEvent::VisibilityChanged(false), t0() + secs(1));
        assert_eq!(
            machine.next_refresh(t0() + secs(1)),
            Some(Duration::from_secs(3569))
        );
    }

    #[test]
    fn going_offline_keeps_in_flight_fetch() {
        let mut machine = SessionMachine::new(settings());
        machine.dispatch(SessionEvent::Load, t0());
        machine.dispatch(SessionEvent::ConnectivityChanged(false), t0());
        assert!(machine.state().is_fetching);
        machine.dispatch(SessionEvent::FetchSucceeded(authorized(t0() + secs(3600))), t0());
        assert_eq!(machine.state().status, ClientStatus::Authorized);
    }

    #[test]
    fn deauthorize_is_single_flight() {
        let mut machine = settled(authorized(t0() + secs(3600)));
        assert_eq!(
            machine.dispatch(SessionEvent::Deauthorize, t0()),
            Some(Command::Deauthorize)
        );
        assert!(machine.state().is_fetching);
        assert_eq!(machine.dispatch(SessionEvent::Deauthorize, t0()), None);
        machine.dispatch(SessionEvent::DeauthorizeSucceeded, t0());
        assert_eq!(machine.state().status, ClientStatus::Unauthorized);
        assert_eq!(machine.state().data, None);
        assert!(!machine.state().is_fetching);
    }

    #[test]
    fn failed_deauthorize_keeps_data() {
        let mut machine = settled(authorized(t0() + secs(3600)));
        machine.dispatch(SessionEvent::Deauthorize, t0());
        machine.dispatch(SessionEvent::DeauthorizeFailed, t0());
        assert_eq!(machine.state().status, ClientStatus::Authorized);
        assert_eq!(machine.state().membership_id(), Some("42"));
        assert_eq!(machine.state().error, Some(ClientError::Client));
    }

    #[test]
    fn fetch_racing_deauthorize_is_discarded() {
        let mut machine = settled(authorized(t0() + secs(3600)));
        machine.dispatch(SessionEvent::Refresh, t0() + secs(10));
        machine.dispatch(SessionEvent::Deauthorize, t0() + secs(10));
        machine.dispatch(SessionEvent::DeauthorizeSucceeded, t0() + secs(11));
        machine.dispatch(
            SessionEvent::FetchSucceeded(authorized(t0() + secs(7200))),
            t0() + secs(12),
        );
        assert_eq!(machine.state().status, ClientStatus::Unauthorized);
        assert_eq!(machine.state().data, None);
        assert!(!machine.state().is_fetching);

        // The next fetch applies normally
        machine.dispatch(SessionEvent::Refresh, t0() + secs(20));
        machine.dispatch(
            SessionEvent::FetchSucceeded(authorized(t0() + secs(7200))),
            t0() + secs(21),
        );
        assert_eq!(machine.state().status, ClientStatus::Authorized);
    }
}
