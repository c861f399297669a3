//! tokio driver for the session state machine
//!
//! Owns the [`SessionMachine`] behind a mutex and performs the I/O its
//! transitions ask for:
//! - fetch/deauthorize commands run as spawned tasks that dispatch their
//!   result back as an event
//! - a single refresh timer, replaced whenever the due time changes
//! - connectivity and visibility `watch` channels forwarded as events
//!
//! Listeners are called outside any lock, only when the state changed. Each
//! change is versioned under the machine lock and delivered in version order;
//! a change that is overtaken before delivery is skipped, so the last state a
//! listener sees is always the current one.
//! After `unmount` results of in-flight calls are dropped; the calls
//! themselves are left to finish.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;

use time::OffsetDateTime;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::clock::{Clock, SystemClock};
use crate::machine::{Command, SessionEvent, SessionMachine};
use crate::settings::ClientSettings;
use crate::state::ClientSessionState;
use crate::transport::SessionTransport;

type Listener = Arc<dyn Fn(&ClientSessionState) + Send + Sync>;

#[derive(Default)]
struct Listeners {
    next_id: u64,
    entries: Vec<(u64, Listener)>,
    /// Version last handed to listeners.
    delivered: u64,
    /// Newest undelivered change.
    pending: Option<(u64, ClientSessionState)>,
    /// A thread is currently running listeners.
    delivering: bool,
}

/// Handle returned by [`SessionController::subscribe`]. Dropping it
/// unsubscribes.
pub struct Subscription {
    id: u64,
    listeners: Weak<Mutex<Listeners>>,
}

impl Subscription {
    pub fn unsubscribe(self) {}
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(listeners) = self.listeners.upgrade() {
            let mut listeners = listeners.lock().unwrap_or_else(PoisonError::into_inner);
            listeners.entries.retain(|(id, _)| *id != self.id);
        }
    }
}

struct Core {
    machine: SessionMachine,
    alive: bool,
    version: u64,
    timer: Option<(OffsetDateTime, JoinHandle<()>)>,
    signals: Vec<JoinHandle<()>>,
}

struct Inner<T> {
    transport: T,
    clock: Arc<dyn Clock>,
    core: Mutex<Core>,
    listeners: Arc<Mutex<Listeners>>,
}

/// Reactive session state container.
///
/// Every method that can trigger I/O must be called inside a tokio runtime.
pub struct SessionController<T: SessionTransport + 'static> {
    inner: Arc<Inner<T>>,
}

impl<T: SessionTransport + 'static> SessionController<T> {
    pub fn new(transport: T, settings: ClientSettings) -> Self {
        Self::with_clock(transport, settings, Arc::new(SystemClock))
    }

    pub fn with_clock(transport: T, settings: ClientSettings, clock: Arc<dyn Clock>) -> Self {
        Self {
            inner: Arc::new(Inner {
                transport,
                clock,
                core: Mutex::new(Core {
                    machine: SessionMachine::new(settings),
                    alive: true,
                    version: 0,
                    timer: None,
                    signals: Vec::new(),
                }),
                listeners: Arc::default(),
            }),
        }
    }

    /// Start: fetch the session and keep it refreshed.
    pub fn mount(&self) {
        self.inner.lock_core().alive = true;
        self.dispatch(SessionEvent::Load);
    }

    /// Stop applying updates, cancel the timer and signal forwarding.
    pub fn unmount(&self) {
        let mut core = self.inner.lock_core();
        core.alive = false;
        if let Some((_, timer)) = core.timer.take() {
            timer.abort();
        }
        for task in core.signals.drain(..) {
            task.abort();
        }
        debug!("session controller unmounted");
    }

    pub fn state(&self) -> ClientSessionState {
        self.inner.lock_core().machine.state().clone()
    }

    /// When the scheduled refresh will fire, if one is scheduled.
    pub fn next_refresh_at(&self) -> Option<OffsetDateTime> {
        self.inner.lock_core().timer.as_ref().map(|(due, _)| *due)
    }

    pub fn dispatch(&self, event: SessionEvent) {
        self.inner.dispatch(event);
    }

    pub fn refresh(&self) {
        self.dispatch(SessionEvent::Refresh);
    }

    pub fn deauthorize(&self) {
        self.dispatch(SessionEvent::Deauthorize);
    }

    pub fn subscribe<F>(&self, listener: F) -> Subscription
    where
        F: Fn(&ClientSessionState) + Send + Sync + 'static,
    {
        let mut listeners = self
            .inner
            .listeners
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        listeners.next_id += 1;
        let id = listeners.next_id;
        listeners.entries.push((id, Arc::new(listener)));
        Subscription {
            id,
            listeners: Arc::downgrade(&self.inner.listeners),
        }
    }

    /// Follow connectivity and visibility. Current values apply immediately.
    pub fn attach_signals(
        &self,
        connectivity: watch::Receiver<bool>,
        visibility: watch::Receiver<bool>,
    ) {
        let tasks = [
            self.forward(connectivity, SessionEvent::ConnectivityChanged),
            self.forward(visibility, SessionEvent::VisibilityChanged),
        ];
        self.inner.lock_core().signals.extend(tasks);
    }

    fn forward(
        &self,
        mut signal: watch::Receiver<bool>,
        event: fn(bool) -> SessionEvent,
    ) -> JoinHandle<()> {
        let initial = *signal.borrow_and_update();
        self.dispatch(event(initial));

        let inner = Arc::downgrade(&self.inner);
        tokio::spawn(async move {
            while signal.changed().await.is_ok() {
                let value = *signal.borrow_and_update();
                let Some(inner) = inner.upgrade() else {
                    break;
                };
                inner.dispatch(event(value));
            }
        })
    }
}

impl<T: SessionTransport + 'static> Drop for SessionController<T> {
    fn drop(&mut self) {
        self.unmount();
    }
}

impl<T: SessionTransport + 'static> Inner<T> {
    fn lock_core(&self) -> MutexGuard<'_, Core> {
        self.core.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn dispatch(self: &Arc<Self>, event: SessionEvent) {
        let (command, changed) = {
            let mut core = self.lock_core();
            if !core.alive {
                debug!("controller unmounted, dropping event");
                return;
            }
            let now = self.clock.now();
            let before = core.machine.state().clone();
            let command = core.machine.dispatch(event, now);
            self.reschedule(&mut core, now);
            let after = core.machine.state().clone();
            let changed = if after != before {
                core.version += 1;
                Some((core.version, after))
            } else {
                None
            };
            (command, changed)
        };

        if let Some((version, state)) = changed {
            self.notify(version, state);
        }
        if let Some(command) = command {
            self.execute(command);
        }
    }

    fn reschedule(self: &Arc<Self>, core: &mut Core, now: OffsetDateTime) {
        let due = core.machine.next_refresh_at(now);
        if let Some((current, timer)) = &core.timer
            && Some(*current) == due
            && !timer.is_finished()
        {
            return;
        }
        if let Some((_, timer)) = core.timer.take() {
            timer.abort();
        }
        let Some(due) = due else {
            return;
        };

        let delay = Duration::try_from(due - now).unwrap_or(Duration::ZERO);
        debug!(delay_ms = delay.as_millis() as u64, "session refresh scheduled");
        let inner = Arc::downgrade(self);
        let timer = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if let Some(inner) = inner.upgrade() {
                {
                    // A reschedule may have replaced this timer after the sleep ended
                    let mut core = inner.lock_core();
                    if core.timer.as_ref().is_some_and(|(at, _)| *at == due) {
                        core.timer = None;
                    }
                }
                inner.dispatch(SessionEvent::TimerFired);
            }
        });
        core.timer = Some((due, timer));
    }

    /// Deliver `state` unless something newer was already delivered. When
    /// another call is mid-delivery the state is parked for it to pick up,
    /// which also covers listeners that dispatch from inside the callback.
    fn notify(&self, version: u64, state: ClientSessionState) {
        let lock = || self.listeners.lock().unwrap_or_else(PoisonError::into_inner);
        let mut listeners = lock();
        if version <= listeners.delivered
            || listeners.pending.as_ref().is_some_and(|(v, _)| *v >= version)
        {
            return;
        }
        listeners.pending = Some((version, state));
        if listeners.delivering {
            return;
        }
        listeners.delivering = true;

        while let Some((version, state)) = listeners.pending.take() {
            listeners.delivered = version;
            let targets: Vec<Listener> = listeners
                .entries
                .iter()
                .map(|(_, listener)| Arc::clone(listener))
                .collect();
            drop(listeners);
            for listener in targets {
                listener(&state);
            }
            listeners = lock();
        }
        listeners.delivering = false;
    }

    fn execute(self: &Arc<Self>, command: Command) {
        let inner = Arc::clone(self);
        tokio::spawn(async move {
            let event = match command {
                Command::Fetch { force } => match inner.transport.fetch(force).await {
                    Ok(view) => SessionEvent::FetchSucceeded(view),
                    Err(e) => {
                        warn!(error = %e, force, "session fetch failed");
                        SessionEvent::FetchFailed
                    }
                },
                Command::Deauthorize => match inner.transport.deauthorize().await {
                    Ok(_) => SessionEvent::DeauthorizeSucceeded,
                    Err(e) => {
                        warn!(error = %e, "deauthorize failed");
                        SessionEvent::DeauthorizeFailed
                    }
                },
            };
            inner.dispatch(event);
        });
    }
}
