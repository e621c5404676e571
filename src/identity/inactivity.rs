//! Idle logout.
//!
//! One timer loop plus event-driven resets: UI code reports interactions through
//! [`InactivityMonitor::record`], the loop in [`InactivityMonitor::run`] polls
//! [`InactivityMonitor::tick`] and ends the session through the same logout path
//! as an explicit user action.

use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use super::session::{LogoutReason, SessionContext, SessionEvent};
use crate::config::AdminConfig;

/// Interactions that count as activity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ActivityEvent {
    MouseDown,
    KeyDown,
    TouchStart,
    Scroll,
    Click,
}

impl ActivityEvent {
    pub const ALL: [ActivityEvent; 5] = [
        ActivityEvent::MouseDown,
        ActivityEvent::KeyDown,
        ActivityEvent::TouchStart,
        ActivityEvent::Scroll,
        ActivityEvent::Click,
    ];

    pub fn dom_name(&self) -> &'static str {
        match self {
            ActivityEvent::MouseDown => "mousedown",
            ActivityEvent::KeyDown => "keydown",
            ActivityEvent::TouchStart => "touchstart",
            ActivityEvent::Scroll => "scroll",
            ActivityEvent::Click => "click",
        }
    }

    pub fn from_dom_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|e| e.dom_name().eq_ignore_ascii_case(name.trim()))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActivityState {
    Active,
    Warning { remaining_secs: u64 },
    LoggedOut,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InactivitySettings {
    pub timeout: Duration,
    /// How long before `timeout` the warning appears.
    pub warning_lead: Duration,
    pub poll_interval: Duration,
}

impl InactivitySettings {
    pub fn from_config(cfg: &AdminConfig) -> Self {
        Self { timeout: cfg.idle_timeout(), warning_lead: cfg.idle_warning_lead(), poll_interval: cfg.idle_poll_interval() }
    }

    fn warn_after(&self) -> Duration { self.timeout.saturating_sub(self.warning_lead) }
}

fn ceil_secs(d: Duration) -> u64 {
    d.as_secs() + u64::from(d.subsec_nanos() > 0)
}

#[derive(Debug)]
struct Tracker {
    last_activity: Instant,
    state: ActivityState,
}

pub struct InactivityMonitor {
    settings: InactivitySettings,
    tracker: Mutex<Tracker>,
}

impl InactivityMonitor {
    pub fn new(settings: InactivitySettings, now: Instant) -> Self {
        Self { settings, tracker: Mutex::new(Tracker { last_activity: now, state: ActivityState::Active }) }
    }

    pub fn settings(&self) -> InactivitySettings { self.settings }

    pub fn state(&self) -> ActivityState { self.tracker.lock().state }

    pub fn idle_for(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.tracker.lock().last_activity)
    }

    /// Reset the idle clock; clears a pending warning. No effect once logged out.
    pub fn record(&self, event: ActivityEvent, now: Instant) -> ActivityState {
        let mut t = self.tracker.lock();
        if t.state == ActivityState::LoggedOut { return t.state; }
        if now > t.last_activity {
            t.last_activity = now;
        }
        if let ActivityState::Warning { .. } = t.state {
            debug!(event = event.dom_name(), "activity cleared idle warning");
        }
        t.state = ActivityState::Active;
        t.state
    }

    /// The "stay logged in" button: same effect as any activity.
    pub fn stay_logged_in(&self, now: Instant) -> ActivityState {
        self.record(ActivityEvent::Click, now)
    }

    /// Re-arm for a new session: fresh clock, `Active`, even after `LoggedOut`.
    pub fn reset(&self, now: Instant) {
        let mut t = self.tracker.lock();
        t.last_activity = now;
        t.state = ActivityState::Active;
    }

    pub fn tick(&self, now: Instant) -> ActivityState {
        let mut t = self.tracker.lock();
        if t.state == ActivityState::LoggedOut { return t.state; }
        let idle = now.saturating_duration_since(t.last_activity);
        t.state = if idle >= self.settings.timeout {
            ActivityState::LoggedOut
        } else if idle >= self.settings.warn_after() {
            ActivityState::Warning { remaining_secs: ceil_secs(self.settings.timeout - idle) }
        } else {
            ActivityState::Active
        };
        t.state
    }

    /// Poll until the idle timeout fires, the session ends elsewhere, or `shutdown`
    /// flips to true (or its sender is dropped). Returns the final state.
    ///
    /// The monitor is re-armed on entry, so one monitor can watch successive sessions.
    pub async fn run(self: Arc<Self>, session: Arc<SessionContext>, mut shutdown: watch::Receiver<bool>) -> ActivityState {
        self.reset(Instant::now());
        let mut ticker = tokio::time::interval(self.settings.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut warned = false;
        loop {
            tokio::select! {
                _ = ticker.tick() => {}
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        debug!("inactivity monitor stopped");
                        return self.state();
                    }
                    continue;
                }
            }
            if !session.is_authenticated() {
                debug!("session no longer authenticated; inactivity monitor exiting");
                return self.state();
            }
            match self.tick(Instant::now()) {
                ActivityState::Active => {
                    if warned {
                        warned = false;
                        session.notify(SessionEvent::IdleWarningCleared);
                    }
                }
                ActivityState::Warning { remaining_secs } => {
                    if !warned {
                        info!(remaining_secs, "idle warning raised");
                    }
                    warned = true;
                    session.notify(SessionEvent::IdleWarning { remaining_secs });
                }
                ActivityState::LoggedOut => {
                    info!(timeout_secs = self.settings.timeout.as_secs(), "idle timeout reached; logging out");
                    if let Err(e) = session.logout(LogoutReason::Inactivity).await {
                        warn!(error = %e, "idle logout incomplete");
                    }
                    return ActivityState::LoggedOut;
                }
            }
        }
    }
}
