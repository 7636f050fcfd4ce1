// crates/core/src/observe.rs
//! Logic shared by both watchers: classification, transition detection,
//! and callback/bus fan-out.

use std::fmt;
use std::sync::Arc;

use runwatch_types::{RunId, RunStatus, StatusClass, StatusRecord};
use tracing::{debug, warn};

use crate::bus::{RunEvent, StatusBus};
use crate::error::WatchError;

/// What a watcher should do after observing a status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatchAction {
    /// Keep observing.
    Continue,
    /// Stop autonomous observation until the human action is confirmed.
    PauseForUser,
    /// Stop for good.
    Finish,
}

pub fn classify(status: &RunStatus) -> WatchAction {
    match status.class() {
        StatusClass::Active => WatchAction::Continue,
        StatusClass::WaitingForUser => WatchAction::PauseForUser,
        StatusClass::Terminal => WatchAction::Finish,
    }
}

/// Remembers the previous status value so repeats can be told apart from
/// transitions.
#[derive(Debug, Default, Clone)]
pub struct TransitionTracker {
    previous: Option<RunStatus>,
}

impl TransitionTracker {
    /// Returns `true` when `status` differs from the last observed value.
    /// The first observation always counts as a transition.
    pub fn observe(&mut self, status: &RunStatus) -> bool {
        if self.previous.as_ref() == Some(status) {
            return false;
        }
        self.previous = Some(status.clone());
        true
    }
}

type RecordFn = Arc<dyn Fn(&StatusRecord) + Send + Sync>;
type ErrorFn = Arc<dyn Fn(&WatchError) + Send + Sync>;

/// Caller-supplied hooks. Every hook is optional.
#[derive(Clone, Default)]
pub struct WatchCallbacks {
    on_status_change: Option<RecordFn>,
    on_waiting_for_user: Option<RecordFn>,
    on_complete: Option<RecordFn>,
    on_error: Option<ErrorFn>,
}

impl WatchCallbacks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fires once per status transition.
    pub fn on_status_change(mut self, f: impl Fn(&StatusRecord) + Send + Sync + 'static) -> Self {
        self.on_status_change = Some(Arc::new(f));
        self
    }

    /// Fires when the run pauses for a human action.
    pub fn on_waiting_for_user(
        mut self,
        f: impl Fn(&StatusRecord) + Send + Sync + 'static,
    ) -> Self {
        self.on_waiting_for_user = Some(Arc::new(f));
        self
    }

    /// Fires once when a Terminal status is observed.
    pub fn on_complete(mut self, f: impl Fn(&StatusRecord) + Send + Sync + 'static) -> Self {
        self.on_complete = Some(Arc::new(f));
        self
    }

    pub fn on_error(mut self, f: impl Fn(&WatchError) + Send + Sync + 'static) -> Self {
        self.on_error = Some(Arc::new(f));
        self
    }
}

impl fmt::Debug for WatchCallbacks {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WatchCallbacks")
            .field("on_status_change", &self.on_status_change.is_some())
            .field("on_waiting_for_user", &self.on_waiting_for_user.is_some())
            .field("on_complete", &self.on_complete.is_some())
            .field("on_error", &self.on_error.is_some())
            .finish()
    }
}

/// Result of feeding one record to an [`Observer`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Observation {
    pub changed: bool,
    pub action: WatchAction,
}

/// Per-session fan-out of observations to callbacks and the bus.
pub(crate) struct Observer {
    run_id: RunId,
    tracker: TransitionTracker,
    callbacks: WatchCallbacks,
    bus: Option<StatusBus>,
}

impl Observer {
    pub(crate) fn new(run_id: RunId, callbacks: WatchCallbacks, bus: Option<StatusBus>) -> Self {
        Self {
            run_id,
            tracker: TransitionTracker::default(),
            callbacks,
            bus,
        }
    }

    pub(crate) fn run_id(&self) -> &RunId {
        &self.run_id
    }

    /// Record an observation, firing the status-changed hook on transitions.
    pub(crate) fn observe(&mut self, record: &StatusRecord) -> Observation {
        let changed = self.tracker.observe(&record.status);
        if changed {
            debug!(run_id = %self.run_id, status = %record.status, "status transition");
            if let Some(f) = &self.callbacks.on_status_change {
                f(record);
            }
            self.publish(RunEvent::StatusChanged(record.clone()));
        }
        Observation {
            changed,
            action: classify(&record.status),
        }
    }

    pub(crate) fn notify_waiting(&self, record: &StatusRecord) {
        if let Some(f) = &self.callbacks.on_waiting_for_user {
            f(record);
        }
        self.publish(RunEvent::WaitingForUser(record.clone()));
    }

    pub(crate) fn notify_complete(&self, record: &StatusRecord) {
        if let Some(f) = &self.callbacks.on_complete {
            f(record);
        }
        self.publish(RunEvent::Completed(record.clone()));
    }

    pub(crate) fn notify_error(&self, error: &WatchError) {
        warn!(run_id = %self.run_id, kind = error.kind(), "{error}");
        if let Some(f) = &self.callbacks.on_error {
            f(error);
        }
        self.publish(RunEvent::Error {
            run_id: self.run_id.clone(),
            error: error.clone(),
        });
    }

    fn publish(&self, event: RunEvent) {
        if let Some(bus) = &self.bus {
            bus.publish(event);
        }
    }
}
