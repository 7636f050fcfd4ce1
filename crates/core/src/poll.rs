// crates/core/src/poll.rs
//! Poll watcher: repeated single-shot status fetches.
//!
//! One session task per started run. The task owns the in-flight fetch, the
//! next-fetch deadline and the timeout clock; the [`PollWatcher`] handle
//! talks to it over a command channel and readers follow a `watch`
//! snapshot.
//!
//! Scheduling by status class:
//! - Active: fetch again after `active_interval` (2s by default)
//! - Waiting-for-user: stop scheduling until `resume()` confirms the action
//! - Terminal: stop for good
//!
//! Failures (fetch error, timeout) end the session. There is no automatic
//! retry; `resume()` or a fresh `start()` is the only way back.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use futures_util::future::BoxFuture;
use runwatch_types::{RunId, StatusRecord};
use serde_json::Value;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::{sleep_until, Instant};
use tracing::{debug, info};

use crate::backend::RunBackend;
use crate::bus::StatusBus;
use crate::config::PollConfig;
use crate::error::{BackendError, WatchError};
use crate::observe::{classify, Observer, WatchAction, WatchCallbacks};
use crate::snapshot::SnapshotPublisher;

/// Explicit per-session state of the poll watcher.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PollPhase {
    /// Never started.
    #[default]
    Idle,
    /// A fetch is in flight.
    Fetching,
    /// The next fetch is scheduled.
    Scheduled,
    /// Paused until the pending human action is confirmed.
    WaitingForUser,
    /// Stopped by the caller, a terminal status, a timeout or an error.
    Stopped,
}

/// What callers can read about a poll watcher at any time.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PollSnapshot {
    pub run_id: Option<RunId>,
    /// Latest observed record.
    pub status: Option<StatusRecord>,
    /// Last fatal error.
    pub error: Option<WatchError>,
    pub phase: PollPhase,
}

impl PollSnapshot {
    pub fn is_observing(&self) -> bool {
        matches!(self.phase, PollPhase::Fetching | PollPhase::Scheduled)
    }

    pub fn is_waiting_for_user(&self) -> bool {
        self.phase == PollPhase::WaitingForUser
    }
}

enum PollCommand {
    Refresh,
    Resume {
        payload: Option<Value>,
        reply: oneshot::Sender<Result<bool, WatchError>>,
    },
}

struct SessionHandle {
    commands: mpsc::UnboundedSender<PollCommand>,
    task: JoinHandle<()>,
}

/// Observes one run at a time by polling a [`RunBackend`].
///
/// Must be started from within a tokio runtime. Dropping the watcher stops
/// any running session.
pub struct PollWatcher {
    backend: Arc<dyn RunBackend>,
    config: PollConfig,
    bus: Option<StatusBus>,
    snapshot: Arc<watch::Sender<PollSnapshot>>,
    generation: Arc<AtomicU64>,
    session: Mutex<Option<SessionHandle>>,
}

impl PollWatcher {
    pub fn new(backend: Arc<dyn RunBackend>, config: PollConfig) -> Self {
        let (snapshot, _) = watch::channel(PollSnapshot::default());
        Self {
            backend,
            config,
            bus: None,
            snapshot: Arc::new(snapshot),
            generation: Arc::new(AtomicU64::new(0)),
            session: Mutex::new(None),
        }
    }

    /// Publish every observation of this watcher to `bus` as well.
    pub fn with_bus(mut self, bus: StatusBus) -> Self {
        self.bus = Some(bus);
        self
    }

    /// Begin observing `run_id`, replacing any previous session.
    ///
    /// The first fetch happens immediately and the timeout clock starts now.
    pub fn start(&self, run_id: impl Into<RunId>, callbacks: WatchCallbacks) {
        let run_id = run_id.into();
        self.stop_session();
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;

        let retain = self.config.retain_last_status;
        self.snapshot.send_modify(|snapshot| {
            let status = snapshot
                .status
                .take()
                .filter(|record| retain && record.id == run_id);
            *snapshot = PollSnapshot {
                run_id: Some(run_id.clone()),
                status,
                error: None,
                phase: PollPhase::Scheduled,
            };
        });

        let (commands, rx) = mpsc::unbounded_channel();
        let now = Instant::now();
        let session = PollSession {
            backend: Arc::clone(&self.backend),
            config: self.config.clone(),
            observer: Observer::new(run_id.clone(), callbacks, self.bus.clone()),
            publisher: SnapshotPublisher::new(
                Arc::clone(&self.snapshot),
                Arc::clone(&self.generation),
                generation,
            ),
            commands: rx,
            phase: PollPhase::Scheduled,
            started_at: now,
            next_fetch: Some(now),
            in_flight: None,
            waiting_record: None,
        };
        let task = tokio::spawn(session.run());
        *self.lock_session() = Some(SessionHandle { commands, task });

        info!(
            run_id = %run_id,
            interval_ms = as_millis(self.config.active_interval),
            timeout_ms = as_millis(self.config.timeout),
            "poll watcher started"
        );
    }

    /// Fetch now instead of waiting for the next scheduled tick.
    ///
    /// Ignored while a fetch is in flight or when the watcher is not
    /// actively polling.
    pub fn refresh(&self) {
        if let Some(session) = self.lock_session().as_ref() {
            let _ = session.commands.send(PollCommand::Refresh);
        }
    }

    /// Confirm the pending human action and resume polling.
    ///
    /// Returns `Ok(false)` without contacting the backend unless the watcher
    /// is currently paused in the waiting state. On success the timeout
    /// clock restarts and a fetch is issued immediately.
    pub async fn resume(&self, payload: Option<Value>) -> Result<bool, WatchError> {
        let (reply, outcome) = oneshot::channel();
        {
            let session = self.lock_session();
            let Some(session) = session.as_ref() else {
                return Ok(false);
            };
            if session
                .commands
                .send(PollCommand::Resume { payload, reply })
                .is_err()
            {
                return Ok(false);
            }
        }
        // A dropped reply means the session was stopped mid-confirmation.
        outcome.await.unwrap_or(Ok(false))
    }

    /// Stop observing. Idempotent.
    pub fn stop(&self) {
        if self.stop_session() {
            info!("poll watcher stopped");
        }
    }

    pub fn snapshot(&self) -> PollSnapshot {
        self.snapshot.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<PollSnapshot> {
        self.snapshot.subscribe()
    }

    pub fn status(&self) -> Option<StatusRecord> {
        self.snapshot.borrow().status.clone()
    }

    pub fn error(&self) -> Option<WatchError> {
        self.snapshot.borrow().error.clone()
    }

    pub fn is_observing(&self) -> bool {
        self.snapshot.borrow().is_observing()
    }

    pub fn is_waiting_for_user(&self) -> bool {
        self.snapshot.borrow().is_waiting_for_user()
    }

    fn stop_session(&self) -> bool {
        let session = self.lock_session().take();
        self.generation.fetch_add(1, Ordering::SeqCst);
        self.snapshot.send_if_modified(|snapshot| {
            if matches!(snapshot.phase, PollPhase::Idle | PollPhase::Stopped) {
                return false;
            }
            snapshot.phase = PollPhase::Stopped;
            true
        });
        match session {
            Some(session) => {
                session.task.abort();
                true
            }
            None => false,
        }
    }

    fn lock_session(&self) -> MutexGuard<'_, Option<SessionHandle>> {
        self.session.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Drop for PollWatcher {
    fn drop(&mut self) {
        self.stop_session();
    }
}

// =============================================================================
// Session task
// =============================================================================

type FetchFuture = BoxFuture<'static, Result<StatusRecord, BackendError>>;

struct PollSession {
    backend: Arc<dyn RunBackend>,
    config: PollConfig,
    observer: Observer,
    publisher: SnapshotPublisher<PollSnapshot>,
    commands: mpsc::UnboundedReceiver<PollCommand>,
    phase: PollPhase,
    started_at: Instant,
    next_fetch: Option<Instant>,
    in_flight: Option<FetchFuture>,
    waiting_record: Option<StatusRecord>,
}

impl PollSession {
    async fn run(mut self) {
        loop {
            let wake_at = self.next_fetch.unwrap_or_else(Instant::now);
            tokio::select! {
                result = in_flight_result(&mut self.in_flight), if self.in_flight.is_some() => {
                    self.in_flight = None;
                    self.on_fetch_result(result);
                }
                _ = sleep_until(wake_at), if self.next_fetch.is_some() => {
                    self.next_fetch = None;
                    self.begin_fetch();
                }
                command = self.commands.recv() => match command {
                    Some(command) => self.handle(command).await,
                    // Watcher handle dropped.
                    None => break,
                },
            }
            if self.phase == PollPhase::Stopped {
                break;
            }
        }
        debug!(run_id = %self.observer.run_id(), "poll session ended");
    }

    async fn handle(&mut self, command: PollCommand) {
        match command {
            PollCommand::Refresh => self.refresh(),
            PollCommand::Resume { payload, reply } => {
                let outcome = self.resume(payload).await;
                let _ = reply.send(outcome);
            }
        }
    }

    fn refresh(&mut self) {
        if self.phase == PollPhase::Scheduled && self.in_flight.is_none() {
            debug!(run_id = %self.observer.run_id(), "manual refresh");
            // The refreshed fetch reschedules on success, so the pending
            // tick is dropped to keep a single polling chain.
            self.next_fetch = None;
            self.begin_fetch();
        } else {
            debug!(phase = ?self.phase, "refresh ignored");
        }
    }

    fn begin_fetch(&mut self) {
        if self.in_flight.is_some() {
            debug!("fetch already in flight; skipping");
            return;
        }
        let elapsed = self.started_at.elapsed();
        if elapsed > self.config.timeout {
            self.fail(WatchError::Timeout {
                elapsed_ms: as_millis(elapsed),
                budget_ms: as_millis(self.config.timeout),
            });
            return;
        }

        self.phase = PollPhase::Fetching;
        self.publisher.update(|s| s.phase = PollPhase::Fetching);
        let backend = Arc::clone(&self.backend);
        let run_id = self.observer.run_id().clone();
        self.in_flight = Some(Box::pin(async move { backend.fetch_status(&run_id).await }));
    }

    fn on_fetch_result(&mut self, result: Result<StatusRecord, BackendError>) {
        if !self.publisher.is_current() {
            return;
        }
        let record = match result {
            Ok(record) => record,
            Err(err) => {
                self.fail(err.into());
                return;
            }
        };
        if &record.id != self.observer.run_id() {
            self.fail(WatchError::Protocol(format!(
                "received status for run {} while watching {}",
                record.id,
                self.observer.run_id()
            )));
            return;
        }

        let action = classify(&record.status);
        self.phase = match action {
            WatchAction::Continue => {
                self.next_fetch = Some(Instant::now() + self.config.active_interval);
                PollPhase::Scheduled
            }
            WatchAction::PauseForUser => PollPhase::WaitingForUser,
            WatchAction::Finish => PollPhase::Stopped,
        };
        let phase = self.phase;
        self.publisher.update(|s| {
            s.status = Some(record.clone());
            s.phase = phase;
        });

        self.observer.observe(&record);
        match action {
            WatchAction::Continue => {}
            WatchAction::PauseForUser => {
                info!(
                    run_id = %record.id,
                    action = record.user_action_required.as_deref().unwrap_or("-"),
                    "run waiting for user; polling paused"
                );
                self.observer.notify_waiting(&record);
                self.waiting_record = Some(record);
            }
            WatchAction::Finish => {
                info!(run_id = %record.id, status = %record.status, "run finished; polling stopped");
                self.observer.notify_complete(&record);
            }
        }
    }

    async fn resume(&mut self, payload: Option<Value>) -> Result<bool, WatchError> {
        if self.phase != PollPhase::WaitingForUser {
            debug!(phase = ?self.phase, "resume ignored; run is not waiting");
            return Ok(false);
        }
        let action = self
            .waiting_record
            .as_ref()
            .and_then(|record| record.user_action_required.clone());
        let run_id = self.observer.run_id().clone();

        match self
            .backend
            .confirm_action(&run_id, action.as_deref(), payload)
            .await
        {
            Ok(_) => {
                info!(run_id = %run_id, action = action.as_deref().unwrap_or("-"), "action confirmed; resuming");
                self.waiting_record = None;
                self.started_at = Instant::now();
                self.publisher.update(|s| s.error = None);
                self.begin_fetch();
                Ok(true)
            }
            Err(err) => {
                let error = WatchError::Confirmation(err.to_string());
                self.publisher.update(|s| s.error = Some(error.clone()));
                self.observer.notify_error(&error);
                Err(error)
            }
        }
    }

    fn fail(&mut self, error: WatchError) {
        self.phase = PollPhase::Stopped;
        self.next_fetch = None;
        self.in_flight = None;
        self.publisher.update(|s| {
            s.error = Some(error.clone());
            s.phase = PollPhase::Stopped;
        });
        self.observer.notify_error(&error);
    }
}

async fn in_flight_result(in_flight: &mut Option<FetchFuture>) -> Result<StatusRecord, BackendError> {
    match in_flight {
        Some(fetch) => fetch.await,
        None => std::future::pending().await,
    }
}

fn as_millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}
