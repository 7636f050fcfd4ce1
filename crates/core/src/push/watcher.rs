// crates/core/src/push/watcher.rs
//! Push watcher: one persistent connection per run, kept alive with
//! heartbeats and re-established with capped exponential backoff.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use runwatch_types::StatusRecord;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{interval_at, sleep, Instant, MissedTickBehavior};
use tracing::{debug, info, trace};

use super::transport::{
    is_heartbeat_ack, redact_token, ChannelEvent, CloseInfo, PushChannel, PushConnector,
    PushTarget, AUTH_REJECTED_CLOSE_CODE, HEARTBEAT_PROBE, NORMAL_CLOSURE,
};
use crate::backoff::Backoff;
use crate::bus::StatusBus;
use crate::config::PushConfig;
use crate::error::{ConnectError, WatchError};
use crate::observe::{Observer, WatchAction, WatchCallbacks};
use crate::snapshot::SnapshotPublisher;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionState {
    Connecting,
    Connected,
    #[default]
    Disconnected,
}

/// What callers can read about a push watcher at any time.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PushSnapshot {
    pub connection: ConnectionState,
    /// Latest record received.
    pub status: Option<StatusRecord>,
    pub error: Option<WatchError>,
    /// Reconnects scheduled since the last successful open.
    pub reconnect_attempts: u32,
}

impl PushSnapshot {
    pub fn is_observing(&self) -> bool {
        self.connection == ConnectionState::Connected
    }

    pub fn is_waiting_for_user(&self) -> bool {
        self.status
            .as_ref()
            .is_some_and(StatusRecord::is_waiting_for_user)
    }
}

enum PushCommand {
    Disconnect,
}

struct SessionHandle {
    commands: mpsc::UnboundedSender<PushCommand>,
    task: JoinHandle<()>,
}

/// Follows one run over a push connection.
///
/// Must be used from within a tokio runtime. Dropping the watcher closes
/// the connection.
pub struct PushWatcher {
    connector: Arc<dyn PushConnector>,
    config: PushConfig,
    target: Mutex<PushTarget>,
    callbacks: WatchCallbacks,
    bus: Option<StatusBus>,
    snapshot: Arc<watch::Sender<PushSnapshot>>,
    generation: Arc<AtomicU64>,
    session: Mutex<Option<SessionHandle>>,
}

impl PushWatcher {
    pub fn new(
        connector: Arc<dyn PushConnector>,
        config: PushConfig,
        target: PushTarget,
        callbacks: WatchCallbacks,
    ) -> Self {
        let (snapshot, _) = watch::channel(PushSnapshot::default());
        Self {
            connector,
            config,
            target: Mutex::new(target),
            callbacks,
            bus: None,
            snapshot: Arc::new(snapshot),
            generation: Arc::new(AtomicU64::new(0)),
            session: Mutex::new(None),
        }
    }

    pub fn with_bus(mut self, bus: StatusBus) -> Self {
        self.bus = Some(bus);
        self
    }

    /// Open the connection. No-op while a session is already running.
    pub fn connect(&self) {
        let mut session = self.lock_session();
        if session.as_ref().is_some_and(|s| !s.task.is_finished()) {
            debug!("push watcher already running");
            return;
        }
        *session = Some(self.spawn_session(None, self.config.retain_last_status));
    }

    /// Close the connection with a normal close code and cancel any pending
    /// reconnect. Idempotent.
    pub fn disconnect(&self) {
        let session = self.lock_session().take();
        self.generation.fetch_add(1, Ordering::SeqCst);
        self.snapshot.send_if_modified(|snapshot| {
            if snapshot.connection == ConnectionState::Disconnected
                && snapshot.reconnect_attempts == 0
            {
                return false;
            }
            snapshot.connection = ConnectionState::Disconnected;
            snapshot.reconnect_attempts = 0;
            true
        });
        if let Some(session) = session {
            // A session that already ended has dropped its receiver.
            if session.commands.send(PushCommand::Disconnect).is_ok() {
                info!("push watcher disconnected");
            }
        }
    }

    /// Force a fresh connection after a short delay, with the attempt
    /// counter and any error cleared. This is the only way back from an
    /// authorization rejection or exhausted reconnects.
    pub fn reconnect(&self) {
        self.disconnect();
        let delay = self.config.manual_reconnect_delay;
        let handle = self.spawn_session(Some(delay), true);
        *self.lock_session() = Some(handle);
        info!(delay_ms = as_millis(delay), "push watcher reconnecting");
    }

    /// Replace the credential used by the next connection attempt.
    pub fn set_token(&self, token: Option<String>) {
        self.lock_target().token = token;
    }

    pub fn target(&self) -> PushTarget {
        self.lock_target().clone()
    }

    pub fn snapshot(&self) -> PushSnapshot {
        self.snapshot.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<PushSnapshot> {
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

    fn spawn_session(&self, initial_delay: Option<Duration>, keep_status: bool) -> SessionHandle {
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        let target = self.target();

        self.snapshot.send_modify(|snapshot| {
            let status = snapshot
                .status
                .take()
                .filter(|record| keep_status && record.id == target.run_id);
            *snapshot = PushSnapshot {
                connection: ConnectionState::Connecting,
                status,
                error: None,
                reconnect_attempts: 0,
            };
        });

        let url = target.url();
        let (commands, rx) = mpsc::unbounded_channel();
        let session = PushSession {
            connector: Arc::clone(&self.connector),
            log_url: redact_token(&url),
            url,
            backoff: Backoff::new(
                self.config.base_reconnect_delay,
                self.config.max_reconnect_delay,
                self.config.max_reconnect_attempts,
            ),
            config: self.config.clone(),
            observer: Observer::new(target.run_id, self.callbacks.clone(), self.bus.clone()),
            publisher: SnapshotPublisher::new(
                Arc::clone(&self.snapshot),
                Arc::clone(&self.generation),
                generation,
            ),
            commands: rx,
            finished: false,
        };
        let task = tokio::spawn(session.run(initial_delay));
        SessionHandle { commands, task }
    }

    fn lock_session(&self) -> MutexGuard<'_, Option<SessionHandle>> {
        self.session.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn lock_target(&self) -> MutexGuard<'_, PushTarget> {
        self.target.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Drop for PushWatcher {
    fn drop(&mut self) {
        self.disconnect();
    }
}

// =============================================================================
// Session task
// =============================================================================

struct PushSession {
    connector: Arc<dyn PushConnector>,
    config: PushConfig,
    url: String,
    log_url: String,
    observer: Observer,
    publisher: SnapshotPublisher<PushSnapshot>,
    commands: mpsc::UnboundedReceiver<PushCommand>,
    backoff: Backoff,
    /// A terminal status was observed.
    finished: bool,
}

impl PushSession {
    async fn run(mut self, initial_delay: Option<Duration>) {
        if let Some(delay) = initial_delay {
            if self.pause(delay).await {
                return;
            }
        }
        loop {
            self.publisher
                .update(|s| s.connection = ConnectionState::Connecting);
            debug!(url = %self.log_url, attempt = self.backoff.attempt(), "connecting");

            let connector = Arc::clone(&self.connector);
            let connected = tokio::select! {
                result = connector.connect(&self.url) => result,
                _ = self.commands.recv() => return,
            };

            let close = match connected {
                Ok(channel) => {
                    self.on_open();
                    match self.pump(channel).await {
                        Some(close) => close,
                        // Closed by the caller.
                        None => return,
                    }
                }
                Err(ConnectError::Unauthorized { status }) => CloseInfo {
                    code: AUTH_REJECTED_CLOSE_CODE,
                    reason: format!("handshake rejected with HTTP {status}"),
                    clean: false,
                },
                Err(err) => CloseInfo::abnormal(err.to_string()),
            };

            let Some(delay) = self.on_close(close) else {
                break;
            };
            if self.pause(delay).await {
                return;
            }
        }
        debug!(run_id = %self.observer.run_id(), "push session ended");
    }

    /// Read frames until the connection ends. `None` means the caller asked
    /// to disconnect and the socket was closed normally.
    async fn pump(&mut self, mut channel: Box<dyn PushChannel>) -> Option<CloseInfo> {
        // tokio rejects a zero period.
        let period = self.config.heartbeat_interval.max(MIN_HEARTBEAT_INTERVAL);
        let mut heartbeat = interval_at(Instant::now() + period, period);
        heartbeat.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                event = channel.next_event() => match event {
                    ChannelEvent::Frame(text) => self.on_frame(&text),
                    ChannelEvent::Closed(close) => return Some(close),
                },
                _ = heartbeat.tick() => {
                    trace!("heartbeat");
                    if let Err(err) = channel.send_text(HEARTBEAT_PROBE).await {
                        return Some(CloseInfo::abnormal(err.to_string()));
                    }
                }
                _ = self.commands.recv() => {
                    channel.close(NORMAL_CLOSURE, "client disconnect").await;
                    return None;
                }
            }
        }
    }

    fn on_open(&mut self) {
        info!(run_id = %self.observer.run_id(), url = %self.log_url, "push connection open");
        self.backoff.reset();
        self.publisher.update(|s| {
            s.connection = ConnectionState::Connected;
            s.reconnect_attempts = 0;
            s.error = None;
        });
    }

    fn on_frame(&mut self, text: &str) {
        if is_heartbeat_ack(text) {
            trace!("heartbeat ack");
            return;
        }
        let record = match serde_json::from_str::<StatusRecord>(text) {
            Ok(record) => record,
            Err(err) => {
                self.surface(WatchError::Protocol(err.to_string()));
                return;
            }
        };
        if &record.id != self.observer.run_id() {
            self.surface(WatchError::Protocol(format!(
                "received status for run {} while watching {}",
                record.id,
                self.observer.run_id()
            )));
            return;
        }

        self.publisher.update(|s| s.status = Some(record.clone()));
        let observation = self.observer.observe(&record);
        match observation.action {
            WatchAction::PauseForUser if observation.changed => {
                info!(
                    run_id = %record.id,
                    action = record.user_action_required.as_deref().unwrap_or("-"),
                    "run waiting for user"
                );
                self.observer.notify_waiting(&record);
            }
            WatchAction::Finish if !self.finished => {
                info!(run_id = %record.id, status = %record.status, "run finished");
                self.finished = true;
                self.observer.notify_complete(&record);
            }
            _ => {}
        }
    }

    /// Decide what follows a closed connection. Returns the reconnect delay,
    /// or `None` when the session is over.
    fn on_close(&mut self, close: CloseInfo) -> Option<Duration> {
        self.publisher
            .update(|s| s.connection = ConnectionState::Disconnected);

        if close.is_auth_rejection() {
            self.surface(WatchError::Unauthorized(format!(
                "connection closed with code {}: {}",
                close.code, close.reason
            )));
            return None;
        }
        if close.clean {
            debug!(code = close.code, reason = %close.reason, "connection closed");
            self.publisher.update(|s| s.error = None);
        } else {
            self.surface(WatchError::Transport(format!(
                "connection lost (code {}): {}",
                close.code, close.reason
            )));
        }
        // Finished runs are never reconnected.
        if self.finished || !self.config.auto_reconnect {
            return None;
        }

        match self.backoff.next_delay() {
            Some(delay) => {
                let attempt = self.backoff.attempt();
                info!(attempt, delay_ms = as_millis(delay), "scheduling reconnect");
                self.publisher.update(|s| s.reconnect_attempts = attempt);
                Some(delay)
            }
            None => {
                self.surface(WatchError::ReconnectExhausted {
                    attempts: self.backoff.max_attempts(),
                });
                None
            }
        }
    }

    fn surface(&self, error: WatchError) {
        self.publisher.update(|s| s.error = Some(error.clone()));
        self.observer.notify_error(&error);
    }

    /// Sleep for `delay`. Returns `true` if the caller disconnected meanwhile.
    async fn pause(&mut self, delay: Duration) -> bool {
        tokio::select! {
            _ = sleep(delay) => false,
            _ = self.commands.recv() => true,
        }
    }
}

const MIN_HEARTBEAT_INTERVAL: Duration = Duration::from_millis(1);

fn as_millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}
