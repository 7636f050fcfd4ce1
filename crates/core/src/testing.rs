// crates/core/src/testing.rs
//! Scripted backend and connector fakes for the watcher tests.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use runwatch_types::{RunId, RunStatus, StatusRecord};
use serde_json::Value;
use tokio::sync::{mpsc, watch};
use tokio::time::Instant;

use crate::backend::RunBackend;
use crate::error::{BackendError, ChannelError, ConnectError, WatchError};
use crate::observe::WatchCallbacks;
use crate::push::{ChannelEvent, CloseInfo, PushChannel, PushConnector};

/// Wait until the snapshot satisfies `pred`, failing after an hour of
/// (usually paused) time.
pub(crate) async fn wait_for<T: Clone>(
    rx: &mut watch::Receiver<T>,
    pred: impl FnMut(&T) -> bool,
) -> T {
    let value = tokio::time::timeout(Duration::from_secs(3600), rx.wait_for(pred))
        .await
        .expect("timed out waiting for snapshot")
        .expect("snapshot sender dropped");
    T::clone(&value)
}

// =============================================================================
// Callback recorder
// =============================================================================

#[derive(Clone, Default)]
pub(crate) struct Recorder {
    changes: Arc<Mutex<Vec<String>>>,
    waiting: Arc<AtomicUsize>,
    completions: Arc<AtomicUsize>,
    errors: Arc<Mutex<Vec<WatchError>>>,
}

impl Recorder {
    pub(crate) fn callbacks(&self) -> WatchCallbacks {
        let changes = Arc::clone(&self.changes);
        let waiting = Arc::clone(&self.waiting);
        let completions = Arc::clone(&self.completions);
        let errors = Arc::clone(&self.errors);
        WatchCallbacks::new()
            .on_status_change(move |r| changes.lock().unwrap().push(r.status.to_string()))
            .on_waiting_for_user(move |_| {
                waiting.fetch_add(1, Ordering::SeqCst);
            })
            .on_complete(move |_| {
                completions.fetch_add(1, Ordering::SeqCst);
            })
            .on_error(move |e| errors.lock().unwrap().push(e.clone()))
    }

    pub(crate) fn changes(&self) -> Vec<String> {
        self.changes.lock().unwrap().clone()
    }

    pub(crate) fn waiting_count(&self) -> usize {
        self.waiting.load(Ordering::SeqCst)
    }

    pub(crate) fn completion_count(&self) -> usize {
        self.completions.load(Ordering::SeqCst)
    }

    pub(crate) fn errors(&self) -> Vec<WatchError> {
        self.errors.lock().unwrap().clone()
    }
}

// =============================================================================
// Scripted backend
// =============================================================================

type Confirmation = (RunId, Option<String>, Option<Value>);

/// Answers fetches from a script; once the script runs dry the last
/// successful record is repeated.
#[derive(Default)]
pub(crate) struct ScriptedBackend {
    responses: Mutex<VecDeque<Result<StatusRecord, BackendError>>>,
    last: Mutex<Option<StatusRecord>>,
    confirm_results: Mutex<VecDeque<Result<Option<StatusRecord>, BackendError>>>,
    confirmations: Mutex<Vec<Confirmation>>,
    latency: Duration,
    fetches: AtomicUsize,
    in_flight: Arc<AtomicUsize>,
    max_in_flight: AtomicUsize,
}

struct InFlightGuard(Arc<AtomicUsize>);

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

impl ScriptedBackend {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn with_latency(latency: Duration) -> Self {
        Self {
            latency,
            ..Self::default()
        }
    }

    pub(crate) fn push_status(&self, run_id: &str, status: &str) {
        self.push_record(StatusRecord::new(run_id, RunStatus::from(status)));
    }

    pub(crate) fn push_record(&self, record: StatusRecord) {
        self.responses.lock().unwrap().push_back(Ok(record));
    }

    pub(crate) fn push_error(&self, error: BackendError) {
        self.responses.lock().unwrap().push_back(Err(error));
    }

    pub(crate) fn push_confirm(&self, result: Result<Option<StatusRecord>, BackendError>) {
        self.confirm_results.lock().unwrap().push_back(result);
    }

    pub(crate) fn fetch_count(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }

    pub(crate) fn max_concurrent_fetches(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    pub(crate) fn confirmations(&self) -> Vec<Confirmation> {
        self.confirmations.lock().unwrap().clone()
    }
}

#[async_trait]
impl RunBackend for ScriptedBackend {
    async fn fetch_status(&self, _run_id: &RunId) -> Result<StatusRecord, BackendError> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        let _guard = InFlightGuard(Arc::clone(&self.in_flight));

        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }

        let next = self.responses.lock().unwrap().pop_front();
        match next {
            Some(Ok(record)) => {
                *self.last.lock().unwrap() = Some(record.clone());
                Ok(record)
            }
            Some(Err(err)) => Err(err),
            None => self.last.lock().unwrap().clone().ok_or(BackendError::Status {
                status: 404,
                body: "script exhausted".into(),
            }),
        }
    }

    async fn confirm_action(
        &self,
        run_id: &RunId,
        action_type: Option<&str>,
        payload: Option<Value>,
    ) -> Result<Option<StatusRecord>, BackendError> {
        self.confirmations.lock().unwrap().push((
            run_id.clone(),
            action_type.map(str::to_string),
            payload,
        ));
        self.confirm_results
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(Ok(None))
    }
}

// =============================================================================
// Fake push connector
// =============================================================================

/// Server side of a scripted push connection.
pub(crate) struct FakeRemote {
    events: mpsc::UnboundedSender<ChannelEvent>,
    sent: Arc<Mutex<Vec<String>>>,
    closed_with: Arc<Mutex<Option<u16>>>,
}

impl FakeRemote {
    pub(crate) fn send_frame(&self, text: &str) {
        let _ = self.events.send(ChannelEvent::Frame(text.to_string()));
    }

    pub(crate) fn send_record(&self, record: &StatusRecord) {
        self.send_frame(&serde_json::to_string(record).unwrap());
    }

    pub(crate) fn close(&self, close: CloseInfo) {
        let _ = self.events.send(ChannelEvent::Closed(close));
    }

    /// Text frames the client sent.
    pub(crate) fn sent(&self) -> Vec<String> {
        self.sent.lock().unwrap().clone()
    }

    /// Close code the client used, if it closed the connection itself.
    pub(crate) fn closed_with(&self) -> Option<u16> {
        *self.closed_with.lock().unwrap()
    }
}

struct FakeChannel {
    events: mpsc::UnboundedReceiver<ChannelEvent>,
    sent: Arc<Mutex<Vec<String>>>,
    closed_with: Arc<Mutex<Option<u16>>>,
}

#[async_trait]
impl PushChannel for FakeChannel {
    async fn send_text(&mut self, text: &str) -> Result<(), ChannelError> {
        self.sent.lock().unwrap().push(text.to_string());
        Ok(())
    }

    async fn next_event(&mut self) -> ChannelEvent {
        self.events
            .recv()
            .await
            .unwrap_or_else(|| ChannelEvent::Closed(CloseInfo::abnormal("remote dropped")))
    }

    async fn close(&mut self, code: u16, _reason: &str) {
        *self.closed_with.lock().unwrap() = Some(code);
    }
}

/// Hands out scripted connections in order and records every attempt.
#[derive(Default)]
pub(crate) struct FakeConnector {
    script: Mutex<VecDeque<Result<FakeChannel, ConnectError>>>,
    attempts: Mutex<Vec<(Instant, String)>>,
}

impl FakeConnector {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Queue a connection that opens successfully.
    pub(crate) fn accept(&self) -> FakeRemote {
        let (tx, rx) = mpsc::unbounded_channel();
        let sent = Arc::new(Mutex::new(Vec::new()));
        let closed_with = Arc::new(Mutex::new(None));
        self.script.lock().unwrap().push_back(Ok(FakeChannel {
            events: rx,
            sent: Arc::clone(&sent),
            closed_with: Arc::clone(&closed_with),
        }));
        FakeRemote {
            events: tx,
            sent,
            closed_with,
        }
    }

    /// Queue a connection attempt that fails.
    pub(crate) fn refuse(&self, error: ConnectError) {
        self.script.lock().unwrap().push_back(Err(error));
    }

    pub(crate) fn attempt_times(&self) -> Vec<Instant> {
        self.attempts.lock().unwrap().iter().map(|(t, _)| *t).collect()
    }

    pub(crate) fn attempt_urls(&self) -> Vec<String> {
        self.attempts.lock().unwrap().iter().map(|(_, u)| u.clone()).collect()
    }
}

#[async_trait]
impl PushConnector for FakeConnector {
    async fn connect(&self, url: &str) -> Result<Box<dyn PushChannel>, ConnectError> {
        self.attempts
            .lock()
            .unwrap()
            .push((Instant::now(), url.to_string()));
        let next = self.script.lock().unwrap().pop_front();
        match next {
            Some(Ok(channel)) => Ok(Box::new(channel)),
            Some(Err(err)) => Err(err),
            None => Err(ConnectError::Transport {
                url: url.to_string(),
                message: "no scripted connection".into(),
            }),
        }
    }
}
