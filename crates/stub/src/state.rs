use std::collections::HashSet;
use std::sync::Arc;

use chrono::Utc;
use dashmap::DashMap;
use runwatch_types::{RunId, RunStatus, StatusRecord};
use serde_json::Value;
use tokio::sync::broadcast;
use tracing::info;

const UPDATE_CHANNEL_CAPACITY: usize = 64;

/// One run the stub knows about.
pub struct RunSlot {
    pub record: StatusRecord,
    /// Every stored record is re-broadcast to push subscribers.
    pub updates: broadcast::Sender<StatusRecord>,
}

/// A confirm-action call the stub received.
#[derive(Debug, Clone, PartialEq)]
pub struct Confirmation {
    pub action_type: Option<String>,
    pub payload: Option<Value>,
}

/// Shared stub server state.
#[derive(Clone, Default)]
pub struct StubState {
    /// Runs keyed by id.
    pub runs: Arc<DashMap<RunId, RunSlot>>,
    /// Accepted credentials. Empty means authentication is off.
    pub tokens: Arc<HashSet<String>>,
    /// Confirmations received, keyed by run id.
    pub confirmations: Arc<DashMap<RunId, Vec<Confirmation>>>,
}

impl StubState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_tokens<I, S>(tokens: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            tokens: Arc::new(tokens.into_iter().map(Into::into).collect()),
            ..Self::default()
        }
    }

    pub fn is_authorized(&self, token: Option<&str>) -> bool {
        self.tokens.is_empty() || token.is_some_and(|t| self.tokens.contains(t))
    }

    /// Store `record` as the current state of its run and push it to
    /// subscribers.
    pub fn put(&self, mut record: StatusRecord) -> StatusRecord {
        record.updated_at.get_or_insert_with(Utc::now);
        let mut slot = self
            .runs
            .entry(record.id.clone())
            .or_insert_with(|| RunSlot {
                record: record.clone(),
                updates: broadcast::channel(UPDATE_CHANNEL_CAPACITY).0,
            });
        slot.record = record.clone();
        // No subscribers is fine.
        let _ = slot.updates.send(record.clone());
        info!(run_id = %record.id, status = %record.status, "run updated");
        record
    }

    pub fn get(&self, run_id: &RunId) -> Option<StatusRecord> {
        self.runs.get(run_id).map(|slot| slot.record.clone())
    }

    /// Current record plus a receiver for everything stored after it.
    pub fn subscribe(&self, run_id: &RunId) -> Option<(StatusRecord, broadcast::Receiver<StatusRecord>)> {
        self.runs
            .get(run_id)
            .map(|slot| (slot.record.clone(), slot.updates.subscribe()))
    }

    /// Apply a confirm-action call. A waiting run goes back to `running`
    /// with its action fields cleared. Returns `None` for unknown runs.
    pub fn confirm(&self, run_id: &RunId, confirmation: Confirmation) -> Option<Result<StatusRecord, RunStatus>> {
        let current = self.get(run_id)?;
        if !current.is_waiting_for_user() {
            return Some(Err(current.status));
        }
        self.confirmations
            .entry(run_id.clone())
            .or_default()
            .push(confirmation);

        let mut resumed = current.with_status(RunStatus::Running);
        resumed.user_action_required = None;
        resumed.user_action_url = None;
        resumed.updated_at = None;
        Some(Ok(self.put(resumed)))
    }

    pub fn confirmations(&self, run_id: &RunId) -> Vec<Confirmation> {
        self.confirmations
            .get(run_id)
            .map(|c| c.value().clone())
            .unwrap_or_default()
    }
}
