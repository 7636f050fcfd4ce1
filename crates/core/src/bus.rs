// crates/core/src/bus.rs
//! Process-wide publish/subscribe for run events.
//!
//! Watchers attached to a bus publish every transition, pause, completion and
//! error, so parts of a program that did not start the watcher (a tray icon,
//! a second view of the same run) can follow along.

use std::sync::OnceLock;

use runwatch_types::{RunId, StatusRecord};
use tokio::sync::broadcast;
use tracing::warn;

use crate::error::WatchError;

const DEFAULT_BUS_CAPACITY: usize = 256;

static GLOBAL_BUS: OnceLock<StatusBus> = OnceLock::new();

/// Event published by a watcher.
#[derive(Debug, Clone, PartialEq)]
pub enum RunEvent {
    StatusChanged(StatusRecord),
    WaitingForUser(StatusRecord),
    Completed(StatusRecord),
    Error { run_id: RunId, error: WatchError },
}

impl RunEvent {
    pub fn run_id(&self) -> &RunId {
        match self {
            RunEvent::StatusChanged(record)
            | RunEvent::WaitingForUser(record)
            | RunEvent::Completed(record) => &record.id,
            RunEvent::Error { run_id, .. } => run_id,
        }
    }
}

/// Broadcast bus for [`RunEvent`]s. Cheap to clone.
#[derive(Debug, Clone)]
pub struct StatusBus {
    tx: broadcast::Sender<RunEvent>,
}

impl StatusBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    /// The shared instance, created on first use.
    pub fn global() -> &'static StatusBus {
        GLOBAL_BUS.get_or_init(|| StatusBus::new(DEFAULT_BUS_CAPACITY))
    }

    /// Publish to current subscribers. Returns how many received it.
    pub fn publish(&self, event: RunEvent) -> usize {
        // No subscribers is fine.
        self.tx.send(event).unwrap_or(0)
    }

    pub fn subscribe(&self) -> Subscription {
        Subscription {
            rx: self.tx.subscribe(),
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Default for StatusBus {
    fn default() -> Self {
        Self::new(DEFAULT_BUS_CAPACITY)
    }
}

/// A live subscription. Dropping it (or calling `unsubscribe`) detaches it.
#[derive(Debug)]
pub struct Subscription {
    rx: broadcast::Receiver<RunEvent>,
}

impl Subscription {
    /// Next event, or `None` once every bus handle is gone.
    ///
    /// A subscriber that falls behind skips the events it missed.
    pub async fn recv(&mut self) -> Option<RunEvent> {
        loop {
            match self.rx.recv().await {
                Ok(event) => return Some(event),
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(skipped, "status bus subscriber lagged");
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }

    /// Non-blocking variant of [`recv`](Self::recv).
    pub fn try_recv(&mut self) -> Option<RunEvent> {
        loop {
            match self.rx.try_recv() {
                Ok(event) => return Some(event),
                Err(broadcast::error::TryRecvError::Lagged(skipped)) => {
                    warn!(skipped, "status bus subscriber lagged");
                }
                Err(_) => return None,
            }
        }
    }

    pub fn unsubscribe(self) {}
}

#[cfg(test)]
mod tests {
    use super::*;
    use runwatch_types::RunStatus;

    #[tokio::test]
    async fn test_publish_reaches_all_subscribers() {
        let bus = StatusBus::new(8);
        let mut first = bus.subscribe();
        let mut second = bus.subscribe();

        let record = StatusRecord::new("abc-1", RunStatus::Running);
        assert_eq!(bus.publish(RunEvent::StatusChanged(record.clone())), 2);

        assert_eq!(first.recv().await, Some(RunEvent::StatusChanged(record.clone())));
        assert_eq!(second.recv().await, Some(RunEvent::StatusChanged(record)));
    }

    #[test]
    fn test_unsubscribe_detaches() {
        let bus = StatusBus::new(8);
        let sub = bus.subscribe();
        assert_eq!(bus.subscriber_count(), 1);
        sub.unsubscribe();
        assert_eq!(bus.subscriber_count(), 0);
        assert_eq!(
            bus.publish(RunEvent::Completed(StatusRecord::new(
                "abc-1",
                RunStatus::Submitted
            ))),
            0
        );
    }

    #[test]
    fn test_lagged_subscriber_skips_ahead() {
        let bus = StatusBus::new(2);
        let mut sub = bus.subscribe();
        for status in ["pending", "running", "submitted"] {
            bus.publish(RunEvent::StatusChanged(StatusRecord::new(
                "abc-1",
                RunStatus::from(status),
            )));
        }
        let event = sub.try_recv().unwrap();
        assert_eq!(event.run_id().as_str(), "abc-1");
        assert!(matches!(event, RunEvent::StatusChanged(r) if r.status == RunStatus::Running));
    }

    #[test]
    fn test_global_bus_is_initialised_once() {
        let a = StatusBus::global() as *const StatusBus;
        let b = StatusBus::global() as *const StatusBus;
        assert_eq!(a, b);
    }
}
