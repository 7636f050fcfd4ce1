// crates/core/src/snapshot.rs
//! Generation-guarded writes to a watcher's shared snapshot.
//!
//! Each session gets the generation number that was current when it was
//! spawned. Stopping or restarting a watcher bumps the counter, after which
//! writes from the old session are dropped. The check runs under the watch
//! channel's lock, so a stale session can never overwrite what `stop()` wrote.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::sync::watch;

pub(crate) struct SnapshotPublisher<T> {
    tx: Arc<watch::Sender<T>>,
    current: Arc<AtomicU64>,
    generation: u64,
}

impl<T> SnapshotPublisher<T> {
    pub(crate) fn new(tx: Arc<watch::Sender<T>>, current: Arc<AtomicU64>, generation: u64) -> Self {
        Self {
            tx,
            current,
            generation,
        }
    }

    pub(crate) fn is_current(&self) -> bool {
        self.current.load(Ordering::SeqCst) == self.generation
    }

    /// Apply `f` if this session is still current. Returns whether it ran.
    pub(crate) fn update(&self, f: impl FnOnce(&mut T)) -> bool {
        let current = &self.current;
        let generation = self.generation;
        self.tx.send_if_modified(|snapshot| {
            if current.load(Ordering::SeqCst) != generation {
                return false;
            }
            f(snapshot);
            true
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stale_generation_is_ignored() {
        let (tx, rx) = watch::channel(0u32);
        let tx = Arc::new(tx);
        let current = Arc::new(AtomicU64::new(1));
        let publisher = SnapshotPublisher::new(Arc::clone(&tx), Arc::clone(&current), 1);

        assert!(publisher.update(|v| *v = 7));
        assert_eq!(*rx.borrow(), 7);

        current.fetch_add(1, Ordering::SeqCst);
        assert!(!publisher.is_current());
        assert!(!publisher.update(|v| *v = 9));
        assert_eq!(*rx.borrow(), 7);
    }
}
