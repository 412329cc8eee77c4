//! Single-slot task supervisor.
//!
//! A trigger either takes the slot and runs, or is dropped. Nothing is
//! queued. The slot is released when the guard is dropped, including when the
//! task holding it panics or is aborted.

use std::future::Future;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::Ordering;
use std::sync::Arc;

use tokio::task::JoinHandle;

#[derive(Debug, Clone)]
pub struct TaskSlot {
    name: &'static str,
    busy: Arc<AtomicBool>,
}

#[derive(Debug)]
pub struct SlotGuard {
    name: &'static str,
    busy: Arc<AtomicBool>,
}

impl TaskSlot {
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            busy: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn is_busy(&self) -> bool {
        self.busy.load(Ordering::Acquire)
    }

    pub fn try_acquire(&self) -> Option<SlotGuard> {
        self.busy
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| SlotGuard {
                name: self.name,
                busy: self.busy.clone(),
            })
    }

    /// Spawn `task` if the slot is free. Returns `None` when the trigger was
    /// dropped.
    pub fn spawn<F>(&self, what: &str, task: F) -> Option<JoinHandle<F::Output>>
    where
        F: Future + Send + 'static,
        F::Output: Send + 'static,
    {
        let Some(guard) = self.try_acquire() else {
            tracing::info!("[{}] Busy, dropping {}", self.name, what);
            return None;
        };

        tracing::debug!("[{}] Starting {}", self.name, what);
        Some(tokio::spawn(async move {
            let _guard = guard;
            task.await
        }))
    }
}

impl Drop for SlotGuard {
    fn drop(&mut self) {
        self.busy.store(false, Ordering::Release);
        tracing::trace!("[{}] Slot released", self.name);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_second_acquire_is_refused() {
        let slot = TaskSlot::new("scan");
        let guard = slot.try_acquire().unwrap();
        assert!(slot.is_busy());
        assert!(slot.try_acquire().is_none());

        drop(guard);
        assert!(!slot.is_busy());
        assert!(slot.try_acquire().is_some());
    }

    #[test]
    fn test_clones_share_the_slot() {
        let slot = TaskSlot::new("scan");
        let other = slot.clone();
        let _guard = slot.try_acquire().unwrap();
        assert!(other.try_acquire().is_none());
    }

    #[tokio::test]
    async fn test_spawn_drops_trigger_while_busy() {
        let slot = TaskSlot::new("scan");
        let (release_tx, release_rx) = tokio::sync::oneshot::channel::<()>();

        let first = slot
            .spawn("first", async move {
                release_rx.await.ok();
                1
            })
            .unwrap();
        assert!(slot.spawn("second", async { 2 }).is_none());

        release_tx.send(()).unwrap();
        assert_eq!(first.await.unwrap(), 1);
        assert!(!slot.is_busy());

        let third = slot.spawn("third", async { 3 }).unwrap();
        assert_eq!(third.await.unwrap(), 3);
    }

    #[tokio::test]
    async fn test_panicking_task_releases_slot() {
        let slot = TaskSlot::new("voice");
        let handle = slot
            .spawn("panic", async {
                panic!("boom");
            })
            .unwrap();

        assert!(handle.await.is_err());
        assert!(!slot.is_busy());
    }
}
