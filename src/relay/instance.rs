//! Per-connection instance bookkeeping.
//!
//! Every successful (re)connection runs as an *instance*: a cancellation
//! token derived from the root lifetime plus a task tracker used as the
//! join barrier when the instance is torn down.

use async_trait::async_trait;
use futures_util::FutureExt;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex as StdMutex;
use tokio::sync::{Mutex, MutexGuard};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

use crate::lifecycle::Shutdown;

/// A connection managed by the supervisor.
#[async_trait]
pub trait Connection: Send + Sync {
    fn name(&self) -> &'static str;

    /// Tear down the current instance and connect again.
    async fn refresh(&self);

    /// Tear down the current instance and wait for its tasks.
    async fn stop(&self);
}

#[derive(Debug, Clone)]
pub struct Instance {
    cancel: CancellationToken,
    tracker: TaskTracker,
}

impl Instance {
    pub fn token(&self) -> &CancellationToken {
        &self.cancel
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Spawn a task owned by this instance.
    pub fn spawn<F>(&self, task: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        self.tracker.spawn(task);
    }
}

/// Refresh guard plus the currently running instance of one connection.
///
/// Refresh requests never queue behind the guard. A request that finds the
/// guard taken leaves the pending mark set, and the holder runs one more
/// pass before letting go.
#[derive(Debug, Default)]
pub struct ConnectionSlot {
    refresh_lock: Mutex<()>,
    refresh_pending: AtomicBool,
    current: StdMutex<Option<Instance>>,
}

impl ConnectionSlot {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark that a refresh is wanted.
    pub fn request_refresh(&self) {
        self.refresh_pending.store(true, Ordering::SeqCst);
    }

    /// Claim the refresh guard for one pending pass.
    ///
    /// `None` when nothing is pending, or when another task holds the guard
    /// and will therefore see the mark.
    pub fn begin_refresh(&self, connection: &'static str) -> Option<MutexGuard<'_, ()>> {
        while self.refresh_pending.load(Ordering::SeqCst) {
            let Ok(guard) = self.refresh_lock.try_lock() else {
                tracing::debug!(connection, "Refresh already in progress");
                return None;
            };
            if self.refresh_pending.swap(false, Ordering::SeqCst) {
                return Some(guard);
            }
        }
        None
    }

    /// Wait for any running refresh, then hold the guard and drop pending requests.
    pub async fn lock_refresh(&self) -> MutexGuard<'_, ()> {
        let guard = self.refresh_lock.lock().await;
        self.refresh_pending.store(false, Ordering::SeqCst);
        guard
    }

    /// Start a new instance whose lifetime is a child of `lifetime`.
    pub fn install(&self, lifetime: &Shutdown) -> Instance {
        let instance = Instance {
            cancel: lifetime.child(),
            tracker: TaskTracker::new(),
        };
        let previous = self
            .current
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .replace(instance.clone());
        if let Some(previous) = previous {
            previous.cancel.cancel();
            previous.tracker.close();
        }
        instance
    }

    pub fn current(&self) -> Option<Instance> {
        self.current
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    /// Cancel the current instance and wait until all of its tasks exit.
    pub async fn stop_instance(&self) {
        let instance = self
            .current
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take();
        if let Some(instance) = instance {
            instance.cancel.cancel();
            instance.tracker.close();
            instance.tracker.wait().await;
        }
    }
}

/// Run `task`, converting a panic into a logged error.
///
/// Returns `true` if the task panicked.
pub async fn guarded<F>(connection: &'static str, task_name: &'static str, task: F) -> bool
where
    F: Future<Output = ()>,
{
    match AssertUnwindSafe(task).catch_unwind().await {
        Ok(()) => false,
        Err(panic) => {
            let reason = panic
                .downcast_ref::<&str>()
                .map(|s| s.to_string())
                .or_else(|| panic.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "unknown panic".to_string());
            tracing::error!(connection, task = task_name, reason = %reason, "Recovered from panic");
            true
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[tokio::test]
    async fn test_refresh_guard_is_exclusive() {
        let slot = ConnectionSlot::new();
        assert!(slot.begin_refresh("test").is_none());

        slot.request_refresh();
        let guard = slot.begin_refresh("test");
        assert!(guard.is_some());
        slot.request_refresh();
        assert!(slot.begin_refresh("test").is_none());
        drop(guard);
        assert!(slot.begin_refresh("test").is_some());
    }

    #[tokio::test]
    async fn test_request_during_refresh_runs_another_pass() {
        let slot = ConnectionSlot::new();
        let mut passes = 0;

        slot.request_refresh();
        while let Some(_guard) = slot.begin_refresh("test") {
            passes += 1;
            if passes == 1 {
                // Arrives while the first pass holds the guard.
                slot.request_refresh();
                assert!(slot.begin_refresh("test").is_none());
            }
        }
        assert_eq!(passes, 2);
        assert!(slot.begin_refresh("test").is_none());
    }

    #[tokio::test]
    async fn test_lock_refresh_drops_pending_requests() {
        let slot = ConnectionSlot::new();
        slot.request_refresh();
        drop(slot.lock_refresh().await);
        assert!(slot.begin_refresh("test").is_none());
    }

    #[tokio::test]
    async fn test_stop_instance_waits_for_tasks() {
        let slot = ConnectionSlot::new();
        let root = Shutdown::new();
        let instance = slot.install(&root);

        let finished = Arc::new(AtomicBool::new(false));
        let flag = finished.clone();
        let token = instance.token().clone();
        instance.spawn(async move {
            token.cancelled().await;
            tokio::time::sleep(std::time::Duration::from_millis(20)).await;
            flag.store(true, Ordering::SeqCst);
        });

        slot.stop_instance().await;
        assert!(finished.load(Ordering::SeqCst));
        assert!(instance.is_cancelled());
        assert!(slot.current().is_none());
        assert!(!root.is_triggered());
    }

    #[tokio::test]
    async fn test_root_cancels_instance() {
        let slot = ConnectionSlot::new();
        let root = Shutdown::new();
        let instance = slot.install(&root);
        root.trigger();
        assert!(instance.is_cancelled());
    }

    #[tokio::test]
    async fn test_install_cancels_previous_instance() {
        let slot = ConnectionSlot::new();
        let root = Shutdown::new();
        let first = slot.install(&root);
        let second = slot.install(&root);
        assert!(first.is_cancelled());
        assert!(!second.is_cancelled());
    }

    #[tokio::test]
    async fn test_guarded_recovers_panic() {
        assert!(guarded("test", "task", async { panic!("boom") }).await);
        assert!(!guarded("test", "task", async {}).await);
    }
}
