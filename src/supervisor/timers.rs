use std::collections::HashMap;
use std::future::Future;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::debug;

/// Delayed restart tasks, at most one per worker
#[derive(Debug, Default)]
pub struct RestartTimers {
    pending: Mutex<HashMap<String, JoinHandle<()>>>,
}

impl RestartTimers {
    pub fn new() -> Self {
        Self::default()
    }

    /// Run `task` for `worker` once `delay` has elapsed
    ///
    /// Returns `false` without scheduling anything if the worker already has
    /// a pending timer.
    pub async fn schedule<F>(&self, worker: &str, delay: Duration, task: F) -> bool
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let mut pending = self.pending.lock().await;

        if let Some(existing) = pending.get(worker) {
            if !existing.is_finished() {
                debug!(worker = %worker, "Restart already pending, coalescing");
                return false;
            }
        }

        let handle = tokio::spawn(async move {
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
            task.await;
        });
        pending.insert(worker.to_string(), handle);

        true
    }

    pub async fn is_pending(&self, worker: &str) -> bool {
        self.pending
            .lock()
            .await
            .get(worker)
            .is_some_and(|handle| !handle.is_finished())
    }

    /// Drop the bookkeeping entry of a timer that has fired, without aborting it
    pub async fn complete(&self, worker: &str) {
        self.pending.lock().await.remove(worker);
    }

    /// Abort the pending timer of a worker
    pub async fn cancel(&self, worker: &str) -> bool {
        match self.pending.lock().await.remove(worker) {
            Some(handle) => {
                let was_pending = !handle.is_finished();
                handle.abort();
                if was_pending {
                    debug!(worker = %worker, "Cancelled pending restart");
                }
                was_pending
            }
            None => false,
        }
    }

    pub async fn cancel_all(&self) {
        let mut pending = self.pending.lock().await;
        for (_, handle) in pending.drain() {
            handle.abort();
        }
    }

    /// Number of timers that have not fired yet
    pub async fn pending_count(&self) -> usize {
        self.pending
            .lock()
            .await
            .values()
            .filter(|handle| !handle.is_finished())
            .count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[tokio::test]
    async fn test_coalesces_pending_timer() {
        let timers = RestartTimers::new();
        let fired = Arc::new(AtomicUsize::new(0));

        for _ in 0..3 {
            let fired = Arc::clone(&fired);
            timers
                .schedule("w1", Duration::from_millis(100), async move {
                    fired.fetch_add(1, Ordering::SeqCst);
                })
                .await;
        }

        assert_eq!(timers.pending_count().await, 1);
        tokio::time::sleep(Duration::from_millis(250)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 1);
        assert!(!timers.is_pending("w1").await);
    }

    #[tokio::test]
    async fn test_schedule_after_fired() {
        let timers = RestartTimers::new();
        assert!(timers.schedule("w1", Duration::ZERO, async {}).await);
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(timers.schedule("w1", Duration::ZERO, async {}).await);
    }

    #[tokio::test]
    async fn test_cancel() {
        let timers = RestartTimers::new();
        let fired = Arc::new(AtomicUsize::new(0));

        let counter = Arc::clone(&fired);
        timers
            .schedule("w1", Duration::from_millis(100), async move {
                counter.fetch_add(1, Ordering::SeqCst);
            })
            .await;

        assert!(timers.cancel("w1").await);
        assert!(!timers.cancel("w1").await);

        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_timers_are_per_worker() {
        let timers = RestartTimers::new();
        timers.schedule("a", Duration::from_secs(10), async {}).await;
        timers.schedule("b", Duration::from_secs(10), async {}).await;
        assert_eq!(timers.pending_count().await, 2);

        timers.cancel_all().await;
        assert_eq!(timers.pending_count().await, 0);
    }
}
