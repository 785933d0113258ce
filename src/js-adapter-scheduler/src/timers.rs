use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use js_adapter_common::Handle;
use tokio::task::JoinHandle;
use tracing::instrument;

use crate::cancellation::CancellationSignal;
use crate::worker_pool::WorkerPool;

/// Whether a registered timer fires once or repeats (spec §3, "Timer
/// Handle").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimerKind {
    OneShot,
    Repeating,
}

struct TimerEntry {
    task: JoinHandle<()>,
    kind: TimerKind,
}

/// Registry of active scheduler-side timers, keyed by opaque [`Handle`].
///
/// Binds `setTimeout`/`setInterval`/`setImmediate` (spec §4.2) to the
/// worker pool: each call here spawns a task on the pool that sleeps for
/// the requested delay, then (for repeating timers) loops. The provided
/// callback is invoked off the JS thread — callers on the `js-adapter`
/// side are expected to marshal it back via the Dispatch Bridge rather
/// than touching engine state directly.
pub struct TimerRegistry {
    entries: Mutex<HashMap<Handle, TimerEntry>>,
}

impl TimerRegistry {
    pub fn new() -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// Schedule a one-shot timer. `delay` of zero still yields to the pool
    /// once before firing, matching "zero-delay timers fire after the
    /// currently draining microtask set" (spec §4.2) — the caller observes
    /// this as the callback always arriving on a later turn than the one
    /// that registered it.
    #[instrument(skip(self, pool, cancel, callback), level = "debug")]
    pub fn schedule_timeout(
        &self,
        pool: &WorkerPool,
        cancel: &CancellationSignal,
        delay: Duration,
        callback: impl FnOnce() + Send + 'static,
    ) -> Handle {
        let handle = Handle::new();
        let cancel = cancel.clone();
        let task = pool.spawn(async move {
            tokio::select! {
                _ = tokio::time::sleep(delay) => callback(),
                _ = cancel.cancelled() => {}
            }
        });
        self.entries.lock().unwrap().insert(
            handle,
            TimerEntry {
                task,
                kind: TimerKind::OneShot,
            },
        );
        handle
    }

    /// Schedule a repeating timer (`setInterval`). The handle is reused
    /// across fires (spec §3).
    #[instrument(skip(self, pool, cancel, callback), level = "debug")]
    pub fn schedule_interval(
        &self,
        pool: &WorkerPool,
        cancel: &CancellationSignal,
        period: Duration,
        callback: impl Fn() + Send + 'static,
    ) -> Handle {
        let handle = Handle::new();
        let cancel = cancel.clone();
        let task = pool.spawn(async move {
            loop {
                tokio::select! {
                    _ = tokio::time::sleep(period) => callback(),
                    _ = cancel.cancelled() => break,
                }
            }
        });
        self.entries.lock().unwrap().insert(
            handle,
            TimerEntry {
                task,
                kind: TimerKind::Repeating,
            },
        );
        handle
    }

    /// Cancel a timer. An unknown handle is a silent no-op (spec §4.2).
    #[instrument(skip(self), level = "debug")]
    pub fn cancel(&self, handle: Handle) {
        if let Some(entry) = self.entries.lock().unwrap().remove(&handle) {
            entry.task.abort();
        }
    }

    /// Drop the bookkeeping for a one-shot timer that has just fired, if
    /// it hasn't already been cancelled. No-op for handles already
    /// removed (cancelled concurrently) or for repeating timers, whose
    /// entry stays live across fires.
    pub fn retire_one_shot(&self, handle: Handle) {
        let mut entries = self.entries.lock().unwrap();
        if matches!(entries.get(&handle), Some(e) if e.kind == TimerKind::OneShot) {
            entries.remove(&handle);
        }
    }

    /// Number of currently tracked timers. Exposed for tests and metrics.
    pub fn active_count(&self) -> usize {
        self.entries.lock().unwrap().len()
    }
}

impl Default for TimerRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for TimerRegistry {
    fn drop(&mut self) {
        for (_, entry) in self.entries.get_mut().unwrap().drain() {
            entry.task.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;

    #[test]
    fn timeout_fires_and_retires() {
        let pool = WorkerPool::new(2).unwrap();
        let cancel = CancellationSignal::new();
        let registry = TimerRegistry::new();
        let fired = Arc::new(AtomicUsize::new(0));
        let fired2 = fired.clone();

        let handle =
            registry.schedule_timeout(&pool, &cancel, Duration::from_millis(10), move || {
                fired2.fetch_add(1, Ordering::SeqCst);
            });

        pool.block_on(async {
            tokio::time::sleep(Duration::from_millis(50)).await;
        });
        registry.retire_one_shot(handle);

        assert_eq!(fired.load(Ordering::SeqCst), 1);
        assert_eq!(registry.active_count(), 0);
    }

    #[test]
    fn cancel_unknown_handle_is_noop() {
        let registry = TimerRegistry::new();
        registry.cancel(Handle::new());
    }

    #[test]
    fn interval_fires_multiple_times_until_cancelled() {
        let pool = WorkerPool::new(2).unwrap();
        let cancel = CancellationSignal::new();
        let registry = TimerRegistry::new();
        let fired = Arc::new(AtomicUsize::new(0));
        let fired2 = fired.clone();

        let handle =
            registry.schedule_interval(&pool, &cancel, Duration::from_millis(10), move || {
                fired2.fetch_add(1, Ordering::SeqCst);
            });

        pool.block_on(async {
            tokio::time::sleep(Duration::from_millis(55)).await;
        });
        registry.cancel(handle);
        let count_at_cancel = fired.load(Ordering::SeqCst);
        assert!(count_at_cancel >= 2, "expected several fires, got {count_at_cancel}");

        pool.block_on(async {
            tokio::time::sleep(Duration::from_millis(30)).await;
        });
        assert_eq!(fired.load(Ordering::SeqCst), count_at_cancel);
    }
}
