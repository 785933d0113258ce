use std::io;
use std::time::Duration;

use js_adapter_common::Handle;
use tracing::instrument;

use crate::cancellation::CancellationSignal;
use crate::event_bus::{EventBus, NativeEvent, SubscriptionId};
use crate::timers::TimerRegistry;
use crate::worker_pool::WorkerPool;

/// The external multi-threaded event-loop scheduler that `js-adapter`
/// drives (spec §0, "the external scheduler").
///
/// Composes a [`WorkerPool`], a [`TimerRegistry`], an [`EventBus`], and a
/// [`CancellationSignal`] into the one handle the adapter needs. Every
/// method here is safe to call from any thread; none of them touch the
/// script engine.
pub struct Scheduler {
    pool: WorkerPool,
    timers: TimerRegistry,
    events: EventBus,
    cancel: CancellationSignal,
}

impl Scheduler {
    pub fn new(worker_threads: usize) -> io::Result<Self> {
        Ok(Self {
            pool: WorkerPool::new(worker_threads)?,
            timers: TimerRegistry::new(),
            events: EventBus::new(),
            cancel: CancellationSignal::new(),
        })
    }

    /// Schedule a one-shot timer; see [`TimerRegistry::schedule_timeout`].
    #[instrument(skip(self, callback), level = "debug")]
    pub fn schedule_timeout(
        &self,
        delay: Duration,
        callback: impl FnOnce() + Send + 'static,
    ) -> Handle {
        self.timers
            .schedule_timeout(&self.pool, &self.cancel, delay, callback)
    }

    /// Schedule a repeating timer; see [`TimerRegistry::schedule_interval`].
    #[instrument(skip(self, callback), level = "debug")]
    pub fn schedule_interval(
        &self,
        period: Duration,
        callback: impl Fn() + Send + 'static,
    ) -> Handle {
        self.timers
            .schedule_interval(&self.pool, &self.cancel, period, callback)
    }

    /// Cancel a timer previously returned by either `schedule_*` method.
    pub fn cancel_timer(&self, handle: Handle) {
        self.timers.cancel(handle);
    }

    pub fn retire_one_shot_timer(&self, handle: Handle) {
        self.timers.retire_one_shot(handle);
    }

    pub fn active_timer_count(&self) -> usize {
        self.timers.active_count()
    }

    /// Publish a [`NativeEvent`] to every subscriber of its type.
    pub fn emit(&self, event: NativeEvent) {
        self.events.emit(event);
    }

    /// Subscribe to a scheduler-side event topic.
    pub fn subscribe(
        &self,
        event_type: impl Into<String>,
        callback: impl Fn(&NativeEvent) + Send + Sync + 'static,
    ) -> SubscriptionId {
        self.events.subscribe(event_type, callback)
    }

    pub fn unsubscribe(&self, event_type: &str, id: SubscriptionId) {
        self.events.unsubscribe(event_type, id);
    }

    /// Run a future to completion, blocking the calling thread. Used to
    /// drive the adapter's own macrotask loop from `main`.
    pub fn block_on<F: std::future::Future>(&self, fut: F) -> F::Output {
        self.pool.block_on(fut)
    }

    /// Spawn work onto the worker pool directly, bypassing the timer
    /// registry. Used by the Dispatch Bridge to post macrotasks.
    pub fn spawn<F>(&self, fut: F) -> tokio::task::JoinHandle<()>
    where
        F: std::future::Future<Output = ()> + Send + 'static,
    {
        self.pool.spawn(fut)
    }

    pub fn handle(&self) -> tokio::runtime::Handle {
        self.pool.handle()
    }

    pub fn cancellation(&self) -> CancellationSignal {
        self.cancel.clone()
    }

    /// Trip the shutdown signal. Idempotent.
    #[instrument(skip(self))]
    pub fn shutdown(&self) {
        self.cancel.cancel();
    }

    pub fn is_shutdown(&self) -> bool {
        self.cancel.is_cancelled()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;

    #[test]
    fn timeout_and_event_bus_integrate() {
        let scheduler = Scheduler::new(2).unwrap();
        let seen = Arc::new(AtomicUsize::new(0));
        let seen2 = seen.clone();
        scheduler.subscribe("done", move |_| {
            seen2.fetch_add(1, Ordering::SeqCst);
        });

        let events = scheduler.handle();
        let _ = events;
        scheduler.block_on(async {
            tokio::time::sleep(Duration::from_millis(5)).await;
        });
        scheduler.emit(NativeEvent::new("done", ()));
        assert_eq!(seen.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn shutdown_is_idempotent_and_observable() {
        let scheduler = Scheduler::new(1).unwrap();
        assert!(!scheduler.is_shutdown());
        scheduler.shutdown();
        scheduler.shutdown();
        assert!(scheduler.is_shutdown());
    }
}
