use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tokio::sync::Notify;

/// The scheduler's shutdown signal (spec §5, "Cancellation and timeouts").
///
/// On cancel: new work is refused, in-flight macrotasks complete, pending
/// timers are dropped silently. Cloning shares the same underlying flag —
/// every clone observes the same cancellation.
///
/// `AbortSignal.timeout` (C9) is deliberately **not** built on top of this
/// type: spec §5 requires it to "always fire unless the underlying
/// scheduler has been cancelled first", i.e. it has its own timer subject
/// to the *same* cancellation but is not itself a cancellation signal.
#[derive(Clone)]
pub struct CancellationSignal {
    cancelled: Arc<AtomicBool>,
    notify: Arc<Notify>,
}

impl CancellationSignal {
    pub fn new() -> Self {
        Self {
            cancelled: Arc::new(AtomicBool::new(false)),
            notify: Arc::new(Notify::new()),
        }
    }

    /// True once `cancel()` has been called at least once.
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }

    /// Trip the signal. Idempotent: a second call is a no-op.
    pub fn cancel(&self) {
        if !self.cancelled.swap(true, Ordering::AcqRel) {
            self.notify.notify_waiters();
        }
    }

    /// Resolve once `cancel()` has been called (returns immediately if it
    /// already has been).
    pub async fn cancelled(&self) {
        if self.is_cancelled() {
            return;
        }
        // notify_waiters() only wakes tasks already parked on `notified()`,
        // so re-check after subscribing to close the race with a `cancel()`
        // that lands between our `is_cancelled()` check and this call.
        let notified = self.notify.notified();
        if self.is_cancelled() {
            return;
        }
        notified.await;
    }
}

impl Default for CancellationSignal {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cancel_is_idempotent() {
        let sig = CancellationSignal::new();
        assert!(!sig.is_cancelled());
        sig.cancel();
        sig.cancel();
        assert!(sig.is_cancelled());
    }

    #[tokio::test]
    async fn cancelled_resolves_after_cancel() {
        let sig = CancellationSignal::new();
        let waiter = sig.clone();
        let task = tokio::spawn(async move {
            waiter.cancelled().await;
        });
        sig.cancel();
        task.await.unwrap();
    }

    #[tokio::test]
    async fn cancelled_resolves_immediately_if_already_cancelled() {
        let sig = CancellationSignal::new();
        sig.cancel();
        sig.cancelled().await;
    }
}
