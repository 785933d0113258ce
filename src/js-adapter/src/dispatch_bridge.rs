use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use crossbeam_channel::{select, unbounded, Receiver, Sender};
use js_adapter_runtime::{Dispatch, Engine, Job};
use js_adapter_scheduler::CancellationSignal;
use tracing::instrument;

use crate::metrics::{DISPATCH_MACROTASKS_TOTAL, DISPATCH_MICROTASKS_TOTAL, DISPATCH_QUEUE_DEPTH};

/// How often the dispatch loop wakes with nothing queued, purely to
/// re-check the cancellation signal. Not a polling interval for work —
/// `crossbeam_channel::select!` wakes immediately when either queue has a
/// job; this is only the worst-case latency for observing shutdown.
const IDLE_TICK: Duration = Duration::from_millis(100);

/// The concurrency boundary (spec §4.1, C1): the single path between the
/// scheduler's worker pool and the dedicated JS thread.
///
/// Implements [`Dispatch`] so every binding in `js-adapter-runtime` reaches
/// it through the same `Arc<dyn Dispatch>` capability the engine was built
/// with; nothing outside this module touches the macrotask/microtask
/// channels directly. Grounded on DESIGN NOTES §9's "pair of unbounded
/// queues with a single-consumer loop on a dedicated worker" over a mutex
/// guarding engine state, and on the teacher's preference for plain
/// channel-based worker coordination (`worker_pool.rs`) generalized from
/// tokio tasks to a dedicated OS thread, since the engine itself is not
/// `Send`-safe across concurrent use.
pub struct DispatchBridge {
    macro_tx: Sender<Job>,
    micro_tx: Sender<Job>,
    shut_down: Arc<AtomicBool>,
}

impl DispatchBridge {
    /// Spawn the dedicated JS thread, build `engine` on it via `build`, and
    /// return the bridge handle plus a join handle for shutdown.
    ///
    /// `build` runs on the new thread (not the caller's) so the `Engine`
    /// never crosses threads after construction — only jobs do.
    #[instrument(skip_all, level = "info")]
    pub fn spawn<F>(
        cancel: CancellationSignal,
        build: F,
    ) -> std::io::Result<(Arc<Self>, JoinHandle<()>)>
    where
        F: FnOnce(Arc<dyn Dispatch>) -> anyhow::Result<Engine> + Send + 'static,
    {
        let (macro_tx, macro_rx) = unbounded::<Job>();
        let (micro_tx, micro_rx) = unbounded::<Job>();
        let shut_down = Arc::new(AtomicBool::new(false));

        let bridge = Arc::new(Self {
            macro_tx,
            micro_tx,
            shut_down: shut_down.clone(),
        });
        let dispatch: Arc<dyn Dispatch> = bridge.clone();

        let handle = std::thread::Builder::new()
            .name("js-adapter-dispatch".into())
            .spawn(move || {
                let engine = match build(dispatch) {
                    Ok(engine) => engine,
                    Err(err) => {
                        tracing::error!(?err, "failed to build engine on dispatch thread");
                        shut_down.store(true, Ordering::Release);
                        return;
                    }
                };
                run_loop(&engine, &macro_rx, &micro_rx, &cancel, &shut_down);
            })?;

        Ok((bridge, handle))
    }

    /// Stop accepting new work. Idempotent; in-flight macrotasks already
    /// queued are still delivered, but anything posted after this returns
    /// is dropped silently (spec §4.1's cancellation contract).
    pub fn shut_down(&self) {
        self.shut_down.store(true, Ordering::Release);
    }
}

impl Dispatch for DispatchBridge {
    fn post(&self, job: Job) {
        if self.shut_down.load(Ordering::Acquire) {
            return;
        }
        // send() only fails if the receiver end (the dispatch thread) has
        // already exited, which only happens after shut_down is observed.
        let _ = self.macro_tx.send(job);
    }

    fn post_microtask(&self, job: Job) {
        if self.shut_down.load(Ordering::Acquire) {
            return;
        }
        let _ = self.micro_tx.send(job);
    }
}

/// Drain every job currently sitting in `micro_rx`, running each against
/// `engine` before the real microtask drain. A job posted via
/// `post_microtask` during this drain is picked up by the same loop
/// (spec §4.1: "new microtasks queued during drain run within the same
/// drain").
fn drain_posted_microtasks(engine: &Engine, micro_rx: &Receiver<Job>) {
    while let Ok(job) = micro_rx.try_recv() {
        metrics::counter!(DISPATCH_MICROTASKS_TOTAL).increment(1);
        job(engine);
    }
}

/// The dispatch thread's body: run one macrotask, drain microtasks to
/// fixpoint, repeat (spec §4.1, §5's "dispatch turn"). Exits once the
/// scheduler's cancellation signal fires and the channels are observed
/// disconnected or `shut_down` is set.
fn run_loop(
    engine: &Engine,
    macro_rx: &Receiver<Job>,
    micro_rx: &Receiver<Job>,
    cancel: &CancellationSignal,
    shut_down: &AtomicBool,
) {
    loop {
        drain_posted_microtasks(engine, micro_rx);
        if let Err(err) = engine.drain_microtasks() {
            tracing::warn!(?err, "microtask drain failed");
        }

        metrics::gauge!(DISPATCH_QUEUE_DEPTH).set(macro_rx.len() as f64);

        if shut_down.load(Ordering::Acquire) || cancel.is_cancelled() {
            break;
        }

        select! {
            recv(macro_rx) -> msg => match msg {
                Ok(job) => {
                    metrics::counter!(DISPATCH_MACROTASKS_TOTAL).increment(1);
                    job(engine);
                }
                Err(_) => break,
            },
            recv(micro_rx) -> msg => {
                if let Ok(job) = msg {
                    metrics::counter!(DISPATCH_MICROTASKS_TOTAL).increment(1);
                    job(engine);
                }
            },
            default(IDLE_TICK) => {}
        }
    }
    tracing::info!("dispatch thread exiting");
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicUsize;

    use js_adapter_scheduler::Scheduler;

    use super::*;

    #[test]
    fn posted_macrotask_runs_and_drains_microtasks() {
        let scheduler = Arc::new(Scheduler::new(1).unwrap());
        let cancel = scheduler.cancellation();
        let (bridge, handle) = DispatchBridge::spawn(cancel, move |dispatch| {
            Engine::new(scheduler, dispatch)
        })
        .unwrap();

        bridge.post(Box::new(|engine| {
            engine.eval_script("t.js", "globalThis.ran = true;").unwrap();
        }));

        // Give the dedicated thread a turn; then shut it down and join.
        std::thread::sleep(Duration::from_millis(50));
        bridge.shut_down();
        handle.join().unwrap();
    }

    #[test]
    fn shutdown_stops_accepting_new_work() {
        let scheduler = Arc::new(Scheduler::new(1).unwrap());
        let cancel = scheduler.cancellation();
        let ran = Arc::new(AtomicUsize::new(0));
        let ran2 = ran.clone();
        let (bridge, handle) = DispatchBridge::spawn(cancel, move |dispatch| {
            Engine::new(scheduler, dispatch)
        })
        .unwrap();

        bridge.shut_down();
        bridge.post(Box::new(move |_engine| {
            ran2.fetch_add(1, Ordering::SeqCst);
        }));
        handle.join().unwrap();
        assert_eq!(ran.load(Ordering::SeqCst), 0);
    }
}
