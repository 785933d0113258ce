use std::cell::{Cell, RefCell};
use std::time::Duration;

use js_adapter_common::DomException as DomExceptionKind;
use rquickjs::prelude::Opt;
use rquickjs::{Ctx, Exception, Function, JsLifetime, Persistent, Result, Value};

use crate::bindings::dom_exception;
use crate::engine::Capabilities;

/// Installs `AbortController`/`AbortSignal` (spec §4.9, C9).
///
/// `AbortSignal` is declared, like `CustomEvent` (`event_target.rs`) and
/// the `Promise` façade (`promise.rs`), as a JS-level subclass of
/// `EventTarget` rather than a second native class — it needs the exact
/// same listener bookkeeping `EventTarget` already implements (`once`/
/// `capture` dedup is irrelevant here since only one event type ever
/// fires, but insertion-order delivery and `dispatchEvent`'s algorithm
/// are exactly what `signal.addEventListener("abort", …)` must observe).
/// The `aborted`/`reason` state itself lives in a small native class
/// (`__AbortSignalCore`) since that is imperative state no JS-level
/// subclassing substitutes for.
pub fn install(ctx: &Ctx<'_>) -> Result<()> {
    rquickjs::Class::<AbortSignalCore>::define(&ctx.globals())?;
    ctx.globals()
        .set("__scheduleAbortTimeout", Function::new(ctx.clone(), schedule_abort_timeout)?)?;
    let _: Value = ctx.eval(PRELUDE)?;
    Ok(())
}

/// Native state backing each `AbortSignal` instance: whether it has
/// fired and, if so, the abort reason (spec §3 describes this as the
/// signal's own state; nothing here is JS-subclassable).
#[rquickjs::class(rename = "__AbortSignalCore")]
pub struct AbortSignalCore {
    aborted: Cell<bool>,
    reason: RefCell<Option<Persistent<Value<'static>>>>,
}

unsafe impl JsLifetime<'_> for AbortSignalCore {
    type Changed<'to> = AbortSignalCore;
}

#[rquickjs::methods]
impl AbortSignalCore {
    #[qjs(constructor)]
    pub fn new() -> Self {
        Self { aborted: Cell::new(false), reason: RefCell::new(None) }
    }

    #[qjs(get)]
    pub fn aborted(&self) -> bool {
        self.aborted.get()
    }

    #[qjs(get)]
    pub fn reason<'js>(&self, ctx: Ctx<'js>) -> Result<Value<'js>> {
        match &*self.reason.borrow() {
            Some(reason) => reason.clone().restore(ctx),
            None => Ok(Value::new_undefined(ctx)),
        }
    }

    #[qjs(rename = "_setAborted")]
    pub fn set_aborted<'js>(&self, ctx: Ctx<'js>, reason: Value<'js>) {
        self.aborted.set(true);
        *self.reason.borrow_mut() = Some(Persistent::save(&ctx, reason));
    }
}

/// `AbortController`/`AbortSignal` (spec §4.9). `_triggerAbort` is the
/// one idempotency gate every abort path (`controller.abort()`,
/// `AbortSignal.timeout`, a composed `AbortSignal.any` source firing)
/// goes through, so a second `abort()` call is always a no-op and
/// `onabort` always fires alongside any `addEventListener`-registered
/// listener.
const PRELUDE: &str = r#"
(function () {
    class AbortSignal extends EventTarget {
        constructor() {
            super();
            this.__core = new __AbortSignalCore();
            this.onabort = null;
        }

        get aborted() {
            return this.__core.aborted;
        }

        get reason() {
            return this.__core.reason;
        }

        throwIfAborted() {
            if (this.__core.aborted) {
                throw this.__core.reason;
            }
        }

        _triggerAbort(reason) {
            if (this.__core.aborted) {
                return;
            }
            this.__core._setAborted(reason);
            const event = new Event("abort");
            this.dispatchEvent(event);
            if (typeof this.onabort === "function") {
                this.onabort(event);
            }
        }

        static timeout(ms) {
            const signal = new AbortSignal();
            __scheduleAbortTimeout(signal, ms);
            return signal;
        }

        static any(iterable) {
            if (iterable == null || typeof iterable[Symbol.iterator] !== "function") {
                throw new TypeError("AbortSignal.any requires an iterable");
            }
            const sources = Array.from(iterable);
            for (const source of sources) {
                if (source === null || source === undefined) {
                    continue;
                }
                if (!(source instanceof AbortSignal)) {
                    throw new TypeError("AbortSignal.any requires AbortSignal entries");
                }
            }

            const signal = new AbortSignal();
            for (const source of sources) {
                if (source != null && source.aborted) {
                    signal._triggerAbort(source.reason);
                    return signal;
                }
            }
            for (const source of sources) {
                if (source == null) {
                    continue;
                }
                source.addEventListener("abort", () => signal._triggerAbort(source.reason));
            }
            return signal;
        }
    }

    class AbortController {
        constructor() {
            this._signal = new AbortSignal();
        }

        get signal() {
            return this._signal;
        }

        abort(reason) {
            const resolved = reason === undefined
                ? new DOMException("signal is aborted without reason", "AbortError")
                : reason;
            this._signal._triggerAbort(resolved);
        }
    }

    globalThis.AbortSignal = AbortSignal;
    globalThis.AbortController = AbortController;
})();
"#;

fn capabilities<'js>(ctx: &Ctx<'js>) -> Result<&'js Capabilities> {
    ctx.userdata::<Capabilities>()
        .ok_or_else(|| Exception::throw_internal(ctx, "adapter capabilities missing from context"))
}

/// Schedules `signal._triggerAbort(new DOMException(..., "TimeoutError"))`
/// to run on the JS thread after `ms`, via the same `Dispatch`/`Scheduler`
/// path `bindings/timers.rs` uses. Independent of the scheduler's own
/// cancellation signal is *not* a requirement placed on this binding —
/// spec §5 only requires that `AbortSignal.timeout` fire "unless the
/// underlying scheduler has been cancelled first", which
/// `TimerRegistry::schedule_timeout` already guarantees by racing the
/// sleep against that same cancellation signal.
fn schedule_abort_timeout<'js>(ctx: Ctx<'js>, signal: Value<'js>, ms: Opt<f64>) -> Result<()> {
    let caps = capabilities(&ctx)?;
    let scheduler = caps.scheduler.clone();
    let dispatch = caps.dispatch.clone();
    let persisted_signal = Persistent::save(&ctx, signal);

    let ms = ms.0.unwrap_or(0.0).max(0.0);
    let duration = Duration::from_secs_f64(ms / 1000.0);

    scheduler.schedule_timeout(duration, move || {
        let signal = persisted_signal.clone();
        dispatch.post(Box::new(move |engine| {
            engine.with(move |ctx| {
                let Ok(signal_value) = signal.restore(ctx.clone()) else { return };
                let Some(obj) = signal_value.as_object() else { return };
                let Ok(trigger) = obj.get::<_, Function>("_triggerAbort") else { return };
                if let Ok(reason) =
                    dom_exception::construct(&ctx, DomExceptionKind::TimeoutError, "signal timed out")
                    && let Err(err) =
                        trigger.call::<_, Value<'_>>((rquickjs::function::This(signal_value.clone()), reason))
                {
                    tracing::warn!(?err, "AbortSignal.timeout callback threw");
                }
            });
        }));
    });

    Ok(())
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use js_adapter_scheduler::Scheduler;

    use super::*;
    use crate::dispatch::{Dispatch, Job};
    use crate::engine::Engine;

    struct TestDispatch {
        jobs: std::sync::Mutex<Vec<Job>>,
    }

    impl TestDispatch {
        fn new() -> Arc<Self> {
            Arc::new(Self { jobs: std::sync::Mutex::new(Vec::new()) })
        }

        fn run_pending(&self, engine: &Engine) {
            loop {
                let job = self.jobs.lock().unwrap().pop();
                let Some(job) = job else { break };
                job(engine);
            }
        }
    }

    impl Dispatch for TestDispatch {
        fn post(&self, job: Job) {
            self.jobs.lock().unwrap().insert(0, job);
        }
        fn post_microtask(&self, job: Job) {
            self.post(job);
        }
    }

    fn test_engine() -> (Engine, Arc<TestDispatch>) {
        let scheduler = Arc::new(Scheduler::new(2).unwrap());
        let dispatch = TestDispatch::new();
        let engine = Engine::new(scheduler, dispatch.clone()).unwrap();
        (engine, dispatch)
    }

    #[test]
    fn abort_flips_aborted_and_reason_once() {
        let (engine, _dispatch) = test_engine();
        engine
            .eval_script(
                "test.js",
                "const c = new AbortController();
                 globalThis.before = c.signal.aborted;
                 c.abort('x');
                 c.abort('y');
                 globalThis.after = c.signal.aborted;
                 globalThis.reason = c.signal.reason;",
            )
            .unwrap();
        engine.with(|ctx| {
            let before: bool = ctx.eval("before").unwrap();
            let after: bool = ctx.eval("after").unwrap();
            let reason: String = ctx.eval("reason").unwrap();
            assert!(!before);
            assert!(after);
            assert_eq!(reason, "x");
        });
    }

    #[test]
    fn default_abort_reason_is_abort_error_dom_exception() {
        let (engine, _dispatch) = test_engine();
        engine
            .eval_script(
                "test.js",
                "const c = new AbortController();
                 c.abort();
                 globalThis.name = c.signal.reason.name;",
            )
            .unwrap();
        engine.with(|ctx| {
            let name: String = ctx.eval("name").unwrap();
            assert_eq!(name, "AbortError");
        });
    }

    #[test]
    fn onabort_and_listener_both_fire() {
        let (engine, _dispatch) = test_engine();
        engine
            .eval_script(
                "test.js",
                "const c = new AbortController();
                 globalThis.seen = [];
                 c.signal.addEventListener('abort', () => seen.push('listener'));
                 c.signal.onabort = () => seen.push('onabort');
                 c.abort();",
            )
            .unwrap();
        engine.with(|ctx| {
            let seen: Vec<String> = ctx.eval("seen").unwrap();
            assert_eq!(seen, vec!["listener".to_string(), "onabort".to_string()]);
        });
    }

    #[test]
    fn any_is_already_aborted_if_a_source_already_is() {
        let (engine, _dispatch) = test_engine();
        engine
            .eval_script(
                "test.js",
                "const c1 = new AbortController();
                 const c2 = new AbortController();
                 c1.abort('x');
                 globalThis.aborted = AbortSignal.any([c1.signal, c2.signal]).aborted;",
            )
            .unwrap();
        engine.with(|ctx| {
            let aborted: bool = ctx.eval("aborted").unwrap();
            assert!(aborted);
        });
    }

    #[test]
    fn any_aborts_when_first_source_aborts_later() {
        let (engine, _dispatch) = test_engine();
        engine
            .eval_script(
                "test.js",
                "const c1 = new AbortController();
                 const c2 = new AbortController();
                 globalThis.s = AbortSignal.any([c1.signal, c2.signal]);
                 c1.abort('x');",
            )
            .unwrap();
        engine.with(|ctx| {
            let aborted: bool = ctx.eval("s.aborted").unwrap();
            assert!(aborted);
        });
    }

    #[test]
    fn any_rejects_non_signal_entries() {
        let (engine, _dispatch) = test_engine();
        engine.with(|ctx| {
            let err = ctx.eval::<Value, _>("AbortSignal.any([42])").unwrap_err();
            assert!(err.is_exception());
        });
    }

    #[test]
    fn timeout_aborts_after_scheduler_fires() {
        let (engine, dispatch) = test_engine();
        engine
            .eval_script(
                "test.js",
                "globalThis.s = AbortSignal.timeout(1);",
            )
            .unwrap();
        std::thread::sleep(Duration::from_millis(20));
        dispatch.run_pending(&engine);
        engine.drain_microtasks().unwrap();
        engine.with(|ctx| {
            let aborted: bool = ctx.eval("s.aborted").unwrap();
            let name: String = ctx.eval("s.reason.name").unwrap();
            assert!(aborted);
            assert_eq!(name, "TimeoutError");
        });
    }
}
