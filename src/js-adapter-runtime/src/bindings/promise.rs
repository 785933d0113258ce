use rquickjs::{Ctx, Result};

/// Installs the script-visible `Promise` façade (spec §4.3).
///
/// The engine's native `Promise` already implements the full spec
/// algorithm correctly — thenable assimilation, the private internal
/// slot `then`/`catch`/`finally` guard against foreign receivers, and
/// (per the ECMAScript combinator algorithms) `Promise.all`/`race`/
/// `allSettled`/`any` all construct their results via `this`, meaning a
/// *subclass* automatically gets correctly-typed wrapped results with no
/// extra plumbing. So rather than re-deriving that machinery in Rust,
/// this installs a thin JS subclass over the native constructor and adds
/// the one combinator modern engines don't universally ship yet
/// (`Promise.try`).
///
/// This mirrors the teacher's own habit of treating script source as
/// data to be declared into the context (see `Engine::eval_script`/the
/// original handler-module loading it's descended from) rather than
/// reimplementing engine-native behavior by hand.
const PRELUDE: &str = r#"
(function () {
    const NativePromise = globalThis.Promise;

    class Promise extends NativePromise {
        static try(fn, ...args) {
            if (typeof fn !== "function") {
                throw new TypeError("Promise.try requires a function");
            }
            return new this((resolve, reject) => {
                try {
                    resolve(fn(...args));
                } catch (err) {
                    reject(err);
                }
            });
        }
    }

    if (typeof Promise.withResolvers !== "function") {
        Promise.withResolvers = function () {
            let resolve, reject;
            const promise = new this((res, rej) => {
                resolve = res;
                reject = rej;
            });
            return { promise, resolve, reject };
        };
    }

    globalThis.Promise = Promise;
})();
"#;

pub fn install(ctx: &Ctx<'_>) -> Result<()> {
    let _: rquickjs::Value = ctx.eval(PRELUDE)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use js_adapter_scheduler::Scheduler;

    use super::*;
    use crate::dispatch::{Dispatch, Job};
    use crate::engine::Engine;

    struct NoopDispatch;
    impl Dispatch for NoopDispatch {
        fn post(&self, _job: Job) {}
        fn post_microtask(&self, _job: Job) {}
    }

    fn test_engine() -> Engine {
        let scheduler = Arc::new(Scheduler::new(1).unwrap());
        Engine::new(scheduler, Arc::new(NoopDispatch)).unwrap()
    }

    #[test]
    fn then_on_non_promise_throws_type_error() {
        let engine = test_engine();
        engine.with(|ctx| {
            let err = ctx
                .eval::<rquickjs::Value, _>("Promise.prototype.then.call({})")
                .unwrap_err();
            assert!(err.is_exception());
        });
    }

    #[test]
    fn executor_must_be_callable() {
        let engine = test_engine();
        engine.with(|ctx| {
            let err = ctx.eval::<rquickjs::Value, _>("new Promise(null)").unwrap_err();
            assert!(err.is_exception());
        });
    }

    #[test]
    fn promise_try_resolves_with_sync_return() {
        let engine = test_engine();
        engine
            .eval_script(
                "test.js",
                "globalThis.seen = null;
                 Promise.try(() => 42).then((v) => { seen = v; });",
            )
            .unwrap();
        engine.with(|ctx| {
            let seen: i32 = ctx.globals().get("seen").unwrap();
            assert_eq!(seen, 42);
        });
    }

    #[test]
    fn promise_try_rejects_on_sync_throw() {
        let engine = test_engine();
        engine
            .eval_script(
                "test.js",
                "globalThis.seen = null;
                 Promise.try(() => { throw new Error('nope'); }).catch((e) => { seen = e.message; });",
            )
            .unwrap();
        engine.with(|ctx| {
            let seen: String = ctx.globals().get("seen").unwrap();
            assert_eq!(seen, "nope");
        });
    }

    #[test]
    fn with_resolvers_exposes_extracted_functions() {
        let engine = test_engine();
        engine
            .eval_script(
                "test.js",
                "globalThis.seen = null;
                 const { promise, resolve } = Promise.withResolvers();
                 promise.then((v) => { seen = v; });
                 resolve('done');",
            )
            .unwrap();
        engine.with(|ctx| {
            let seen: String = ctx.globals().get("seen").unwrap();
            assert_eq!(seen, "done");
        });
    }

    #[test]
    fn combinators_reject_non_iterable() {
        let engine = test_engine();
        engine.with(|ctx| {
            let err = ctx.eval::<rquickjs::Value, _>("Promise.all(42)").unwrap_err();
            assert!(err.is_exception());
        });
    }

    #[test]
    fn all_settled_reports_mixed_outcomes() {
        let engine = test_engine();
        engine
            .eval_script(
                "test.js",
                "globalThis.seen = null;
                 Promise.allSettled([
                     Promise.resolve(1),
                     Promise.reject(new Error('bad')),
                 ]).then((results) => { seen = results.map((r) => r.status); });",
            )
            .unwrap();
        engine.with(|ctx| {
            let seen: Vec<String> = ctx.globals().get("seen").unwrap();
            assert_eq!(seen, vec!["fulfilled".to_string(), "rejected".to_string()]);
        });
    }

    #[test]
    fn any_rejects_with_aggregate_error_when_all_reject() {
        let engine = test_engine();
        engine
            .eval_script(
                "test.js",
                "globalThis.seen = null;
                 Promise.any([
                     Promise.reject(new Error('a')),
                     Promise.reject(new Error('b')),
                 ]).catch((e) => { seen = e.name; });",
            )
            .unwrap();
        engine.with(|ctx| {
            let seen: String = ctx.globals().get("seen").unwrap();
            assert_eq!(seen, "AggregateError");
        });
    }
}
