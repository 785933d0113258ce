use js_adapter_common::DomException;
use rand::RngCore;
use rquickjs::prelude::Opt;
use rquickjs::{Ctx, Exception, Function, Object, Result, Value};
use uuid::Uuid;

use crate::bindings::dom_exception;

/// WHATWG's `crypto.getRandomValues` quota: requests over 65536 bytes
/// are rejected rather than serviced (spec §4.8).
const MAX_RANDOM_BYTES: usize = 65536;

/// Installs `crypto.getRandomValues`/`crypto.randomUUID` (spec §4.8, C8).
pub fn install(ctx: &Ctx<'_>) -> Result<()> {
    let globals = ctx.globals();
    let crypto: Object = match globals.get::<_, Object>("crypto") {
        Ok(existing) => existing,
        Err(_) => {
            let obj = Object::new(ctx.clone())?;
            globals.set("crypto", obj.clone())?;
            obj
        }
    };
    crypto.set("getRandomValues", Function::new(ctx.clone(), get_random_values)?)?;
    crypto.set("randomUUID", Function::new(ctx.clone(), random_uuid)?)?;
    Ok(())
}

fn type_error<'js>(ctx: &Ctx<'js>, msg: &str) -> rquickjs::Error {
    Exception::throw_type(ctx, msg)
}

const FLOAT_VIEW_NAMES: &[&str] = &["Float32Array", "Float64Array"];

fn constructor_name(obj: &Object<'_>) -> Option<String> {
    let ctor: Object = obj.get("constructor").ok()?;
    ctor.get::<_, String>("name").ok()
}

fn get_random_values<'js>(ctx: Ctx<'js>, view: Opt<Value<'js>>) -> Result<Value<'js>> {
    let view = view.0.ok_or_else(|| type_error(&ctx, "getRandomValues requires a view"))?;
    let obj = view
        .as_object()
        .ok_or_else(|| type_error(&ctx, "getRandomValues requires a TypedArray view"))?;

    let name = constructor_name(obj);
    if name.as_deref().is_none_or(|n| !n.ends_with("Array") || n == "Array") {
        return Err(type_error(&ctx, "getRandomValues requires a TypedArray view"));
    }
    if name.as_deref().is_some_and(|n| FLOAT_VIEW_NAMES.contains(&n)) {
        return Err(type_error(&ctx, "getRandomValues does not accept floating-point views"));
    }

    let byte_length: Option<f64> = obj.get("byteLength").ok();
    let byte_length = byte_length.ok_or_else(|| type_error(&ctx, "getRandomValues requires a TypedArray view"))? as usize;
    if byte_length > MAX_RANDOM_BYTES {
        return Err(dom_exception::throw(
            &ctx,
            DomException::QuotaExceededError,
            &format!("getRandomValues request of {byte_length} bytes exceeds the {MAX_RANDOM_BYTES}-byte quota"),
        ));
    }

    let mut buf = vec![0u8; byte_length];
    rand::rng().fill_bytes(&mut buf);

    let set_fn: Function = obj.get("set")?;
    let source = rquickjs::TypedArray::<u8>::new(ctx.clone(), buf)?;
    let _: Value = set_fn.call((rquickjs::function::This(obj.clone()), source))?;

    Ok(view)
}

fn random_uuid() -> String {
    Uuid::new_v4().to_string()
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
    fn fills_view_and_returns_it() {
        let engine = test_engine();
        engine
            .eval_script(
                "test.js",
                "const a = new Uint8Array(16);
                 const b = crypto.getRandomValues(a);
                 globalThis.sameObject = a === b;
                 globalThis.notAllZero = a.some((x) => x !== 0);",
            )
            .unwrap();
        engine.with(|ctx| {
            let same: bool = ctx.eval("sameObject").unwrap();
            assert!(same);
        });
    }

    #[test]
    fn rejects_non_typed_array() {
        let engine = test_engine();
        engine.with(|ctx| {
            let err = ctx.eval::<Value, _>("crypto.getRandomValues([1,2,3])").unwrap_err();
            assert!(err.is_exception());
        });
    }

    #[test]
    fn rejects_float_view() {
        let engine = test_engine();
        engine.with(|ctx| {
            let err = ctx
                .eval::<Value, _>("crypto.getRandomValues(new Float64Array(4))")
                .unwrap_err();
            assert!(err.is_exception());
        });
    }

    #[test]
    fn rejects_oversized_request_with_quota_exceeded() {
        let engine = test_engine();
        engine
            .eval_script(
                "test.js",
                "try { crypto.getRandomValues(new Uint8Array(65537)); globalThis.name = 'none'; }
                 catch (e) { globalThis.name = e.name; }",
            )
            .unwrap();
        engine.with(|ctx| {
            let name: String = ctx.eval("name").unwrap();
            assert_eq!(name, "QuotaExceededError");
        });
    }

    #[test]
    fn random_uuid_is_canonical_36_chars() {
        let engine = test_engine();
        engine.with(|ctx| {
            let len: usize = ctx.eval("crypto.randomUUID().length").unwrap();
            assert_eq!(len, 36);
        });
    }
}
