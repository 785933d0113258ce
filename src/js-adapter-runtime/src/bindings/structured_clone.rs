use rquickjs::prelude::{Opt, This};
use rquickjs::{Array, Ctx, Exception, Function, Object, Result, Value};

const TYPED_ARRAY_CTOR_NAMES: &[&str] = &[
    "Int8Array",
    "Uint8Array",
    "Uint8ClampedArray",
    "Int16Array",
    "Uint16Array",
    "Int32Array",
    "Uint32Array",
    "Float32Array",
    "Float64Array",
    "BigInt64Array",
    "BigUint64Array",
];

/// Installs `structuredClone` (spec §4.5, C5).
pub fn install(ctx: &Ctx<'_>) -> Result<()> {
    ctx.globals()
        .set("structuredClone", Function::new(ctx.clone(), clone_root)?)?;
    Ok(())
}

fn clone_root<'js>(ctx: Ctx<'js>, value: Value<'js>, _options: Opt<Value<'js>>) -> Result<Value<'js>> {
    let mut memo: Vec<(Value<'js>, Value<'js>)> = Vec::new();
    clone_value(&ctx, value, &mut memo)
}

const ERROR_CTOR_NAMES: &[&str] = &[
    "Error",
    "TypeError",
    "RangeError",
    "ReferenceError",
    "SyntaxError",
    "EvalError",
    "URIError",
    "AggregateError",
];

fn data_clone_error<'js>(ctx: &Ctx<'js>, what: &str) -> rquickjs::Error {
    Exception::throw_type(ctx, &format!("DataCloneError: could not clone a {what}"))
}

fn constructor_name<'js>(obj: &Object<'js>) -> Option<String> {
    let ctor: Object = obj.get("constructor").ok()?;
    ctor.get::<_, String>("name").ok()
}

fn has_callable(obj: &Object<'_>, name: &str) -> bool {
    obj.get::<_, Value>(name)
        .map(|v| v.as_function().is_some())
        .unwrap_or(false)
}

/// Look up a previously-produced clone for `source` by identity, so cycles
/// resolve to the same output node instead of recursing forever (spec
/// §4.5, "Cycle handling").
fn memo_lookup<'js>(memo: &[(Value<'js>, Value<'js>)], source: &Value<'js>) -> Option<Value<'js>> {
    memo.iter().find(|(s, _)| s == source).map(|(_, d)| d.clone())
}

fn clone_value<'js>(
    ctx: &Ctx<'js>,
    value: Value<'js>,
    memo: &mut Vec<(Value<'js>, Value<'js>)>,
) -> Result<Value<'js>> {
    // 1. primitives: identity.
    if value.is_undefined()
        || value.is_null()
        || value.is_bool()
        || value.is_number()
        || value.is_string()
    {
        return Ok(value);
    }
    // 2. Symbol: pass through (implementation-defined per spec).
    if value.as_symbol().is_some() {
        return Ok(value);
    }

    let Some(obj) = value.as_object() else {
        return Ok(value);
    };

    // 3. Function: DataCloneError.
    if obj.as_function().is_some() {
        return Err(data_clone_error(ctx, "function"));
    }

    if let Some(existing) = memo_lookup(memo, &value) {
        return Ok(existing);
    }

    let ctor_name = constructor_name(obj);

    // 4. Error-class objects: DataCloneError.
    if let Some(name) = ctor_name.as_deref()
        && ERROR_CTOR_NAMES.contains(&name)
        && obj.get::<_, Value>("message").is_ok()
    {
        return Err(data_clone_error(ctx, "error object"));
    }

    // 5. Date.
    if ctor_name.as_deref() == Some("Date") && has_callable(obj, "getTime") {
        let get_time: Function = obj.get("getTime")?;
        let time: f64 = get_time.call((value.clone(),))?;
        let date_ctor: Function = ctx.globals().get("Date")?;
        return date_ctor.construct((time,));
    }

    // 6. RegExp.
    if ctor_name.as_deref() == Some("RegExp") && has_callable(obj, "test") && obj.get::<_, Value>("source").is_ok() {
        let source: String = obj.get("source")?;
        let flags: String = obj.get("flags")?;
        let regexp_ctor: Function = ctx.globals().get("RegExp")?;
        return regexp_ctor.construct((source, flags));
    }

    // 7. Map.
    if ctor_name.as_deref() == Some("Map")
        && has_callable(obj, "get")
        && has_callable(obj, "set")
        && has_callable(obj, "has")
        && has_callable(obj, "delete")
    {
        let map_ctor: Function = ctx.globals().get("Map")?;
        let cloned: Object = map_ctor.construct(())?;
        memo.push((value.clone(), cloned.clone().into_value()));

        let array_from: Function = ctx.globals().get::<_, Object>("Array")?.get("from")?;
        let entries: Array = array_from.call((value.clone(),))?;
        for entry in entries.iter::<Array>() {
            let entry = entry?;
            let key: Value = entry.get(0)?;
            let val: Value = entry.get(1)?;
            let cloned_key = clone_value(ctx, key, memo)?;
            let cloned_val = clone_value(ctx, val, memo)?;
            let set: Function = cloned.get("set")?;
            let _: Value = set.call((This(cloned.clone()), cloned_key, cloned_val))?;
        }
        return Ok(cloned.into_value());
    }

    // 8. Set (has add/has/delete callable AND NOT get callable).
    if ctor_name.as_deref() == Some("Set")
        && has_callable(obj, "add")
        && has_callable(obj, "has")
        && has_callable(obj, "delete")
        && !has_callable(obj, "get")
    {
        let set_ctor: Function = ctx.globals().get("Set")?;
        let cloned: Object = set_ctor.construct(())?;
        memo.push((value.clone(), cloned.clone().into_value()));

        let array_from: Function = ctx.globals().get::<_, Object>("Array")?.get("from")?;
        let members: Array = array_from.call((value.clone(),))?;
        for member in members.iter::<Value>() {
            let member = member?;
            let cloned_member = clone_value(ctx, member, memo)?;
            let add: Function = cloned.get("add")?;
            let _: Value = add.call((This(cloned.clone()), cloned_member))?;
        }
        return Ok(cloned.into_value());
    }

    // 9. ArrayBuffer / typed array / DataView: independent byte copy. Each
    // is reconstructed through its own native constructor (which always
    // copies, never aliases) rather than reinterpreting raw bytes, so the
    // clone keeps the exact same typed-array kind as the original.
    if let Some(name) = ctor_name.as_deref() {
        if TYPED_ARRAY_CTOR_NAMES.contains(&name) {
            let ctor: Function = ctx.globals().get(name)?;
            return ctor.construct((value.clone(),));
        }
        if name == "DataView" {
            let buffer: Value = obj.get("buffer")?;
            let byte_offset: f64 = obj.get("byteOffset")?;
            let byte_length: f64 = obj.get("byteLength")?;
            let buffer_obj = buffer
                .as_object()
                .ok_or_else(|| Exception::throw_internal(ctx, "DataView buffer was not an object"))?;
            let slice_fn: Function = buffer_obj.get("slice")?;
            let new_buffer: Value =
                slice_fn.call((This(buffer_obj.clone()), byte_offset, byte_offset + byte_length))?;
            let dv_ctor: Function = ctx.globals().get("DataView")?;
            return dv_ctor.construct((new_buffer,));
        }
        if name == "ArrayBuffer" {
            let slice_fn: Function = obj.get("slice")?;
            let copy: Value = slice_fn.call((This(obj.clone()),))?;
            return Ok(copy);
        }
    }

    // 10. Array (including sparse).
    if let Some(arr) = value.as_array() {
        let len = arr.len();
        let cloned = Array::new(ctx.clone())?;
        memo.push((value.clone(), cloned.clone().into_value()));
        for i in 0..len {
            if arr.as_object().contains_key(i)? {
                let item: Value = arr.get(i)?;
                let cloned_item = clone_value(ctx, item, memo)?;
                cloned.set(i, cloned_item)?;
            }
        }
        cloned.set("length", len)?;
        return Ok(cloned.into_value());
    }

    // 11. Plain object clone: enumerable own non-function properties.
    let cloned = Object::new(ctx.clone())?;
    memo.push((value.clone(), cloned.clone().into_value()));
    for key in obj.keys::<String>() {
        let key = key?;
        let prop: Value = obj.get(&key)?;
        if prop.as_function().is_some() {
            continue;
        }
        let cloned_prop = clone_value(ctx, prop, memo)?;
        cloned.set(key, cloned_prop)?;
    }
    Ok(cloned.into_value())
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
    fn clones_plain_object_losslessly() {
        let engine = test_engine();
        engine
            .eval_script(
                "test.js",
                "globalThis.original = { a: 1, b: [1, 2, 3] };
                 globalThis.cloned = structuredClone(original);
                 globalThis.same = JSON.stringify(original) === JSON.stringify(cloned) && original !== cloned;",
            )
            .unwrap();
        engine.with(|ctx| {
            let same: bool = ctx.eval("same").unwrap();
            assert!(same);
        });
    }

    #[test]
    fn self_referential_object_clones_cyclically() {
        let engine = test_engine();
        engine
            .eval_script(
                "test.js",
                "const o = {}; o.self = o;
                 globalThis.c = structuredClone(o);
                 globalThis.ok = c.self === c && c !== o;",
            )
            .unwrap();
        engine.with(|ctx| {
            let ok: bool = ctx.eval("ok").unwrap();
            assert!(ok);
        });
    }

    #[test]
    fn rejects_function() {
        let engine = test_engine();
        engine.with(|ctx| {
            let err = ctx
                .eval::<Value, _>("structuredClone(function () {})")
                .unwrap_err();
            assert!(err.is_exception());
        });
    }

    #[test]
    fn rejects_error_object() {
        let engine = test_engine();
        engine.with(|ctx| {
            let err = ctx.eval::<Value, _>("structuredClone(new TypeError('x'))").unwrap_err();
            assert!(err.is_exception());
        });
    }

    #[test]
    fn clones_map_and_set_with_distinct_identity() {
        let engine = test_engine();
        engine
            .eval_script(
                "test.js",
                "const m = new Map([['a', 1]]);
                 const cm = structuredClone(m);
                 globalThis.mapOk = cm !== m && cm.get('a') === 1;
                 const s = new Set([1, 2]);
                 const cs = structuredClone(s);
                 globalThis.setOk = cs !== s && cs.has(1) && cs.has(2);",
            )
            .unwrap();
        engine.with(|ctx| {
            let map_ok: bool = ctx.eval("mapOk").unwrap();
            let set_ok: bool = ctx.eval("setOk").unwrap();
            assert!(map_ok);
            assert!(set_ok);
        });
    }

    #[test]
    fn clones_date_and_regexp_by_type() {
        let engine = test_engine();
        engine
            .eval_script(
                "test.js",
                "const d = new Date(12345);
                 const cd = structuredClone(d);
                 globalThis.dateOk = cd !== d && cd.getTime() === 12345;
                 const r = /abc/gi;
                 const cr = structuredClone(r);
                 globalThis.regexpOk = cr !== r && cr.source === 'abc' && cr.flags === 'gi';",
            )
            .unwrap();
        engine.with(|ctx| {
            let date_ok: bool = ctx.eval("dateOk").unwrap();
            let regexp_ok: bool = ctx.eval("regexpOk").unwrap();
            assert!(date_ok);
            assert!(regexp_ok);
        });
    }
}
