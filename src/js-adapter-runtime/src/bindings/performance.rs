use std::cell::RefCell;
use std::time::{Instant, SystemTime, UNIX_EPOCH};

use js_adapter_common::DomException as DomExceptionKind;
use rquickjs::prelude::Opt;
use rquickjs::{Array, Ctx, Exception, Function, JsLifetime, Object, Persistent, Result, Value};

use crate::bindings::dom_exception;

/// Installs `performance` (spec §4.8, C8).
pub fn install(ctx: &Ctx<'_>) -> Result<()> {
    ctx.store_userdata(PerformanceState::new())
        .map_err(|_| Exception::throw_internal(ctx, "performance state already installed"))?;

    let globals = ctx.globals();
    let performance: Object = match globals.get::<_, Object>("performance") {
        Ok(existing) => existing,
        Err(_) => {
            let obj = Object::new(ctx.clone())?;
            globals.set("performance", obj.clone())?;
            obj
        }
    };

    macro_rules! set_fn {
        ($name:literal, $func:expr) => {
            performance.set($name, Function::new(ctx.clone(), $func)?)?
        };
    }
    set_fn!("now", now);
    set_fn!("mark", mark);
    set_fn!("measure", measure);
    set_fn!("getEntries", get_entries);
    set_fn!("getEntriesByType", get_entries_by_type);
    set_fn!("getEntriesByName", get_entries_by_name);
    set_fn!("clearMarks", clear_marks);
    set_fn!("clearMeasures", clear_measures);
    set_fn!("clearResourceTimings", clear_resource_timings);
    set_fn!("toJSON", to_json);

    Ok(())
}

/// Per-engine performance bookkeeping (spec §3): the monotonic origin
/// `performance.now()` measures from, plus every recorded mark/measure
/// entry. Installed as context userdata the same way `ConsoleState`/
/// `MicrotaskQueue` are.
#[derive(JsLifetime)]
pub struct PerformanceState {
    origin: Instant,
    time_origin_ms: f64,
    entries: RefCell<Vec<StoredEntry>>,
}

struct StoredEntry {
    name: String,
    entry_type: &'static str,
    start_time: f64,
    duration: f64,
    detail: Option<Persistent<Value<'static>>>,
}

impl PerformanceState {
    fn new() -> Self {
        let time_origin_ms = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs_f64() * 1000.0)
            .unwrap_or(0.0);
        Self { origin: Instant::now(), time_origin_ms, entries: RefCell::new(Vec::new()) }
    }

    fn now_ms(&self) -> f64 {
        self.origin.elapsed().as_secs_f64() * 1000.0
    }
}

fn state<'js>(ctx: &Ctx<'js>) -> Result<&'js PerformanceState> {
    ctx.userdata::<PerformanceState>()
        .ok_or_else(|| Exception::throw_internal(ctx, "performance state missing from context"))
}

fn now(ctx: Ctx<'_>) -> Result<f64> {
    Ok(state(&ctx)?.now_ms())
}

fn mark<'js>(ctx: Ctx<'js>, name: String, options: Opt<Value<'js>>) -> Result<()> {
    let perf = state(&ctx)?;
    let detail = options
        .0
        .and_then(|o| o.as_object().cloned())
        .and_then(|obj| obj.get::<_, Option<Value<'js>>>("detail").ok().flatten())
        .map(|v| Persistent::save(&ctx, v));
    let start_time = perf.now_ms();
    perf.entries.borrow_mut().push(StoredEntry {
        name,
        entry_type: "mark",
        start_time,
        duration: 0.0,
        detail,
    });
    Ok(())
}

/// Resolve a `measure()` endpoint: a number is a literal timestamp in
/// milliseconds; a string names a previously-recorded mark/measure whose
/// `startTime` is used; missing uses `default`. Measuring against a
/// mark name that was never recorded fails (spec §4.8, "Measuring
/// against a non-existent mark name fails with a domain-appropriate
/// error") — resolved here as `DOMException("NotFoundError")`, the same
/// "a lookup found nothing" error already used for console timer/counter
/// labels (see DESIGN.md's Open Questions).
fn resolve_endpoint<'js>(
    ctx: &Ctx<'js>,
    perf: &PerformanceState,
    value: Option<Value<'js>>,
    default: f64,
) -> Result<f64> {
    let Some(value) = value else { return Ok(default) };
    if let Some(n) = value.as_number() {
        return Ok(n);
    }
    if let Some(s) = value.as_string() {
        let name = s.to_string()?;
        let entries = perf.entries.borrow();
        return entries
            .iter()
            .rev()
            .find(|e| e.name == name)
            .map(|e| e.start_time)
            .ok_or_else(|| dom_exception::throw(ctx, DomExceptionKind::NotFoundError, &format!("no mark or measure named '{name}'")));
    }
    Ok(default)
}

fn measure<'js>(
    ctx: Ctx<'js>,
    name: String,
    start: Opt<Value<'js>>,
    end: Opt<Value<'js>>,
) -> Result<()> {
    let perf = state(&ctx)?;

    let (start_arg, end_arg, detail) = match (&start.0, &end.0) {
        (Some(opts), None) if opts.as_object().is_some() && opts.as_number().is_none() => {
            let obj = opts.as_object().unwrap();
            let s = obj.get::<_, Option<Value<'js>>>("start").ok().flatten();
            let e = obj.get::<_, Option<Value<'js>>>("end").ok().flatten();
            let d = obj.get::<_, Option<Value<'js>>>("detail").ok().flatten();
            (s, e, d)
        }
        _ => (start.0.clone(), end.0.clone(), None),
    };

    let now = perf.now_ms();
    let start_time = resolve_endpoint(&ctx, perf, start_arg, 0.0)?;
    let end_time = resolve_endpoint(&ctx, perf, end_arg, now)?;

    perf.entries.borrow_mut().push(StoredEntry {
        name,
        entry_type: "measure",
        start_time,
        duration: end_time - start_time,
        detail: detail.map(|v| Persistent::save(&ctx, v)),
    });
    Ok(())
}

fn entry_to_object<'js>(ctx: &Ctx<'js>, entry: &StoredEntry) -> Result<Object<'js>> {
    let obj = Object::new(ctx.clone())?;
    obj.set("name", entry.name.clone())?;
    obj.set("entryType", entry.entry_type)?;
    obj.set("startTime", entry.start_time)?;
    obj.set("duration", entry.duration)?;
    match &entry.detail {
        Some(detail) => obj.set("detail", detail.clone().restore(ctx.clone())?)?,
        None => obj.set("detail", Value::new_null(ctx.clone()))?,
    }
    Ok(obj)
}

fn entries_to_array<'a, 'js>(ctx: &Ctx<'js>, entries: impl Iterator<Item = &'a StoredEntry>) -> Result<Array<'js>> {
    let array = Array::new(ctx.clone())?;
    for (i, entry) in entries.enumerate() {
        array.set(i, entry_to_object(ctx, entry)?)?;
    }
    Ok(array)
}

fn get_entries<'js>(ctx: Ctx<'js>) -> Result<Array<'js>> {
    let perf = state(&ctx)?;
    let entries = perf.entries.borrow();
    entries_to_array(&ctx, entries.iter())
}

fn get_entries_by_type<'js>(ctx: Ctx<'js>, entry_type: String) -> Result<Array<'js>> {
    let perf = state(&ctx)?;
    let entries = perf.entries.borrow();
    entries_to_array(&ctx, entries.iter().filter(|e| e.entry_type == entry_type))
}

fn get_entries_by_name<'js>(ctx: Ctx<'js>, name: String, entry_type: Opt<String>) -> Result<Array<'js>> {
    let perf = state(&ctx)?;
    let entries = perf.entries.borrow();
    entries_to_array(
        &ctx,
        entries
            .iter()
            .filter(|e| e.name == name && entry_type.0.as_deref().is_none_or(|t| t == e.entry_type)),
    )
}

fn clear_marks(ctx: Ctx<'_>, name: Opt<String>) -> Result<()> {
    let perf = state(&ctx)?;
    perf.entries
        .borrow_mut()
        .retain(|e| e.entry_type != "mark" || name.0.as_deref().is_some_and(|n| n != e.name));
    Ok(())
}

fn clear_measures(ctx: Ctx<'_>, name: Opt<String>) -> Result<()> {
    let perf = state(&ctx)?;
    perf.entries
        .borrow_mut()
        .retain(|e| e.entry_type != "measure" || name.0.as_deref().is_some_and(|n| n != e.name));
    Ok(())
}

fn clear_resource_timings(ctx: Ctx<'_>) -> Result<()> {
    let perf = state(&ctx)?;
    perf.entries.borrow_mut().retain(|e| e.entry_type != "resource");
    Ok(())
}

fn to_json<'js>(ctx: Ctx<'js>) -> Result<Object<'js>> {
    let perf = state(&ctx)?;
    let obj = Object::new(ctx.clone())?;
    obj.set("timeOrigin", perf.time_origin_ms)?;
    Ok(obj)
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
    fn now_is_non_decreasing() {
        let engine = test_engine();
        engine
            .eval_script(
                "test.js",
                "globalThis.a = performance.now();
                 globalThis.b = performance.now();",
            )
            .unwrap();
        engine.with(|ctx| {
            let a: f64 = ctx.eval("a").unwrap();
            let b: f64 = ctx.eval("b").unwrap();
            assert!(b >= a);
        });
    }

    #[test]
    fn measure_between_two_marks() {
        let engine = test_engine();
        engine
            .eval_script(
                "test.js",
                "performance.mark('start');
                 performance.mark('end');
                 performance.measure('span', 'start', 'end');
                 globalThis.count = performance.getEntriesByType('measure').length;",
            )
            .unwrap();
        engine.with(|ctx| {
            let count: f64 = ctx.eval("count").unwrap();
            assert_eq!(count, 1.0);
        });
    }

    #[test]
    fn measure_against_missing_mark_fails() {
        let engine = test_engine();
        engine.with(|ctx| {
            let err = ctx.eval::<Value, _>("performance.measure('x', 'nope')").unwrap_err();
            assert!(err.is_exception());
        });
    }

    #[test]
    fn clear_marks_removes_only_marks() {
        let engine = test_engine();
        engine
            .eval_script(
                "test.js",
                "performance.mark('a');
                 performance.measure('m', 'a');
                 performance.clearMarks();
                 globalThis.marks = performance.getEntriesByType('mark').length;
                 globalThis.measures = performance.getEntriesByType('measure').length;",
            )
            .unwrap();
        engine.with(|ctx| {
            let marks: f64 = ctx.eval("marks").unwrap();
            let measures: f64 = ctx.eval("measures").unwrap();
            assert_eq!(marks, 0.0);
            assert_eq!(measures, 1.0);
        });
    }
}
