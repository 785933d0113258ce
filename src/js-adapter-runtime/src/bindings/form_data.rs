use std::cell::RefCell;

use rquickjs::class::Trace;
use rquickjs::prelude::{Opt, This};
use rquickjs::{Array, Class, Ctx, Exception, Persistent, Result, Value};

use crate::utils::array_iterator;

/// Installs `FormData` (spec §4.7, C7): an insertion-order multi-map
/// whose values may be any script value (a string, a `Blob`, ...), so
/// entries are held as [`Persistent`] values rather than coerced to
/// strings the way `Headers`/`URLSearchParams` are.
pub fn install(ctx: &Ctx<'_>) -> Result<()> {
    Class::<FormData>::define(&ctx.globals())?;
    Ok(())
}

fn type_error<'js>(ctx: &Ctx<'js>, msg: &str) -> rquickjs::Error {
    Exception::throw_type(ctx, msg)
}

#[rquickjs::class]
#[derive(Trace)]
pub struct FormData {
    #[qjs(skip_trace)]
    entries: RefCell<Vec<(String, Persistent<Value<'static>>)>>,
}

unsafe impl rquickjs::JsLifetime<'_> for FormData {
    type Changed<'to> = FormData;
}

#[rquickjs::methods]
impl FormData {
    #[qjs(constructor)]
    pub fn new() -> Self {
        Self {
            entries: RefCell::new(Vec::new()),
        }
    }

    pub fn append<'js>(&self, ctx: Ctx<'js>, name: Opt<String>, value: Opt<Value<'js>>) -> Result<()> {
        let name = name.0.ok_or_else(|| type_error(&ctx, "append requires a name"))?;
        let value = value.0.ok_or_else(|| type_error(&ctx, "append requires a value"))?;
        self.entries.borrow_mut().push((name, Persistent::save(&ctx, value)));
        Ok(())
    }

    pub fn set<'js>(&self, ctx: Ctx<'js>, name: Opt<String>, value: Opt<Value<'js>>) -> Result<()> {
        let name = name.0.ok_or_else(|| type_error(&ctx, "set requires a name"))?;
        let value = value.0.ok_or_else(|| type_error(&ctx, "set requires a value"))?;
        let persisted = Persistent::save(&ctx, value);
        let mut entries = self.entries.borrow_mut();
        let mut replaced = false;
        entries.retain_mut(|(k, v)| {
            if *k != name {
                return true;
            }
            if replaced {
                return false;
            }
            *v = persisted.clone();
            replaced = true;
            true
        });
        if !replaced {
            entries.push((name, persisted));
        }
        Ok(())
    }

    pub fn delete(&self, ctx: Ctx<'_>, name: Opt<String>) -> Result<()> {
        let name = name.0.ok_or_else(|| type_error(&ctx, "delete requires a name"))?;
        self.entries.borrow_mut().retain(|(k, _)| *k != name);
        Ok(())
    }

    pub fn get<'js>(&self, ctx: Ctx<'js>, name: Opt<String>) -> Result<Value<'js>> {
        let name = name.0.ok_or_else(|| type_error(&ctx, "get requires a name"))?;
        match self.entries.borrow().iter().find(|(k, _)| *k == name) {
            Some((_, v)) => v.clone().restore(ctx),
            None => Ok(Value::new_null(ctx)),
        }
    }

    #[qjs(rename = "getAll")]
    pub fn get_all<'js>(&self, ctx: Ctx<'js>, name: Opt<String>) -> Result<Vec<Value<'js>>> {
        let name = name.0.ok_or_else(|| type_error(&ctx, "getAll requires a name"))?;
        self.entries
            .borrow()
            .iter()
            .filter(|(k, _)| *k == name)
            .map(|(_, v)| v.clone().restore(ctx.clone()))
            .collect()
    }

    pub fn has(&self, ctx: Ctx<'_>, name: Opt<String>) -> Result<bool> {
        let name = name.0.ok_or_else(|| type_error(&ctx, "has requires a name"))?;
        Ok(self.entries.borrow().iter().any(|(k, _)| *k == name))
    }

    #[qjs(rename = "forEach")]
    pub fn for_each<'js>(&self, ctx: Ctx<'js>, callback: Opt<Value<'js>>, this_arg: Opt<Value<'js>>) -> Result<()> {
        let func = callback
            .0
            .and_then(|v| v.as_function().cloned())
            .ok_or_else(|| type_error(&ctx, "forEach callback must be a function"))?;
        let this_arg = this_arg.0.unwrap_or_else(|| Value::new_undefined(ctx.clone()));
        let snapshot: Vec<(String, Persistent<Value<'static>>)> = self.entries.borrow().clone();
        for (k, v) in snapshot {
            let restored = v.restore(ctx.clone())?;
            func.call::<_, ()>((This(this_arg.clone()), restored, k))?;
        }
        Ok(())
    }

    pub fn keys<'js>(&self, ctx: Ctx<'js>) -> Result<Value<'js>> {
        let items: Vec<Value> = self
            .entries
            .borrow()
            .iter()
            .map(|(k, _)| rquickjs::String::from_str(ctx.clone(), k).map(|s| s.into_value()))
            .collect::<Result<_>>()?;
        array_iterator(&ctx, items)
    }

    pub fn values<'js>(&self, ctx: Ctx<'js>) -> Result<Value<'js>> {
        let items: Vec<Value> = self
            .entries
            .borrow()
            .iter()
            .map(|(_, v)| v.clone().restore(ctx.clone()))
            .collect::<Result<_>>()?;
        array_iterator(&ctx, items)
    }

    pub fn entries<'js>(&self, ctx: Ctx<'js>) -> Result<Value<'js>> {
        let mut items = Vec::new();
        for (k, v) in self.entries.borrow().iter() {
            let pair = Array::new(ctx.clone())?;
            pair.set(0, k.clone())?;
            pair.set(1, v.clone().restore(ctx.clone())?)?;
            items.push(pair.into_value());
        }
        array_iterator(&ctx, items)
    }
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
    fn append_preserves_multiple_values_in_order() {
        let engine = test_engine();
        engine
            .eval_script(
                "test.js",
                "const fd = new FormData(); fd.append('a', '1'); fd.append('a', '2');
                 globalThis.all = fd.getAll('a').join(',');",
            )
            .unwrap();
        engine.with(|ctx| {
            let all: String = ctx.eval("all").unwrap();
            assert_eq!(all, "1,2");
        });
    }

    #[test]
    fn set_replaces_all_existing_entries_for_name() {
        let engine = test_engine();
        engine
            .eval_script(
                "test.js",
                "const fd = new FormData(); fd.append('a', '1'); fd.append('a', '2'); fd.set('a', '3');
                 globalThis.all = fd.getAll('a').join(',');",
            )
            .unwrap();
        engine.with(|ctx| {
            let all: String = ctx.eval("all").unwrap();
            assert_eq!(all, "3");
        });
    }

    #[test]
    fn for_each_with_non_function_throws_type_error() {
        let engine = test_engine();
        engine.with(|ctx| {
            let err = ctx.eval::<Value, _>("new FormData().forEach(123)").unwrap_err();
            assert!(err.is_exception());
        });
    }

    #[test]
    fn get_on_missing_name_returns_null() {
        let engine = test_engine();
        engine.with(|ctx| {
            let v: Value = ctx.eval("new FormData().get('nope')").unwrap();
            assert!(v.is_null());
        });
    }
}
