use std::cell::RefCell;

use rquickjs::class::Trace;
use rquickjs::prelude::{Opt, This};
use rquickjs::{Array, Class, Ctx, Exception, Result, Value};

use crate::utils::array_iterator;

/// Installs `Headers` (spec §4.7, C7): a field-name-case-insensitive
/// multi-map preserving insertion order of distinct lowercase names.
pub fn install(ctx: &Ctx<'_>) -> Result<()> {
    Class::<Headers>::define(&ctx.globals())?;
    Ok(())
}

fn type_error<'js>(ctx: &Ctx<'js>, msg: &str) -> rquickjs::Error {
    Exception::throw_type(ctx, msg)
}

fn normalize(name: &str) -> String {
    name.to_ascii_lowercase()
}

#[rquickjs::class]
#[derive(Trace)]
pub struct Headers {
    #[qjs(skip_trace)]
    entries: RefCell<Vec<(String, String)>>,
}

unsafe impl rquickjs::JsLifetime<'_> for Headers {
    type Changed<'to> = Headers;
}

impl Headers {
    fn init_from(ctx: &Ctx<'_>, init: Value<'_>) -> Result<Vec<(String, String)>> {
        if init.is_undefined() || init.is_null() {
            return Ok(Vec::new());
        }
        if let Some(existing) = init.as_object().and_then(|o| Class::<Headers>::from_object(o.clone()).ok()) {
            return Ok(existing.borrow().entries.borrow().clone());
        }
        let mut entries = Vec::new();
        if let Some(arr) = init.as_array() {
            for pair in arr.iter::<Array>() {
                let pair = pair.map_err(|_| type_error(ctx, "Headers init sequence entries must be arrays"))?;
                let name: String = pair.get(0)?;
                let value: String = pair.get(1)?;
                entries.push((normalize(&name), value));
            }
            return Ok(entries);
        }
        if let Some(obj) = init.as_object() {
            for key in obj.keys::<String>() {
                let key = key?;
                let value: String = obj.get(&key)?;
                entries.push((normalize(&key), value));
            }
            return Ok(entries);
        }
        Err(type_error(ctx, "unsupported Headers initializer"))
    }
}

#[rquickjs::methods]
impl Headers {
    #[qjs(constructor)]
    pub fn new(ctx: Ctx<'_>, init: Opt<Value<'_>>) -> Result<Self> {
        let entries = match init.0 {
            Some(v) => Self::init_from(&ctx, v)?,
            None => Vec::new(),
        };
        Ok(Self {
            entries: RefCell::new(entries),
        })
    }

    pub fn set(&self, ctx: Ctx<'_>, name: Opt<String>, value: Opt<String>) -> Result<()> {
        let name = normalize(&name.0.ok_or_else(|| type_error(&ctx, "set requires a name"))?);
        let value = value.0.ok_or_else(|| type_error(&ctx, "set requires a value"))?;
        let mut entries = self.entries.borrow_mut();
        let mut replaced = false;
        entries.retain_mut(|(k, v)| {
            if *k == name {
                if !replaced {
                    *v = value.clone();
                    replaced = true;
                    true
                } else {
                    false
                }
            } else {
                true
            }
        });
        if !replaced {
            entries.push((name, value));
        }
        Ok(())
    }

    pub fn append(&self, ctx: Ctx<'_>, name: Opt<String>, value: Opt<String>) -> Result<()> {
        let name = normalize(&name.0.ok_or_else(|| type_error(&ctx, "append requires a name"))?);
        let value = value.0.ok_or_else(|| type_error(&ctx, "append requires a value"))?;
        let mut entries = self.entries.borrow_mut();
        match entries.iter_mut().find(|(k, _)| *k == name) {
            Some((_, existing)) => {
                existing.push_str(", ");
                existing.push_str(&value);
            }
            None => entries.push((name, value)),
        }
        Ok(())
    }

    pub fn delete(&self, ctx: Ctx<'_>, name: Opt<String>) -> Result<()> {
        let name = normalize(&name.0.ok_or_else(|| type_error(&ctx, "delete requires a name"))?);
        self.entries.borrow_mut().retain(|(k, _)| *k != name);
        Ok(())
    }

    pub fn get(&self, ctx: Ctx<'_>, name: Opt<String>) -> Result<Option<String>> {
        let name = normalize(&name.0.ok_or_else(|| type_error(&ctx, "get requires a name"))?);
        Ok(self.entries.borrow().iter().find(|(k, _)| *k == name).map(|(_, v)| v.clone()))
    }

    pub fn has(&self, ctx: Ctx<'_>, name: Opt<String>) -> Result<bool> {
        let name = normalize(&name.0.ok_or_else(|| type_error(&ctx, "has requires a name"))?);
        Ok(self.entries.borrow().iter().any(|(k, _)| *k == name))
    }

    #[qjs(rename = "getSetCookie")]
    pub fn get_set_cookie(&self) -> Vec<String> {
        self.entries
            .borrow()
            .iter()
            .filter(|(k, _)| k == "set-cookie")
            .map(|(_, v)| v.clone())
            .collect()
    }

    #[qjs(rename = "forEach")]
    pub fn for_each<'js>(&self, ctx: Ctx<'js>, callback: Opt<Value<'js>>, this_arg: Opt<Value<'js>>) -> Result<()> {
        let func = callback
            .0
            .and_then(|v| v.as_function().cloned())
            .ok_or_else(|| type_error(&ctx, "forEach callback must be a function"))?;
        let this_arg = this_arg.0.unwrap_or_else(|| Value::new_undefined(ctx.clone()));
        for (k, v) in self.entries.borrow().clone() {
            func.call::<_, ()>((This(this_arg.clone()), v, k))?;
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
            .map(|(_, v)| rquickjs::String::from_str(ctx.clone(), v).map(|s| s.into_value()))
            .collect::<Result<_>>()?;
        array_iterator(&ctx, items)
    }

    pub fn entries<'js>(&self, ctx: Ctx<'js>) -> Result<Value<'js>> {
        let mut items = Vec::new();
        for (k, v) in self.entries.borrow().iter() {
            let pair = Array::new(ctx.clone())?;
            pair.set(0, k.clone())?;
            pair.set(1, v.clone())?;
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
    fn names_are_case_insensitive() {
        let engine = test_engine();
        engine
            .eval_script(
                "test.js",
                "const h = new Headers(); h.set('Content-Type', 'text/plain');
                 globalThis.v = h.get('CONTENT-TYPE');",
            )
            .unwrap();
        engine.with(|ctx| {
            let v: String = ctx.eval("v").unwrap();
            assert_eq!(v, "text/plain");
        });
    }

    #[test]
    fn append_concatenates_with_comma_space() {
        let engine = test_engine();
        engine
            .eval_script(
                "test.js",
                "const h = new Headers(); h.append('X-A', 'a'); h.append('X-A', 'b');
                 globalThis.v = h.get('x-a');",
            )
            .unwrap();
        engine.with(|ctx| {
            let v: String = ctx.eval("v").unwrap();
            assert_eq!(v, "a, b");
        });
    }

    #[test]
    fn get_set_cookie_returns_separate_entries() {
        let engine = test_engine();
        engine
            .eval_script(
                "test.js",
                "const h = new Headers(); h.append('Set-Cookie', 'a=1'); h.append('Set-Cookie', 'b=2');
                 globalThis.cookies = h.getSetCookie();",
            )
            .unwrap();
        engine.with(|ctx| {
            let cookies: Vec<String> = ctx.eval("cookies").unwrap();
            assert_eq!(cookies, vec!["a=1".to_string(), "b=2".to_string()]);
        });
    }

    #[test]
    fn get_on_missing_name_returns_null() {
        let engine = test_engine();
        engine.with(|ctx| {
            let v: Value = ctx.eval("new Headers().get('nope')").unwrap();
            assert!(v.is_null());
        });
    }
}
