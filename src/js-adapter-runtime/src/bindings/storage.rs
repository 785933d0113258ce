use std::cell::RefCell;

use rquickjs::class::Trace;
use rquickjs::prelude::Opt;
use rquickjs::{Class, Ctx, Exception, Result};

/// Installs `localStorage` and `sessionStorage` (spec §4.7, C7): two
/// independent key/value stores. Neither is exposed as a constructible
/// class on the global object — script only ever sees the two
/// pre-built instances, matching the spec's external interface.
pub fn install(ctx: &Ctx<'_>) -> Result<()> {
    let globals = ctx.globals();
    globals.set("localStorage", Class::instance(ctx.clone(), Storage::new())?)?;
    globals.set("sessionStorage", Class::instance(ctx.clone(), Storage::new())?)?;
    Ok(())
}

fn type_error<'js>(ctx: &Ctx<'js>, msg: &str) -> rquickjs::Error {
    Exception::throw_type(ctx, msg)
}

#[rquickjs::class]
#[derive(Trace)]
pub struct Storage {
    #[qjs(skip_trace)]
    entries: RefCell<Vec<(String, String)>>,
}

unsafe impl rquickjs::JsLifetime<'_> for Storage {
    type Changed<'to> = Storage;
}

impl Storage {
    fn new() -> Self {
        Self {
            entries: RefCell::new(Vec::new()),
        }
    }
}

#[rquickjs::methods]
impl Storage {
    #[qjs(rename = "setItem")]
    pub fn set_item(&self, ctx: Ctx<'_>, key: Opt<String>, value: Opt<String>) -> Result<()> {
        let key = key.0.ok_or_else(|| type_error(&ctx, "setItem requires a key"))?;
        let value = value.0.ok_or_else(|| type_error(&ctx, "setItem requires a value"))?;
        let mut entries = self.entries.borrow_mut();
        match entries.iter_mut().find(|(k, _)| *k == key) {
            Some((_, v)) => *v = value,
            None => entries.push((key, value)),
        }
        Ok(())
    }

    #[qjs(rename = "getItem")]
    pub fn get_item(&self, key: Opt<String>) -> Option<String> {
        let key = key.0?;
        self.entries.borrow().iter().find(|(k, _)| *k == key).map(|(_, v)| v.clone())
    }

    #[qjs(rename = "removeItem")]
    pub fn remove_item(&self, ctx: Ctx<'_>, key: Opt<String>) -> Result<()> {
        let key = key.0.ok_or_else(|| type_error(&ctx, "removeItem requires a key"))?;
        self.entries.borrow_mut().retain(|(k, _)| *k != key);
        Ok(())
    }

    pub fn clear(&self) {
        self.entries.borrow_mut().clear();
    }

    pub fn key(&self, index: Opt<i32>) -> Option<String> {
        let index = index.0?;
        if index < 0 {
            return None;
        }
        self.entries.borrow().get(index as usize).map(|(k, _)| k.clone())
    }

    #[qjs(get)]
    pub fn length(&self) -> usize {
        self.entries.borrow().len()
    }
}
