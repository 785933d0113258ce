use js_adapter_common::DomException as DomExceptionKind;
use rquickjs::prelude::Opt;
use rquickjs::{Class, Ctx, Error, Function, Result, Value};

/// Installs the script-visible `DOMException` class.
///
/// Every component that needs to throw a named platform error (C5's
/// `DataCloneError`, C8's `QuotaExceededError`, C9's default abort
/// `reason`, ...) constructs one through here rather than inventing its
/// own ad-hoc error shape, so script sees one consistent `DOMException`
/// with the legacy numeric `code` spec §7 requires.
pub fn install(ctx: &Ctx<'_>) -> Result<()> {
    Class::<DomException>::define(&ctx.globals())?;
    Ok(())
}

/// `DOMException` (spec §7): `name`/`message`/legacy numeric `code`.
#[rquickjs::class(rename = "DOMException")]
pub struct DomException {
    message: String,
    name: String,
    code: u16,
}

unsafe impl rquickjs::JsLifetime<'_> for DomException {
    type Changed<'to> = DomException;
}

#[rquickjs::methods]
impl DomException {
    #[qjs(constructor)]
    pub fn new(message: Opt<String>, name: Opt<String>) -> Self {
        let name = name.0.unwrap_or_else(|| "Error".to_string());
        let code = DomExceptionKind::ALL
            .iter()
            .find(|k| k.name() == name)
            .map(|k| k.code())
            .unwrap_or(0);
        Self {
            message: message.0.unwrap_or_default(),
            name,
            code,
        }
    }

    #[qjs(get)]
    pub fn message(&self) -> String {
        self.message.clone()
    }

    #[qjs(get)]
    pub fn name(&self) -> String {
        self.name.clone()
    }

    #[qjs(get)]
    pub fn code(&self) -> u16 {
        self.code
    }
}

/// Construct a `DOMException` instance of the given kind without throwing
/// it. Used by C9 for `AbortController`'s default abort reason, which is
/// a value observed via `signal.reason`, not necessarily thrown.
pub fn construct<'js>(ctx: &Ctx<'js>, kind: DomExceptionKind, message: &str) -> Result<Value<'js>> {
    let ctor: Function = ctx.globals().get("DOMException")?;
    ctor.construct((message.to_string(), kind.name().to_string()))
}

/// Construct and immediately throw a `DOMException` of the given kind.
pub fn throw<'js>(ctx: &Ctx<'js>, kind: DomExceptionKind, message: &str) -> Error {
    match construct(ctx, kind, message) {
        Ok(value) => ctx.throw(value),
        Err(err) => err,
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
    fn carries_legacy_numeric_code() {
        let engine = test_engine();
        engine.with(|ctx| {
            let code: u16 = ctx
                .eval("new DOMException('nope', 'QuotaExceededError').code")
                .unwrap();
            assert_eq!(code, 22);
        });
    }

    #[test]
    fn default_name_carries_code_zero() {
        let engine = test_engine();
        engine.with(|ctx| {
            let code: u16 = ctx.eval("new DOMException('nope').code").unwrap();
            assert_eq!(code, 0);
        });
    }
}
