use std::sync::{Arc, OnceLock};
use std::time::Duration;

use js_adapter_common::Handle;
use rquickjs::prelude::{Opt, Rest};
use rquickjs::{Ctx, Exception, Function, Object, Persistent, Result, Value};

use crate::engine::{Capabilities, MicrotaskQueue};

/// Installs `setTimeout`/`setInterval`/`setImmediate`/their `clear*`
/// counterparts, `queueMicrotask`, `process.nextTick`, and `delay` (spec
/// §4.2).
pub fn install(ctx: &Ctx<'_>) -> Result<()> {
    let globals = ctx.globals();

    globals.set("setTimeout", Function::new(ctx.clone(), set_timeout)?)?;
    globals.set("setInterval", Function::new(ctx.clone(), set_interval)?)?;
    globals.set("setImmediate", Function::new(ctx.clone(), set_immediate)?)?;
    globals.set("clearTimeout", Function::new(ctx.clone(), clear_timer)?)?;
    globals.set("clearInterval", Function::new(ctx.clone(), clear_timer)?)?;
    globals.set("clearImmediate", Function::new(ctx.clone(), clear_timer)?)?;
    globals.set("queueMicrotask", Function::new(ctx.clone(), queue_microtask)?)?;
    globals.set("delay", Function::new(ctx.clone(), delay)?)?;

    let process: Object = match globals.get::<_, Object>("process") {
        Ok(existing) => existing,
        Err(_) => {
            let obj = Object::new(ctx.clone())?;
            globals.set("process", obj.clone())?;
            obj
        }
    };
    process.set("nextTick", Function::new(ctx.clone(), next_tick)?)?;

    Ok(())
}

fn capabilities<'js>(ctx: &Ctx<'js>) -> Result<&'js Capabilities> {
    ctx.userdata::<Capabilities>()
        .ok_or_else(|| Exception::throw_internal(ctx, "adapter capabilities missing from context"))
}

fn microtask_queue<'js>(ctx: &Ctx<'js>) -> Result<&'js MicrotaskQueue> {
    ctx.userdata::<MicrotaskQueue>()
        .ok_or_else(|| Exception::throw_internal(ctx, "microtask queue missing from context"))
}

fn as_callable<'js>(ctx: &Ctx<'js>, value: &Value<'js>, what: &str) -> Result<Function<'js>> {
    value
        .as_function()
        .cloned()
        .ok_or_else(|| Exception::throw_type(ctx, &format!("{what} is not a function")))
}

/// Shared implementation for `setTimeout`/`setInterval`/`setImmediate`/
/// `delay`'s internal resolve-after-ms call. Saves `func` and `args`
/// across the concurrency boundary, registers with the scheduler, and
/// returns the script-visible handle.
fn schedule<'js>(
    ctx: Ctx<'js>,
    func: Value<'js>,
    delay_ms: Opt<f64>,
    args: Rest<Value<'js>>,
    repeating: bool,
) -> Result<f64> {
    let func = as_callable(&ctx, &func, "the timer callback")?;
    let caps = capabilities(&ctx)?;
    let scheduler = caps.scheduler.clone();
    let dispatch = caps.dispatch.clone();

    let persisted_func = Persistent::save(&ctx, func);
    let persisted_args: Vec<Persistent<Value<'static>>> =
        args.0.into_iter().map(|v| Persistent::save(&ctx, v)).collect();

    let delay_ms = delay_ms.0.unwrap_or(0.0).max(0.0);
    let duration = Duration::from_secs_f64(delay_ms / 1000.0);

    let run_once = {
        let dispatch = dispatch.clone();
        let func = persisted_func.clone();
        let args = persisted_args.clone();
        move || {
            let func = func.clone();
            let args = args.clone();
            dispatch.post(Box::new(move |engine| {
                engine.with(move |ctx| {
                    let Ok(func) = func.restore(ctx.clone()) else {
                        return;
                    };
                    let mut restored_args = Vec::with_capacity(args.len());
                    for arg in args {
                        match arg.restore(ctx.clone()) {
                            Ok(v) => restored_args.push(v),
                            Err(_) => return,
                        }
                    }
                    if let Err(err) = func.call::<_, Value<'_>>(Rest(restored_args)) {
                        tracing::warn!(?err, "timer callback threw");
                    }
                });
            }));
        }
    };

    // Filled in with this timer's own handle right after scheduling, so
    // a fired one-shot can retire its own bookkeeping entry. A zero-delay
    // timer could in principle fire before the slot is set; the retire
    // is then just skipped, leaving one stale (but already-fired, already
    // cancel()-safe) entry behind — never a correctness issue.
    let handle_slot: Arc<OnceLock<Handle>> = Arc::new(OnceLock::new());

    let handle = if repeating {
        scheduler.schedule_interval(duration, run_once)
    } else {
        let scheduler = scheduler.clone();
        let handle_slot = handle_slot.clone();
        scheduler.clone().schedule_timeout(duration, move || {
            run_once();
            if let Some(handle) = handle_slot.get() {
                scheduler.retire_one_shot_timer(*handle);
            }
        })
    };
    let _ = handle_slot.set(handle);

    Ok(handle.into())
}

fn set_timeout<'js>(
    ctx: Ctx<'js>,
    func: Value<'js>,
    delay_ms: Opt<f64>,
    args: Rest<Value<'js>>,
) -> Result<f64> {
    schedule(ctx, func, delay_ms, args, false)
}

fn set_interval<'js>(
    ctx: Ctx<'js>,
    func: Value<'js>,
    delay_ms: Opt<f64>,
    args: Rest<Value<'js>>,
) -> Result<f64> {
    schedule(ctx, func, delay_ms, args, true)
}

fn set_immediate<'js>(ctx: Ctx<'js>, func: Value<'js>, args: Rest<Value<'js>>) -> Result<f64> {
    schedule(ctx, func, Opt(Some(0.0)), args, false)
}

fn clear_timer(ctx: Ctx<'_>, handle: Opt<f64>) -> Result<()> {
    let Some(handle) = handle.0 else { return Ok(()) };
    let Some(handle) = Handle::from_f64(handle) else {
        return Ok(());
    };
    capabilities(&ctx)?.scheduler.cancel_timer(handle);
    Ok(())
}

fn queue_microtask<'js>(ctx: Ctx<'js>, func: Value<'js>) -> Result<()> {
    let func = as_callable(&ctx, &func, "queueMicrotask's argument")?;
    microtask_queue(&ctx)?.enqueue(&ctx, func);
    Ok(())
}

fn next_tick<'js>(ctx: Ctx<'js>, func: Value<'js>, args: Rest<Value<'js>>) -> Result<()> {
    let func = as_callable(&ctx, &func, "process.nextTick's first argument")?;
    let queue = microtask_queue(&ctx)?;
    if args.0.is_empty() {
        queue.enqueue(&ctx, func);
    } else {
        let bound = Function::new(ctx.clone(), move || -> Result<Value<'js>> {
            func.call(Rest(args.0.clone()))
        })?;
        queue.enqueue(&ctx, bound);
    }
    Ok(())
}

/// `delay(ms)` — returns a wrapped promise resolving `undefined` after
/// `ms`, built by constructing script's own `Promise` with an executor
/// that schedules `resolve` via the same path `setTimeout` uses.
fn delay<'js>(ctx: Ctx<'js>, ms: Opt<f64>) -> Result<Value<'js>> {
    let promise_ctor: Function = ctx.globals().get("Promise")?;
    let ms = ms.0.unwrap_or(0.0);
    let executor = Function::new(ctx.clone(), move |ctx: Ctx<'js>, resolve: Function<'js>| -> Result<()> {
        let resolve_value = resolve.into_value();
        schedule(ctx, resolve_value, Opt(Some(ms)), Rest(Vec::new()), false)?;
        Ok(())
    })?;
    promise_ctor.construct((executor,))
}
