use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::rc::Rc;

use rquickjs::class::Trace;
use rquickjs::prelude::Opt;
use rquickjs::{Ctx, Exception, Function, JsLifetime, Object, Persistent, Result, Value};

/// `CustomEvent` is declared as a JS-level subclass of the native `Event`
/// class below, the same way `bindings/promise.rs` subclasses the native
/// `Promise`: the native constructor QuickJS runs via `super(...)` is what
/// tags the resulting object with `Event`'s class id, so
/// `Class::<Event>::from_object` downcasts a `CustomEvent` instance just as
/// well as a plain `Event` one. A second native Rust class for `CustomEvent`
/// would instead get its own distinct class id and break exactly that
/// downcast, which `dispatchEvent`/`dispatch_native` both depend on.
const CUSTOM_EVENT_PRELUDE: &str = r#"
(function () {
    class CustomEvent extends Event {
        constructor(type, init) {
            super(type, init);
            this._detail = init && "detail" in init ? init.detail : null;
        }
        get detail() {
            return this._detail;
        }
    }
    globalThis.CustomEvent = CustomEvent;
})();
"#;

/// Installs `EventTarget`, `Event`, and `CustomEvent` (spec §4.4).
pub fn install(ctx: &Ctx<'_>) -> Result<()> {
    let globals = ctx.globals();
    rquickjs::Class::<Event>::define(&globals)?;
    rquickjs::Class::<EventTarget>::define(&globals)?;
    let _: Value = ctx.eval(CUSTOM_EVENT_PRELUDE)?;
    Ok(())
}

fn now_millis() -> f64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs_f64() * 1000.0)
        .unwrap_or(0.0)
}

/// `Event` (spec §4.4). `target`/`currentTarget` are filled in by
/// `EventTarget::dispatch_event` at dispatch time, never by script.
#[rquickjs::class]
#[derive(Trace)]
pub struct Event {
    #[qjs(skip_trace)]
    kind: String,
    #[qjs(skip_trace)]
    bubbles: bool,
    #[qjs(skip_trace)]
    cancelable: bool,
    #[qjs(skip_trace)]
    composed: bool,
    #[qjs(skip_trace)]
    time_stamp: f64,
    #[qjs(skip_trace)]
    default_prevented: Cell<bool>,
    #[qjs(skip_trace)]
    propagation_stopped: Cell<bool>,
    #[qjs(skip_trace)]
    immediate_propagation_stopped: Cell<bool>,
    #[qjs(skip_trace)]
    target: RefCell<Option<Persistent<Value<'static>>>>,
    #[qjs(skip_trace)]
    current_target: RefCell<Option<Persistent<Value<'static>>>>,
}

unsafe impl JsLifetime<'_> for Event {
    type Changed<'to> = Event;
}

#[derive(Default, Clone, Copy)]
struct EventOpts {
    bubbles: bool,
    cancelable: bool,
    composed: bool,
}

fn parse_event_opts(opts: Opt<Value<'_>>) -> Result<EventOpts> {
    let Some(opts) = opts.0 else {
        return Ok(EventOpts::default());
    };
    let Some(obj) = opts.as_object() else {
        return Ok(EventOpts::default());
    };
    Ok(EventOpts {
        bubbles: obj.get::<_, Option<bool>>("bubbles")?.unwrap_or(false),
        cancelable: obj.get::<_, Option<bool>>("cancelable")?.unwrap_or(false),
        composed: obj.get::<_, Option<bool>>("composed")?.unwrap_or(false),
    })
}

impl Event {
    fn new_with_opts(kind: String, opts: EventOpts) -> Self {
        Self {
            kind,
            bubbles: opts.bubbles,
            cancelable: opts.cancelable,
            composed: opts.composed,
            time_stamp: now_millis(),
            default_prevented: Cell::new(false),
            propagation_stopped: Cell::new(false),
            immediate_propagation_stopped: Cell::new(false),
            target: RefCell::new(None),
            current_target: RefCell::new(None),
        }
    }

    pub(crate) fn immediate_propagation_stopped(&self) -> bool {
        self.immediate_propagation_stopped.get()
    }

    pub(crate) fn default_prevented_flag(&self) -> bool {
        self.default_prevented.get()
    }

    pub(crate) fn set_target<'js>(&self, ctx: &Ctx<'js>, target: Value<'js>) {
        *self.target.borrow_mut() = Some(Persistent::save(ctx, target));
    }

    pub(crate) fn set_current_target<'js>(&self, ctx: &Ctx<'js>, target: Value<'js>) {
        *self.current_target.borrow_mut() = Some(Persistent::save(ctx, target));
    }
}

#[rquickjs::methods]
impl Event {
    #[qjs(constructor)]
    pub fn new(ctx: Ctx<'_>, event_type: Opt<String>, opts: Opt<Value<'_>>) -> Result<Self> {
        let Some(event_type) = event_type.0 else {
            return Err(Exception::throw_type(&ctx, "Event constructor requires a type"));
        };
        let opts = parse_event_opts(opts)?;
        Ok(Self::new_with_opts(event_type, opts))
    }

    #[qjs(get, rename = "type")]
    pub fn kind(&self) -> String {
        self.kind.clone()
    }

    #[qjs(get)]
    pub fn bubbles(&self) -> bool {
        self.bubbles
    }

    #[qjs(get)]
    pub fn cancelable(&self) -> bool {
        self.cancelable
    }

    #[qjs(get)]
    pub fn composed(&self) -> bool {
        self.composed
    }

    #[qjs(get, rename = "isTrusted")]
    pub fn is_trusted(&self) -> bool {
        false
    }

    #[qjs(get, rename = "timeStamp")]
    pub fn time_stamp(&self) -> f64 {
        self.time_stamp
    }

    #[qjs(get, rename = "defaultPrevented")]
    pub fn default_prevented(&self) -> bool {
        self.default_prevented.get()
    }

    #[qjs(get)]
    pub fn target<'js>(&self, ctx: Ctx<'js>) -> Result<Value<'js>> {
        match &*self.target.borrow() {
            Some(persisted) => persisted.clone().restore(ctx),
            None => Ok(Value::new_null(ctx)),
        }
    }

    #[qjs(get, rename = "currentTarget")]
    pub fn current_target<'js>(&self, ctx: Ctx<'js>) -> Result<Value<'js>> {
        match &*self.current_target.borrow() {
            Some(persisted) => persisted.clone().restore(ctx),
            None => Ok(Value::new_null(ctx)),
        }
    }

    #[qjs(rename = "preventDefault")]
    pub fn prevent_default(&self) {
        if self.cancelable {
            self.default_prevented.set(true);
        }
    }

    #[qjs(rename = "stopPropagation")]
    pub fn stop_propagation(&self) {
        self.propagation_stopped.set(true);
    }

    #[qjs(rename = "stopImmediatePropagation")]
    pub fn stop_immediate_propagation(&self) {
        self.propagation_stopped.set(true);
        self.immediate_propagation_stopped.set(true);
    }
}

struct ListenerEntry {
    callback: Persistent<Function<'static>>,
    capture: bool,
    once: bool,
}

#[derive(Default)]
struct EventTargetInner {
    listeners: HashMap<String, Vec<ListenerEntry>>,
}

/// `EventTarget` (spec §4.4).
///
/// Script-visible wrapper; the cross-boundary half of the bridge (native
/// scheduler events reaching these listeners) is wired separately by
/// `js-adapter`'s builder, which subscribes a closure to the scheduler's
/// `EventBus` that calls [`EventTarget::dispatch_native`] with a freshly
/// constructed JS event view — see DESIGN.md's "EventTarget cross-
/// boundary wiring" entry for why that wiring lives one crate up instead
/// of here.
#[rquickjs::class]
#[derive(Trace)]
pub struct EventTarget {
    #[qjs(skip_trace)]
    inner: Rc<RefCell<EventTargetInner>>,
}

unsafe impl JsLifetime<'_> for EventTarget {
    type Changed<'to> = EventTarget;
}

fn parse_listener_opts(opts: Opt<Value<'_>>) -> (bool, bool) {
    let Some(opts) = opts.0 else {
        return (false, false);
    };
    if let Some(b) = opts.as_bool() {
        return (b, false);
    }
    if let Some(obj) = opts.as_object() {
        let capture = obj.get::<_, Option<bool>>("capture").ok().flatten().unwrap_or(false);
        let once = obj.get::<_, Option<bool>>("once").ok().flatten().unwrap_or(false);
        return (capture, once);
    }
    (false, false)
}

fn same_function(ctx: &Ctx<'_>, a: &Persistent<Function<'static>>, b: &Function<'_>) -> bool {
    match a.clone().restore(ctx.clone()) {
        Ok(restored) => restored.as_value() == b.as_value(),
        Err(_) => false,
    }
}

#[rquickjs::methods]
impl EventTarget {
    #[qjs(constructor)]
    pub fn new() -> Self {
        Self { inner: Rc::new(RefCell::new(EventTargetInner::default())) }
    }

    #[qjs(rename = "addEventListener")]
    pub fn add_event_listener<'js>(
        &self,
        ctx: Ctx<'js>,
        event_type: String,
        listener: Value<'js>,
        opts: Opt<Value<'js>>,
    ) -> Result<()> {
        let Some(listener) = listener.as_function().cloned() else {
            return Ok(());
        };
        let (capture, once) = parse_listener_opts(opts);

        let mut inner = self.inner.borrow_mut();
        let entries = inner.listeners.entry(event_type).or_default();
        if entries
            .iter()
            .any(|e| e.capture == capture && same_function(&ctx, &e.callback, &listener))
        {
            return Ok(());
        }
        entries.push(ListenerEntry { callback: Persistent::save(&ctx, listener), capture, once });
        Ok(())
    }

    #[qjs(rename = "removeEventListener")]
    pub fn remove_event_listener<'js>(
        &self,
        ctx: Ctx<'js>,
        event_type: String,
        listener: Value<'js>,
        opts: Opt<Value<'js>>,
    ) -> Result<()> {
        let Some(listener) = listener.as_function().cloned() else {
            return Ok(());
        };
        let (capture, _once) = parse_listener_opts(opts);

        if let Some(entries) = self.inner.borrow_mut().listeners.get_mut(&event_type) {
            entries.retain(|e| !(e.capture == capture && same_function(&ctx, &e.callback, &listener)));
        }
        Ok(())
    }

    #[qjs(rename = "dispatchEvent")]
    pub fn dispatch_event<'js>(&self, ctx: Ctx<'js>, event: Value<'js>) -> Result<bool> {
        let Some(obj) = event.as_object() else {
            return Err(Exception::throw_type(&ctx, "dispatchEvent requires an Event"));
        };
        let class = rquickjs::Class::<Event>::from_object(obj.clone())
            .map_err(|_| Exception::throw_type(&ctx, "dispatchEvent requires an Event"))?;

        class.borrow().set_target(&ctx, event.clone());
        self.run_listeners(&ctx, &event, &class)?;

        let prevented = class.borrow().default_prevented_flag();
        Ok(!prevented)
    }
}

impl EventTarget {
    fn run_listeners<'js>(
        &self,
        ctx: &Ctx<'js>,
        event: &Value<'js>,
        class: &rquickjs::Class<'js, Event>,
    ) -> Result<()> {
        let event_type = class.borrow().kind.clone();

        let snapshot: Vec<(Persistent<Function<'static>>, bool)> = {
            let inner = self.inner.borrow();
            inner
                .listeners
                .get(&event_type)
                .map(|entries| entries.iter().map(|e| (e.callback.clone(), e.once)).collect())
                .unwrap_or_default()
        };

        class.borrow().set_current_target(ctx, event.clone());

        for (callback, once) in snapshot {
            if class.borrow().immediate_propagation_stopped() {
                break;
            }
            if once && let Ok(restored_once) = callback.clone().restore(ctx.clone()) {
                let mut inner = self.inner.borrow_mut();
                if let Some(entries) = inner.listeners.get_mut(&event_type) {
                    entries.retain(|e| !same_function(ctx, &e.callback, &restored_once));
                }
            }
            let func = callback.restore(ctx.clone())?;
            if let Err(err) = func.call::<_, Value<'_>>((event.clone(),)) {
                tracing::warn!(?err, event_type = %event_type, "event listener threw");
            }
        }
        Ok(())
    }

    /// Called by the cross-boundary wiring when a native scheduler event
    /// arrives (spec §4.4's "Cross-boundary" clause): construct a fresh
    /// `CustomEvent` view, via the same script-visible constructor script
    /// would use, and dispatch it exactly as `dispatchEvent` would.
    pub fn dispatch_native<'js>(
        &self,
        ctx: &Ctx<'js>,
        event_type: &str,
        detail: Option<Value<'js>>,
    ) -> Result<bool> {
        let ctor: Function = ctx.globals().get("CustomEvent")?;
        let init = Object::new(ctx.clone())?;
        if let Some(detail) = detail {
            init.set("detail", detail)?;
        }
        let event: Value = ctor.construct((event_type, init))?;
        let obj = event.as_object().expect("CustomEvent constructs an object").clone();
        let class = rquickjs::Class::<Event>::from_object(obj)
            .expect("CustomEvent extends the native Event class");

        class.borrow().set_target(ctx, event.clone());
        self.run_listeners(ctx, &event, &class)?;
        Ok(!class.borrow().default_prevented_flag())
    }
}
