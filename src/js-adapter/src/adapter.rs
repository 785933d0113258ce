use std::io::Write;
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;

use js_adapter_common::AdapterError;
use js_adapter_runtime::bindings::console::{ConsoleSink, ConsoleState};
use js_adapter_runtime::bindings::event_target::EventTarget;
use js_adapter_runtime::{Dispatch, Engine};
use js_adapter_scheduler::{NativeEvent, Scheduler, SubscriptionId};
use rquickjs::{Class, Object, Persistent, Value};
use tracing::instrument;

use crate::config::AdapterConfig;
use crate::dispatch_bridge::DispatchBridge;

/// The internal `EventTarget` instance the scheduler's native events are
/// bridged onto (spec §3, "EventTarget Wrapper"; spec §4.4, "Cross-
/// boundary"). Script reaches the same object through the
/// `globalThis.internalEvents` binding [`Adapter::wire_scheduler_event`]
/// installs listeners against.
const INTERNAL_EVENT_TARGET_GLOBAL: &str = "internalEvents";

enum State {
    /// `Adapter::new` has run but `bind` has not: no dispatch thread
    /// exists yet and no script can run.
    Unbound,
    Bound {
        bridge: Arc<DispatchBridge>,
        thread: Option<JoinHandle<()>>,
        console_sink: ConsoleSink,
        event_target: Persistent<Class<'static, EventTarget>>,
        subscriptions: Vec<(String, SubscriptionId)>,
    },
}

/// The process-lifetime object owning one script engine instance and a
/// reference to one scheduler (spec §3, "Adapter").
///
/// Everything script-visible lives behind the Dispatch Bridge once
/// [`Adapter::bind`] runs; nothing here ever touches the engine directly
/// except by posting a job through it, preserving spec §5's "all
/// interaction with the JS engine happens on one thread" invariant even
/// from the embedder's side of the API.
pub struct Adapter {
    scheduler: Arc<Scheduler>,
    state: Mutex<State>,
}

impl Adapter {
    /// `new Adapter(scheduler, engine) → Adapter | Error` (spec §6).
    ///
    /// Takes only the scheduler, not a pre-built engine: the engine's
    /// `Dispatch` capability does not exist until [`Adapter::bind`] spawns
    /// the Dispatch Bridge that provides it, so there is no well-formed
    /// engine value to accept here. See DESIGN.md's "Adapter::new takes
    /// only a scheduler" entry for the full reasoning; `nil scheduler` is
    /// enforced by the type itself (`Arc<Scheduler>` cannot be null).
    #[instrument(skip_all, level = "info")]
    pub fn new(scheduler: Arc<Scheduler>) -> Result<Self, AdapterError> {
        Ok(Self {
            scheduler,
            state: Mutex::new(State::Unbound),
        })
    }

    /// `adapter.Bind() → Error` (spec §6): installs every binding from §4
    /// onto the engine's global object and starts the dispatch thread
    /// draining work. `build` is handed the `Dispatch` capability and
    /// must return a fully-constructed [`Engine`] — in practice always
    /// `Engine::new`, parameterized here so tests can substitute a
    /// differently-wired engine.
    ///
    /// Calling `bind` twice on the same adapter is a no-op that returns
    /// `Ok(())` without spawning a second thread — matching "preserve any
    /// existing same-named object by extending rather than replacing"
    /// applied to the adapter's own lifecycle, not just `console`.
    #[instrument(skip_all, level = "info")]
    pub fn bind<F>(&mut self, build: F) -> Result<(), AdapterError>
    where
        F: FnOnce(Arc<dyn Dispatch>, Arc<Scheduler>) -> anyhow::Result<Engine> + Send + 'static,
    {
        let mut state = self.state.lock().expect("adapter state mutex poisoned");
        if matches!(*state, State::Bound { .. }) {
            return Ok(());
        }

        let scheduler = self.scheduler.clone();
        let cancel = scheduler.cancellation();
        let (bridge, thread) = DispatchBridge::spawn(cancel, move |dispatch| {
            build(dispatch, scheduler)
        })
        .map_err(AdapterError::ThreadSpawn)?;

        let (tx, rx) = std::sync::mpsc::channel();
        bridge.post(Box::new(move |engine: &Engine| {
            let outcome = engine.with(|ctx| -> anyhow::Result<_> {
                let sink = ctx
                    .userdata::<ConsoleState>()
                    .map(ConsoleState::sink)
                    .ok_or_else(|| anyhow::anyhow!("console state missing from context"))?;
                let target = Class::instance(ctx.clone(), EventTarget::new())
                    .map_err(|e| anyhow::anyhow!("failed to build internal event target: {e}"))?;
                ctx.globals()
                    .set(INTERNAL_EVENT_TARGET_GLOBAL, target.clone())
                    .map_err(|e| anyhow::anyhow!("failed to install internal event target: {e}"))?;
                Ok((sink, Persistent::save(&ctx, target)))
            });
            let _ = tx.send(outcome);
        }));
        let (console_sink, event_target) = rx
            .recv()
            .map_err(|_| AdapterError::BindFailed {
                name: "dispatch thread",
                source: anyhow::anyhow!("dispatch thread exited before acknowledging bind"),
            })?
            .map_err(|source| AdapterError::BindFailed { name: "event_target", source })?;

        *state = State::Bound {
            bridge,
            thread: Some(thread),
            console_sink,
            event_target,
            subscriptions: Vec::new(),
        };
        Ok(())
    }

    /// Apply builder-level configuration (console sink, `process.env`)
    /// after `bind` has run. Split out from `bind` so `AdapterBuilder`
    /// can assemble config separately from the construction closure,
    /// mirroring the teacher's `with_*` chain applying to an already-
    /// created sandbox value rather than threading options through the
    /// constructor.
    pub(crate) fn apply_config(&self, config: &AdapterConfig) -> Result<(), AdapterError> {
        if !config.console_to_stdout {
            self.set_console_output(None)?;
        }
        if config.env.is_empty() {
            return Ok(());
        }
        let env = config.env.clone();
        self.run_on_js_thread(move |engine| {
            engine.with(|ctx| -> anyhow::Result<()> {
                let globals = ctx.globals();
                let process: Object = match globals.get::<_, Object>("process") {
                    Ok(existing) => existing,
                    Err(_) => {
                        let obj = Object::new(ctx.clone())?;
                        globals.set("process", obj.clone())?;
                        obj
                    }
                };
                let env_obj = Object::new(ctx.clone())?;
                for (key, value) in &env {
                    env_obj.set(key.as_str(), value.as_str())?;
                }
                process.set("env", env_obj)?;
                Ok(())
            })
        })
    }

    /// `Loop()` (spec §6): a handle to the scheduler, used by the
    /// embedder for process lifecycle (shutdown, driving `block_on`).
    pub fn loop_handle(&self) -> Arc<Scheduler> {
        self.scheduler.clone()
    }

    /// `Runtime()` (spec §6): the `Dispatch` capability, i.e. the
    /// narrowest way to post work onto the JS thread without touching the
    /// engine directly. Returns an error if `bind` has not run yet.
    pub fn runtime(&self) -> Result<Arc<dyn Dispatch>, AdapterError> {
        match &*self.state.lock().expect("adapter state mutex poisoned") {
            State::Bound { bridge, .. } => Ok(bridge.clone() as Arc<dyn Dispatch>),
            State::Unbound => Err(AdapterError::BindFailed {
                name: "runtime",
                source: anyhow::anyhow!("adapter has not been bound yet"),
            }),
        }
    }

    /// `JS()` (spec §6): the one engine operation embedders need without
    /// a raw engine pointer — evaluate a top-level script and wait for
    /// both it and the ensuing microtask drain to complete (spec §4.1's
    /// contract applies to script entry the same as any later macrotask).
    #[instrument(skip(self, source), level = "info")]
    pub fn eval_script(&self, name: &str, source: &str) -> Result<(), AdapterError> {
        let name = name.to_string();
        let source = source.to_string();
        self.run_on_js_thread(move |engine| {
            engine
                .eval_script(&name, &source)
                .map_err(|err| anyhow::anyhow!(err))
        })
    }

    fn run_on_js_thread<F>(&self, job: F) -> Result<(), AdapterError>
    where
        F: FnOnce(&Engine) -> anyhow::Result<()> + Send + 'static,
    {
        let bridge = match &*self.state.lock().expect("adapter state mutex poisoned") {
            State::Bound { bridge, .. } => bridge.clone(),
            State::Unbound => {
                return Err(AdapterError::BindFailed {
                    name: "run_on_js_thread",
                    source: anyhow::anyhow!("adapter has not been bound yet"),
                })
            }
        };
        let (tx, rx) = std::sync::mpsc::channel();
        bridge.post(Box::new(move |engine| {
            let _ = tx.send(job(engine));
        }));
        rx.recv()
            .map_err(|_| AdapterError::Shutdown)?
            .map_err(|source| AdapterError::BindFailed { name: "run_on_js_thread", source })
    }

    /// `SetConsoleOutput(w)` (spec §6). `writer = None` silently discards
    /// all console output but never panics; this never touches the JS
    /// thread — the sink is an `Arc<Mutex<..>>` shared with
    /// `js-adapter-runtime`'s console bindings (spec §5: "may be replaced
    /// from outside the JS thread only when no dispatch is in progress;
    /// concurrent writers must serialise through a lock").
    pub fn set_console_output(&self, writer: Option<Box<dyn Write + Send>>) -> Result<(), AdapterError> {
        match &*self.state.lock().expect("adapter state mutex poisoned") {
            State::Bound { console_sink, .. } => {
                console_sink.set(writer);
                Ok(())
            }
            State::Unbound => Err(AdapterError::BindFailed {
                name: "set_console_output",
                source: anyhow::anyhow!("adapter has not been bound yet"),
            }),
        }
    }

    /// Bridge a scheduler-side event topic onto script listeners (spec
    /// §4.4, "Cross-boundary"): whenever the scheduler emits a
    /// [`NativeEvent`] of `event_type`, a fresh `CustomEvent` view is
    /// constructed and dispatched to `globalThis.internalEvents`'s
    /// listeners, exactly as if script had called `dispatchEvent` itself.
    ///
    /// `event_type`s with no registered conversion in [`crate::cross_boundary`]
    /// are delivered with a `null` detail rather than failing the wiring
    /// outright — see that module for the supported detail types.
    #[instrument(skip(self), level = "debug")]
    pub fn wire_scheduler_event(&self, event_type: impl Into<String> + Clone) -> Result<(), AdapterError> {
        let mut state = self.state.lock().expect("adapter state mutex poisoned");
        let (bridge, event_target, subscriptions) = match &mut *state {
            State::Bound { bridge, event_target, subscriptions, .. } => {
                (bridge.clone(), event_target.clone(), subscriptions)
            }
            State::Unbound => {
                return Err(AdapterError::BindFailed {
                    name: "wire_scheduler_event",
                    source: anyhow::anyhow!("adapter has not been bound yet"),
                })
            }
        };
        let event_type = event_type.into();
        let bridge_for_closure = bridge.clone();
        let event_type_for_closure = event_type.clone();
        let subscription = self.scheduler.subscribe(event_type.clone(), move |event: &NativeEvent| {
            let detail = crate::cross_boundary::clone_detail(event);
            let event_target = event_target.clone();
            let event_type = event_type_for_closure.clone();
            bridge_for_closure.post(Box::new(move |engine: &Engine| {
                engine.with(|ctx| {
                    let class = match event_target.clone().restore(ctx.clone()) {
                        Ok(class) => class,
                        Err(err) => {
                            tracing::warn!(?err, "failed to restore internal event target");
                            return;
                        }
                    };
                    let detail_value: Option<Value> = detail
                        .as_ref()
                        .map(|d| crate::cross_boundary::detail_to_value(&ctx, d));
                    if let Err(err) = class.borrow().dispatch_native(&ctx, &event_type, detail_value) {
                        tracing::warn!(?err, "cross-boundary dispatch_native failed");
                    }
                });
            }));
        });
        subscriptions.push((event_type, subscription));
        Ok(())
    }

    /// Trip the scheduler's cancellation signal and stop the Dispatch
    /// Bridge from accepting new work (spec §5's cancellation contract).
    /// Any in-flight macrotask completes; pending timers are dropped.
    #[instrument(skip(self), level = "info")]
    pub fn shutdown(&self) {
        self.scheduler.shutdown();
        if let State::Bound { bridge, .. } = &*self.state.lock().expect("adapter state mutex poisoned") {
            bridge.shut_down();
        }
    }
}

impl Drop for Adapter {
    fn drop(&mut self) {
        self.scheduler.shutdown();
        if let State::Bound { bridge, thread, .. } =
            &mut *self.state.lock().expect("adapter state mutex poisoned")
        {
            bridge.shut_down();
            if let Some(handle) = thread.take() {
                let _ = handle.join();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bound_adapter() -> Adapter {
        let scheduler = Arc::new(Scheduler::new(1).unwrap());
        let mut adapter = Adapter::new(scheduler).unwrap();
        adapter.bind(Engine::new).unwrap();
        adapter
    }

    #[test]
    fn new_adapter_starts_unbound() {
        let scheduler = Arc::new(Scheduler::new(1).unwrap());
        let adapter = Adapter::new(scheduler).unwrap();
        assert!(adapter.runtime().is_err());
    }

    #[test]
    fn bind_then_eval_script_runs_to_completion() {
        let adapter = bound_adapter();
        adapter.eval_script("t.js", "globalThis.x = 1 + 1;").unwrap();
        adapter.shutdown();
    }

    #[test]
    fn bind_is_idempotent() {
        let mut adapter = bound_adapter();
        adapter.bind(Engine::new).unwrap();
        adapter.shutdown();
    }

    #[test]
    fn set_console_output_before_bind_errors() {
        let scheduler = Arc::new(Scheduler::new(1).unwrap());
        let adapter = Adapter::new(scheduler).unwrap();
        assert!(adapter.set_console_output(None).is_err());
    }
}
