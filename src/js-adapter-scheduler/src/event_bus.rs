use std::any::Any;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use tracing::instrument;

/// A scheduler-side event, decoupled from any script-engine representation.
///
/// `js-adapter`'s EventTarget Bridge (C4) wraps these for delivery into
/// script callbacks; this crate never looks inside `detail`.
pub struct NativeEvent {
    pub event_type: String,
    pub detail: Box<dyn Any + Send>,
}

impl NativeEvent {
    pub fn new(event_type: impl Into<String>, detail: impl Any + Send) -> Self {
        Self {
            event_type: event_type.into(),
            detail: Box::new(detail),
        }
    }
}

/// Opaque id returned by [`EventBus::subscribe`], used to unsubscribe later.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

type Listener = Arc<dyn Fn(&NativeEvent) + Send + Sync>;

/// Internal (non-script) publish/subscribe bus.
///
/// This is the scheduler's side of the EventTarget Bridge: it knows
/// nothing about `dispatchEvent`/`addEventListener` semantics (bubbling,
/// capture, `once`, exceptions-in-listeners) — those live in
/// `js-adapter`'s bindings on top of the primitives here. What this type
/// guarantees is ordinary multi-producer multi-consumer fan-out by
/// string topic, safe to call from any worker-pool thread.
pub struct EventBus {
    listeners: Mutex<HashMap<String, Vec<(u64, Listener)>>>,
    next_id: AtomicU64,
}

impl EventBus {
    pub fn new() -> Self {
        Self {
            listeners: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(1),
        }
    }

    /// Register a listener for `event_type`. Order of registration is
    /// preserved for delivery.
    pub fn subscribe(
        &self,
        event_type: impl Into<String>,
        callback: impl Fn(&NativeEvent) + Send + Sync + 'static,
    ) -> SubscriptionId {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.listeners
            .lock()
            .unwrap()
            .entry(event_type.into())
            .or_default()
            .push((id, Arc::new(callback)));
        SubscriptionId(id)
    }

    /// Remove a previously registered listener. No-op if already removed.
    pub fn unsubscribe(&self, event_type: &str, id: SubscriptionId) {
        if let Some(list) = self.listeners.lock().unwrap().get_mut(event_type) {
            list.retain(|(listener_id, _)| *listener_id != id.0);
        }
    }

    /// Deliver `event` to every listener currently registered for its
    /// type, in registration order. Listeners are cloned out from under
    /// the lock before invocation so a listener may itself subscribe or
    /// unsubscribe without deadlocking.
    #[instrument(skip(self, event), fields(event_type = %event.event_type), level = "debug")]
    pub fn emit(&self, event: NativeEvent) {
        let listeners: Vec<Listener> = {
            let guard = self.listeners.lock().unwrap();
            match guard.get(event.event_type.as_str()) {
                Some(list) => list.iter().map(|(_, cb)| cb.clone()).collect(),
                None => return,
            }
        };
        for listener in listeners {
            listener(&event);
        }
    }

    /// Number of listeners registered for a given topic. Exposed for tests.
    pub fn listener_count(&self, event_type: &str) -> usize {
        self.listeners
            .lock()
            .unwrap()
            .get(event_type)
            .map_or(0, Vec::len)
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicUsize;

    use super::*;

    #[test]
    fn delivers_in_registration_order() {
        let bus = EventBus::new();
        let order = Arc::new(Mutex::new(Vec::new()));

        let o1 = order.clone();
        bus.subscribe("tick", move |_| o1.lock().unwrap().push(1));
        let o2 = order.clone();
        bus.subscribe("tick", move |_| o2.lock().unwrap().push(2));

        bus.emit(NativeEvent::new("tick", ()));
        assert_eq!(*order.lock().unwrap(), vec![1, 2]);
    }

    #[test]
    fn unsubscribe_stops_delivery() {
        let bus = EventBus::new();
        let count = Arc::new(AtomicUsize::new(0));
        let c = count.clone();
        let id = bus.subscribe("tick", move |_| {
            c.fetch_add(1, Ordering::SeqCst);
        });

        bus.emit(NativeEvent::new("tick", ()));
        bus.unsubscribe("tick", id);
        bus.emit(NativeEvent::new("tick", ()));

        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn emit_with_no_listeners_is_noop() {
        let bus = EventBus::new();
        bus.emit(NativeEvent::new("nobody-home", ()));
        assert_eq!(bus.listener_count("nobody-home"), 0);
    }
}
