//! Converts a scheduler-side [`NativeEvent`]'s opaque `detail` into a JS
//! value, for [`crate::Adapter::wire_scheduler_event`] (spec §4.4,
//! "Cross-boundary").
//!
//! `js-adapter-scheduler` deliberately knows nothing about script values
//! (its `NativeEvent::detail` is `Box<dyn Any + Send>`), so this is the
//! one place that bridges the two: a closed set of concrete detail types
//! an embedder's scheduler event is expected to carry. An unrecognized
//! concrete type is delivered as `null` rather than failing the whole
//! wiring, matching the module doc's "no registered conversion ...
//! delivered with a `null` detail" contract.

use js_adapter_scheduler::NativeEvent;
use rquickjs::{Ctx, Value};

/// An owned copy of a [`NativeEvent`]'s detail, taken out from behind the
/// `&NativeEvent` borrow so it can cross onto the JS thread inside the
/// `'static` job closure [`crate::Adapter::wire_scheduler_event`] posts.
#[derive(Debug, Clone)]
pub(crate) enum Detail {
    Unit,
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
}

/// Downcast `event.detail` against the known concrete types, in order.
/// Returns `None` for any type this bridge does not recognize.
pub(crate) fn clone_detail(event: &NativeEvent) -> Option<Detail> {
    let detail = event.detail.as_ref();
    if detail.downcast_ref::<()>().is_some() {
        return Some(Detail::Unit);
    }
    if let Some(v) = detail.downcast_ref::<bool>() {
        return Some(Detail::Bool(*v));
    }
    if let Some(v) = detail.downcast_ref::<i64>() {
        return Some(Detail::Int(*v));
    }
    if let Some(v) = detail.downcast_ref::<i32>() {
        return Some(Detail::Int(*v as i64));
    }
    if let Some(v) = detail.downcast_ref::<f64>() {
        return Some(Detail::Float(*v));
    }
    if let Some(v) = detail.downcast_ref::<String>() {
        return Some(Detail::Text(v.clone()));
    }
    if let Some(v) = detail.downcast_ref::<&'static str>() {
        return Some(Detail::Text((*v).to_string()));
    }
    None
}

/// Build the JS value a `CustomEvent`'s `detail` property should carry.
pub(crate) fn detail_to_value<'js>(ctx: &Ctx<'js>, detail: &Detail) -> Value<'js> {
    let result = match detail {
        Detail::Unit => return Value::new_undefined(ctx.clone()),
        Detail::Bool(v) => rquickjs::IntoJs::into_js(v, ctx),
        Detail::Int(v) => rquickjs::IntoJs::into_js(v, ctx),
        Detail::Float(v) => rquickjs::IntoJs::into_js(v, ctx),
        Detail::Text(v) => rquickjs::IntoJs::into_js(v.as_str(), ctx),
    };
    result.unwrap_or_else(|_| Value::new_undefined(ctx.clone()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recognizes_known_detail_types() {
        let event = NativeEvent::new("t", 42i64);
        assert!(matches!(clone_detail(&event), Some(Detail::Int(42))));

        let event = NativeEvent::new("t", "hi".to_string());
        assert!(matches!(clone_detail(&event), Some(Detail::Text(s)) if s == "hi"));
    }

    #[test]
    fn unrecognized_detail_type_is_none() {
        struct Weird;
        let event = NativeEvent::new("t", Weird);
        assert!(clone_detail(&event).is_none());
    }
}
