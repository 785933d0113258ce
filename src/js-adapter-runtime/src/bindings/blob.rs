use std::rc::Rc;

use rquickjs::class::Trace;
use rquickjs::prelude::Opt;
use rquickjs::{Array, Class, Ctx, Exception, Function, JsLifetime, Object, Result, Value};

/// Installs `Blob` (spec §4.8, C8).
pub fn install(ctx: &Ctx<'_>) -> Result<()> {
    let _: Value = ctx.eval(PARTS_PRELUDE)?;
    Class::<Blob>::define(&ctx.globals())?;
    Ok(())
}

/// `Blob`'s constructor accepts any iterable of parts (spec §4.8); a
/// non-iterable argument must fail with `TypeError` rather than silently
/// producing an empty Blob, which `Array.from` alone would do for an
/// array-like. This mirrors `event_target`'s `CustomEvent` and C9's
/// `AbortSignal.any` in delegating the iterable check to a tiny injected
/// helper instead of hand-rolling the iterator protocol in Rust.
const PARTS_PRELUDE: &str = r#"
(function () {
    globalThis.__blobPartsToArray = function (value) {
        if (value == null || typeof value[Symbol.iterator] !== "function") {
            throw new TypeError("Blob parts must be iterable");
        }
        return Array.from(value);
    };
})();
"#;

fn constructor_name(obj: &Object<'_>) -> Option<String> {
    let ctor: Object = obj.get("constructor").ok()?;
    ctor.get::<_, String>("name").ok()
}

/// Shared with `text_codec`'s helper of the same shape; kept local since
/// every binding module in this crate owns its own small byte-extraction
/// helper rather than threading one through a shared utility module.
fn read_buffer_source<'js>(ctx: &Ctx<'js>, value: &Value<'js>) -> Result<Vec<u8>> {
    let obj = value
        .as_object()
        .ok_or_else(|| Exception::throw_type(ctx, "expected a BufferSource"))?;
    let name = constructor_name(obj);
    let view: Object<'js> = match name.as_deref() {
        Some("Uint8Array") => obj.clone(),
        Some("ArrayBuffer") => {
            let ctor: Function = ctx.globals().get("Uint8Array")?;
            let v: Value = ctor.construct((value.clone(),))?;
            v.as_object()
                .cloned()
                .ok_or_else(|| Exception::throw_internal(ctx, "Uint8Array constructor returned a non-object"))?
        }
        Some(_) => {
            let buffer: Value = obj.get("buffer")?;
            let byte_offset: f64 = obj.get::<_, Option<f64>>("byteOffset")?.unwrap_or(0.0);
            let byte_length: f64 = obj.get("byteLength")?;
            let ctor: Function = ctx.globals().get("Uint8Array")?;
            let v: Value = ctor.construct((buffer, byte_offset, byte_length))?;
            v.as_object()
                .cloned()
                .ok_or_else(|| Exception::throw_internal(ctx, "Uint8Array constructor returned a non-object"))?
        }
        None => return Err(Exception::throw_type(ctx, "expected a BufferSource")),
    };
    let len: usize = view.get("length")?;
    let mut bytes = Vec::with_capacity(len);
    for i in 0..len {
        bytes.push(view.get::<_, u8>(i)?);
    }
    Ok(bytes)
}

fn promise_resolve<'js>(ctx: &Ctx<'js>, value: Value<'js>) -> Result<Value<'js>> {
    let promise_ctor: Function = ctx.globals().get("Promise")?;
    let resolve_fn: Function = promise_ctor.get("resolve")?;
    resolve_fn.call((value,))
}

/// `Blob` (spec §4.8). `bytes` is the full buffer produced at
/// construction time; `offset`/`len` describe this instance's window
/// into it. A slice's range is always computed against `self.len` (this
/// instance's own window), and the new window's `offset` is `self.offset
/// + start` — so a slice-of-a-slice's final bytes come from the
/// *original* buffer's range rather than from re-normalizing against an
/// intermediate, already-sliced window (the "Open question" DESIGN.md
/// records a decision for).
#[rquickjs::class]
#[derive(Trace)]
pub struct Blob {
    #[qjs(skip_trace)]
    bytes: Rc<Vec<u8>>,
    #[qjs(skip_trace)]
    offset: usize,
    #[qjs(skip_trace)]
    len: usize,
    #[qjs(skip_trace)]
    mime_type: String,
}

unsafe impl JsLifetime<'_> for Blob {
    type Changed<'to> = Blob;
}

impl Blob {
    fn window(&self) -> &[u8] {
        &self.bytes[self.offset..self.offset + self.len]
    }
}

#[rquickjs::methods]
impl Blob {
    #[qjs(constructor)]
    pub fn new<'js>(ctx: Ctx<'js>, parts: Opt<Value<'js>>, options: Opt<Value<'js>>) -> Result<Self> {
        let mut bytes = Vec::new();
        if let Some(parts) = parts.0 {
            let to_array: Function = ctx.globals().get("__blobPartsToArray")?;
            let array: Array = to_array.call((parts,))?;
            for part in array.iter::<Value>() {
                let part = part?;
                if let Some(s) = part.as_string() {
                    bytes.extend_from_slice(s.to_string()?.as_bytes());
                } else if let Some(obj) = part.as_object() {
                    if let Ok(blob) = Class::<Blob>::from_object(obj.clone()) {
                        bytes.extend_from_slice(blob.borrow().window());
                    } else {
                        bytes.extend_from_slice(&read_buffer_source(&ctx, &part)?);
                    }
                } else {
                    return Err(Exception::throw_type(&ctx, "unsupported Blob part"));
                }
            }
        }

        let mime_type = options
            .0
            .and_then(|o| o.as_object().cloned())
            .and_then(|obj| obj.get::<_, Option<String>>("type").ok().flatten())
            .map(|s| s.to_lowercase())
            .unwrap_or_default();

        let len = bytes.len();
        Ok(Self { bytes: Rc::new(bytes), offset: 0, len, mime_type })
    }

    #[qjs(get)]
    pub fn size(&self) -> usize {
        self.len
    }

    #[qjs(get, rename = "type")]
    pub fn mime_type(&self) -> String {
        self.mime_type.clone()
    }

    #[qjs(rename = "arrayBuffer")]
    pub fn array_buffer<'js>(&self, ctx: Ctx<'js>) -> Result<Value<'js>> {
        let buffer = rquickjs::ArrayBuffer::new(ctx.clone(), self.window().to_vec())?;
        promise_resolve(&ctx, buffer.into_value())
    }

    pub fn text<'js>(&self, ctx: Ctx<'js>) -> Result<Value<'js>> {
        let text = String::from_utf8_lossy(self.window()).into_owned();
        let value = rquickjs::String::from_str(ctx.clone(), &text)?.into_value();
        promise_resolve(&ctx, value)
    }

    /// `slice(start?, end?, contentType?)` — byte-range normalization per
    /// spec §4.8: negative indices count back from `size` (clamped at
    /// `0`), indices past `size` clamp to `size`, and `start > end`
    /// yields an empty slice.
    pub fn slice(&self, start: Opt<i64>, end: Opt<i64>, content_type: Opt<String>) -> Self {
        let len = self.len as i64;
        let normalize = |v: Option<i64>, default: i64| -> i64 {
            let v = v.unwrap_or(default);
            if v < 0 {
                (len + v).max(0)
            } else {
                v.min(len)
            }
        };
        let start_n = normalize(start.0, 0) as usize;
        let end_n = normalize(end.0, len) as usize;
        let new_len = end_n.saturating_sub(start_n);

        Self {
            bytes: self.bytes.clone(),
            offset: self.offset + start_n,
            len: new_len,
            mime_type: content_type.0.map(|s| s.to_lowercase()).unwrap_or_default(),
        }
    }

    pub fn stream<'js>(&self, ctx: Ctx<'js>) -> Value<'js> {
        Value::new_undefined(ctx)
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
    fn size_and_type_reflect_construction() {
        let engine = test_engine();
        engine
            .eval_script(
                "test.js",
                "const b = new Blob(['hello'], { type: 'Text/Plain' });
                 globalThis.size = b.size;
                 globalThis.type = b.type;",
            )
            .unwrap();
        engine.with(|ctx| {
            let size: f64 = ctx.eval("size").unwrap();
            let mime: String = ctx.eval("type").unwrap();
            assert_eq!(size, 5.0);
            assert_eq!(mime, "text/plain");
        });
    }

    #[test]
    fn slice_of_slice_composes_against_original_range() {
        let engine = test_engine();
        engine
            .eval_script(
                "test.js",
                "globalThis.seen = null;
                 new Blob(['ABCDEFGHIJ']).slice(2, 8).slice(1, 4).text().then((t) => { seen = t; });",
            )
            .unwrap();
        engine.drain_microtasks().unwrap();
        engine.with(|ctx| {
            let seen: String = ctx.eval("seen").unwrap();
            assert_eq!(seen, "DEF");
        });
    }

    #[test]
    fn non_iterable_parts_rejected() {
        let engine = test_engine();
        engine.with(|ctx| {
            let err = ctx.eval::<Value, _>("new Blob(42)").unwrap_err();
            assert!(err.is_exception());
        });
    }

    #[test]
    fn negative_indices_clamp_at_zero() {
        let engine = test_engine();
        engine
            .eval_script(
                "test.js",
                "globalThis.seen = null;
                 new Blob(['ABCDE']).slice(-100, 3).text().then((t) => { seen = t; });",
            )
            .unwrap();
        engine.drain_microtasks().unwrap();
        engine.with(|ctx| {
            let seen: String = ctx.eval("seen").unwrap();
            assert_eq!(seen, "ABC");
        });
    }
}
