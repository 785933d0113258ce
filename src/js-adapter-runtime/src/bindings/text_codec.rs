use base64::Engine as _;
use rquickjs::prelude::{Opt, This};
use rquickjs::{Class, Ctx, Exception, Function, JsLifetime, Object, Result, Value};

/// Installs `TextEncoder`/`TextDecoder` plus the legacy `atob`/`btoa`
/// base64 globals (spec §4.8, C8; spec §7.3 names `atob` directly as an
/// exercised parser with a `SyntaxError`-on-malformed-input contract).
pub fn install(ctx: &Ctx<'_>) -> Result<()> {
    let globals = ctx.globals();
    Class::<TextEncoder>::define(&globals)?;
    Class::<TextDecoder>::define(&globals)?;
    globals.set("atob", Function::new(ctx.clone(), atob)?)?;
    globals.set("btoa", Function::new(ctx.clone(), btoa)?)?;
    Ok(())
}

/// `atob(data)`: decode a base64 string to a "binary string" (one
/// character per byte, `0x00`-`0xff`). Malformed input — wrong padding,
/// characters outside the base64 alphabet — fails with `SyntaxError`
/// rather than `TypeError`, per spec §7's error taxonomy ("Parse errors
/// ... `SyntaxError` from encoded input where the standard prescribes
/// it (e.g. `atob` with non-base64 input)").
fn throw_syntax_error(ctx: &Ctx<'_>, message: &str) -> rquickjs::Error {
    let ctor: Result<Function> = ctx.globals().get("SyntaxError");
    match ctor {
        Ok(ctor) => match ctor.construct::<_, Value>((message.to_string(),)) {
            Ok(value) => ctx.throw(value),
            Err(err) => err,
        },
        Err(err) => err,
    }
}

fn atob(ctx: Ctx<'_>, data: Opt<String>) -> Result<String> {
    let data = data.0.ok_or_else(|| Exception::throw_type(&ctx, "atob requires a string argument"))?;
    // The standard ignores ASCII whitespace before validating the rest.
    let cleaned: String = data.chars().filter(|c| !c.is_ascii_whitespace()).collect();
    let bytes = base64::engine::general_purpose::STANDARD
        .decode(cleaned.as_bytes())
        .map_err(|_| throw_syntax_error(&ctx, "the string to be decoded is not correctly encoded"))?;
    Ok(bytes.into_iter().map(|b| b as char).collect())
}

/// `btoa(data)`: encode a "binary string" (every character must be in
/// the Latin1 range, i.e. a code point `<= 0xff`) to base64. A
/// character outside that range fails with `TypeError` ("the string
/// contains characters outside the Latin1 range"), matching the
/// standard's (not this adapter's own invented) wording.
fn btoa(ctx: Ctx<'_>, data: Opt<String>) -> Result<String> {
    let data = data.0.ok_or_else(|| Exception::throw_type(&ctx, "btoa requires a string argument"))?;
    let mut bytes = Vec::with_capacity(data.len());
    for ch in data.chars() {
        let code = ch as u32;
        if code > 0xff {
            return Err(Exception::throw_type(&ctx, "the string contains characters outside the Latin1 range"));
        }
        bytes.push(code as u8);
    }
    Ok(base64::engine::general_purpose::STANDARD.encode(bytes))
}

fn constructor_name(obj: &Object<'_>) -> Option<String> {
    let ctor: Object = obj.get("constructor").ok()?;
    ctor.get::<_, String>("name").ok()
}

/// Normalize any `BufferSource` (typed array, `DataView`, `ArrayBuffer`)
/// into its underlying bytes by wrapping it in a fresh `Uint8Array` view
/// (never copying more than once) and reading that view back index by
/// index. Delegates the buffer/byteOffset/byteLength bookkeeping to the
/// engine's own `Uint8Array` constructor rather than reaching for raw
/// byte access, matching `structured_clone`'s established preference.
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

/// `TextEncoder` (spec §4.8). Stateless: `encoding` is always `"utf-8"`.
#[rquickjs::class]
pub struct TextEncoder;

unsafe impl JsLifetime<'_> for TextEncoder {
    type Changed<'to> = TextEncoder;
}

/// Encode `s` as UTF-8, stopping before any code point that would not fit
/// entirely within `capacity` bytes (spec §4.8's `encodeInto` contract:
/// "NOT partially written"). Returns the encoded prefix plus the number
/// of UTF-16 code units of `s` it consumed (`read`) and the byte count
/// written (`written`).
fn encode_prefix(s: &str, capacity: usize) -> (Vec<u8>, usize, usize) {
    let mut bytes = Vec::new();
    let mut read_units = 0usize;
    for ch in s.chars() {
        let mut buf = [0u8; 4];
        let encoded = ch.encode_utf8(&mut buf);
        if bytes.len() + encoded.len() > capacity {
            break;
        }
        bytes.extend_from_slice(encoded.as_bytes());
        read_units += ch.len_utf16();
    }
    let written = bytes.len();
    (bytes, read_units, written)
}

#[rquickjs::methods]
impl TextEncoder {
    #[qjs(constructor)]
    pub fn new() -> Self {
        Self
    }

    #[qjs(get)]
    pub fn encoding(&self) -> String {
        "utf-8".to_string()
    }

    pub fn encode<'js>(&self, ctx: Ctx<'js>, input: Opt<String>) -> Result<Value<'js>> {
        let bytes = input.0.unwrap_or_default().into_bytes();
        let ta = rquickjs::TypedArray::<u8>::new(ctx, bytes)?;
        Ok(ta.into_value())
    }

    #[qjs(rename = "encodeInto")]
    pub fn encode_into<'js>(
        &self,
        ctx: Ctx<'js>,
        input: Opt<String>,
        dest: Opt<Value<'js>>,
    ) -> Result<Object<'js>> {
        let dest = dest
            .0
            .ok_or_else(|| Exception::throw_type(&ctx, "encodeInto requires a destination Uint8Array"))?;
        let dest_obj = dest
            .as_object()
            .ok_or_else(|| Exception::throw_type(&ctx, "encodeInto requires a destination Uint8Array"))?;
        if constructor_name(dest_obj).as_deref() != Some("Uint8Array") {
            return Err(Exception::throw_type(&ctx, "encodeInto requires a Uint8Array destination"));
        }

        let capacity: usize = dest_obj.get("byteLength")?;
        let (bytes, read, written) = encode_prefix(&input.0.unwrap_or_default(), capacity);

        let set_fn: Function = dest_obj.get("set")?;
        let source = rquickjs::TypedArray::<u8>::new(ctx.clone(), bytes)?;
        let _: Value = set_fn.call((This(dest_obj.clone()), source))?;

        let result = Object::new(ctx)?;
        result.set("read", read)?;
        result.set("written", written)?;
        Ok(result)
    }
}

fn canonicalize_label(label: &str) -> Option<&'static str> {
    match label.to_lowercase().as_str() {
        "utf-8" | "utf8" | "unicode-1-1-utf-8" => Some("utf-8"),
        _ => None,
    }
}

fn parse_decoder_options(options: Opt<Value<'_>>) -> (bool, bool) {
    let Some(opts) = options.0.and_then(|v| v.as_object().cloned()) else {
        return (false, false);
    };
    let fatal = opts.get::<_, Option<bool>>("fatal").ok().flatten().unwrap_or(false);
    let ignore_bom = opts.get::<_, Option<bool>>("ignoreBOM").ok().flatten().unwrap_or(false);
    (fatal, ignore_bom)
}

/// `TextDecoder` (spec §4.8). Only the `"utf-8"` label (and its common
/// aliases) is supported, per spec §1's "content decoding beyond UTF-8
/// and its common aliases" non-goal.
#[rquickjs::class]
pub struct TextDecoder {
    encoding: &'static str,
    fatal: bool,
    ignore_bom: bool,
}

unsafe impl JsLifetime<'_> for TextDecoder {
    type Changed<'to> = TextDecoder;
}

const UTF8_BOM: [u8; 3] = [0xEF, 0xBB, 0xBF];

#[rquickjs::methods]
impl TextDecoder {
    #[qjs(constructor)]
    pub fn new<'js>(ctx: Ctx<'js>, label: Opt<String>, options: Opt<Value<'js>>) -> Result<Self> {
        let label = label.0.unwrap_or_else(|| "utf-8".to_string());
        let encoding = canonicalize_label(&label)
            .ok_or_else(|| Exception::throw_type(&ctx, &format!("unsupported TextDecoder label '{label}'")))?;
        let (fatal, ignore_bom) = parse_decoder_options(options);
        Ok(Self { encoding, fatal, ignore_bom })
    }

    #[qjs(get)]
    pub fn encoding(&self) -> String {
        self.encoding.to_string()
    }

    #[qjs(get)]
    pub fn fatal(&self) -> bool {
        self.fatal
    }

    #[qjs(get, rename = "ignoreBOM")]
    pub fn ignore_bom(&self) -> bool {
        self.ignore_bom
    }

    pub fn decode<'js>(&self, ctx: Ctx<'js>, input: Opt<Value<'js>>) -> Result<String> {
        let Some(input) = input.0 else {
            return Ok(String::new());
        };
        if input.is_null() || input.is_undefined() {
            return Ok(String::new());
        }
        let mut bytes = read_buffer_source(&ctx, &input)?;
        if !self.ignore_bom && bytes.starts_with(&UTF8_BOM) {
            bytes.drain(0..3);
        }
        if self.fatal {
            std::str::from_utf8(&bytes)
                .map(|s| s.to_string())
                .map_err(|_| Exception::throw_type(&ctx, "the encoded data was not valid utf-8"))
        } else {
            Ok(String::from_utf8_lossy(&bytes).into_owned())
        }
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
    fn encode_then_decode_round_trips() {
        let engine = test_engine();
        engine
            .eval_script(
                "test.js",
                "globalThis.seen = new TextDecoder().decode(new TextEncoder().encode('hello é'));",
            )
            .unwrap();
        engine.with(|ctx| {
            let seen: String = ctx.eval("seen").unwrap();
            assert_eq!(seen, "hello \u{e9}");
        });
    }

    #[test]
    fn encode_into_does_not_split_a_code_point() {
        let engine = test_engine();
        engine
            .eval_script(
                "test.js",
                "const dest = new Uint8Array(1);
                 globalThis.result = new TextEncoder().encodeInto('é', dest);",
            )
            .unwrap();
        engine.with(|ctx| {
            let read: f64 = ctx.eval("result.read").unwrap();
            let written: f64 = ctx.eval("result.written").unwrap();
            assert_eq!(read, 0.0);
            assert_eq!(written, 0.0);
        });
    }

    #[test]
    fn unknown_label_rejected() {
        let engine = test_engine();
        engine.with(|ctx| {
            let err = ctx.eval::<Value, _>("new TextDecoder('shift-jis')").unwrap_err();
            assert!(err.is_exception());
        });
    }

    #[test]
    fn fatal_mode_rejects_invalid_utf8() {
        let engine = test_engine();
        engine.with(|ctx| {
            let err = ctx
                .eval::<Value, _>(
                    "new TextDecoder('utf-8', { fatal: true }).decode(new Uint8Array([0xff, 0xfe]))",
                )
                .unwrap_err();
            assert!(err.is_exception());
        });
    }

    #[test]
    fn non_fatal_mode_replaces_invalid_bytes() {
        let engine = test_engine();
        engine
            .eval_script(
                "test.js",
                "globalThis.seen = new TextDecoder().decode(new Uint8Array([0xff]));",
            )
            .unwrap();
        engine.with(|ctx| {
            let seen: String = ctx.eval("seen").unwrap();
            assert_eq!(seen, "\u{fffd}");
        });
    }

    #[test]
    fn btoa_then_atob_round_trips() {
        let engine = test_engine();
        engine
            .eval_script("test.js", "globalThis.seen = atob(btoa('hello'));")
            .unwrap();
        engine.with(|ctx| {
            let seen: String = ctx.eval("seen").unwrap();
            assert_eq!(seen, "hello");
        });
    }

    #[test]
    fn atob_rejects_non_base64_input_with_syntax_error() {
        let engine = test_engine();
        engine
            .eval_script(
                "test.js",
                "try { atob('not valid base64!!'); globalThis.seenName = null; }
                 catch (e) { globalThis.seenName = e.name; }",
            )
            .unwrap();
        engine.with(|ctx| {
            let seen: String = ctx.eval("seenName").unwrap();
            assert_eq!(seen, "SyntaxError");
        });
    }

    #[test]
    fn btoa_rejects_characters_outside_latin1() {
        let engine = test_engine();
        engine.with(|ctx| {
            let err = ctx.eval::<Value, _>("btoa('héllo 😀')").unwrap_err();
            assert!(err.is_exception());
        });
    }
}
