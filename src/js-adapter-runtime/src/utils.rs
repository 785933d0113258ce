use rquickjs::prelude::This;
use rquickjs::{Array, Ctx, Exception, Function, Result, Value};

/// Converts a JavaScript value to a byte vector.
/// The value can be a String, or a Uint8Array.
pub fn as_bytes(key: Value) -> Result<Vec<u8>> {
    if let Some(txt) = key.as_string() {
        return Ok(txt.to_string()?.into_bytes());
    }

    if let Some(obj) = key.as_object()
        && let Some(array) = obj.as_typed_array::<u8>()
    {
        return Ok(array.as_bytes().unwrap_or_default().to_vec());
    };

    Err(Exception::throw_type(
        key.ctx(),
        "Expected a String or Uint8Array",
    ))
}

/// Helper used throughout the bindings to turn an `rquickjs::Result`
/// into an `anyhow::Result`, pulling the pending exception (if any) into
/// the error message. Mirrors the engine's own `catch` helper but is
/// usable from binding code that doesn't hold a `Ctx` long enough to call
/// `CatchResultExt` directly.
pub trait CatchJsErrorExt {
    type Ok;
    fn catch(self, ctx: &rquickjs::Ctx<'_>) -> anyhow::Result<Self::Ok>;
}

impl<T> CatchJsErrorExt for rquickjs::Result<T> {
    type Ok = T;
    fn catch(self, ctx: &rquickjs::Ctx<'_>) -> anyhow::Result<T> {
        match rquickjs::CatchResultExt::catch(self, ctx) {
            Ok(v) => Ok(v),
            Err(e) => Err(anyhow::anyhow!("script error: {e:#?}")),
        }
    }
}

/// Builds a JS array out of `items` and returns its default array
/// iterator. Used by the key/value multimap bindings (`URLSearchParams`,
/// `Headers`, `FormData`) for `keys`/`values`/`entries` rather than
/// hand-rolling the iterator protocol: a real `Array.prototype.values()`
/// iterator already satisfies `for...of` and manual `.next()` calls.
pub(crate) fn array_iterator<'js>(ctx: &Ctx<'js>, items: Vec<Value<'js>>) -> Result<Value<'js>> {
    let arr = Array::new(ctx.clone())?;
    for (i, item) in items.into_iter().enumerate() {
        arr.set(i, item)?;
    }
    let values_fn: Function = arr.get("values")?;
    values_fn.call((This(arr),))
}
