use std::cell::RefCell;
use std::rc::Rc;

use rquickjs::class::Trace;
use rquickjs::prelude::{Opt, Rest, This};
use rquickjs::{Array, Class, Ctx, Exception, Function, Object, Persistent, Result, Value};
use url::Url as ParsedUrl;

use crate::utils::array_iterator;

/// Installs `URL` and `URLSearchParams` (spec §4.7, C7).
///
/// Parsing itself is delegated to the `url` crate rather than
/// hand-rolled, per the spec's own non-goal of a full WHATWG-compliant
/// parser: reimplementing one here would either fall short of the
/// exercised subset or duplicate a well-tested dependency for no reason.
pub fn install(ctx: &Ctx<'_>) -> Result<()> {
    Class::<Url>::define(&ctx.globals())?;
    Class::<UrlSearchParams>::define(&ctx.globals())?;
    Ok(())
}

fn type_error<'js>(ctx: &Ctx<'js>, msg: &str) -> rquickjs::Error {
    Exception::throw_type(ctx, msg)
}

fn encode_pairs(pairs: &[(String, String)]) -> String {
    let mut ser = url::form_urlencoded::Serializer::new(String::new());
    for (k, v) in pairs {
        ser.append_pair(k, v);
    }
    ser.finish()
}

fn decode_pairs(query: &str) -> Vec<(String, String)> {
    url::form_urlencoded::parse(query.as_bytes())
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .collect()
}

fn sync_query(parsed: &mut ParsedUrl, pairs: &[(String, String)]) {
    if pairs.is_empty() {
        parsed.set_query(None);
    } else {
        parsed.set_query(Some(&encode_pairs(pairs)));
    }
}

/// `URL` (spec §4.7). Holds the parsed state behind a shared cell so its
/// linked `URLSearchParams` (spec §3, "URL State" — "a live handle")
/// mutates the same data rather than a disconnected copy.
#[rquickjs::class(rename = "URL")]
#[derive(Trace)]
pub struct Url {
    #[qjs(skip_trace)]
    inner: Rc<RefCell<ParsedUrl>>,
    #[qjs(skip_trace)]
    query: Rc<RefCell<Vec<(String, String)>>>,
    #[qjs(skip_trace)]
    search_params: RefCell<Option<Persistent<Value<'static>>>>,
}

unsafe impl rquickjs::JsLifetime<'_> for Url {
    type Changed<'to> = Url;
}

#[rquickjs::methods]
impl Url {
    #[qjs(constructor)]
    pub fn new(ctx: Ctx<'_>, input: Opt<String>, base: Opt<String>) -> Result<Self> {
        let input = input
            .0
            .ok_or_else(|| type_error(&ctx, "URL constructor requires an input string"))?;
        let parsed = match base.0 {
            Some(base_str) => {
                let base_url = ParsedUrl::parse(&base_str).map_err(|_| type_error(&ctx, "invalid base URL"))?;
                base_url.join(&input).map_err(|_| type_error(&ctx, "invalid URL"))?
            }
            None => ParsedUrl::parse(&input).map_err(|_| type_error(&ctx, "invalid URL"))?,
        };
        let query = decode_pairs(parsed.query().unwrap_or(""));
        Ok(Self {
            inner: Rc::new(RefCell::new(parsed)),
            query: Rc::new(RefCell::new(query)),
            search_params: RefCell::new(None),
        })
    }

    #[qjs(get)]
    pub fn href(&self) -> String {
        self.inner.borrow().to_string()
    }

    #[qjs(set, rename = "href")]
    pub fn set_href(&self, ctx: Ctx<'_>, value: String) -> Result<()> {
        let parsed = ParsedUrl::parse(&value).map_err(|_| type_error(&ctx, "invalid URL"))?;
        *self.query.borrow_mut() = decode_pairs(parsed.query().unwrap_or(""));
        *self.inner.borrow_mut() = parsed;
        Ok(())
    }

    #[qjs(get)]
    pub fn protocol(&self) -> String {
        format!("{}:", self.inner.borrow().scheme())
    }

    #[qjs(set, rename = "protocol")]
    pub fn set_protocol(&self, ctx: Ctx<'_>, value: String) -> Result<()> {
        let scheme = value.trim_end_matches(':').to_string();
        self.inner
            .borrow_mut()
            .set_scheme(&scheme)
            .map_err(|_| type_error(&ctx, "invalid protocol"))?;
        Ok(())
    }

    #[qjs(get)]
    pub fn host(&self) -> String {
        let inner = self.inner.borrow();
        match (inner.host_str(), inner.port()) {
            (Some(h), Some(p)) => format!("{h}:{p}"),
            (Some(h), None) => h.to_string(),
            (None, _) => String::new(),
        }
    }

    #[qjs(set, rename = "host")]
    pub fn set_host(&self, ctx: Ctx<'_>, value: String) -> Result<()> {
        let (hostname, port) = match value.rsplit_once(':') {
            Some((h, p)) if p.chars().all(|c| c.is_ascii_digit()) && !p.is_empty() => (h, p.parse::<u16>().ok()),
            _ => (value.as_str(), None),
        };
        let mut inner = self.inner.borrow_mut();
        inner
            .set_host(Some(hostname))
            .map_err(|_| type_error(&ctx, "invalid host"))?;
        let _ = inner.set_port(port);
        Ok(())
    }

    #[qjs(get)]
    pub fn hostname(&self) -> String {
        self.inner.borrow().host_str().unwrap_or_default().to_string()
    }

    #[qjs(set, rename = "hostname")]
    pub fn set_hostname(&self, ctx: Ctx<'_>, value: String) -> Result<()> {
        self.inner
            .borrow_mut()
            .set_host(Some(&value))
            .map_err(|_| type_error(&ctx, "invalid hostname"))
    }

    #[qjs(get)]
    pub fn port(&self) -> String {
        self.inner.borrow().port().map(|p| p.to_string()).unwrap_or_default()
    }

    #[qjs(set, rename = "port")]
    pub fn set_port(&self, value: String) -> Result<()> {
        let port = if value.is_empty() { None } else { value.parse::<u16>().ok() };
        let _ = self.inner.borrow_mut().set_port(port);
        Ok(())
    }

    #[qjs(get)]
    pub fn pathname(&self) -> String {
        self.inner.borrow().path().to_string()
    }

    #[qjs(set, rename = "pathname")]
    pub fn set_pathname(&self, value: String) {
        self.inner.borrow_mut().set_path(&value);
    }

    #[qjs(get)]
    pub fn search(&self) -> String {
        match self.inner.borrow().query() {
            Some(q) if !q.is_empty() => format!("?{q}"),
            _ => String::new(),
        }
    }

    #[qjs(set, rename = "search")]
    pub fn set_search(&self, value: String) {
        let trimmed = value.strip_prefix('?').unwrap_or(&value);
        *self.query.borrow_mut() = decode_pairs(trimmed);
        if trimmed.is_empty() {
            self.inner.borrow_mut().set_query(None);
        } else {
            self.inner.borrow_mut().set_query(Some(trimmed));
        }
    }

    #[qjs(get)]
    pub fn hash(&self) -> String {
        match self.inner.borrow().fragment() {
            Some(f) if !f.is_empty() => format!("#{f}"),
            _ => String::new(),
        }
    }

    #[qjs(set, rename = "hash")]
    pub fn set_hash(&self, value: String) {
        let trimmed = value.strip_prefix('#').unwrap_or(&value);
        let frag = if trimmed.is_empty() { None } else { Some(trimmed) };
        self.inner.borrow_mut().set_fragment(frag);
    }

    #[qjs(get)]
    pub fn username(&self) -> String {
        self.inner.borrow().username().to_string()
    }

    #[qjs(set, rename = "username")]
    pub fn set_username(&self, value: String) {
        let _ = self.inner.borrow_mut().set_username(&value);
    }

    #[qjs(get)]
    pub fn password(&self) -> String {
        self.inner.borrow().password().unwrap_or_default().to_string()
    }

    #[qjs(set, rename = "password")]
    pub fn set_password(&self, value: String) {
        let _ = self.inner.borrow_mut().set_password(Some(&value));
    }

    #[qjs(get)]
    pub fn origin(&self) -> String {
        self.inner.borrow().origin().ascii_serialization()
    }

    #[qjs(get, rename = "searchParams")]
    pub fn search_params<'js>(&self, ctx: Ctx<'js>) -> Result<Value<'js>> {
        if let Some(persisted) = self.search_params.borrow().as_ref() {
            return persisted.clone().restore(ctx);
        }
        let instance = Class::instance(
            ctx.clone(),
            UrlSearchParams {
                pairs: Rc::clone(&self.query),
                owner: Some(Rc::clone(&self.inner)),
            },
        )?;
        let value = instance.into_value();
        *self.search_params.borrow_mut() = Some(Persistent::save(&ctx, value.clone()));
        Ok(value)
    }

    #[qjs(rename = "toString")]
    pub fn to_string_js(&self) -> String {
        self.inner.borrow().to_string()
    }

    #[qjs(rename = "toJSON")]
    pub fn to_json(&self) -> String {
        self.inner.borrow().to_string()
    }
}

/// `URLSearchParams` (spec §4.7). When constructed via `URL#searchParams`
/// it shares its owning `URL`'s query-pair storage so edits flow both
/// ways; standalone instances have no `owner` and only serialize to/from
/// their own string form.
#[rquickjs::class(rename = "URLSearchParams")]
#[derive(Trace)]
pub struct UrlSearchParams {
    #[qjs(skip_trace)]
    pairs: Rc<RefCell<Vec<(String, String)>>>,
    #[qjs(skip_trace)]
    owner: Option<Rc<RefCell<ParsedUrl>>>,
}

unsafe impl rquickjs::JsLifetime<'_> for UrlSearchParams {
    type Changed<'to> = UrlSearchParams;
}

impl UrlSearchParams {
    fn sync(&self) {
        if let Some(owner) = &self.owner {
            sync_query(&mut owner.borrow_mut(), &self.pairs.borrow());
        }
    }
}

fn parse_init<'js>(ctx: &Ctx<'js>, init: Value<'js>) -> Result<Vec<(String, String)>> {
    if init.is_undefined() || init.is_null() {
        return Ok(Vec::new());
    }
    if let Some(s) = init.as_string() {
        let text = s.to_string()?;
        let trimmed = text.strip_prefix('?').unwrap_or(&text);
        return Ok(decode_pairs(trimmed));
    }
    if let Some(existing) = init
        .as_object()
        .and_then(|o| Class::<UrlSearchParams>::from_object(o.clone()).ok())
    {
        return Ok(existing.borrow().pairs.borrow().clone());
    }
    if let Some(arr) = init.as_array() {
        let mut pairs = Vec::new();
        for entry in arr.iter::<Array>() {
            let entry = entry.map_err(|_| type_error(ctx, "URLSearchParams sequence entries must be arrays"))?;
            let k: String = entry.get(0)?;
            let v: String = entry.get(1)?;
            pairs.push((k, v));
        }
        return Ok(pairs);
    }
    if let Some(obj) = init.as_object() {
        let mut pairs = Vec::new();
        for key in obj.keys::<String>() {
            let key = key?;
            let value: String = obj.get(&key)?;
            pairs.push((key, value));
        }
        return Ok(pairs);
    }
    Err(type_error(ctx, "unsupported URLSearchParams initializer"))
}

#[rquickjs::methods]
impl UrlSearchParams {
    #[qjs(constructor)]
    pub fn new(ctx: Ctx<'_>, init: Opt<Value<'_>>) -> Result<Self> {
        let pairs = match init.0 {
            Some(v) => parse_init(&ctx, v)?,
            None => Vec::new(),
        };
        Ok(Self {
            pairs: Rc::new(RefCell::new(pairs)),
            owner: None,
        })
    }

    pub fn append(&self, ctx: Ctx<'_>, name: Opt<String>, value: Opt<String>) -> Result<()> {
        let name = name.0.ok_or_else(|| type_error(&ctx, "append requires a name"))?;
        let value = value.0.ok_or_else(|| type_error(&ctx, "append requires a value"))?;
        self.pairs.borrow_mut().push((name, value));
        self.sync();
        Ok(())
    }

    pub fn set(&self, ctx: Ctx<'_>, name: Opt<String>, value: Opt<String>) -> Result<()> {
        let name = name.0.ok_or_else(|| type_error(&ctx, "set requires a name"))?;
        let value = value.0.ok_or_else(|| type_error(&ctx, "set requires a value"))?;
        let mut pairs = self.pairs.borrow_mut();
        let mut replaced = false;
        pairs.retain_mut(|(k, v)| {
            if *k == name {
                if !replaced {
                    *v = value.clone();
                    replaced = true;
                    true
                } else {
                    false
                }
            } else {
                true
            }
        });
        if !replaced {
            pairs.push((name, value));
        }
        drop(pairs);
        self.sync();
        Ok(())
    }

    pub fn delete(&self, ctx: Ctx<'_>, name: Opt<String>, value: Opt<String>) -> Result<()> {
        let name = name.0.ok_or_else(|| type_error(&ctx, "delete requires a name"))?;
        let value = value.0;
        self.pairs
            .borrow_mut()
            .retain(|(k, v)| !(*k == name && value.as_ref().is_none_or(|val| v == val)));
        self.sync();
        Ok(())
    }

    pub fn get(&self, ctx: Ctx<'_>, name: Opt<String>) -> Result<Option<String>> {
        let name = name.0.ok_or_else(|| type_error(&ctx, "get requires a name"))?;
        Ok(self.pairs.borrow().iter().find(|(k, _)| *k == name).map(|(_, v)| v.clone()))
    }

    #[qjs(rename = "getAll")]
    pub fn get_all(&self, ctx: Ctx<'_>, name: Opt<String>) -> Result<Vec<String>> {
        let name = name.0.ok_or_else(|| type_error(&ctx, "getAll requires a name"))?;
        Ok(self.pairs.borrow().iter().filter(|(k, _)| *k == name).map(|(_, v)| v.clone()).collect())
    }

    pub fn has(&self, ctx: Ctx<'_>, name: Opt<String>, value: Opt<String>) -> Result<bool> {
        let name = name.0.ok_or_else(|| type_error(&ctx, "has requires a name"))?;
        let value = value.0;
        Ok(self
            .pairs
            .borrow()
            .iter()
            .any(|(k, v)| *k == name && value.as_ref().is_none_or(|val| v == val)))
    }

    pub fn sort(&self) {
        self.pairs.borrow_mut().sort_by(|a, b| a.0.cmp(&b.0));
        self.sync();
    }

    #[qjs(get)]
    pub fn size(&self) -> usize {
        self.pairs.borrow().len()
    }

    #[qjs(rename = "toString")]
    pub fn to_string_js(&self) -> String {
        encode_pairs(&self.pairs.borrow())
    }

    #[qjs(rename = "forEach")]
    pub fn for_each<'js>(&self, ctx: Ctx<'js>, callback: Opt<Value<'js>>, this_arg: Opt<Value<'js>>) -> Result<()> {
        let func = callback
            .0
            .and_then(|v| v.as_function().cloned())
            .ok_or_else(|| type_error(&ctx, "forEach callback must be a function"))?;
        let this_arg = this_arg.0.unwrap_or_else(|| Value::new_undefined(ctx.clone()));
        for (k, v) in self.pairs.borrow().clone() {
            func.call::<_, ()>((This(this_arg.clone()), v, k))?;
        }
        Ok(())
    }

    pub fn keys<'js>(&self, ctx: Ctx<'js>) -> Result<Value<'js>> {
        let items: Vec<Value> = self
            .pairs
            .borrow()
            .iter()
            .map(|(k, _)| rquickjs::String::from_str(ctx.clone(), k).map(|s| s.into_value()))
            .collect::<Result<_>>()?;
        array_iterator(&ctx, items)
    }

    pub fn values<'js>(&self, ctx: Ctx<'js>) -> Result<Value<'js>> {
        let items: Vec<Value> = self
            .pairs
            .borrow()
            .iter()
            .map(|(_, v)| rquickjs::String::from_str(ctx.clone(), v).map(|s| s.into_value()))
            .collect::<Result<_>>()?;
        array_iterator(&ctx, items)
    }

    pub fn entries<'js>(&self, ctx: Ctx<'js>) -> Result<Value<'js>> {
        let mut items = Vec::new();
        for (k, v) in self.pairs.borrow().iter() {
            let pair = Array::new(ctx.clone())?;
            pair.set(0, k.clone())?;
            pair.set(1, v.clone())?;
            items.push(pair.into_value());
        }
        array_iterator(&ctx, items)
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
    fn parses_href_and_components() {
        let engine = test_engine();
        engine.with(|ctx| {
            let href: String = ctx.eval("new URL('https://user:pw@example.com:8080/a/b?x=1#frag').href").unwrap();
            assert_eq!(href, "https://user:pw@example.com:8080/a/b?x=1#frag");
        });
    }

    #[test]
    fn relative_input_resolves_against_base() {
        let engine = test_engine();
        engine.with(|ctx| {
            let href: String = ctx.eval("new URL('/path', 'https://example.com/other').href").unwrap();
            assert_eq!(href, "https://example.com/path");
        });
    }

    #[test]
    fn invalid_url_throws_type_error() {
        let engine = test_engine();
        engine.with(|ctx| {
            let err = ctx.eval::<Value, _>("new URL('not a url')").unwrap_err();
            assert!(err.is_exception());
        });
    }

    #[test]
    fn search_params_is_live_and_bidirectional() {
        let engine = test_engine();
        engine
            .eval_script(
                "test.js",
                "const u = new URL('https://example.com?a=1');
                 u.searchParams.append('b', '2');
                 globalThis.search1 = u.search;
                 u.search = '?c=3';
                 globalThis.paramsReflectSearch = u.searchParams.get('c') === '3' && !u.searchParams.has('a');",
            )
            .unwrap();
        engine.with(|ctx| {
            let search1: String = ctx.eval("search1").unwrap();
            assert_eq!(search1, "?a=1&b=2");
            let reflect: bool = ctx.eval("paramsReflectSearch").unwrap();
            assert!(reflect);
        });
    }

    #[test]
    fn standalone_search_params_preserve_insertion_order_except_sort() {
        let engine = test_engine();
        engine
            .eval_script(
                "test.js",
                "const p = new URLSearchParams('b=2&a=1');
                 globalThis.before = p.toString();
                 p.sort();
                 globalThis.after = p.toString();",
            )
            .unwrap();
        engine.with(|ctx| {
            let before: String = ctx.eval("before").unwrap();
            let after: String = ctx.eval("after").unwrap();
            assert_eq!(before, "b=2&a=1");
            assert_eq!(after, "a=1&b=2");
        });
    }

    #[test]
    fn delete_is_value_scoped_when_value_supplied() {
        let engine = test_engine();
        engine
            .eval_script(
                "test.js",
                "const p = new URLSearchParams('a=1&a=2');
                 p.delete('a', '1');
                 globalThis.remaining = p.getAll('a').join(',');",
            )
            .unwrap();
        engine.with(|ctx| {
            let remaining: String = ctx.eval("remaining").unwrap();
            assert_eq!(remaining, "2");
        });
    }

    #[test]
    fn missing_name_argument_rejects_with_type_error() {
        let engine = test_engine();
        engine.with(|ctx| {
            let err = ctx.eval::<Value, _>("new URLSearchParams().get()").unwrap_err();
            assert!(err.is_exception());
        });
    }
}
