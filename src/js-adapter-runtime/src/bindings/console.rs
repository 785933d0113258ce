use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::io::Write;
use std::sync::Mutex;
use std::time::Instant;

use rquickjs::prelude::{Opt, Rest};
use rquickjs::{Ctx, Function, JsLifetime, Object, Result, Value};

/// Installs `console` (spec §4.6, C6). If `console` already exists on the
/// global object (e.g. an embedder-provided one), its own methods are kept
/// and only the names below are added — the adapter's `Bind()` contract
/// (spec §6) requires extending, not replacing.
pub fn install(ctx: &Ctx<'_>) -> Result<()> {
    ctx.store_userdata(ConsoleState::new())
        .map_err(|_| rquickjs::Exception::throw_internal(ctx, "console state already installed"))?;

    let globals = ctx.globals();
    let console: Object = match globals.get::<_, Object>("console") {
        Ok(existing) => existing,
        Err(_) => {
            let obj = Object::new(ctx.clone())?;
            globals.set("console", obj.clone())?;
            obj
        }
    };

    macro_rules! set_fn {
        ($name:literal, $func:expr) => {
            console.set($name, Function::new(ctx.clone(), $func)?)?
        };
    }

    set_fn!("log", log);
    set_fn!("info", log);
    set_fn!("debug", log);
    set_fn!("warn", log);
    set_fn!("error", log);
    set_fn!("time", time);
    set_fn!("timeEnd", time_end);
    set_fn!("timeLog", time_log);
    set_fn!("count", count);
    set_fn!("countReset", count_reset);
    set_fn!("assert", assert_fn);
    set_fn!("table", table);
    set_fn!("dir", dir);
    set_fn!("group", group);
    set_fn!("groupCollapsed", group_collapsed);
    set_fn!("groupEnd", group_end);
    set_fn!("clear", clear);
    set_fn!("trace", trace);

    Ok(())
}

/// The sink console output is written to. Swappable from outside the JS
/// thread (spec §6's `SetConsoleOutput`) only when no dispatch is in
/// progress; `js-adapter`'s builder/adapter serialize that through a lock
/// guarding this same reference (spec §5). `None` discards output without
/// ever panicking.
#[derive(Clone)]
pub struct ConsoleSink(std::sync::Arc<Mutex<Option<Box<dyn Write + Send>>>>);

impl ConsoleSink {
    pub fn stdout() -> Self {
        Self(std::sync::Arc::new(Mutex::new(Some(Box::new(std::io::stdout())))))
    }

    pub fn set(&self, writer: Option<Box<dyn Write + Send>>) {
        *self.0.lock().unwrap() = writer;
    }

    fn write_line(&self, line: &str) {
        if let Some(writer) = self.0.lock().unwrap().as_mut() {
            let _ = writer.write_all(line.as_bytes());
            let _ = writer.flush();
        }
    }
}

/// Per-engine console bookkeeping (spec §3: Console Timer/Counter Records,
/// current group indent depth). Installed as context userdata alongside
/// [`crate::engine::MicrotaskQueue`].
#[derive(JsLifetime)]
pub struct ConsoleState {
    sink: ConsoleSink,
    indent: Cell<usize>,
    timers: RefCell<HashMap<String, Instant>>,
    counters: RefCell<HashMap<String, u64>>,
}

impl ConsoleState {
    fn new() -> Self {
        Self {
            sink: ConsoleSink::stdout(),
            indent: Cell::new(0),
            timers: RefCell::new(HashMap::new()),
            counters: RefCell::new(HashMap::new()),
        }
    }

    pub fn sink(&self) -> ConsoleSink {
        self.sink.clone()
    }

    fn prefix(&self) -> String {
        "  ".repeat(self.indent.get())
    }

    fn write(&self, line: &str) {
        self.sink.write_line(&format!("{}{line}\n", self.prefix()));
    }

    fn write_raw(&self, text: &str) {
        self.sink.write_line(text);
    }
}

fn state<'js>(ctx: &Ctx<'js>) -> Result<&'js ConsoleState> {
    ctx.userdata::<ConsoleState>()
        .ok_or_else(|| rquickjs::Exception::throw_internal(ctx, "console state missing from context"))
}

/// Replace the console sink. Used by `js-adapter`'s public
/// `SetConsoleOutput`; `writer = None` silently discards console output.
pub fn set_sink<'js>(ctx: &Ctx<'js>, writer: Option<Box<dyn Write + Send>>) -> Result<()> {
    state(ctx)?.sink.set(writer);
    Ok(())
}

fn format_inspect<'js>(value: &Value<'js>, depth: usize, max_depth: usize) -> String {
    if let Some(s) = value.as_string() {
        let text = s.to_string().unwrap_or_default();
        return format!("'{text}'");
    }
    if value.is_null() {
        return "null".to_string();
    }
    if value.is_undefined() {
        return "undefined".to_string();
    }
    if let Some(b) = value.as_bool() {
        return b.to_string();
    }
    if let Some(n) = value.as_number() {
        return format_number(n);
    }
    if let Some(arr) = value.as_array() {
        if depth >= max_depth {
            return format!("Array({})", arr.len());
        }
        let items: Vec<String> = arr
            .iter::<Value>()
            .map(|item| item.map(|v| format_inspect(&v, depth + 1, max_depth)).unwrap_or_default())
            .collect();
        return format!("[ {} ]", items.join(", "));
    }
    if let Some(obj) = value.as_object() {
        if obj.as_function().is_some() {
            return "[Function]".to_string();
        }
        if depth >= max_depth {
            return "Object".to_string();
        }
        let mut parts = Vec::new();
        for key in obj.keys::<String>() {
            let Ok(key) = key else { continue };
            let Ok(v) = obj.get::<_, Value>(&key) else { continue };
            parts.push(format!("{key}: {}", format_inspect(&v, depth + 1, max_depth)));
        }
        return format!("{{ {} }}", parts.join(", "));
    }
    "undefined".to_string()
}

fn format_number(n: f64) -> String {
    if n.fract() == 0.0 && n.abs() < 1e15 {
        format!("{}", n as i64)
    } else {
        format!("{n}")
    }
}

/// Top-level console-argument formatting: strings print unquoted, every
/// other value uses [`format_inspect`] at depth 0.
fn format_arg(value: &Value<'_>) -> String {
    if let Some(s) = value.as_string() {
        return s.to_string().unwrap_or_default();
    }
    format_inspect(value, 0, 2)
}

fn join_args(args: &[Value<'_>]) -> String {
    args.iter().map(format_arg).collect::<Vec<_>>().join(" ")
}

fn log<'js>(ctx: Ctx<'js>, args: Rest<Value<'js>>) -> Result<()> {
    state(&ctx)?.write(&join_args(&args.0));
    Ok(())
}

fn time<'js>(ctx: Ctx<'js>, label: Opt<String>) -> Result<()> {
    let st = state(&ctx)?;
    let label = label.0.unwrap_or_else(|| "default".to_string());
    let mut timers = st.timers.borrow_mut();
    if timers.contains_key(&label) {
        drop(timers);
        st.write(&format!("Warning: Timer '{label}' already exists"));
        return Ok(());
    }
    timers.insert(label, Instant::now());
    Ok(())
}

fn time_end<'js>(ctx: Ctx<'js>, label: Opt<String>) -> Result<()> {
    let st = state(&ctx)?;
    let label = label.0.unwrap_or_else(|| "default".to_string());
    let Some(start) = st.timers.borrow_mut().remove(&label) else {
        st.write_raw(&format!("Warning: Timer '{label}' does not exist\n"));
        return Ok(());
    };
    let elapsed = start.elapsed().as_secs_f64() * 1000.0;
    st.write_raw(&format!("{}{label}: {elapsed:.3}ms\n", st.prefix()));
    Ok(())
}

fn time_log<'js>(ctx: Ctx<'js>, label: Opt<String>, extra: Rest<Value<'js>>) -> Result<()> {
    let st = state(&ctx)?;
    let label = label.0.unwrap_or_else(|| "default".to_string());
    let Some(start) = st.timers.borrow().get(&label).copied() else {
        st.write_raw(&format!("Warning: Timer '{label}' does not exist\n"));
        return Ok(());
    };
    let elapsed = start.elapsed().as_secs_f64() * 1000.0;
    let mut line = format!("{}{label}: {elapsed:.3}ms", st.prefix());
    if !extra.0.is_empty() {
        line.push(' ');
        line.push_str(&join_args(&extra.0));
    }
    line.push('\n');
    st.write_raw(&line);
    Ok(())
}

fn count<'js>(ctx: Ctx<'js>, label: Opt<String>) -> Result<()> {
    let st = state(&ctx)?;
    let label = label.0.unwrap_or_else(|| "default".to_string());
    let mut counters = st.counters.borrow_mut();
    let entry = counters.entry(label.clone()).or_insert(0);
    *entry += 1;
    let n = *entry;
    drop(counters);
    st.write(&format!("{label}: {n}"));
    Ok(())
}

fn count_reset<'js>(ctx: Ctx<'js>, label: Opt<String>) -> Result<()> {
    let st = state(&ctx)?;
    let label = label.0.unwrap_or_else(|| "default".to_string());
    if st.counters.borrow_mut().remove(&label).is_none() {
        st.write(&format!("Warning: Count for '{label}' does not exist"));
    }
    Ok(())
}

fn assert_fn<'js>(ctx: Ctx<'js>, cond: Opt<Value<'js>>, msgs: Rest<Value<'js>>) -> Result<()> {
    let truthy = cond.0.as_ref().map(value_is_truthy).unwrap_or(false);
    if truthy {
        return Ok(());
    }
    let st = state(&ctx)?;
    if msgs.0.is_empty() {
        st.write("Assertion failed");
    } else {
        st.write(&format!("Assertion failed: {}", join_args(&msgs.0)));
    }
    Ok(())
}

fn value_is_truthy(value: &Value<'_>) -> bool {
    if value.is_undefined() || value.is_null() {
        return false;
    }
    if let Some(b) = value.as_bool() {
        return b;
    }
    if let Some(n) = value.as_number() {
        return n != 0.0 && !n.is_nan();
    }
    if let Some(s) = value.as_string() {
        return !s.to_string().unwrap_or_default().is_empty();
    }
    true
}

fn group<'js>(ctx: Ctx<'js>, label: Opt<String>) -> Result<()> {
    let st = state(&ctx)?;
    st.write(&format!("\u{25bc} {}", label.0.unwrap_or_else(|| "console.group".to_string())));
    st.indent.set(st.indent.get() + 1);
    Ok(())
}

fn group_collapsed<'js>(ctx: Ctx<'js>, label: Opt<String>) -> Result<()> {
    let st = state(&ctx)?;
    st.write(&format!(
        "\u{25b6} {}",
        label.0.unwrap_or_else(|| "console.groupCollapsed".to_string())
    ));
    st.indent.set(st.indent.get() + 1);
    Ok(())
}

fn group_end(ctx: Ctx<'_>) -> Result<()> {
    let st = state(&ctx)?;
    st.indent.set(st.indent.get().saturating_sub(1));
    Ok(())
}

fn clear(ctx: Ctx<'_>) -> Result<()> {
    state(&ctx)?.write_raw("\n\n\n");
    Ok(())
}

fn trace<'js>(ctx: Ctx<'js>, msgs: Rest<Value<'js>>) -> Result<()> {
    let st = state(&ctx)?;
    let label = if msgs.0.is_empty() { String::new() } else { format!(": {}", join_args(&msgs.0)) };
    let mut out = format!("{}Trace{label}\n", st.prefix());
    out.push_str(&format!("{}  at <anonymous>\n", st.prefix()));
    st.write_raw(&out);
    Ok(())
}

fn dir<'js>(ctx: Ctx<'js>, value: Opt<Value<'js>>, opts: Opt<Value<'js>>) -> Result<()> {
    let max_depth = opts
        .0
        .as_ref()
        .and_then(|o| o.as_object())
        .and_then(|o| o.get::<_, Option<i32>>("depth").ok().flatten())
        .map(|d| d.max(0) as usize)
        .unwrap_or(2);
    let text = match value.0 {
        Some(v) => format_inspect(&v, 0, max_depth),
        None => "undefined".to_string(),
    };
    state(&ctx)?.write(&text);
    Ok(())
}

/// `console.table` (spec §4.6). `data` may be an array or plain object of
/// either primitives or objects; `columns`, if given, filters the inferred
/// column set.
fn table<'js>(ctx: Ctx<'js>, data: Opt<Value<'js>>, columns: Opt<Value<'js>>) -> Result<()> {
    let st = state(&ctx)?;
    let Some(data) = data.0.filter(|v| !v.is_null() && !v.is_undefined()) else {
        st.write(&render_table(&["(index)".to_string()], &[]));
        return Ok(());
    };

    let column_filter: Option<Vec<String>> = columns
        .0
        .and_then(|c| c.as_array().map(|a| a.iter::<String>().filter_map(Result::ok).collect()));

    let rows = table_rows(&data)?;
    let mut value_columns: Vec<String> = Vec::new();
    let mut has_values_column = false;
    for (_, row) in &rows {
        match row {
            TableRow::Values(_) => has_values_column = true,
            TableRow::Columns(cols) => {
                for (k, _) in cols {
                    if !value_columns.contains(k) {
                        value_columns.push(k.clone());
                    }
                }
            }
        }
    }
    if let Some(filter) = &column_filter {
        value_columns.retain(|c| filter.contains(c));
    }

    let mut headers = vec!["(index)".to_string()];
    headers.extend(value_columns.iter().cloned());
    if has_values_column {
        headers.push("Values".to_string());
    }

    let mut body = Vec::new();
    for (index, row) in rows {
        let mut cells = vec![index];
        for col in &value_columns {
            let cell = match &row {
                TableRow::Columns(cols) => cols.iter().find(|(k, _)| k == col).map(|(_, v)| v.clone()),
                TableRow::Values(_) => None,
            };
            cells.push(cell.unwrap_or_default());
        }
        if has_values_column {
            cells.push(match &row {
                TableRow::Values(v) => v.clone(),
                TableRow::Columns(_) => String::new(),
            });
        }
        body.push(cells);
    }

    st.write(&render_table(&headers, &body));
    Ok(())
}

enum TableRow {
    Values(String),
    Columns(Vec<(String, String)>),
}

fn table_cell_repr(value: &Value<'_>) -> String {
    if value.is_null() {
        return "null".to_string();
    }
    if value.as_array().is_some() {
        return format!("Array({})", value.as_array().unwrap().len());
    }
    if let Some(obj) = value.as_object()
        && obj.as_function().is_none()
    {
        return "Object".to_string();
    }
    format_arg(value)
}

fn table_rows<'js>(data: &Value<'js>) -> Result<Vec<(String, TableRow)>> {
    let mut rows = Vec::new();
    if let Some(arr) = data.as_array() {
        for (i, item) in arr.iter::<Value>().enumerate() {
            let item = item?;
            rows.push((i.to_string(), classify_row(&item)));
        }
        return Ok(rows);
    }
    if let Some(obj) = data.as_object()
        && obj.as_function().is_none()
    {
        for key in obj.keys::<String>() {
            let key = key?;
            let item: Value = obj.get(&key)?;
            rows.push((key, classify_row(&item)));
        }
    }
    Ok(rows)
}

fn classify_row(value: &Value<'_>) -> TableRow {
    if let Some(obj) = value.as_object()
        && obj.as_function().is_none()
        && value.as_array().is_none()
    {
        let mut cols = Vec::new();
        for key in obj.keys::<String>() {
            let Ok(key) = key else { continue };
            if let Ok(v) = obj.get::<_, Value>(&key) {
                cols.push((key, table_cell_repr(&v)));
            }
        }
        return TableRow::Columns(cols);
    }
    TableRow::Values(table_cell_repr(value))
}

fn render_table(headers: &[String], rows: &[Vec<String>]) -> String {
    let mut widths: Vec<usize> = headers.iter().map(|h| h.chars().count()).collect();
    for row in rows {
        for (i, cell) in row.iter().enumerate() {
            widths[i] = widths[i].max(cell.chars().count());
        }
    }

    let line = |left: &str, mid: &str, right: &str, fill: char| -> String {
        let mut s = left.to_string();
        for (i, w) in widths.iter().enumerate() {
            s.push_str(&fill.to_string().repeat(w + 2));
            s.push_str(if i + 1 == widths.len() { right } else { mid });
        }
        s
    };

    let render_row = |cells: &[String]| -> String {
        let mut s = String::from("\u{2502}");
        for (i, w) in widths.iter().enumerate() {
            let cell = cells.get(i).cloned().unwrap_or_default();
            s.push_str(&format!(" {cell:<width$} \u{2502}", width = w));
        }
        s
    };

    let mut out = String::new();
    out.push_str(&line("\u{250c}", "\u{252c}", "\u{2510}", '\u{2500}'));
    out.push('\n');
    out.push_str(&render_row(headers));
    out.push('\n');
    out.push_str(&line("\u{251c}", "\u{253c}", "\u{2524}", '\u{2500}'));
    out.push('\n');
    for row in rows {
        out.push_str(&render_row(row));
        out.push('\n');
    }
    out.push_str(&line("\u{2514}", "\u{2534}", "\u{2518}", '\u{2500}'));
    out
}
