//! `metrics` crate counters/gauges for the Dispatch Bridge, grounded on
//! `hyperlight-js`'s `sandbox/metrics.rs` pattern of a handful of `const`
//! metric names registered once and incremented from the hot path.

/// Total macrotasks the Dispatch Bridge has run.
pub const DISPATCH_MACROTASKS_TOTAL: &str = "js_adapter_dispatch_macrotasks_total";

/// Total microtasks the Dispatch Bridge has run, across both the explicit
/// `queueMicrotask` queue and jobs posted via `Dispatch::post_microtask`.
pub const DISPATCH_MICROTASKS_TOTAL: &str = "js_adapter_dispatch_microtasks_total";

/// Snapshot of how many macrotasks are waiting in the channel the instant
/// the dispatch thread checks, sampled once per dispatch turn.
pub const DISPATCH_QUEUE_DEPTH: &str = "js_adapter_dispatch_queue_depth";

/// Registers every metric above with a human-readable description. Call
/// once at process start if a `metrics` recorder is installed; harmless
/// (and cheap) to skip — the `metrics` crate's no-op recorder absorbs
/// unregistered increments just as well.
pub fn describe() {
    metrics::describe_counter!(
        DISPATCH_MACROTASKS_TOTAL,
        "Total macrotasks executed by the dispatch bridge"
    );
    metrics::describe_counter!(
        DISPATCH_MICROTASKS_TOTAL,
        "Total microtasks executed by the dispatch bridge"
    );
    metrics::describe_gauge!(
        DISPATCH_QUEUE_DEPTH,
        "Macrotasks waiting in the dispatch bridge's queue"
    );
}
