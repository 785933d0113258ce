//! `js-adapter` bridges an embedded single-threaded QuickJS engine
//! ([`js_adapter_runtime`]) to an external multi-threaded event-loop
//! scheduler ([`js_adapter_scheduler`]).
//!
//! This crate owns the Dispatch Bridge (the one thread boundary between
//! the two — spec §4.1, C1), the [`Adapter`] process-lifetime object and
//! its [`AdapterBuilder`], and the cross-boundary wiring that lets the
//! scheduler's internal event bus reach script listeners (spec §4.4,
//! "Cross-boundary").

mod adapter;
mod builder;
mod config;
mod cross_boundary;
mod dispatch_bridge;
mod metrics;
pub mod monitor;

pub use adapter::Adapter;
pub use builder::AdapterBuilder;
pub use config::AdapterConfig;
pub use js_adapter_common::{AdapterError, DomException, Handle, ScriptErrorKind};
pub use js_adapter_runtime::{Dispatch, Engine, Job};
pub use js_adapter_scheduler::{CancellationSignal, NativeEvent, Scheduler, SubscriptionId};
