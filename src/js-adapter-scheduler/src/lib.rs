//! The multi-threaded event-loop scheduler that `js-adapter` bridges to.
//!
//! Everything in this crate is plain Rust: no script values, no engine
//! handles. `js-adapter`'s Dispatch Bridge is the only consumer that
//! crosses from here into the single JS thread.

mod cancellation;
mod event_bus;
mod scheduler;
mod timers;
mod worker_pool;

pub use cancellation::CancellationSignal;
pub use event_bus::{EventBus, NativeEvent, SubscriptionId};
pub use scheduler::Scheduler;
pub use timers::{TimerKind, TimerRegistry};
pub use worker_pool::WorkerPool;
