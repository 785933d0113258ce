use crate::engine::Engine;

/// A unit of work posted across the concurrency boundary, to be run with
/// access to the engine once it reaches the JS thread.
pub type Job = Box<dyn FnOnce(&Engine) + Send>;

/// The capability bindings use to get back onto the single JS thread
/// (spec §4.1, C1's `post`/`postMicrotask` primitives).
///
/// This trait is implemented by `js-adapter`'s Dispatch Bridge, which
/// owns both the dedicated OS thread and the [`Engine`] itself. Nothing
/// in this crate implements it — bindings only ever hold an
/// `Arc<dyn Dispatch>` capability, never the thread.
pub trait Dispatch: Send + Sync {
    /// Enqueue `job` to run as a macrotask. Returns after queueing.
    fn post(&self, job: Job);

    /// Enqueue `job` to run during the next microtask drain, ahead of
    /// any macrotask still waiting in the queue.
    fn post_microtask(&self, job: Job);
}
