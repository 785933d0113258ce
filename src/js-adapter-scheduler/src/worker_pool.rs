use std::io;

use tokio::runtime::Runtime;

/// The scheduler's worker pool.
///
/// A thin wrapper around a multi-threaded `tokio` runtime. Timers and the
/// event bus spawn their work here; nothing in this crate ever touches the
/// script engine directly — see `js-adapter::Adapter` for the thread that
/// does.
pub struct WorkerPool {
    runtime: Runtime,
}

impl WorkerPool {
    /// Build a worker pool with the given number of worker threads.
    ///
    /// `worker_threads == 0` is treated as "let tokio pick", same as
    /// omitting `worker_threads()` from `tokio::runtime::Builder`.
    pub fn new(worker_threads: usize) -> io::Result<Self> {
        let mut builder = tokio::runtime::Builder::new_multi_thread();
        builder.thread_name("js-adapter-scheduler-worker").enable_time();
        if worker_threads > 0 {
            builder.worker_threads(worker_threads);
        }
        let runtime = builder.build()?;
        Ok(Self { runtime })
    }

    /// Spawn a future onto the pool. Fire-and-forget; the returned
    /// `JoinHandle` can be used to cancel the task.
    pub fn spawn<F>(&self, fut: F) -> tokio::task::JoinHandle<()>
    where
        F: std::future::Future<Output = ()> + Send + 'static,
    {
        self.runtime.spawn(fut)
    }

    /// Run a future to completion on the pool, blocking the calling thread.
    ///
    /// Only used by the embedding host's `loop.Run` equivalent; never
    /// called from within a scheduled callback.
    pub fn block_on<F: std::future::Future>(&self, fut: F) -> F::Output {
        self.runtime.block_on(fut)
    }

    /// A handle usable to spawn work from inside an already-running task
    /// without holding a reference to the pool itself.
    pub fn handle(&self) -> tokio::runtime::Handle {
        self.runtime.handle().clone()
    }
}
