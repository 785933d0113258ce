use std::collections::HashMap;

/// Configuration accepted by [`crate::AdapterBuilder`] (SPEC_FULL §1:
/// "`AdapterConfig`/`SandboxBuilder`-style builder"), mirroring the
/// teacher's `SandboxConfiguration` in spirit: a plain data struct with
/// sensible defaults, consumed once at construction time.
#[derive(Debug, Clone)]
pub struct AdapterConfig {
    pub(crate) worker_threads: usize,
    pub(crate) console_to_stdout: bool,
    pub(crate) env: HashMap<String, String>,
}

impl Default for AdapterConfig {
    fn default() -> Self {
        Self {
            worker_threads: 2,
            console_to_stdout: true,
            env: HashMap::new(),
        }
    }
}

impl AdapterConfig {
    /// Start from the defaults (two scheduler worker threads, console
    /// writing to stdout, no `process.env` entries).
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of OS threads backing the scheduler's worker pool. Does not
    /// affect the JS thread, which is always exactly one dedicated thread
    /// owned by the Dispatch Bridge.
    pub fn with_worker_threads(mut self, worker_threads: usize) -> Self {
        self.worker_threads = worker_threads.max(1);
        self
    }

    /// Whether the console sink starts out writing to stdout (`true`, the
    /// default) or discarding output until [`crate::Adapter::set_console_output`]
    /// is called (`false`).
    pub fn with_console_to_stdout(mut self, enabled: bool) -> Self {
        self.console_to_stdout = enabled;
        self
    }

    /// Populate `process.env` for script. No environment variables are
    /// read implicitly (spec §6) — callers must pass them explicitly, the
    /// same way the teacher's builder takes an explicit host print
    /// function rather than reaching into ambient state.
    pub fn with_env(mut self, env: HashMap<String, String>) -> Self {
        self.env = env;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sane() {
        let config = AdapterConfig::new();
        assert_eq!(config.worker_threads, 2);
        assert!(config.console_to_stdout);
        assert!(config.env.is_empty());
    }

    #[test]
    fn worker_threads_clamped_to_at_least_one() {
        let config = AdapterConfig::new().with_worker_threads(0);
        assert_eq!(config.worker_threads, 1);
    }
}
