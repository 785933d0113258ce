use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context as _, Result};
use clap::Parser;
use js_adapter::AdapterBuilder;
use tracing::instrument;

const EXAMPLES: &str = "\u{001b}[1;4mExamples:\u{001b}[0m
  Run a script that schedules a timer and exit once it fires:
    $ cat ./hello.js
    console.log('hello from js-adapter');
    setTimeout(() => console.log('tick'), 50);

    $ js-adapter ./hello.js
    hello from js-adapter
    tick
";

/// Load a JavaScript file and drive it through an [`js_adapter::Adapter`]
/// until every timer it scheduled has fired (or `--max-wait-ms` elapses,
/// or the process receives Ctrl-C).
///
/// This is a demo harness, not an embedding guide: a real embedder owns
/// its own scheduler lifetime and event wiring (see `js_adapter::Adapter`
/// and `js_adapter::AdapterBuilder`).
#[derive(clap::Parser)]
#[command(version, about)]
#[clap(after_help = EXAMPLES)]
struct Cli {
    /// Path to the JavaScript source file to evaluate.
    file: PathBuf,

    /// Number of OS threads backing the scheduler's worker pool.
    #[arg(long, default_value_t = 2)]
    worker_threads: usize,

    /// Stop waiting for pending timers after this many milliseconds even
    /// if some are still outstanding (e.g. a runaway `setInterval`).
    #[arg(long, default_value_t = 30_000)]
    max_wait_ms: u64,

    /// How often to poll whether all timers have settled.
    #[arg(long, default_value_t = 10)]
    poll_interval_ms: u64,
}

#[instrument(skip_all, level = "info")]
fn main() -> Result<()> {
    tracing_subscriber::fmt::try_init().ok();

    let Cli { file, worker_threads, max_wait_ms, poll_interval_ms } = Cli::parse();

    let source = std::fs::read_to_string(&file)
        .with_context(|| format!("reading script file {file:?}"))?;
    let name = file
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "script.js".to_string());

    let adapter = AdapterBuilder::new()
        .with_worker_threads(worker_threads)
        .with_console_to_stdout(true)
        .build()
        .context("building adapter")?;

    adapter
        .eval_script(&name, &source)
        .with_context(|| format!("evaluating {name}"))?;

    let scheduler = adapter.loop_handle();
    let max_wait = Duration::from_millis(max_wait_ms);
    let poll_interval = Duration::from_millis(poll_interval_ms);
    scheduler.block_on(async {
        let drain_pending = async {
            loop {
                if scheduler.active_timer_count() == 0 {
                    break;
                }
                tokio::time::sleep(poll_interval).await;
            }
        };
        tokio::select! {
            _ = drain_pending => {}
            _ = tokio::time::sleep(max_wait) => {
                tracing::warn!(max_wait_ms, "max wait elapsed with timers still pending");
            }
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("received Ctrl-C, shutting down");
            }
        }
    });

    adapter.shutdown();
    Ok(())
}
