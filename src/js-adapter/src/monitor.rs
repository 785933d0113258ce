//! Execution monitoring for the Dispatch Bridge, carried over from the
//! teacher's guest-execution monitors (`sandbox/monitor/*`) and
//! generalized from "terminate a VM guest call" to "warn (and optionally
//! report) that a macrotask on the JS thread is running far longer than
//! expected".
//!
//! The teacher's two-trait split is kept verbatim because the reason for
//! it is unrelated to VM guests: [`ExecutionMonitor`] stays the simple
//! user-facing trait (`get_monitor` + `name`), while the sealed
//! [`MonitorSet`] trait is what lets a tuple of monitors race via
//! `tokio::select!` without pretending to be a single monitor itself.
//!
//! `CpuTimeMonitor`'s `pthread_getcpuclockid`-based implementation has no
//! counterpart here — the Dispatch Bridge is not sandboxing an untrusted
//! guest, it is watching its own single worker thread, so only wall-clock
//! monitoring survives the trim (see DESIGN.md).

use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

/// A monitor that watches dispatch-thread activity and signals when a
/// configured limit is exceeded.
///
/// This is the only trait implementers need to write. See the
/// [module docs](self) for why [`MonitorSet`] exists alongside it.
pub trait ExecutionMonitor: Send + Sync {
    /// Prepare and return a monitoring future for one macrotask
    /// invocation. Runs synchronously on the calling thread so
    /// implementations may capture thread-local state before the future
    /// migrates onto the monitor runtime; the future itself should stay
    /// pending while within limits and resolve once the limit is
    /// exceeded.
    fn get_monitor(&self) -> anyhow::Result<impl Future<Output = ()> + Send + 'static>;

    /// Human-readable name, used for logging and the `monitor_type` metric
    /// label.
    fn name(&self) -> &'static str;
}

mod private {
    pub trait Sealed {}
}

/// A composable set of monitors producing a single racing future.
/// Sealed — automatically derived for any [`ExecutionMonitor`] and for
/// tuples of up to five of them.
pub trait MonitorSet: private::Sealed + Send + Sync {
    fn to_race(&self) -> anyhow::Result<Pin<Box<dyn Future<Output = ()> + Send>>>;
}

fn record_triggered(name: &'static str) {
    metrics::counter!("js_adapter_monitor_terminations_total", "monitor_type" => name)
        .increment(1);
    tracing::warn!(monitor = name, "execution monitor fired");
}

impl<M: ExecutionMonitor> private::Sealed for M {}

impl<M: ExecutionMonitor> MonitorSet for M {
    fn to_race(&self) -> anyhow::Result<Pin<Box<dyn Future<Output = ()> + Send>>> {
        let future = self.get_monitor()?;
        let name = self.name();
        Ok(Box::pin(async move {
            future.await;
            record_triggered(name);
        }))
    }
}

macro_rules! impl_monitor_set_tuple {
    (($($p:ident: $P:ident),+)) => {
        impl<$($P: ExecutionMonitor),+> private::Sealed for ($($P,)+) {}

        impl<$($P: ExecutionMonitor),+> MonitorSet for ($($P,)+) {
            fn to_race(&self) -> anyhow::Result<Pin<Box<dyn Future<Output = ()> + Send>>> {
                let ($($p,)+) = &self;
                $(let $p = ($p.get_monitor()?, $p.name());)+
                Ok(Box::pin(async move {
                    let winner = tokio::select! {
                        $(_ = $p.0 => $p.1,)+
                    };
                    record_triggered(winner);
                }))
            }
        }
    };
}

impl_monitor_set_tuple!((m0: M0));
impl_monitor_set_tuple!((m0: M0, m1: M1));
impl_monitor_set_tuple!((m0: M0, m1: M1, m2: M2));

/// Warns once a macrotask has been running on the dispatch thread longer
/// than `timeout`. Unlike the teacher's `WallClockMonitor`, this can only
/// warn (script on a cooperative single thread cannot be pre-empted from
/// outside) — see spec §5: "Script code runs to completion between
/// dispatch turns and cannot be pre-empted."
#[derive(Debug, Clone)]
pub struct WallClockMonitor {
    timeout: Duration,
}

impl WallClockMonitor {
    /// # Errors
    /// Returns an error if `timeout` is zero.
    pub fn new(timeout: Duration) -> anyhow::Result<Self> {
        if timeout.is_zero() {
            anyhow::bail!("timeout must be non-zero");
        }
        Ok(Self { timeout })
    }
}

impl ExecutionMonitor for WallClockMonitor {
    fn get_monitor(&self) -> anyhow::Result<impl Future<Output = ()> + Send + 'static> {
        let timeout = self.timeout;
        Ok(async move {
            tokio::time::sleep(timeout).await;
            tracing::warn!(timeout_ms = timeout.as_millis() as u64, "macrotask exceeded wall-clock budget");
        })
    }

    fn name(&self) -> &'static str {
        "wall-clock"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_duration_rejected() {
        assert!(WallClockMonitor::new(Duration::ZERO).is_err());
    }

    #[tokio::test]
    async fn fires_after_timeout() {
        let monitor = WallClockMonitor::new(Duration::from_millis(5)).unwrap();
        monitor.get_monitor().unwrap().await;
    }
}
