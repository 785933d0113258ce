use std::num::NonZeroU64;
use std::sync::atomic::{AtomicU64, Ordering};

/// An opaque handle returned to script by `setTimeout`/`setInterval`/
/// `setImmediate`/`AbortController` plumbing and similar operations.
///
/// Its numeric value has no external meaning (spec §4.2): it is only ever
/// compared for equality against a handle script already holds. Backed by
/// a process-wide counter rather than per-registry counters so that a
/// handle from one registry can never collide with a handle from another
/// even if both are (mis)used interchangeably.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Handle(NonZeroU64);

static NEXT: AtomicU64 = AtomicU64::new(1);

impl Handle {
    /// Mint a fresh, process-unique handle.
    pub fn new() -> Self {
        let id = NEXT.fetch_add(1, Ordering::Relaxed);
        // fetch_add from 1 never returns 0 short of 2^64 allocations.
        Self(NonZeroU64::new(id).expect("handle counter overflowed"))
    }

    /// The handle's underlying numeric value, exposed to script as a
    /// plain number. Callers must not attach meaning to it beyond identity.
    pub fn as_u64(self) -> u64 {
        self.0.get()
    }
}

impl Default for Handle {
    fn default() -> Self {
        Self::new()
    }
}

impl From<Handle> for f64 {
    fn from(h: Handle) -> Self {
        h.as_u64() as f64
    }
}

impl Handle {
    /// Recover a `Handle` from the number script handed back to
    /// `clearTimeout`/`clearInterval`/etc. Returns `None` for anything
    /// that cannot possibly be one of ours (non-finite, negative,
    /// fractional, or zero) — callers should treat that as "unknown
    /// handle", i.e. a silent no-op rather than an error (spec §4.2).
    pub fn from_f64(value: f64) -> Option<Self> {
        if !value.is_finite() || value < 1.0 || value.fract() != 0.0 {
            return None;
        }
        NonZeroU64::new(value as u64).map(Self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn handles_are_distinct() {
        let a = Handle::new();
        let b = Handle::new();
        assert_ne!(a, b);
    }

    #[test]
    fn round_trips_through_f64() {
        let handle = Handle::new();
        let as_number: f64 = handle.into();
        assert_eq!(Handle::from_f64(as_number), Some(handle));
    }

    #[test]
    fn rejects_values_that_cannot_be_handles() {
        assert_eq!(Handle::from_f64(0.0), None);
        assert_eq!(Handle::from_f64(-1.0), None);
        assert_eq!(Handle::from_f64(1.5), None);
        assert_eq!(Handle::from_f64(f64::NAN), None);
        assert_eq!(Handle::from_f64(f64::INFINITY), None);
    }
}
