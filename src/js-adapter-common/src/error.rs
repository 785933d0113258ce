use std::fmt;

/// Errors that can escape the construction or wiring of an [`Adapter`](../js_adapter/struct.Adapter.html)
/// before any script has run.
///
/// Everything that happens *after* binding (argument validation, clone
/// failures, ...) is reported to script as a thrown value instead — see
/// [`DomException`] and [`ScriptErrorKind`].
#[derive(Debug, thiserror::Error)]
pub enum AdapterError {
    /// `new Adapter(scheduler, engine)` was called with a `nil` scheduler.
    #[error("scheduler must not be nil")]
    NilScheduler,
    /// `new Adapter(scheduler, engine)` was called with a `nil` engine.
    #[error("engine must not be nil")]
    NilEngine,
    /// `Bind()` failed to install one of the global bindings.
    #[error("failed to install global binding `{name}`: {source}")]
    BindFailed {
        /// The name of the binding that failed to install (e.g. `"console"`).
        name: &'static str,
        #[source]
        source: anyhow::Error,
    },
    /// The dispatch thread could not be spawned.
    #[error("failed to start the JS dispatch thread: {0}")]
    ThreadSpawn(#[source] std::io::Error),
    /// A post to the dispatch bridge was attempted after shutdown.
    #[error("dispatch bridge has been shut down, work was rejected")]
    Shutdown,
}

/// The taxonomy of a value thrown from a binding into script.
///
/// This does not replace the JS-level thrown value (the binding layer still
/// constructs and throws the actual `TypeError`/`RangeError`/`DOMException`
/// instance inside the engine); it exists so Rust-side code that must
/// classify an error before it crosses back into script (e.g. deciding
/// whether a macrotask failure becomes an unhandled-rejection report) has
/// something other than a string to match on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScriptErrorKind {
    /// Missing/wrong-kind argument, alien `this`, non-iterable input.
    TypeError,
    /// Numeric out-of-range input.
    RangeError,
    /// A `DOMException` with the given legacy name.
    Dom(DomException),
    /// Malformed encoded input (`SyntaxError`).
    SyntaxError,
}

/// The conventional `DOMException` names this adapter can throw, carrying
/// their legacy numeric `code` per the WHATWG DOM "historical" table.
///
/// Only the subset actually producible by the bindings in this crate is
/// represented; unrepresented legacy names would carry code `0`, same as
/// the browser behavior for exceptions raised without a historical code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DomException {
    /// A lookup (timer label, counter label, storage key) found nothing.
    NotFoundError,
    /// A resource limit was exceeded (oversized `getRandomValues` request,
    /// storage quota).
    QuotaExceededError,
    /// An operation was aborted via `AbortController`/`AbortSignal`.
    AbortError,
    /// `structuredClone` was asked to clone a function or error object.
    DataCloneError,
    /// Malformed input rejected by a parser (`URL`, `atob`).
    SyntaxError,
    /// An object was used in a state that does not support the operation.
    InvalidStateError,
    /// A timeout elapsed (`AbortSignal.timeout`).
    TimeoutError,
}

impl DomException {
    /// Every variant, in no particular order. Used by the runtime crate to
    /// map a script-supplied `name` string back to its legacy numeric code
    /// without duplicating the name table.
    pub const ALL: [DomException; 7] = [
        Self::NotFoundError,
        Self::QuotaExceededError,
        Self::AbortError,
        Self::DataCloneError,
        Self::SyntaxError,
        Self::InvalidStateError,
        Self::TimeoutError,
    ];

    /// The exception's `name` property, e.g. `"QuotaExceededError"`.
    pub const fn name(self) -> &'static str {
        match self {
            Self::NotFoundError => "NotFoundError",
            Self::QuotaExceededError => "QuotaExceededError",
            Self::AbortError => "AbortError",
            Self::DataCloneError => "DataCloneError",
            Self::SyntaxError => "SyntaxError",
            Self::InvalidStateError => "InvalidStateError",
            Self::TimeoutError => "TimeoutError",
        }
    }

    /// The legacy numeric `code` property retained for web compatibility.
    ///
    /// Values taken from the WHATWG DOM specification's historical
    /// `DOMException` code table. `DataCloneError` has no historical code
    /// (it postdates the table) and so carries `0`, matching browser
    /// behavior.
    pub const fn code(self) -> u16 {
        match self {
            Self::NotFoundError => 8,
            Self::QuotaExceededError => 22,
            Self::AbortError => 20,
            Self::DataCloneError => 0,
            Self::SyntaxError => 12,
            Self::InvalidStateError => 11,
            Self::TimeoutError => 23,
        }
    }
}

impl fmt::Display for DomException {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (code {})", self.name(), self.code())
    }
}

impl std::error::Error for DomException {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn legacy_codes_match_spec() {
        assert_eq!(DomException::NotFoundError.code(), 8);
        assert_eq!(DomException::QuotaExceededError.code(), 22);
        assert_eq!(DomException::AbortError.code(), 20);
    }

    #[test]
    fn adapter_error_messages_are_stable() {
        assert_eq!(
            AdapterError::NilScheduler.to_string(),
            "scheduler must not be nil"
        );
        assert_eq!(AdapterError::NilEngine.to_string(), "engine must not be nil");
    }
}
