//! Shared error taxonomy and handle types for `js-adapter`.
//!
//! This crate has no dependency on the script engine or the scheduler: it
//! exists so both can agree on what a timer/abort handle looks like and
//! how a `DOMException`'s legacy numeric code is computed, without either
//! depending on the other.

mod error;
mod handle;

pub use error::{AdapterError, DomException, ScriptErrorKind};
pub use handle::Handle;
