//! Embeds QuickJS and the Web/Node-compatible platform bindings
//! (`js-adapter` layers the Dispatch Bridge and its builder on top of
//! this crate; nothing here knows about threads other than the one it
//! runs on).

pub mod bindings;
pub mod dispatch;
pub mod engine;
pub(crate) mod utils;

pub use dispatch::{Dispatch, Job};
pub use engine::Engine;
