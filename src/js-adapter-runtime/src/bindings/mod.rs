use rquickjs::Ctx;

pub mod abort;
pub mod blob;
pub mod console;
pub mod crypto;
pub mod dom_exception;
pub mod event_target;
pub mod form_data;
pub mod headers;
pub mod performance;
pub mod promise;
pub mod storage;
pub mod structured_clone;
pub mod text_codec;
pub mod timers;
pub mod url;

/// Installs every Web/Node-compatible global this adapter exposes to
/// script. Called once per [`crate::engine::Engine`], before any script
/// runs.
///
/// Each binding module owns one region of the global object (or one
/// native ES module, for the pieces QuickJS expects to `import`) and
/// reaches the scheduler/dispatch capabilities through
/// `ctx.userdata::<crate::engine::Capabilities>()` rather than through an
/// extra parameter here. `dom_exception` installs first since several
/// later bindings construct `DOMException` instances.
pub fn install(ctx: &Ctx<'_>) -> rquickjs::Result<()> {
    dom_exception::install(ctx)?;
    promise::install(ctx)?;
    timers::install(ctx)?;
    event_target::install(ctx)?;
    structured_clone::install(ctx)?;
    console::install(ctx)?;
    url::install(ctx)?;
    headers::install(ctx)?;
    storage::install(ctx)?;
    form_data::install(ctx)?;
    crypto::install(ctx)?;
    performance::install(ctx)?;
    text_codec::install(ctx)?;
    blob::install(ctx)?;
    abort::install(ctx)?;
    Ok(())
}
