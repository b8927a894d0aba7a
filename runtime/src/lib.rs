//! Runtime attach library for hookbuild-instrumented programs.
//!
//! A program built through `hookbuild build` carries a hook table of
//! descriptor functions, registered with this crate at startup by a
//! generated constructor. This crate turns those descriptors into
//! attachable [`Hook`]s: find one by symbol, then atomically install or
//! remove a prolog.
//!
//! Given a hooked function:
//!
//! ```ignore
//! pub fn concat(a: String, b: String) -> String
//! ```
//!
//! the expected prolog observes every argument by reference and may return
//! an epilog (runs at function exit with the final result) and an abort
//! value (returned immediately instead of running the body):
//!
//! ```ignore
//! let prolog: hookbuild_rt::Prolog2<String, String, String> =
//!     Box::new(|a, b| {
//!         println!("concat({a:?}, {b:?})");
//!         (None, None)
//!     });
//! hookbuild_rt::do_hook("demo::text::concat", Box::new(prolog))?;
//! ```
//!
//! Attachment is type-checked: the boxed prolog's type must match the
//! hooked function's expected prolog type exactly, or attach fails with a
//! descriptive error. Closures with captured state are ordinary prologs.

mod descriptor;
mod error;
mod hook;
mod index;

use std::any::Any;

pub use descriptor::{
    DescriptorFn, HookDescriptor, InstrumentationDescriptor,
    _instrumentation_descriptor_register,
};
pub use error::HookError;
pub use hook::Hook;
pub use index::find;

/// Version stamp this library expects in the instrumentation descriptor.
pub use hookbuild_abi::names::ABI_VERSION;

/// An epilog observes the final result value at function exit.
pub type Epilog<R> = Box<dyn FnOnce(&R) + Send>;

/// What a prolog returns: an optional epilog and an optional abort value.
/// A `Some` abort value is returned from the hooked function immediately,
/// without running the original body.
pub type PrologResult<R> = (Option<Epilog<R>>, Option<R>);

// Shorthands for the common arities. For hooked functions that take
// references, write the boxed type out instead so every elided lifetime
// lands in the `dyn Fn` sugar exactly as the generated code spells it.
pub type Prolog0<R> = Box<dyn Fn() -> PrologResult<R> + Send + Sync>;
pub type Prolog1<A, R> = Box<dyn Fn(&A) -> PrologResult<R> + Send + Sync>;
pub type Prolog2<A, B, R> = Box<dyn Fn(&A, &B) -> PrologResult<R> + Send + Sync>;
pub type Prolog3<A, B, C, R> = Box<dyn Fn(&A, &B, &C) -> PrologResult<R> + Send + Sync>;
pub type Prolog4<A, B, C, D, R> =
    Box<dyn Fn(&A, &B, &C, &D) -> PrologResult<R> + Send + Sync>;

/// Check that the running program was instrumented by a matching
/// toolchain. Returns an error when no hook table was registered, the
/// table is empty, or the embedded version differs from `expected_version`.
pub fn health(expected_version: &str) -> Result<(), HookError> {
    let Some(desc) = descriptor::instrumentation_descriptor() else {
        return Err(HookError::NotInstrumented);
    };
    if desc.hook_table.is_empty() {
        return Err(HookError::NotInstrumented);
    }
    if desc.version != expected_version {
        return Err(HookError::VersionMismatch {
            built: desc.version.to_string(),
            expected: expected_version.to_string(),
        });
    }
    Ok(())
}

/// Find the hook for `symbol` and attach `prolog` to it.
pub fn do_hook(symbol: &str, prolog: Box<dyn Any>) -> Result<(), HookError> {
    match find(symbol)? {
        Some(hook) => hook.attach(Some(prolog)),
        None => Err(HookError::NotFound(symbol.to_string())),
    }
}

/// Find the hook for `symbol` and clear its prolog slot.
pub fn undo_hook(symbol: &str) -> Result<(), HookError> {
    match find(symbol)? {
        Some(hook) => hook.attach(None),
        None => Err(HookError::NotFound(symbol.to_string())),
    }
}
