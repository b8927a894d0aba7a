//! Attachable hooks.

use std::any::Any;
use std::ffi::c_void;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicPtr, Ordering};

use log::debug;

use crate::error::HookError;

/// A resolved hook-point: the symbol, the expected prolog type and the
/// address of the atomic slot hooked code loads from. Cheap to clone;
/// attaching is the only mutation and goes through an atomic store.
#[derive(Debug, Clone)]
pub struct Hook {
    pub(crate) symbol: &'static str,
    pub(crate) func: *mut c_void,
    pub(crate) prolog_type_id: std::any::TypeId,
    pub(crate) prolog_type_name: &'static str,
    pub(crate) prolog_var: *mut c_void,
}

// The raw pointers come out of generated statics that live for the whole
// program; the slot itself is only touched through atomic operations.
unsafe impl Send for Hook {}
unsafe impl Sync for Hook {}

impl Hook {
    /// Symbol of the hooked function, vendor prefix stripped.
    pub fn symbol(&self) -> &'static str {
        self.symbol
    }

    /// Address of the original function, for diagnostics.
    pub fn func_addr(&self) -> usize {
        self.func as usize
    }

    /// Human-readable expected prolog type.
    pub fn prolog_type_name(&self) -> &'static str {
        self.prolog_type_name
    }

    /// Atomically attach a prolog, or detach with `None`.
    ///
    /// The boxed value's concrete type must be exactly the hook's expected
    /// prolog type (see [`crate::Prolog1`] and friends); anything else is
    /// rejected without touching the slot. Panics raised while attaching
    /// are caught and returned as errors.
    pub fn attach(&self, prolog: Option<Box<dyn Any>>) -> Result<(), HookError> {
        match catch_unwind(AssertUnwindSafe(|| self.attach_inner(prolog))) {
            Ok(result) => result,
            Err(panic) => Err(HookError::AttachPanic(panic_message(panic.as_ref()))),
        }
    }

    fn attach_inner(&self, prolog: Option<Box<dyn Any>>) -> Result<(), HookError> {
        // The generated slot is an `AtomicPtr<Prolog>`; type-erased here,
        // same layout.
        let slot = unsafe { &*(self.prolog_var as *const AtomicPtr<c_void>) };
        match prolog {
            None => {
                slot.store(core::ptr::null_mut(), Ordering::Release);
                debug!("hook {} disabled", self.symbol);
                Ok(())
            }
            Some(prolog) => {
                if prolog.as_ref().type_id() != self.prolog_type_id {
                    return Err(HookError::PrologTypeMismatch {
                        symbol: self.symbol.to_string(),
                        expected: self.prolog_type_name,
                    });
                }
                // Fresh heap cell holding the prolog value; loaders
                // dereference the thin pointer stored in the slot.
                // Replaced cells are never freed: a concurrently running
                // hooked function may still hold the old pointer.
                let cell = Box::into_raw(prolog) as *mut c_void;
                slot.store(cell, Ordering::Release);
                debug!("hook {} attached", self.symbol);
                Ok(())
            }
        }
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
