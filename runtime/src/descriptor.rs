//! The link-time descriptor protocol.
//!
//! Field order and types here must stay identical to the
//! `_hook_descriptor_type` definitions the rewriter generates into
//! instrumented files and into the hook table; the whole program is
//! compiled by one toolchain invocation, so the shared `#[repr(C)]` layout
//! is the contract.

use core::any::TypeId;
use core::ffi::c_void;
use core::sync::atomic::{AtomicPtr, Ordering};

/// A hook-table entry: writes the descriptor record through the
/// out-pointer.
pub type DescriptorFn = unsafe extern "C" fn(*mut HookDescriptor);

#[repr(C)]
#[derive(Debug)]
pub struct HookDescriptor {
    /// Run-time symbol of the hooked function, e.g. `demo::text::concat`.
    pub symbol: &'static str,
    /// Address of the original function.
    pub func: *mut c_void,
    /// Address of the generated `AtomicPtr` prolog slot.
    pub prolog_var: *mut c_void,
    /// Exact type of the prolog cell the slot points at.
    pub prolog_type_id: TypeId,
    /// Human-readable rendering of that type, for error messages.
    pub prolog_type_name: &'static str,
}

#[repr(C)]
#[derive(Debug)]
pub struct InstrumentationDescriptor {
    pub version: &'static str,
    pub hook_table: &'static [DescriptorFn],
}

static DESCRIPTOR: AtomicPtr<InstrumentationDescriptor> =
    AtomicPtr::new(core::ptr::null_mut());

/// Called by the generated hook table's startup constructor with the
/// address of the `_instrumentation_descriptor` static. In a program built
/// without instrumentation nothing calls this and [`health`] reports the
/// absence instead of failing to link.
///
/// [`health`]: crate::health
#[unsafe(no_mangle)]
pub extern "C" fn _instrumentation_descriptor_register(desc: *const c_void) {
    DESCRIPTOR.store(desc as *mut InstrumentationDescriptor, Ordering::Release);
}

pub(crate) fn instrumentation_descriptor() -> Option<&'static InstrumentationDescriptor> {
    let ptr = DESCRIPTOR.load(Ordering::Acquire);
    if ptr.is_null() {
        None
    } else {
        // The registrar is only ever handed the address of a static
        // emitted by the table generator.
        Some(unsafe { &*ptr })
    }
}
