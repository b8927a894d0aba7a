//! Hook-table and runtime-extension file generation.
//!
//! Unlike the per-function synthesis these are whole generated files, so
//! they are emitted from source templates rather than built as syntax
//! trees. The descriptor struct layout must stay field-for-field identical
//! to `synth::file_metadata` and to `hookbuild_rt::HookDescriptor`.

use std::collections::BTreeSet;
use std::fmt::Write;

use hookbuild_abi::names;

/// Render the hook-table file for the main crate from the manifest's
/// descriptor-function names. Names are deduplicated and emitted in sorted
/// order; the runtime's binary search relies on that order, and the raw
/// descriptor name is already the normalized comparison key.
pub fn hook_table_source(names_in: &[String]) -> String {
    let sorted: BTreeSet<&str> = names_in.iter().map(String::as_str).collect();

    let mut forward_decls = String::new();
    let mut local_decls = String::new();
    let mut entries = String::new();
    for name in &sorted {
        writeln!(entries, "    {name},").unwrap();
        let decl = format!(
            "    fn {name}(_hd: *mut {desc_ty});\n",
            desc_ty = names::TABLE_DESCRIPTOR_TYPE
        );
        if names::is_main_descriptor(name) {
            local_decls.push_str(&decl);
        } else {
            forward_decls.push_str(&decl);
        }
    }

    let mut out = String::new();
    write!(
        out,
        r#"// hookbuild: generated hook table. Do not edit.

#[allow(non_camel_case_types, dead_code)]
#[repr(C)]
struct {desc_ty} {{
    symbol: &'static str,
    func: *mut ::core::ffi::c_void,
    prolog_var: *mut ::core::ffi::c_void,
    prolog_type_id: ::core::any::TypeId,
    prolog_type_name: &'static str,
}}

#[allow(non_camel_case_types)]
type _hook_table_entry = unsafe extern "C" fn(*mut {desc_ty});
"#,
        desc_ty = names::TABLE_DESCRIPTOR_TYPE
    )
    .unwrap();

    if !forward_decls.is_empty() {
        write!(
            out,
            r#"
// Descriptor functions defined in other crates, bound by exported name.
#[allow(improper_ctypes)]
unsafe extern "C" {{
{forward_decls}}}
"#
        )
        .unwrap();
    }
    if !local_decls.is_empty() {
        write!(
            out,
            r#"
// Descriptor functions defined in this crate; resolved locally.
#[allow(improper_ctypes)]
unsafe extern "C" {{
{local_decls}}}
"#
        )
        .unwrap();
    }

    write!(
        out,
        r#"
#[allow(non_upper_case_globals)]
static _hook_table_array: [_hook_table_entry; {count}] = [
{entries}];

#[allow(non_camel_case_types, dead_code)]
#[repr(C)]
struct _instrumentation_descriptor_type {{
    version: &'static str,
    hook_table: &'static [_hook_table_entry],
}}

#[unsafe(no_mangle)]
#[allow(non_upper_case_globals)]
static {descriptor_symbol}: _instrumentation_descriptor_type =
    _instrumentation_descriptor_type {{
        version: {version:?},
        hook_table: &_hook_table_array,
    }};

unsafe extern "C" {{
    fn {register_fn}(desc: *const ::core::ffi::c_void);
}}

#[allow(dead_code)]
extern "C" fn _hook_table_init() {{
    unsafe {{
        {register_fn}(
            ::core::ptr::addr_of!({descriptor_symbol}) as *const ::core::ffi::c_void,
        );
    }}
}}

#[cfg(target_os = "linux")]
#[unsafe(link_section = ".init_array")]
#[used]
#[allow(non_upper_case_globals)]
static _hook_table_ctor: extern "C" fn() = _hook_table_init;

#[cfg(target_os = "macos")]
#[unsafe(link_section = "__DATA,__mod_init_func")]
#[used]
#[allow(non_upper_case_globals)]
static _hook_table_ctor: extern "C" fn() = _hook_table_init;
"#,
        count = sorted.len(),
        descriptor_symbol = names::DESCRIPTOR_SYMBOL,
        register_fn = names::REGISTER_FN,
        version = names::ABI_VERSION,
    )
    .unwrap();
    out
}

/// Render the runtime crate's generated extension: the canonical body of
/// the atomic pointer-load helper every prolog loader links against.
pub fn runtime_extension_source() -> String {
    format!(
        r#"// hookbuild: generated runtime support. Do not edit.

#[unsafe(no_mangle)]
extern "C" fn {atomic_load}(
    addr: *mut ::core::ffi::c_void,
) -> *mut ::core::ffi::c_void {{
    unsafe {{
        (*(addr as *const ::core::sync::atomic::AtomicPtr<::core::ffi::c_void>))
            .load(::core::sync::atomic::Ordering::Acquire)
    }}
}}
"#,
        atomic_load = names::ATOMIC_LOAD_FN
    )
}
