//! Link-time symbol names and generated-identifier formats.
//!
//! These names are a stable ABI between the rewriter's generated code and
//! the runtime attach library. Changing any of them breaks every program
//! built with an older toolchain.

/// Version stamp embedded in the instrumentation descriptor and checked by
/// `hookbuild_rt::health`.
pub const ABI_VERSION: &str = "0.0.1";

/// Directive comment that excludes a file or function from instrumentation.
/// Explanatory text may follow it (`// hookbuild:ignore because ...`).
pub const IGNORE_DIRECTIVE: &str = "hookbuild:ignore";

/// The atomic pointer-load helper. Forward-declared in every instrumented
/// file, defined once in the runtime support crate's generated extension.
pub const ATOMIC_LOAD_FN: &str = "_atomic_load_pointer";

/// The instrumentation descriptor record emitted into the main crate.
pub const DESCRIPTOR_SYMBOL: &str = "_instrumentation_descriptor";

/// Registrar exported by the runtime library; the generated hook table
/// calls it from a startup constructor with the descriptor's address.
pub const REGISTER_FN: &str = "_instrumentation_descriptor_register";

pub const DESCRIPTOR_FN_PREFIX: &str = "_hook_descriptor_";
/// Prefix marking descriptor functions local to the main crate; these are
/// not forward-declared across crates in the hook table.
pub const DESCRIPTOR_FN_MAIN_PREFIX: &str = "_hook_descriptor_main_";

pub const PROLOG_VAR_PREFIX: &str = "_hook_prolog_var_";
pub const PROLOG_LOAD_PREFIX: &str = "_hook_prolog_load_";
pub const PROLOG_TY_PREFIX: &str = "_hook_prolog_ty_";
pub const EPILOG_TY_PREFIX: &str = "_hook_epilog_ty_";

/// Prefix for synthetic names given to unnamed parameters. The other
/// prologue locals (`_prolog`, `_epilog`, `_abort`, `_result0`) are part
/// of the custom-snippet contract documented on the configuration.
pub const PARAM_PREFIX: &str = "_param";

/// Descriptor type name generated once per instrumented module.
pub const DESCRIPTOR_TYPE: &str = "_hook_descriptor_type";
/// Descriptor type name used inside the generated hook table file.
pub const TABLE_DESCRIPTOR_TYPE: &str = "_hook_table_hook_descriptor_type";

/// On-disk names of the cross-crate rendezvous state.
pub const MANIFEST_FILE: &str = "hooks.txt";
pub const HOOK_TABLE_FILE: &str = "hooktable.rs";
pub const RUNTIME_EXTRA_FILE: &str = "hookload.rs";
/// Module names the generated files are mounted under in the crate root.
pub const HOOK_TABLE_MOD: &str = "_hook_table";
pub const RUNTIME_EXTRA_MOD: &str = "_hook_load";

/// Crate name of the runtime support library; compiles of this crate take
/// the runtime policy.
pub const RUNTIME_CRATE: &str = "hookbuild_rt";
/// Package path used for hooks generated under the main policy.
pub const MAIN_PKG: &str = "main";

/// Crate-name prefixes the default policy never instruments. Overridable
/// through the `ignored_prefixes` configuration key.
pub const IGNORED_CRATE_PREFIXES: &[&str] = &[
    "core",
    "alloc",
    "std",
    "test",
    "proc_macro",
    "panic_abort",
    "panic_unwind",
    "compiler_builtins",
];

/// Environment variables consulted by the CLI.
pub const ENV_CARGO: &str = "HOOKBUILD_CARGO";
pub const ENV_CONFIG: &str = "HOOKBUILD_CONFIG";
pub const ENV_FULL: &str = "HOOKBUILD_FULL";
pub const ENV_VERBOSE: &str = "HOOKBUILD_VERBOSE";
pub const ENV_BUILD_ID: &str = "HOOKBUILD_BUILD_ID";

/// Staging directory under rustc's `--out-dir` holding per-crate build
/// directories and the manifest. A build id keeps concurrent or repeated
/// builds from reading each other's manifests.
pub fn staging_dir_name(build_id: Option<&str>) -> String {
    match build_id {
        Some(id) => format!("hookbuild-{id}"),
        None => "hookbuild".to_string(),
    }
}

pub fn prolog_var_ident(id: &str) -> String {
    format!("{PROLOG_VAR_PREFIX}{id}")
}

pub fn prolog_load_ident(id: &str) -> String {
    format!("{PROLOG_LOAD_PREFIX}{id}")
}

pub fn prolog_ty_ident(id: &str) -> String {
    format!("{PROLOG_TY_PREFIX}{id}")
}

pub fn epilog_ty_ident(id: &str) -> String {
    format!("{EPILOG_TY_PREFIX}{id}")
}

pub fn descriptor_fn_ident(id: &str) -> String {
    format!("{DESCRIPTOR_FN_PREFIX}{id}")
}

/// True for descriptor functions defined in the main crate itself.
pub fn is_main_descriptor(ident: &str) -> bool {
    ident.starts_with(DESCRIPTOR_FN_MAIN_PREFIX)
}
