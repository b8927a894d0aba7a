//! Policy-level tests: the manifest rendezvous across crates and the hook
//! table emitted during the main-crate compile.

use std::fs;
use std::path::Path;

use hookbuild_abi::{names, Config};
use hookbuild_rewrite::policy::{instrumenter_for, CompileUnit};

fn write(path: &Path, content: &str) {
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    fs::write(path, content).unwrap();
}

fn config() -> Config {
    Config::from_yaml(
        "hookpoints:\n  a:\n    - a::f\n  b:\n    - b::g\n  main:\n    - main::handler\n",
    )
    .unwrap()
}

fn unit(crate_name: &str, root: &Path, staging: &Path, is_bin: bool) -> CompileUnit {
    CompileUnit {
        crate_name: crate_name.to_string(),
        root: root.to_path_buf(),
        build_dir: staging.join(format!("{crate_name}-meta")),
        staging_dir: staging.to_path_buf(),
        is_bin,
    }
}

/// Compile crates `a`, `b`, then the binary, in dependency order, and
/// check the manifest and the emitted hook table.
#[test]
fn test_manifest_and_hook_table_across_crates() {
    let dir = tempfile::tempdir().unwrap();
    let staging = dir.path().join("staging");

    let a_root = dir.path().join("a/src/lib.rs");
    write(&a_root, "pub fn f(x: u8) -> u8 {\n    x\n}\n");
    let b_root = dir.path().join("b/src/lib.rs");
    write(&b_root, "pub fn g() -> u8 {\n    7\n}\n");
    let app_root = dir.path().join("app/src/main.rs");
    write(
        &app_root,
        "fn handler(x: u8) -> u8 {\n    x + 1\n}\n\nfn main() {\n    handler(1);\n}\n",
    );

    for (name, root) in [("a", &a_root), ("b", &b_root)] {
        let mut policy = instrumenter_for(unit(name, root, &staging, false), config(), false);
        assert!(!policy.is_ignored());
        policy.instrument().unwrap();
        policy.write_extra_files().unwrap();
        let written = policy.write_instrumented_files().unwrap();
        assert!(written.contains_key(root));
    }

    let manifest = staging.join(names::MANIFEST_FILE);
    let lines: Vec<String> = fs::read_to_string(&manifest)
        .unwrap()
        .lines()
        .map(str::to_string)
        .collect();
    assert_eq!(lines, vec!["_hook_descriptor_a_f", "_hook_descriptor_b_g"]);

    // The main compile: own instrumentation plus the hook table.
    let mut policy = instrumenter_for(unit("app", &app_root, &staging, true), config(), false);
    assert!(!policy.is_ignored());
    policy.instrument().unwrap();
    let extra = policy.write_extra_files().unwrap();
    let table_path = staging.join("app-meta").join(names::HOOK_TABLE_FILE);
    assert!(extra.contains(&table_path));

    let table = fs::read_to_string(&table_path).unwrap();
    // One forward declaration per non-main descriptor, main-local ones in
    // the crate-local block, all three in sorted table order.
    let fwd_a = table.find("fn _hook_descriptor_a_f(").unwrap();
    let fwd_b = table.find("fn _hook_descriptor_b_g(").unwrap();
    let local = table.find("defined in this crate").unwrap();
    let main_decl = table.find("fn _hook_descriptor_main_handler(").unwrap();
    assert!(fwd_a < fwd_b && fwd_b < local && local < main_decl);
    assert!(table.contains("[_hook_table_entry; 3]"));
    let entry_a = table.find("    _hook_descriptor_a_f,").unwrap();
    let entry_b = table.find("    _hook_descriptor_b_g,").unwrap();
    let entry_main = table.find("    _hook_descriptor_main_handler,").unwrap();
    assert!(entry_a < entry_b && entry_b < entry_main);

    // The manifest now carries exactly the names declared in generated
    // code, and the rewritten root mounts the table module.
    let after: Vec<String> = fs::read_to_string(&manifest)
        .unwrap()
        .lines()
        .map(str::to_string)
        .collect();
    assert_eq!(
        after,
        vec![
            "_hook_descriptor_a_f",
            "_hook_descriptor_b_g",
            "_hook_descriptor_main_handler"
        ]
    );

    let written = policy.write_instrumented_files().unwrap();
    let root_out = fs::read_to_string(&written[&app_root]).unwrap();
    assert!(root_out.contains(&format!("mod {};", names::HOOK_TABLE_MOD)));
    assert!(root_out.contains(&table_path.display().to_string()));
}

#[test]
fn test_main_policy_without_hooks_skips_table() {
    let dir = tempfile::tempdir().unwrap();
    let staging = dir.path().join("staging");
    let app_root = dir.path().join("app/src/main.rs");
    write(&app_root, "fn main() {\n    println!(\"hi\");\n}\n");

    let mut policy =
        instrumenter_for(unit("app", &app_root, &staging, true), Config::default(), false);
    assert!(!policy.is_ignored());
    policy.instrument().unwrap();
    let extra = policy.write_extra_files().unwrap();
    assert!(extra.is_empty());
    assert!(policy.write_instrumented_files().unwrap().is_empty());
}

#[test]
fn test_runtime_policy_injects_atomic_load() {
    let dir = tempfile::tempdir().unwrap();
    let staging = dir.path().join("staging");
    let rt_root = dir.path().join("rt/src/lib.rs");
    write(&rt_root, "pub fn noop() {}\n");

    let mut policy = instrumenter_for(
        unit(names::RUNTIME_CRATE, &rt_root, &staging, false),
        Config::default(),
        false,
    );
    // Never ignored, configuration or not.
    assert!(!policy.is_ignored());
    policy.instrument().unwrap();
    let extra = policy.write_extra_files().unwrap();
    let ext_path = staging
        .join(format!("{}-meta", names::RUNTIME_CRATE))
        .join(names::RUNTIME_EXTRA_FILE);
    assert!(extra.contains(&ext_path));

    let ext = fs::read_to_string(&ext_path).unwrap();
    assert!(ext.contains(names::ATOMIC_LOAD_FN));
    assert!(ext.contains("Ordering::Acquire"));

    let written = policy.write_instrumented_files().unwrap();
    let root_out = fs::read_to_string(&written[&rt_root]).unwrap();
    assert!(root_out.contains(&format!("mod {};", names::RUNTIME_EXTRA_MOD)));
}

#[test]
fn test_default_policy_ignores_unlisted_and_prefixed_crates() {
    let dir = tempfile::tempdir().unwrap();
    let staging = dir.path().join("staging");
    let root = dir.path().join("c/src/lib.rs");
    write(&root, "pub fn h() {}\n");

    let unlisted = instrumenter_for(unit("c", &root, &staging, false), config(), false);
    assert!(unlisted.is_ignored());

    // Foundation-crate prefixes are skipped even in full mode.
    let prefixed = instrumenter_for(unit("core", &root, &staging, false), config(), true);
    assert!(prefixed.is_ignored());

    // Full mode lifts the config-membership requirement for everything
    // else.
    let full = instrumenter_for(unit("c", &root, &staging, false), config(), true);
    assert!(!full.is_ignored());
}

#[test]
fn test_custom_prefix_override() {
    let dir = tempfile::tempdir().unwrap();
    let staging = dir.path().join("staging");
    let root = dir.path().join("x/src/lib.rs");
    write(&root, "pub fn h() {}\n");

    let cfg = Config::from_yaml(
        "hookpoints:\n  corp_internal:\n    - corp_internal::h\nignored_prefixes:\n  - corp_\n",
    )
    .unwrap();
    // The override replaces the built-in list entirely: `core` is no
    // longer special, `corp_` is.
    let corp = instrumenter_for(unit("corp_internal", &root, &staging, false), cfg.clone(), false);
    assert!(corp.is_ignored());
    let core = instrumenter_for(unit("core", &root, &staging, false), cfg, true);
    assert!(!core.is_ignored());
}
