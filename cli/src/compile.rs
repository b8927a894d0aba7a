//! The compile-step handler: flag extraction, policy selection and
//! argument-vector surgery for one `rustc` invocation.

use std::path::PathBuf;

use anyhow::{Context, Result};
use log::{debug, info};

use hookbuild_abi::{names, Config};
use hookbuild_rewrite::policy::{instrumenter_for, CompileUnit};

use crate::toolexec::Flags;

/// Basename of the compile tool this dispatcher handles; everything else
/// is forwarded untouched.
pub const COMPILE_TOOL: &str = "rustc";

#[derive(Debug, Default)]
struct CompileFlagSet {
    crate_name: Option<String>,
    out_dir: Option<PathBuf>,
    output: Option<PathBuf>,
    crate_types: Vec<String>,
    metadata: Vec<String>,
    has_print: bool,
    /// First `.rs` argument: the crate root, with its argv index.
    input: Option<(usize, PathBuf)>,
}

impl CompileFlagSet {
    /// A real compile has a crate name, a crate root and somewhere to put
    /// output; probes (`-vV`, `--print`) have none and are forwarded.
    fn is_valid(&self) -> bool {
        self.crate_name.is_some()
            && self.input.is_some()
            && !self.has_print
            && (self.out_dir.is_some() || self.output.is_some())
    }

    fn build_dir_root(&self) -> Option<PathBuf> {
        self.out_dir
            .clone()
            .or_else(|| self.output.as_ref()?.parent().map(PathBuf::from))
    }

    fn is_proc_macro(&self) -> bool {
        self.crate_types.iter().any(|t| t == "proc-macro")
    }

    fn is_bin(&self) -> bool {
        self.crate_types.iter().any(|t| t == "bin")
    }
}

/// Walk the rustc argument vector (`args[0]` is the tool path) and pull
/// out what the policies need. Both `--flag value` and `--flag=value`
/// spellings occur in the wild.
fn parse_compile_args(args: &[String]) -> CompileFlagSet {
    let mut flags = CompileFlagSet::default();
    let mut i = 1;
    while i < args.len() {
        let arg = &args[i];
        let value_of = |i: &mut usize| -> Option<String> {
            *i += 1;
            args.get(*i).cloned()
        };
        match arg.as_str() {
            "--crate-name" => flags.crate_name = value_of(&mut i),
            "--out-dir" => flags.out_dir = value_of(&mut i).map(PathBuf::from),
            "-o" => flags.output = value_of(&mut i).map(PathBuf::from),
            "--crate-type" => {
                if let Some(v) = value_of(&mut i) {
                    flags.crate_types.extend(v.split(',').map(str::to_string));
                }
            }
            "--print" => flags.has_print = true,
            "-C" => {
                if let Some(v) = value_of(&mut i) {
                    if let Some(m) = v.strip_prefix("metadata=") {
                        flags.metadata.push(m.to_string());
                    }
                }
            }
            _ => {
                if let Some(v) = arg.strip_prefix("--crate-name=") {
                    flags.crate_name = Some(v.to_string());
                } else if let Some(v) = arg.strip_prefix("--out-dir=") {
                    flags.out_dir = Some(PathBuf::from(v));
                } else if let Some(v) = arg.strip_prefix("--crate-type=") {
                    flags.crate_types.extend(v.split(',').map(str::to_string));
                } else if arg.starts_with("--print=") {
                    flags.has_print = true;
                } else if let Some(v) = arg.strip_prefix("-Cmetadata=") {
                    flags.metadata.push(v.to_string());
                } else if arg.ends_with(".rs") && !arg.starts_with('-') && flags.input.is_none() {
                    flags.input = Some((i, PathBuf::from(arg)));
                }
            }
        }
        i += 1;
    }
    flags
}

/// Instrument one compile invocation, returning the argument vector to
/// forward. Untouched invocations come back unchanged.
pub fn process(args: Vec<String>, toolexec_flags: Flags) -> Result<Vec<String>> {
    let flags = parse_compile_args(&args);
    if !flags.is_valid() {
        debug!("nothing to do ({flags:?})");
        return Ok(args);
    }
    if flags.is_proc_macro() {
        debug!("skipping proc-macro crate");
        return Ok(args);
    }

    let (Some(crate_name), Some((input_idx, root))) =
        (flags.crate_name.clone(), flags.input.clone())
    else {
        return Ok(args);
    };
    let out_root = flags.build_dir_root().context("no output directory")?;

    let build_id = std::env::var(names::ENV_BUILD_ID).ok();
    let staging_dir = out_root.join(names::staging_dir_name(build_id.as_deref()));
    let mut leaf = crate_name.clone();
    if let Some(metadata) = flags.metadata.first() {
        leaf.push('-');
        leaf.push_str(metadata);
    }
    let unit = CompileUnit {
        crate_name: crate_name.clone(),
        root,
        build_dir: staging_dir.join(leaf),
        staging_dir,
        is_bin: flags.is_bin(),
    };

    let config = Config::from_env();
    let mut instrumenter = instrumenter_for(unit, config, toolexec_flags.full);
    if instrumenter.is_ignored() {
        debug!("skipping instrumentation of crate `{crate_name}`");
        return Ok(args);
    }

    info!("instrumenting crate `{crate_name}`");
    instrumenter.instrument()?;
    let extra = instrumenter.write_extra_files()?;
    for path in &extra {
        debug!("generated extra file {}", path.display());
    }
    let written = instrumenter.write_instrumented_files()?;

    let mut args = args;
    let root_key = PathBuf::from(&args[input_idx]);
    if let Some(dest) = written.get(&root_key) {
        args[input_idx] = dest.display().to_string();
    }
    Ok(args)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn argv(parts: &[&str]) -> Vec<String> {
        parts.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_parse_cargo_style_invocation() {
        let args = argv(&[
            "/toolchain/bin/rustc",
            "--crate-name",
            "demo",
            "--edition=2021",
            "src/lib.rs",
            "--crate-type",
            "lib",
            "-C",
            "metadata=abc123",
            "--out-dir",
            "/target/debug/deps",
        ]);
        let flags = parse_compile_args(&args);
        assert!(flags.is_valid());
        assert_eq!(flags.crate_name.as_deref(), Some("demo"));
        assert_eq!(flags.input.as_ref().unwrap().0, 4);
        assert_eq!(flags.metadata, vec!["abc123"]);
        assert_eq!(flags.crate_types, vec!["lib"]);
        assert!(!flags.is_bin());
    }

    #[test]
    fn test_probe_invocations_are_invalid() {
        let probe = parse_compile_args(&argv(&["rustc", "-vV"]));
        assert!(!probe.is_valid());
        let print = parse_compile_args(&argv(&[
            "rustc",
            "--crate-name",
            "x",
            "src/lib.rs",
            "--out-dir",
            "/tmp",
            "--print=file-names",
        ]));
        assert!(!print.is_valid());
    }

    #[test]
    fn test_equals_spellings_and_bin_detection() {
        let flags = parse_compile_args(&argv(&[
            "rustc",
            "--crate-name=demo",
            "--crate-type=bin",
            "-Cmetadata=zz",
            "--out-dir=/target/debug/deps",
            "src/main.rs",
        ]));
        assert!(flags.is_valid());
        assert!(flags.is_bin());
        assert_eq!(flags.metadata, vec!["zz"]);
        assert_eq!(flags.out_dir.as_deref(), Some(std::path::Path::new("/target/debug/deps")));
    }

    #[test]
    fn test_output_flag_gives_build_dir() {
        let flags = parse_compile_args(&argv(&[
            "rustc",
            "--crate-name",
            "demo",
            "src/lib.rs",
            "-o",
            "/target/debug/libdemo.rlib",
        ]));
        assert!(flags.is_valid());
        assert_eq!(
            flags.build_dir_root().as_deref(),
            Some(std::path::Path::new("/target/debug"))
        );
    }
}
