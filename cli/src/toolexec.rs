//! The per-tool dispatcher.
//!
//! Receives the argument vector the build driver would execute (first
//! element is the tool binary's path), runs the instrumentation pipeline
//! when the tool is the compile step, and forwards the possibly modified
//! invocation, propagating its exit code.

use std::path::Path;
use std::process::Command;

use log::{debug, error, info};

use hookbuild_abi::names;

use crate::compile;

#[derive(Debug, Clone, Copy, Default)]
pub struct Flags {
    pub full: bool,
    pub verbose: bool,
    pub help: bool,
}

/// Parse leading instrumentation flags, stopping at the first non-flag
/// argument. Returns the flags and the index of the tool path. Environment
/// variables fill in for flags the driver cannot pass through
/// `RUSTC_WRAPPER`.
pub fn parse_flags(args: &[String]) -> (Flags, usize) {
    let mut flags = env_flags();
    let mut pos = 0;
    for arg in args {
        match arg.as_str() {
            "--full" => flags.full = true,
            "--verbose" | "-v" => flags.verbose = true,
            "--help" | "-h" => flags.help = true,
            _ => break,
        }
        pos += 1;
    }
    (flags, pos)
}

pub fn env_flags() -> Flags {
    Flags {
        full: env_truthy(names::ENV_FULL),
        verbose: env_truthy(names::ENV_VERBOSE),
        help: false,
    }
}

fn env_truthy(var: &str) -> bool {
    std::env::var(var).is_ok_and(|v| !v.is_empty() && v != "0" && v != "false")
}

/// Tool name from its path: basename with the file extension stripped.
pub fn tool_id(path: &str) -> Option<String> {
    if path.is_empty() {
        return None;
    }
    let base = Path::new(path).file_name()?.to_str()?;
    let stem = Path::new(base)
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or(base);
    Some(stem.to_string())
}

/// True when argv[1] looks like a tool invocation rather than a
/// subcommand: anything that is not one of our own commands or a flag.
/// Unknown tools are forwarded verbatim, so misdetection is harmless.
pub fn is_wrapper_invocation(first: &str) -> bool {
    !first.starts_with('-') && !matches!(first, "build" | "toolexec" | "help")
}

/// Run one tool step. `args[0]` is the tool path.
pub fn run(mut args: Vec<String>, flags: Flags) -> i32 {
    debug!("toolexec start: {}", args.join(" "));

    let is_compile = tool_id(&args[0]).is_some_and(|id| id == compile::COMPILE_TOOL);
    if is_compile {
        match compile::process(args.clone(), flags) {
            Ok(new_args) => args = new_args,
            Err(e) => {
                // Fatal to this compile step; the build driver surfaces it.
                error!("instrumentation failed: {e}");
                eprintln!("hookbuild: instrumentation failed: {e}");
                return 1;
            }
        }
    }

    forward(&args)
}

/// Execute the (possibly rewritten) tool invocation with inherited stdio
/// and propagate its exit code. The compile step's stdout carries
/// driver-parsed metadata, so it must pass through untouched.
fn forward(args: &[String]) -> i32 {
    info!("forwarding command: {}", args.join(" "));
    let status = Command::new(&args[0]).args(&args[1..]).status();
    match status {
        Ok(status) => status.code().unwrap_or(1),
        Err(e) => {
            error!("failed to run `{}`: {e}", args[0]);
            eprintln!("hookbuild: failed to run `{}`: {e}", args[0]);
            1
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tool_id_strips_path_and_extension() {
        assert_eq!(tool_id("/usr/lib/rust/bin/rustc").as_deref(), Some("rustc"));
        assert_eq!(tool_id("rustc.exe").as_deref(), Some("rustc"));
        assert_eq!(tool_id("rustc").as_deref(), Some("rustc"));
        assert_eq!(tool_id(""), None);
    }

    #[test]
    fn test_parse_flags_stops_at_tool() {
        let args: Vec<String> = ["--full", "--verbose", "/bin/rustc", "--crate-name", "x"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        let (flags, pos) = parse_flags(&args);
        assert!(flags.full && flags.verbose && !flags.help);
        assert_eq!(pos, 2);

        let bare: Vec<String> = vec!["/bin/rustc".to_string()];
        let (flags, pos) = parse_flags(&bare);
        assert!(!flags.full);
        assert_eq!(pos, 0);
    }

    #[test]
    fn test_wrapper_invocation_detection() {
        assert!(is_wrapper_invocation("/usr/bin/rustc"));
        assert!(is_wrapper_invocation("rustc"));
        assert!(!is_wrapper_invocation("build"));
        assert!(!is_wrapper_invocation("toolexec"));
        assert!(!is_wrapper_invocation("--help"));
    }
}
