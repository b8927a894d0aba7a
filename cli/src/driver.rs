//! The `build` subcommand: re-invoke cargo with the rustc wrapper engaged.

use std::path::PathBuf;
use std::process::Command;
use std::time::{SystemTime, UNIX_EPOCH};

use anyhow::{anyhow, Context, Result};
use log::{info, warn};

use hookbuild_abi::names;

/// Find a program in PATH.
fn find_in_path(program: &str) -> Option<PathBuf> {
    std::env::var_os("PATH")?
        .to_str()?
        .split(':')
        .map(|dir| PathBuf::from(dir).join(program))
        .find(|path| path.is_file())
}

fn cargo_path() -> Result<PathBuf> {
    if let Some(custom) = std::env::var_os(names::ENV_CARGO) {
        return Ok(PathBuf::from(custom));
    }
    find_in_path("cargo").ok_or_else(|| anyhow!("cargo not found in PATH"))
}

/// A fresh id per build keys the staging directory, so every build starts
/// from an empty manifest; the matching `-C metadata` nonce invalidates
/// every fingerprint, so cargo recompiles every crate and the manifest
/// ends up complete.
// TODO: garbage-collect hookbuild-<id> staging directories left by
// previous builds under target/*/deps.
fn build_id() -> String {
    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0);
    format!("{}-{now}", std::process::id())
}

pub fn run_build(args: &[String]) -> Result<i32> {
    let cargo = cargo_path()?;

    // An existing wrapper would be clobbered by ours; refrain and log the
    // skip instead of silently replacing it.
    if std::env::var_os("RUSTC_WRAPPER").is_some_and(|v| !v.is_empty()) {
        warn!("RUSTC_WRAPPER is already set; building without instrumentation");
        let status = Command::new(&cargo)
            .args(args)
            .status()
            .with_context(|| format!("running {}", cargo.display()))?;
        return Ok(status.code().unwrap_or(1));
    }

    let wrapper = std::env::current_exe().context("resolving own executable path")?;
    let id = build_id();

    let mut rustflags = std::env::var("RUSTFLAGS").unwrap_or_default();
    if !rustflags.is_empty() {
        rustflags.push(' ');
    }
    rustflags.push_str(&format!("-C metadata=hookbuild-{id}"));

    info!(
        "building with wrapper {} (build id {id})",
        wrapper.display()
    );
    let status = Command::new(&cargo)
        .args(args)
        .env("RUSTC_WRAPPER", &wrapper)
        .env(names::ENV_BUILD_ID, &id)
        .env("RUSTFLAGS", &rustflags)
        .status()
        .with_context(|| format!("running {}", cargo.display()))?;
    Ok(status.code().unwrap_or(1))
}
