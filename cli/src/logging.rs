//! Logging setup.
//!
//! The `build` subcommand owns the terminal and logs to stderr. The
//! toolexec path runs underneath cargo, which parses the compiler's
//! stdout, so its logs go to a file in the temp directory instead; the
//! file is held open for the process lifetime and truncated when it has
//! grown stale.

use std::fs::OpenOptions;
use std::path::PathBuf;
use std::time::Duration;

const LOG_FILE: &str = "hookbuild_toolexec.log";
const MAX_LOG_AGE: Duration = Duration::from_secs(3 * 24 * 60 * 60);

pub fn init_stderr(verbose: bool) {
    let level = if verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level)).init();
}

pub fn init_toolexec(verbose: bool) {
    let level = if verbose { "debug" } else { "info" };
    let mut builder =
        env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level));
    let path = log_path();
    truncate_if_stale(&path);
    match OpenOptions::new().create(true).append(true).open(&path) {
        Ok(file) => {
            builder.target(env_logger::Target::Pipe(Box::new(file)));
        }
        Err(_) => {
            // Fall back to stderr; cargo shows wrapper stderr on failure.
        }
    }
    let _ = builder.try_init();
}

fn log_path() -> PathBuf {
    std::env::temp_dir().join(LOG_FILE)
}

/// Drop accumulated logs once they are older than a few days.
fn truncate_if_stale(path: &PathBuf) {
    let Ok(meta) = std::fs::metadata(path) else {
        return;
    };
    let stale = meta
        .modified()
        .ok()
        .and_then(|t| t.elapsed().ok())
        .is_some_and(|age| age > MAX_LOG_AGE);
    if stale {
        let _ = OpenOptions::new().write(true).truncate(true).open(path);
    }
}
