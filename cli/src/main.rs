//! hookbuild CLI - compile-time hook instrumentation for Cargo projects.

mod compile;
mod driver;
mod logging;
mod toolexec;

use clap::{Parser, Subcommand};
use log::error;

#[derive(Parser)]
#[command(name = "hookbuild")]
#[command(version, about = "Build a Cargo project with attachable hook instrumentation")]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Build through cargo with the rustc wrapper engaged
    Build {
        /// Arguments forwarded to cargo (e.g. `build --release`)
        #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
        args: Vec<String>,
    },

    /// Per-tool entry invoked by the build driver; not for direct use
    Toolexec {
        /// `[--full] [--verbose] <tool-path> <tool-args...>`
        #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
        args: Vec<String>,
    },
}

fn main() {
    let raw: Vec<String> = std::env::args().collect();

    // cargo invokes a RUSTC_WRAPPER as `<wrapper> <rustc-path> <args...>`
    // with no room for a subcommand; recognize that shape before clap
    // sees it.
    if raw.len() >= 2 && toolexec::is_wrapper_invocation(&raw[1]) {
        let flags = toolexec::env_flags();
        logging::init_toolexec(flags.verbose);
        std::process::exit(toolexec::run(raw[1..].to_vec(), flags));
    }

    let cli = Cli::parse();
    match cli.command {
        Commands::Build { args } => {
            logging::init_stderr(cli.verbose);
            match driver::run_build(&args) {
                Ok(code) => std::process::exit(code),
                Err(e) => {
                    error!("build failed: {e:#}");
                    std::process::exit(1);
                }
            }
        }
        Commands::Toolexec { args } => {
            let (flags, tool_pos) = toolexec::parse_flags(&args);
            if flags.help || tool_pos >= args.len() {
                eprintln!(
                    "usage: hookbuild toolexec [--full] [--verbose] <tool-path> <tool-args...>"
                );
                std::process::exit(2);
            }
            logging::init_toolexec(flags.verbose);
            std::process::exit(toolexec::run(args[tool_pos..].to_vec(), flags));
        }
    }
}
