//! Kiln CLI: the command-line driver for the Kiln incremental build cache.
//!
//! Provides `kiln build` to compile a project's `.calc` sources through the
//! incremental cache, `kiln status` to inspect a cache directory, and
//! `kiln clean` to remove one.

#![warn(missing_docs)]

mod build;
mod clean;
mod pipeline;
mod status;

use std::path::PathBuf;
use std::process;

use clap::{Parser, Subcommand, ValueEnum};
use kiln_config::Granularity;
use tracing::Level;

/// Kiln: incremental builds through a dependency-tracked cache.
#[derive(Parser, Debug)]
#[command(name = "kiln", version, about = "Kiln incremental build driver")]
pub struct Cli {
    /// Suppress all output except errors.
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Enable verbose (debug-level) output.
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Path to a custom `kiln.toml` configuration file or its directory.
    #[arg(long, global = true)]
    pub config: Option<String>,

    /// The subcommand to run.
    #[command(subcommand)]
    pub command: Command,
}

/// Available CLI commands.
#[derive(Subcommand, Debug)]
pub enum Command {
    /// Compile the project, reusing cached results where possible.
    Build(BuildArgs),
    /// Summarize the contents of the cache directory.
    Status(StatusArgs),
    /// Delete the cache directory.
    Clean(CleanArgs),
}

/// Arguments for the `kiln build` subcommand.
#[derive(Parser, Debug)]
pub struct BuildArgs {
    /// Cache directory (default: `cache.dir` from `kiln.toml`).
    #[arg(long)]
    pub cache_dir: Option<PathBuf>,

    /// Ignore the previous cache and recompute everything.
    #[arg(long)]
    pub no_incremental: bool,

    /// Input granularity: `file` or `item`.
    #[arg(long)]
    pub granularity: Option<Granularity>,

    /// Write the linked program to this file instead of standard output.
    #[arg(short, long)]
    pub output: Option<PathBuf>,

    /// Number of worker threads (0 = one per core).
    #[arg(short, long)]
    pub jobs: Option<usize>,
}

/// Arguments for the `kiln status` subcommand.
#[derive(Parser, Debug)]
pub struct StatusArgs {
    /// Cache directory (default: `cache.dir` from `kiln.toml`).
    #[arg(long)]
    pub cache_dir: Option<PathBuf>,

    /// Output format.
    #[arg(short, long, value_enum, default_value_t = ReportFormat::Text)]
    pub format: ReportFormat,
}

/// Arguments for the `kiln clean` subcommand.
#[derive(Parser, Debug)]
pub struct CleanArgs {
    /// Cache directory (default: `cache.dir` from `kiln.toml`).
    #[arg(long)]
    pub cache_dir: Option<PathBuf>,
}

/// Report output format.
#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum ReportFormat {
    /// Human-readable terminal output.
    Text,
    /// Machine-readable JSON output.
    Json,
}

/// Global settings derived from CLI flags.
pub struct GlobalArgs {
    /// Whether to suppress non-error output.
    pub quiet: bool,
    /// Whether to print verbose/debug information.
    pub verbose: bool,
    /// Optional path to a custom config file.
    pub config: Option<String>,
}

impl GlobalArgs {
    /// Maximum log level for these flags. `--quiet` wins over `--verbose`.
    pub fn log_level(&self) -> Level {
        if self.quiet {
            Level::ERROR
        } else if self.verbose {
            Level::DEBUG
        } else {
            Level::WARN
        }
    }
}

fn main() {
    let cli = Cli::parse();

    let global = GlobalArgs {
        quiet: cli.quiet,
        verbose: cli.verbose,
        config: cli.config,
    };

    let _ = tracing_subscriber::fmt()
        .with_max_level(global.log_level())
        .with_writer(std::io::stderr)
        .with_target(false)
        .try_init();

    let result = match cli.command {
        Command::Build(ref args) => build::run(args, &global),
        Command::Status(ref args) => status::run(args, &global),
        Command::Clean(ref args) => clean::run(args, &global),
    };

    match result {
        Ok(code) => process::exit(code),
        Err(e) => {
            eprintln!("error: {e}");
            process::exit(1);
        }
    }
}
