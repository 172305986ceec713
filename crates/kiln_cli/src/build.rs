//! `kiln build`: compile the project through the incremental cache.
//!
//! 1. Find the project root and load `kiln.toml`
//! 2. Merge command-line overrides into the configured build settings
//! 3. Discover `.calc` sources
//! 4. Run the parse, analyze, codegen and link phases as one session
//! 5. Write the linked program and report what the cache did

use std::path::{Path, PathBuf};

use kiln_cache::SessionOptions;
use kiln_calc::compile;
use kiln_config::{Granularity, ProjectConfig};

use crate::pipeline::{discover_sources, resolve_project_root};
use crate::{BuildArgs, GlobalArgs};

/// Effective settings for one build, after command-line overrides.
#[derive(Debug, PartialEq, Eq)]
pub struct BuildSettings {
    /// Absolute or project-relative cache directory.
    pub cache_dir: PathBuf,
    /// Reuse the previous cache.
    pub incremental: bool,
    /// Prune nodes the build no longer reaches.
    pub prune_unvisited: bool,
    /// Input granularity.
    pub granularity: Granularity,
    /// Output file, or `None` for standard output.
    pub output: Option<PathBuf>,
    /// Worker threads.
    pub jobs: usize,
}

impl BuildSettings {
    /// Merges `args` over `config`. Relative paths from the config file are
    /// resolved against `project_dir`; paths given on the command line are
    /// used as given.
    pub fn resolve(config: &ProjectConfig, args: &BuildArgs, project_dir: &Path) -> Self {
        Self {
            cache_dir: args
                .cache_dir
                .clone()
                .unwrap_or_else(|| project_dir.join(&config.cache.dir)),
            incremental: config.cache.incremental && !args.no_incremental,
            prune_unvisited: config.cache.prune_unvisited,
            granularity: args.granularity.unwrap_or(config.build.granularity),
            output: args
                .output
                .clone()
                .or_else(|| config.build.output.as_ref().map(|p| project_dir.join(p))),
            jobs: args.jobs.unwrap_or(config.build.jobs),
        }
    }

    fn session_options(&self) -> SessionOptions {
        SessionOptions::new(&self.cache_dir)
            .incremental(self.incremental)
            .prune_unvisited(self.prune_unvisited)
            .jobs(self.jobs)
    }
}

/// Runs the `kiln build` command.
///
/// Returns exit code 0 on success and 1 if any source has a syntax error.
/// The cache is updated either way.
pub fn run(args: &BuildArgs, global: &GlobalArgs) -> Result<i32, Box<dyn std::error::Error>> {
    let project_dir = resolve_project_root(global)?;
    let config = kiln_config::load_config(&project_dir)?;
    let settings = BuildSettings::resolve(&config, args, &project_dir);

    if !global.quiet {
        eprintln!(
            "   Building {} v{} ({} granularity, {})",
            config.project.name,
            config.project.version,
            settings.granularity,
            if settings.incremental {
                "incremental"
            } else {
                "batch"
            }
        );
    }

    let sources = discover_sources(&project_dir, &config.project.sources)?;
    if sources.is_empty() {
        eprintln!(
            "error: no .calc source files found in {}",
            config.project.sources.join(", ")
        );
        return Ok(1);
    }

    let compilation = compile(&sources, settings.granularity, settings.session_options())?;

    match &settings.output {
        Some(path) => {
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)?;
            }
            std::fs::write(path, &compilation.program)?;
        }
        None => print!("{}", compilation.program),
    }

    for error in &compilation.syntax_errors {
        eprintln!("error: {error}");
    }

    if !global.quiet {
        let report = &compilation.report;
        eprintln!(
            "     Inputs {} new, {} modified, {} deleted, {} unchanged",
            report.new_inputs, report.modified_inputs, report.deleted_inputs, report.unchanged_inputs
        );
        eprintln!(
            "   Finished {} reused, {} computed, {} invalidated, {} pruned",
            report.reused(),
            report.computed(),
            report.invalidated,
            report.pruned
        );
        if let Some(path) = &settings.output {
            eprintln!("      Wrote {}", path.display());
        }
    }

    Ok(if compilation.syntax_errors.is_empty() { 0 } else { 1 })
}
