//! Shared helpers for CLI commands.
//!
//! Project root resolution, cache directory resolution and `.calc` source
//! discovery.

use std::collections::BTreeSet;
use std::path::{Component, Path, PathBuf};

use kiln_calc::SourceFile;
use kiln_config::CONFIG_FILE;

use crate::GlobalArgs;

/// Extension of source files picked up by discovery.
pub const SOURCE_EXTENSION: &str = "calc";

/// Walks up from `start` looking for the nearest directory containing `kiln.toml`.
pub fn find_project_root(start: &Path) -> Result<PathBuf, Box<dyn std::error::Error>> {
    let mut current = start.to_path_buf();
    loop {
        if current.join(CONFIG_FILE).exists() {
            return Ok(current);
        }
        if !current.pop() {
            return Err(format!(
                "could not find {CONFIG_FILE} in {} or any parent directory",
                start.display()
            )
            .into());
        }
    }
}

/// Resolves the project root directory from global CLI args.
///
/// If `--config` is specified, uses that path (file → parent dir, dir → itself).
/// Otherwise walks up from the current directory looking for `kiln.toml`.
pub fn resolve_project_root(global: &GlobalArgs) -> Result<PathBuf, Box<dyn std::error::Error>> {
    if let Some(ref config_path) = global.config {
        let p = PathBuf::from(config_path);
        if p.is_file() {
            Ok(p.parent()
                .map(|p| p.to_path_buf())
                .unwrap_or_else(|| PathBuf::from(".")))
        } else {
            Ok(p)
        }
    } else {
        find_project_root(&std::env::current_dir()?)
    }
}

/// Resolves the cache directory for `status` and `clean`.
///
/// An explicit `--cache-dir` is used as given; otherwise the project's
/// `cache.dir` is resolved against the project root.
pub fn resolve_cache_dir(
    explicit: Option<&Path>,
    global: &GlobalArgs,
) -> Result<PathBuf, Box<dyn std::error::Error>> {
    if let Some(dir) = explicit {
        return Ok(dir.to_path_buf());
    }
    let project_dir = resolve_project_root(global)?;
    let config = kiln_config::load_config(&project_dir)?;
    Ok(project_dir.join(&config.cache.dir))
}

/// Discovers `.calc` files under each entry of `sources` (recursive).
///
/// Entries may be directories or single files, relative to `project_dir`.
/// Returned paths are relative to `project_dir` and `/`-separated, so the
/// same project produces the same inputs wherever it is checked out.
pub fn discover_sources(
    project_dir: &Path,
    sources: &[String],
) -> Result<Vec<SourceFile>, Box<dyn std::error::Error>> {
    let mut files = BTreeSet::new();
    for entry in sources {
        let path = project_dir.join(entry);
        if path.is_dir() {
            walk_dir(&path, &mut files)?;
        } else if path.is_file() {
            files.insert(path);
        } else {
            return Err(format!("source path {} does not exist", path.display()).into());
        }
    }

    let mut out = Vec::with_capacity(files.len());
    for path in files {
        let text = std::fs::read_to_string(&path)
            .map_err(|e| format!("failed to read {}: {e}", path.display()))?;
        out.push(SourceFile::new(relative_key(project_dir, &path), text));
    }
    Ok(out)
}

fn walk_dir(
    dir: &Path,
    files: &mut BTreeSet<PathBuf>,
) -> Result<(), Box<dyn std::error::Error>> {
    for entry in std::fs::read_dir(dir)? {
        let path = entry?.path();
        if path.is_dir() {
            walk_dir(&path, files)?;
        } else if path.extension().and_then(|e| e.to_str()) == Some(SOURCE_EXTENSION) {
            files.insert(path);
        }
    }
    Ok(())
}

/// Renders `path` relative to `root` with `/` separators.
pub fn relative_key(root: &Path, path: &Path) -> String {
    let relative = path.strip_prefix(root).unwrap_or(path);
    relative
        .components()
        .filter_map(|c| match c {
            Component::Normal(part) => Some(part.to_string_lossy().into_owned()),
            _ => None,
        })
        .collect::<Vec<_>>()
        .join("/")
}
