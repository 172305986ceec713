//! `kiln clean`: delete a cache directory.

use std::path::Path;

use kiln_cache::artifact::VALUES_SUBDIR;
use kiln_cache::manifest::MANIFEST_FILE;

use crate::pipeline::resolve_cache_dir;
use crate::{CleanArgs, GlobalArgs};

/// Runs the `kiln clean` command.
///
/// Refuses to delete a non-empty directory that does not look like a cache.
pub fn run(args: &CleanArgs, global: &GlobalArgs) -> Result<i32, Box<dyn std::error::Error>> {
    let cache_dir = resolve_cache_dir(args.cache_dir.as_deref(), global)?;
    if !cache_dir.exists() {
        if !global.quiet {
            eprintln!("    Nothing to clean in {}", cache_dir.display());
        }
        return Ok(0);
    }
    if !looks_like_cache(&cache_dir)? {
        eprintln!(
            "error: refusing to remove {}: it does not look like a kiln cache",
            cache_dir.display()
        );
        return Ok(1);
    }
    std::fs::remove_dir_all(&cache_dir)?;
    tracing::debug!("removed {}", cache_dir.display());
    if !global.quiet {
        eprintln!("    Removed {}", cache_dir.display());
    }
    Ok(0)
}

/// Returns `true` if `dir` holds only cache files, or nothing at all.
fn looks_like_cache(dir: &Path) -> std::io::Result<bool> {
    for entry in std::fs::read_dir(dir)? {
        let name = entry?.file_name();
        let name = name.to_string_lossy();
        let known = name == MANIFEST_FILE
            || name == VALUES_SUBDIR
            || (name.starts_with(MANIFEST_FILE) && name.ends_with(".tmp"));
        if !known {
            return Ok(false);
        }
    }
    Ok(true)
}
