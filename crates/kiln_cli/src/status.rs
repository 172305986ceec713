//! `kiln status`: summarize a cache directory.

use std::path::Path;

use kiln_cache::artifact::{VALUES_SUBDIR, VALUE_EXT};
use kiln_cache::manifest::node_kinds;
use kiln_cache::{CacheManifest, NodeKind, TOOL_VERSION};
use serde_json::json;

use crate::pipeline::resolve_cache_dir;
use crate::{GlobalArgs, ReportFormat, StatusArgs};

/// Runs the `kiln status` command. A missing cache is not an error.
pub fn run(args: &StatusArgs, global: &GlobalArgs) -> Result<i32, Box<dyn std::error::Error>> {
    let cache_dir = resolve_cache_dir(args.cache_dir.as_deref(), global)?;
    let text = match args.format {
        ReportFormat::Text => render_text(&cache_dir),
        ReportFormat::Json => serde_json::to_string_pretty(&render_json(&cache_dir))?,
    };
    println!("{text}");
    Ok(0)
}

/// Artifact file count and total size under `cache_dir`.
fn artifact_usage(cache_dir: &Path) -> (usize, u64) {
    let Ok(entries) = std::fs::read_dir(cache_dir.join(VALUES_SUBDIR)) else {
        return (0, 0);
    };
    entries
        .filter_map(Result::ok)
        .filter(|e| e.path().extension().and_then(|x| x.to_str()) == Some(VALUE_EXT))
        .fold((0, 0), |(count, bytes), e| {
            (count + 1, bytes + e.metadata().map(|m| m.len()).unwrap_or(0))
        })
}

fn state_of(manifest: &CacheManifest, cache_dir: &Path) -> String {
    if !manifest.is_compatible(TOOL_VERSION) {
        return format!(
            "stale (written by version {}; the next build starts fresh)",
            manifest.tool_version
        );
    }
    match manifest.clone().restore(cache_dir) {
        Ok(_) => "ok".to_string(),
        Err(e) => format!("corrupt ({e}); the next build starts fresh"),
    }
}

fn render_text(cache_dir: &Path) -> String {
    let Some(manifest) = CacheManifest::load(cache_dir) else {
        return format!("no cache in {}", cache_dir.display());
    };
    let summary = manifest.summary();
    let kinds = node_kinds(&manifest);
    let (files, bytes) = artifact_usage(cache_dir);
    [
        format!("cache      {}", cache_dir.display()),
        format!("state      {}", state_of(&manifest, cache_dir)),
        format!("version    {}", summary.tool_version),
        format!(
            "registry   {} node(s): {} input, {} derived",
            summary.nodes,
            kinds.get(&NodeKind::Input).copied().unwrap_or(0),
            kinds.get(&NodeKind::Derived).copied().unwrap_or(0)
        ),
        format!("inputs     {}", summary.inputs),
        format!("entries    {}", summary.entries),
        format!("edges      {}", summary.edges),
        format!("artifacts  {files} file(s), {bytes} byte(s)"),
    ]
    .join("\n")
}

fn render_json(cache_dir: &Path) -> serde_json::Value {
    let Some(manifest) = CacheManifest::load(cache_dir) else {
        return json!({ "cache_dir": cache_dir.display().to_string(), "present": false });
    };
    let (files, bytes) = artifact_usage(cache_dir);
    json!({
        "cache_dir": cache_dir.display().to_string(),
        "present": true,
        "state": state_of(&manifest, cache_dir),
        "summary": manifest.summary(),
        "artifacts": { "files": files, "bytes": bytes },
    })
}
