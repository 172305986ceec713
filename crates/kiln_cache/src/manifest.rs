//! The persisted cache manifest.
//!
//! `manifest.json` holds everything except the values themselves: the node
//! registry in id order, the dependency edge list, the fingerprint store and
//! the result cache index. It is written to a temporary file and renamed
//! into place, so a reader sees either the previous session's complete state
//! or the new one, never a mix.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use kiln_common::{Fingerprint, NodeId};
use serde::{Deserialize, Serialize};

use crate::descriptor::NodeKind;
use crate::error::CacheError;
use crate::fingerprints::FingerprintStore;
use crate::graph::DependencyGraph;
use crate::registry::NodeRegistry;
use crate::result_cache::{EntryRecord, ResultCache};

/// Name of the manifest file within the cache directory.
pub const MANIFEST_FILE: &str = "manifest.json";

/// Current manifest layout version.
const MANIFEST_FORMAT_VERSION: u32 = 1;

/// Serialized form of a session's cache state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheManifest {
    /// Layout version of this file.
    pub format_version: u32,

    /// Version of the tool that wrote the cache. Invalidate on change.
    pub tool_version: String,

    /// Canonical descriptors, indexed by node id.
    pub nodes: Vec<String>,

    /// Dependency edges `(reader, read)`.
    pub edges: Vec<(NodeId, NodeId)>,

    /// Fingerprints of inputs and cached values.
    pub fingerprints: BTreeMap<NodeId, Fingerprint>,

    /// Result cache index.
    pub entries: BTreeMap<NodeId, EntryRecord>,
}

/// The live state a session owns: registry, graph, fingerprints and cache.
pub struct CacheState {
    /// Node identity registry.
    pub registry: NodeRegistry,
    /// Dependency graph.
    pub graph: DependencyGraph,
    /// Fingerprint store.
    pub fingerprints: FingerprintStore,
    /// Result cache.
    pub cache: ResultCache,
}

impl CacheState {
    /// Creates an empty state writing into `cache_dir`.
    pub fn fresh(cache_dir: &Path, tool_version: &str) -> Self {
        Self {
            registry: NodeRegistry::new(),
            graph: DependencyGraph::new(),
            fingerprints: FingerprintStore::new(),
            cache: ResultCache::new(cache_dir, tool_version),
        }
    }
}

/// Counts describing a persisted cache, for `kiln status`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CacheSummary {
    /// Tool version that wrote the cache.
    pub tool_version: String,
    /// Registered descriptors.
    pub nodes: usize,
    /// Inputs with a recorded fingerprint.
    pub inputs: usize,
    /// Dependency edges.
    pub edges: usize,
    /// Cached values.
    pub entries: usize,
}

impl CacheManifest {
    /// Creates an empty manifest for `tool_version`.
    pub fn new(tool_version: &str) -> Self {
        Self {
            format_version: MANIFEST_FORMAT_VERSION,
            tool_version: tool_version.to_string(),
            nodes: Vec::new(),
            edges: Vec::new(),
            fingerprints: BTreeMap::new(),
            entries: BTreeMap::new(),
        }
    }

    /// Returns the manifest path inside `cache_dir`.
    pub fn path(cache_dir: &Path) -> PathBuf {
        cache_dir.join(MANIFEST_FILE)
    }

    /// Loads the manifest, returning `None` if it is absent or unparsable.
    ///
    /// This is fail-safe: `None` leads to a fresh cache and a full
    /// recomputation.
    pub fn load(cache_dir: &Path) -> Option<Self> {
        let content = std::fs::read_to_string(Self::path(cache_dir)).ok()?;
        match serde_json::from_str(&content) {
            Ok(manifest) => Some(manifest),
            Err(e) => {
                tracing::warn!("ignoring unreadable cache manifest: {e}");
                None
            }
        }
    }

    /// Writes the manifest atomically, creating `cache_dir` if needed.
    pub fn save(&self, cache_dir: &Path) -> Result<(), CacheError> {
        std::fs::create_dir_all(cache_dir).map_err(|e| CacheError::Io {
            path: cache_dir.to_path_buf(),
            source: e,
        })?;
        let json = serde_json::to_string_pretty(self).map_err(|e| CacheError::Serialization {
            reason: e.to_string(),
        })?;
        let path = Self::path(cache_dir);
        let tmp = path.with_extension("json.tmp");
        std::fs::write(&tmp, json).map_err(|e| CacheError::Io {
            path: tmp.clone(),
            source: e,
        })?;
        std::fs::rename(&tmp, &path).map_err(|e| CacheError::Io { path, source: e })
    }

    /// Returns `true` if this manifest can be reused by `tool_version`.
    pub fn is_compatible(&self, tool_version: &str) -> bool {
        self.format_version == MANIFEST_FORMAT_VERSION && self.tool_version == tool_version
    }

    /// Snapshots `state` for persistence.
    pub fn capture(tool_version: &str, state: &CacheState) -> Self {
        Self {
            format_version: MANIFEST_FORMAT_VERSION,
            tool_version: tool_version.to_string(),
            nodes: state.registry.descriptors(),
            edges: state.graph.edges(),
            fingerprints: state.fingerprints.iter().collect(),
            entries: state.cache.index().clone(),
        }
    }

    /// Rebuilds live state from this manifest.
    ///
    /// Every id mentioned anywhere must be registered and the edge list
    /// must be acyclic; otherwise the cache is reported corrupt.
    pub fn restore(self, cache_dir: &Path) -> Result<CacheState, CacheError> {
        let registry = NodeRegistry::from_descriptors(&self.nodes)?;
        let corrupt = |reason: String| CacheError::Corrupt { reason };

        let unknown = self
            .fingerprints
            .keys()
            .chain(self.entries.keys())
            .chain(self.edges.iter().flat_map(|(a, b)| [a, b]))
            .find(|id| !registry.contains_id(**id));
        if let Some(id) = unknown {
            return Err(corrupt(format!("{id} is not registered")));
        }

        let graph = DependencyGraph::from_edges(
            self.entries.keys().chain(self.fingerprints.keys()).copied(),
            &self.edges,
        )
        .map_err(|e| corrupt(e.to_string()))?;

        let fingerprints: FingerprintStore = self.fingerprints.into_iter().collect();
        let cache = ResultCache::with_index(cache_dir, &self.tool_version, self.entries);

        Ok(CacheState {
            registry,
            graph,
            fingerprints,
            cache,
        })
    }

    /// Summarizes this manifest.
    pub fn summary(&self) -> CacheSummary {
        let inputs = self
            .fingerprints
            .keys()
            .filter(|id| {
                self.nodes
                    .get(id.as_raw() as usize)
                    .is_some_and(|d| d.starts_with("input:"))
            })
            .count();
        CacheSummary {
            tool_version: self.tool_version.clone(),
            nodes: self.nodes.len(),
            inputs,
            edges: self.edges.len(),
            entries: self.entries.len(),
        }
    }
}

/// Returns the kind of every node in `manifest`'s registry, for diagnostics.
pub fn node_kinds(manifest: &CacheManifest) -> BTreeMap<NodeKind, usize> {
    let mut counts = BTreeMap::new();
    for text in &manifest.nodes {
        let kind = if text.starts_with("input:") {
            NodeKind::Input
        } else {
            NodeKind::Derived
        };
        *counts.entry(kind).or_insert(0) += 1;
    }
    counts
}
