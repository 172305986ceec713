//! Persistent result cache.
//!
//! Maps node ids to their last computed value. The in-memory index names
//! the artifact holding each value; values written during the current
//! session stay in memory until [`ResultCache::flush`] writes them out.
//! After invalidation every indexed entry is certified valid, so `get` is
//! a plain lookup.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::path::Path;

use kiln_common::{Fingerprint, NodeId};
use serde::{Deserialize, Serialize};

use crate::artifact::ArtifactStore;
use crate::error::CacheError;
use crate::fingerprints::FingerprintStore;

/// Index record for one cache entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntryRecord {
    /// Fingerprint of the value when it was computed.
    pub fingerprint: Fingerprint,

    /// Key of the artifact holding the value.
    pub artifact: String,
}

/// NodeId → value store backed by the artifact directory.
pub struct ResultCache {
    store: ArtifactStore,
    index: BTreeMap<NodeId, EntryRecord>,
    unflushed: HashMap<NodeId, Vec<u8>>,
}

impl ResultCache {
    /// Creates an empty cache writing artifacts under `cache_dir`.
    pub fn new(cache_dir: &Path, tool_version: &str) -> Self {
        Self::with_index(cache_dir, tool_version, BTreeMap::new())
    }

    /// Creates a cache over a previously persisted index.
    pub fn with_index(
        cache_dir: &Path,
        tool_version: &str,
        index: BTreeMap<NodeId, EntryRecord>,
    ) -> Self {
        Self {
            store: ArtifactStore::new(cache_dir, tool_version),
            index,
            unflushed: HashMap::new(),
        }
    }

    /// Returns the cached value of `node`.
    ///
    /// A missing or corrupt artifact, or one whose content no longer
    /// matches the recorded fingerprint, is a miss.
    pub fn get(&self, node: NodeId) -> Option<Vec<u8>> {
        if let Some(value) = self.unflushed.get(&node) {
            return Some(value.clone());
        }
        let record = self.index.get(&node)?;
        let value = self.store.read(&record.artifact)?;
        (Fingerprint::of(&value) == record.fingerprint).then_some(value)
    }

    /// Stores `value` for `node` and records its fingerprint.
    ///
    /// Returns the fingerprint of `value`.
    pub fn put(
        &mut self,
        node: NodeId,
        value: Vec<u8>,
        fingerprints: &mut FingerprintStore,
    ) -> Fingerprint {
        let fingerprint = Fingerprint::of(&value);
        fingerprints.record(node, fingerprint);
        self.index.insert(
            node,
            EntryRecord {
                fingerprint,
                artifact: fingerprint.to_string(),
            },
        );
        self.unflushed.insert(node, value);
        fingerprint
    }

    /// Drops the entry for `node`, returning whether one existed.
    pub fn remove(&mut self, node: NodeId) -> bool {
        self.unflushed.remove(&node);
        self.index.remove(&node).is_some()
    }

    /// Returns `true` if an entry is indexed for `node`.
    pub fn contains(&self, node: NodeId) -> bool {
        self.index.contains_key(&node)
    }

    /// Returns the index, for persistence.
    pub fn index(&self) -> &BTreeMap<NodeId, EntryRecord> {
        &self.index
    }

    /// Returns the number of entries.
    pub fn len(&self) -> usize {
        self.index.len()
    }

    /// Returns `true` if there are no entries.
    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    /// Writes every value put since the last flush to the artifact store.
    pub fn flush(&mut self) -> Result<usize, CacheError> {
        let mut written = 0;
        for (node, value) in self.unflushed.drain() {
            if let Some(record) = self.index.get(&node) {
                self.store.write(&record.fingerprint, &value)?;
                written += 1;
            }
        }
        Ok(written)
    }

    /// Removes artifacts no entry refers to. Returns the number removed.
    pub fn gc(&self) -> Result<usize, CacheError> {
        let live: BTreeSet<String> = self.index.values().map(|r| r.artifact.clone()).collect();
        self.store.gc(&live)
    }
}
