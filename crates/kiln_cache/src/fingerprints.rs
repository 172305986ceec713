//! Fingerprint store.

use std::collections::BTreeMap;

use kiln_common::{Fingerprint, NodeId};

/// Last known content fingerprint of every input and cached value.
///
/// Input fingerprints are refreshed at session start; derived fingerprints
/// are recorded by [`ResultCache::put`](crate::result_cache::ResultCache::put).
#[derive(Debug, Clone, Default)]
pub struct FingerprintStore {
    entries: BTreeMap<NodeId, Fingerprint>,
}

impl FingerprintStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the recorded fingerprint of `node`.
    pub fn fingerprint_of(&self, node: NodeId) -> Option<Fingerprint> {
        self.entries.get(&node).copied()
    }

    /// Records `fingerprint` for `node`, returning the previous one.
    pub fn record(&mut self, node: NodeId, fingerprint: Fingerprint) -> Option<Fingerprint> {
        self.entries.insert(node, fingerprint)
    }

    /// Forgets `node`.
    pub fn remove(&mut self, node: NodeId) -> Option<Fingerprint> {
        self.entries.remove(&node)
    }

    /// Returns `true` if a fingerprint is recorded for `node`.
    pub fn contains(&self, node: NodeId) -> bool {
        self.entries.contains_key(&node)
    }

    /// Iterates over all records in id order.
    pub fn iter(&self) -> impl Iterator<Item = (NodeId, Fingerprint)> + '_ {
        self.entries.iter().map(|(&n, &f)| (n, f))
    }

    /// Returns the records whose node satisfies `keep`.
    pub fn filtered(&self, keep: impl Fn(NodeId) -> bool) -> BTreeMap<NodeId, Fingerprint> {
        self.iter().filter(|&(n, _)| keep(n)).collect()
    }

    /// Returns the number of records.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns `true` if nothing is recorded.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl FromIterator<(NodeId, Fingerprint)> for FingerprintStore {
    fn from_iter<I: IntoIterator<Item = (NodeId, Fingerprint)>>(iter: I) -> Self {
        Self {
            entries: iter.into_iter().collect(),
        }
    }
}
