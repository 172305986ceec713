//! Opaque identifiers for nodes of the dependency graph.

use serde::{Deserialize, Serialize};
use std::fmt;

/// A stable identifier for an input or derived value.
///
/// A `NodeId` is an index into the node registry. It is `Copy`, totally
/// ordered and cheap to hash, which lets it key graphs, maps and sets
/// directly. Ids are only meaningful together with the registry that issued
/// them; the registry is persisted alongside the cache so the same
/// descriptor keeps the same id from one session to the next.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodeId(u32);

impl NodeId {
    /// Creates a `NodeId` from a raw `u32` index.
    ///
    /// Intended for deserialization and tests. Normal code obtains ids from
    /// the registry's `intern`.
    pub fn from_raw(index: u32) -> Self {
        Self(index)
    }

    /// Returns the raw `u32` index of this identifier.
    pub fn as_raw(self) -> u32 {
        self.0
    }
}

impl fmt::Debug for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "n{}", self.0)
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "n{}", self.0)
    }
}

// SAFETY: `NodeId` wraps a `u32`, which always fits in a `usize` on 32-bit
// and 64-bit platforms. `try_from_usize` rejects values that don't fit.
unsafe impl lasso::Key for NodeId {
    fn into_usize(self) -> usize {
        self.0 as usize
    }

    fn try_from_usize(int: usize) -> Option<Self> {
        u32::try_from(int).ok().map(NodeId)
    }
}
