//! The invalidation engine.
//!
//! Given the inputs that changed since the previous session, removes every
//! cache entry whose transitive dependencies include one of them. Nodes are
//! visited dependencies-first so a node is only declared valid after all of
//! its dependencies have been.

use std::collections::BTreeSet;

use kiln_common::NodeId;

use crate::error::GraphError;
use crate::fingerprints::FingerprintStore;
use crate::graph::DependencyGraph;
use crate::result_cache::ResultCache;

/// Removes every node that transitively depends on a node in `changed`.
///
/// Removed nodes lose their cache entry, their fingerprint and their place
/// in the graph. The changed nodes themselves are inputs and are left for
/// the caller to refresh. Returns the removed nodes.
///
/// A cycle in `graph` is an integrity violation and aborts without
/// modifying anything.
pub fn invalidate(
    changed: &BTreeSet<NodeId>,
    graph: &mut DependencyGraph,
    fingerprints: &mut FingerprintStore,
    cache: &mut ResultCache,
) -> Result<BTreeSet<NodeId>, GraphError> {
    let order = graph.dependency_order()?;
    if changed.is_empty() {
        return Ok(BTreeSet::new());
    }

    let mut invalid: BTreeSet<NodeId> = BTreeSet::new();
    for &node in &order {
        let stale = changed.contains(&node)
            || graph
                .dependencies_of(node)
                .iter()
                .any(|dep| invalid.contains(dep));
        if stale {
            invalid.insert(node);
        }
    }

    let removed: BTreeSet<NodeId> = invalid.difference(changed).copied().collect();
    for &node in &removed {
        cache.remove(node);
        fingerprints.remove(node);
        graph.remove_node(node);
    }

    tracing::debug!(
        "invalidation: {} changed input(s), {} node(s) visited, {} removed",
        changed.len(),
        order.len(),
        removed.len()
    );
    Ok(removed)
}
