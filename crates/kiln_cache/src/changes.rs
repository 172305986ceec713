//! Input change detection.
//!
//! Compares the fingerprints of the inputs supplied to this session against
//! the input fingerprints recorded by the previous one, and sorts every
//! input into new, modified, deleted or unchanged.

use std::collections::{BTreeMap, BTreeSet};

use kiln_common::{Fingerprint, NodeId};

/// Result of comparing current input fingerprints against the previous session.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChangeSet {
    /// Inputs with no recorded fingerprint.
    pub new_inputs: Vec<NodeId>,

    /// Inputs whose fingerprint differs from the recorded one.
    pub modified_inputs: Vec<NodeId>,

    /// Inputs recorded previously but not supplied now.
    pub deleted_inputs: Vec<NodeId>,

    /// Inputs whose fingerprint matches the recorded one.
    pub unchanged_inputs: Vec<NodeId>,
}

impl ChangeSet {
    /// Compares `current` input fingerprints against `previous` ones.
    pub fn detect(
        current: &BTreeMap<NodeId, Fingerprint>,
        previous: &BTreeMap<NodeId, Fingerprint>,
    ) -> Self {
        let mut changes = ChangeSet::default();
        for (&node, fingerprint) in current {
            match previous.get(&node) {
                Some(old) if old == fingerprint => changes.unchanged_inputs.push(node),
                Some(_) => changes.modified_inputs.push(node),
                None => changes.new_inputs.push(node),
            }
        }
        changes.deleted_inputs = previous
            .keys()
            .filter(|node| !current.contains_key(node))
            .copied()
            .collect();
        changes
    }

    /// Returns `true` if no input was added, modified or deleted.
    pub fn is_empty(&self) -> bool {
        self.new_inputs.is_empty() && self.modified_inputs.is_empty() && self.deleted_inputs.is_empty()
    }

    /// Returns every input whose content differs from the previous session.
    ///
    /// New inputs are included: a node may have read an input while it was
    /// still absent, and that read must be invalidated once it appears.
    pub fn changed(&self) -> BTreeSet<NodeId> {
        self.new_inputs
            .iter()
            .chain(&self.modified_inputs)
            .chain(&self.deleted_inputs)
            .copied()
            .collect()
    }
}
