//! Tracked access to other nodes during a computation.
//!
//! Every read a step performs goes through [`QueryContext`], which appends
//! the node read to the step's dependency set. Steps never record edges by
//! hand, so the recorded dependencies are exactly the reads that happened.

use std::collections::{BTreeSet, HashMap, HashSet};

use kiln_common::NodeId;
use serde::de::DeserializeOwned;

use crate::codec;
use crate::descriptor::{Descriptor, NodeKind};
use crate::registry::NodeRegistry;

/// Why a step could not produce its value.
#[derive(Debug, thiserror::Error)]
pub enum StepError {
    /// The node read is scheduled in this phase but not produced yet.
    ///
    /// The step is retried in a later wave.
    #[error("{0} is not available yet")]
    NotReady(NodeId),

    /// The node read is neither available nor scheduled.
    #[error("{0} is not available")]
    Missing(NodeId),

    /// The node read does not hold a value of the requested type.
    #[error("failed to decode {node}: {reason}")]
    Decode {
        /// The node read.
        node: NodeId,
        /// Description of the decode failure.
        reason: String,
    },

    /// The computation itself failed.
    #[error("{0}")]
    Failed(String),
}

impl StepError {
    /// Creates a [`StepError::Failed`] with `message`.
    pub fn failed(message: impl Into<String>) -> Self {
        StepError::Failed(message.into())
    }
}

/// Read access to inputs and already-produced values, recording each read.
pub struct QueryContext<'a> {
    registry: &'a NodeRegistry,
    values: &'a HashMap<NodeId, Vec<u8>>,
    scheduled: &'a HashSet<NodeId>,
    node: NodeId,
    reads: BTreeSet<NodeId>,
}

impl<'a> QueryContext<'a> {
    pub(crate) fn new(
        registry: &'a NodeRegistry,
        values: &'a HashMap<NodeId, Vec<u8>>,
        scheduled: &'a HashSet<NodeId>,
        node: NodeId,
    ) -> Self {
        Self {
            registry,
            values,
            scheduled,
            node,
            reads: BTreeSet::new(),
        }
    }

    /// Returns the id of the node being computed.
    pub fn node(&self) -> NodeId {
        self.node
    }

    /// Reads the raw bytes of `descriptor`.
    pub fn read_bytes(&mut self, descriptor: &Descriptor) -> Result<&'a [u8], StepError> {
        let id = self.registry.intern(descriptor);
        let values = self.values;
        match values.get(&id) {
            Some(value) => {
                self.reads.insert(id);
                Ok(value.as_slice())
            }
            None if self.scheduled.contains(&id) => Err(StepError::NotReady(id)),
            None => Err(StepError::Missing(id)),
        }
    }

    /// Reads an input as UTF-8 text.
    pub fn read_text(&mut self, descriptor: &Descriptor) -> Result<&'a str, StepError> {
        let bytes = self.read_bytes(descriptor)?;
        std::str::from_utf8(bytes).map_err(|e| StepError::Decode {
            node: self.registry.intern(descriptor),
            reason: e.to_string(),
        })
    }

    /// Reads and decodes a derived value.
    pub fn read<T: DeserializeOwned>(&mut self, descriptor: &Descriptor) -> Result<T, StepError> {
        let bytes = self.read_bytes(descriptor)?;
        codec::decode(bytes).map_err(|reason| StepError::Decode {
            node: self.registry.intern(descriptor),
            reason,
        })
    }

    /// Reports whether an input is present in this session.
    ///
    /// The read is recorded either way, so a node that observed an input's
    /// absence is invalidated once the input appears.
    pub fn probe_input(&mut self, descriptor: &Descriptor) -> Result<bool, StepError> {
        if descriptor.kind() != NodeKind::Input {
            return Err(StepError::failed(format!(
                "`{descriptor}` is not an input and cannot be probed"
            )));
        }
        let id = self.registry.intern(descriptor);
        self.reads.insert(id);
        Ok(self.values.contains_key(&id))
    }

    pub(crate) fn into_reads(self) -> BTreeSet<NodeId> {
        self.reads
    }
}
