//! Computation steps.

use std::fmt;

use serde::Serialize;

use crate::codec;
use crate::context::{QueryContext, StepError};
use crate::descriptor::Descriptor;

type ComputeFn = dyn Fn(&mut QueryContext<'_>) -> Result<Vec<u8>, StepError> + Send + Sync;

/// One unit of work in a phase: the node it produces and how to compute it.
///
/// The computation must be pure with respect to what it reads through the
/// context: given the same reads it must produce the same value. Anything
/// it learns from elsewhere is invisible to invalidation.
pub struct Step {
    descriptor: Descriptor,
    compute: Box<ComputeFn>,
}

impl Step {
    /// Creates a step whose value is encoded with [`codec::encode`].
    pub fn new<T, F>(descriptor: Descriptor, compute: F) -> Self
    where
        T: Serialize,
        F: Fn(&mut QueryContext<'_>) -> Result<T, StepError> + Send + Sync + 'static,
    {
        Self {
            descriptor,
            compute: Box::new(move |cx: &mut QueryContext<'_>| {
                let value = compute(cx)?;
                codec::encode(&value).map_err(StepError::Failed)
            }),
        }
    }

    /// Returns the descriptor of the node this step produces.
    pub fn descriptor(&self) -> &Descriptor {
        &self.descriptor
    }

    pub(crate) fn run(&self, cx: &mut QueryContext<'_>) -> Result<Vec<u8>, StepError> {
        (self.compute)(cx)
    }
}

impl fmt::Debug for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Step")
            .field("descriptor", &self.descriptor.to_string())
            .finish_non_exhaustive()
    }
}
