//! Dependency-tracked incremental computation cache.
//!
//! A compilation is a sequence of phases, each a set of [`Step`]s producing
//! values named by [`Descriptor`]s. Every read a step performs through its
//! [`QueryContext`] becomes a dependency edge. Between sessions the cache
//! keeps each value together with what it read; when inputs change, exactly
//! the values that transitively depend on them are discarded and everything
//! else is reused.
//!
//! [`Session`] drives one run. Lower-level pieces (registry, graph,
//! fingerprints, result cache, manifest) are exposed for inspection tools.

#![warn(missing_docs)]

pub mod artifact;
pub mod changes;
pub mod codec;
pub mod context;
pub mod descriptor;
pub mod error;
pub mod fingerprints;
pub mod graph;
pub mod invalidate;
pub mod manifest;
pub mod registry;
pub mod result_cache;
pub mod session;
pub mod step;

pub use changes::ChangeSet;
pub use context::{QueryContext, StepError};
pub use descriptor::{Descriptor, NodeKind};
pub use error::{CacheError, GraphError, SessionError};
pub use fingerprints::FingerprintStore;
pub use graph::DependencyGraph;
pub use invalidate::invalidate;
pub use manifest::{CacheManifest, CacheState, CacheSummary};
pub use registry::NodeRegistry;
pub use result_cache::{EntryRecord, ResultCache};
pub use session::{InputSet, PhaseReport, Session, SessionOptions, SessionReport, TOOL_VERSION};
pub use step::Step;
