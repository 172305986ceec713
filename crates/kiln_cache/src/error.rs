//! Error types for cache, graph and session operations.
//!
//! Errors fall into two families. [`CacheError`] covers problems with the
//! on-disk cache; callers degrade these to recomputation. [`GraphError`] and
//! the fatal variants of [`SessionError`] indicate a broken dependency model
//! and abort the session without persisting anything.

use std::path::PathBuf;

use kiln_common::{InternalError, NodeId};

/// Errors that can occur while reading or writing the on-disk cache.
///
/// Most cache reads are fail-safe: these errors become cache misses or a
/// fresh cache rather than hard failures. Writes propagate them.
#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    /// An I/O error occurred while reading or writing cache files.
    #[error("cache I/O error at {path}: {source}")]
    Io {
        /// The path that caused the error.
        path: PathBuf,
        /// The underlying I/O error.
        source: std::io::Error,
    },

    /// The cache manifest could not be parsed.
    #[error("failed to parse cache manifest: {reason}")]
    ManifestParse {
        /// Description of the parse failure.
        reason: String,
    },

    /// The manifest parsed but describes an inconsistent cache.
    #[error("corrupt cache state: {reason}")]
    Corrupt {
        /// Description of the inconsistency.
        reason: String,
    },

    /// An artifact file has an invalid or missing header.
    #[error("invalid artifact header in {path}: {reason}")]
    InvalidHeader {
        /// The artifact file path.
        path: PathBuf,
        /// Description of the header problem.
        reason: String,
    },

    /// The stored checksum does not match the checksum of the payload.
    #[error("checksum mismatch in {path}: expected {expected}, got {actual}")]
    ChecksumMismatch {
        /// The artifact file path.
        path: PathBuf,
        /// The checksum recorded in the header.
        expected: String,
        /// The checksum computed from the payload.
        actual: String,
    },

    /// The artifact format version does not match the current version.
    #[error("version mismatch in {path}: expected {expected}, got {actual}")]
    VersionMismatch {
        /// The artifact file path.
        path: PathBuf,
        /// The expected format version.
        expected: u32,
        /// The format version found in the file.
        actual: u32,
    },

    /// A serialization or deserialization error occurred.
    #[error("serialization error: {reason}")]
    Serialization {
        /// Description of the serialization failure.
        reason: String,
    },
}

/// Integrity violations of the dependency graph.
#[derive(Debug, thiserror::Error)]
pub enum GraphError {
    /// Adding the edge `from -> to` would close a cycle.
    #[error("dependency cycle: {from} -> {to} closes a cycle")]
    Cycle {
        /// The node whose computation performed the read.
        from: NodeId,
        /// The node that was read.
        to: NodeId,
    },

    /// A topological walk found a cycle passing through `node`.
    #[error("dependency graph contains a cycle through {node}")]
    CycleThrough {
        /// A node on the cycle.
        node: NodeId,
    },

    /// An edge refers to a node the registry does not know.
    #[error("dangling edge {from} -> {to}")]
    DanglingEdge {
        /// Source of the edge.
        from: NodeId,
        /// Target of the edge.
        to: NodeId,
    },
}

/// Errors that abort a session.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    /// The dependency graph lost its integrity.
    #[error(transparent)]
    Graph(#[from] GraphError),

    /// Writing the cache failed.
    #[error(transparent)]
    Cache(#[from] CacheError),

    /// An internal invariant was violated.
    #[error(transparent)]
    Internal(#[from] InternalError),

    /// A node was produced twice in one session.
    #[error("node `{node}` was written twice in one session")]
    DuplicateWrite {
        /// Descriptor of the node.
        node: String,
    },

    /// A step read a node that is neither available nor scheduled.
    #[error("`{node}` read `{dependency}`, which is neither available nor scheduled")]
    MissingDependency {
        /// Descriptor of the reading node.
        node: String,
        /// Descriptor of the missing node.
        dependency: String,
    },

    /// Steps of a phase wait on each other and can never run.
    #[error("dependency cycle between steps: {}", nodes.join(", "))]
    DependencyCycle {
        /// Descriptors of the blocked steps.
        nodes: Vec<String>,
    },

    /// A stored value could not be decoded as the requested type.
    #[error("failed to decode `{node}`: {reason}")]
    Decode {
        /// Descriptor of the node.
        node: String,
        /// Description of the decode failure.
        reason: String,
    },

    /// A step's computation reported a failure.
    #[error("step `{node}` failed: {message}")]
    StepFailed {
        /// Descriptor of the failing step.
        node: String,
        /// Message reported by the computation.
        message: String,
    },

    /// A derived descriptor was supplied as a session input.
    #[error("`{node}` is not an input descriptor")]
    NotAnInput {
        /// Descriptor that was rejected.
        node: String,
    },

    /// A step was declared for an input descriptor.
    #[error("step `{node}` would overwrite an input")]
    InputWrite {
        /// Descriptor of the input.
        node: String,
    },

    /// An earlier phase failed; the session can neither continue nor persist.
    #[error("session aborted by an earlier error; nothing was persisted")]
    Aborted,

    /// The worker pool could not be created.
    #[error("failed to start worker pool: {0}")]
    ThreadPool(String),
}
