//! Shared foundational types used across the Kiln incremental cache.
//!
//! This crate provides content fingerprints, opaque node identifiers, and
//! the internal error type shared by every other Kiln crate.

#![warn(missing_docs)]

pub mod fingerprint;
pub mod node_id;
pub mod result;

pub use fingerprint::Fingerprint;
pub use node_id::NodeId;
pub use result::{InternalError, KilnResult};
