//! Error types for the `.calc` pipeline.

use kiln_cache::SessionError;

/// Errors that stop a `.calc` build.
///
/// Problems inside definitions (syntax errors, unknown names, division by
/// zero) are not errors at this level: they are values, cached like any
/// other, and surface in the linked program or in [`crate::Compilation`].
#[derive(Debug, thiserror::Error)]
pub enum CalcError {
    /// A line could not be carved into a definition.
    #[error("{unit}:{line}: {message}")]
    Carve {
        /// Source file.
        unit: String,
        /// 1-based line number.
        line: usize,
        /// What went wrong.
        message: String,
    },

    /// A name is defined more than once.
    #[error("`{name}` is defined more than once ({first} and {second})")]
    DuplicateDefinition {
        /// The defined name.
        name: String,
        /// Location of the first definition.
        first: String,
        /// Location of the second definition.
        second: String,
    },

    /// The incremental session failed.
    #[error(transparent)]
    Session(#[from] SessionError),
}
