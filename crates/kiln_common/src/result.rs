//! Common result and error types for Kiln.

/// The result type for operations whose only failure mode is a Kiln bug.
pub type KilnResult<T> = Result<T, InternalError>;

/// An internal error indicating a bug in Kiln, not a problem with the
/// caller's input or the on-disk cache.
///
/// Staleness and cache corruption never surface as `InternalError`; they
/// degrade to recomputation instead.
#[derive(Debug, thiserror::Error)]
#[error("internal error: {message}")]
pub struct InternalError {
    /// Description of the internal error.
    pub message: String,
}

impl InternalError {
    /// Creates a new internal error with the given message.
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

impl From<String> for InternalError {
    fn from(message: String) -> Self {
        Self { message }
    }
}
