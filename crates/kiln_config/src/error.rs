//! Error types for configuration loading and validation.

use std::path::PathBuf;

/// Errors that can occur when loading or validating a `kiln.toml` configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// The configuration file could not be read.
    #[error("failed to read {path}: {source}")]
    Read {
        /// Path of the configuration file.
        path: PathBuf,
        /// The underlying I/O error.
        source: std::io::Error,
    },

    /// The file is not valid TOML or does not match the expected layout.
    #[error("failed to parse kiln.toml: {0}")]
    ParseError(String),

    /// A required field is missing or empty.
    #[error("missing required field `{0}`")]
    MissingField(String),

    /// A value is present but unusable.
    #[error("invalid configuration: {0}")]
    ValidationError(String),
}
