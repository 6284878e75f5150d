//! Execution-context error types.

use std::path::PathBuf;

use thiserror::Error;

/// Errors from execution-context operations.
#[derive(Debug, Error)]
pub enum ContextError {
    /// The context file exists but could not be parsed.
    #[error("invalid execution context file {}: {source}", path.display())]
    ParseError {
        /// Path to the offending file.
        path: PathBuf,
        /// The TOML parse failure.
        #[source]
        source: toml::de::Error,
    },

    /// The context file could not be read.
    #[error("cannot read execution context file {}: {source}", path.display())]
    ReadError {
        /// Path to the offending file.
        path: PathBuf,
        /// The underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// The in-memory store could not be serialized.
    #[error("cannot serialize execution contexts for {}: {source}", path.display())]
    SerializeError {
        /// Path the store was being saved to.
        path: PathBuf,
        /// The TOML encode failure.
        #[source]
        source: toml::ser::Error,
    },

    /// An upsert was attempted with an empty server name.
    #[error("server name must not be empty")]
    EmptyName,

    /// Filesystem policy violation or I/O failure from the core layer.
    #[error(transparent)]
    Fs(#[from] mcpd_core::CoreError),
}

/// Result type for execution-context operations.
pub type ContextResult<T> = Result<T, ContextError>;
