//! Core error types.

use std::path::PathBuf;

use thiserror::Error;

/// Errors from core filesystem and directory operations.
#[derive(Debug, Error)]
pub enum CoreError {
    /// An existing path grants permission bits the policy forbids.
    #[error(
        "permissions on {} are too open: mode {actual:03o} grants bits beyond required {required:03o}",
        path.display()
    )]
    PermissionTooOpen {
        /// The offending path.
        path: PathBuf,
        /// The mode found on disk.
        actual: u32,
        /// The most permissive mode the policy allows.
        required: u32,
    },

    /// The final path component is a symlink, which the policy rejects.
    #[error("refusing to operate on symlink: {}", path.display())]
    SymlinkRejected {
        /// The symlink path.
        path: PathBuf,
    },

    /// An environment variable name outside the `XDG_` namespace was used
    /// for base-directory lookup.
    #[error("not an XDG base directory variable: {0}")]
    NotXdgVariable(String),

    /// An XDG base directory variable held a relative path.
    #[error("{var} must be an absolute path, got {value:?}")]
    RelativeXdgPath {
        /// The variable name.
        var: String,
        /// The rejected value.
        value: String,
    },

    /// `$HOME` is required for the fallback location but is not set.
    #[error("HOME environment variable is not set")]
    NoHomeDir,

    /// An I/O failure, annotated with the path it occurred on.
    #[error("{}: {source}", path.display())]
    Io {
        /// The path being operated on.
        path: PathBuf,
        /// The underlying I/O error.
        #[source]
        source: std::io::Error,
    },
}

/// Result type for core operations.
pub type CoreResult<T> = Result<T, CoreError>;
