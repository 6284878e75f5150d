//! Configuration error types.

use std::path::PathBuf;

use thiserror::Error;

/// Errors from project-configuration loading.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The configuration file could not be read.
    #[error("cannot read config file {}: {source}", path.display())]
    ReadError {
        /// Path to the config file.
        path: PathBuf,
        /// The underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// The configuration file is malformed.
    #[error("invalid config file {}: {source}", path.display())]
    ParseError {
        /// Path to the config file.
        path: PathBuf,
        /// The TOML parse failure.
        #[source]
        source: toml::de::Error,
    },

    /// Two plugin entries share a name.
    #[error("duplicate plugin entry: {name}")]
    DuplicatePlugin {
        /// The duplicated plugin name.
        name: String,
    },
}

/// Result type for configuration operations.
pub type ConfigResult<T> = Result<T, ConfigError>;
