//! Plugin and pipeline error types.

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

/// A single plugin RPC failure.
///
/// Deadline expiry is its own variant but is treated identically to a
/// transport/status failure everywhere decisions are made.
#[derive(Debug, Error)]
pub enum RpcError {
    /// The plugin returned a gRPC error status.
    #[error("rpc failed: {0}")]
    Status(#[from] tonic::Status),

    /// The call did not complete within its deadline.
    #[error("rpc deadline exceeded after {0:?}")]
    DeadlineExceeded(Duration),
}

/// Errors from plugin supervision.
#[derive(Debug, Error)]
pub enum PluginError {
    /// Configured plugins with no matching executable in the plugin
    /// directory.
    #[error("plugin binaries not found in {}: {}", dir.display(), names.join(", "))]
    NotFound {
        /// The plugin directory that was scanned.
        dir: PathBuf,
        /// The missing plugin names, sorted.
        names: Vec<String>,
    },

    /// The plugin binary could not be spawned.
    #[error("failed to spawn plugin {name}: {source}")]
    SpawnFailed {
        /// Plugin name.
        name: String,
        /// The spawn failure.
        #[source]
        source: std::io::Error,
    },

    /// The plugin did not open its socket before the start deadline.
    #[error("plugin {name} did not open socket {} within {timeout:?}", path.display())]
    SocketTimeout {
        /// Plugin name.
        name: String,
        /// The socket the supervisor was waiting for.
        path: PathBuf,
        /// The start deadline.
        timeout: Duration,
    },

    /// The gRPC channel to the plugin could not be established.
    #[error("failed to dial plugin {name}: {source}")]
    DialFailed {
        /// Plugin name.
        name: String,
        /// The transport failure.
        #[source]
        source: tonic::transport::Error,
    },

    /// The plugin rejected or failed its configuration call.
    #[error("failed to configure plugin {name}: {source}")]
    ConfigureFailed {
        /// Plugin name.
        name: String,
        /// The RPC failure.
        #[source]
        source: RpcError,
    },

    /// Plugin metadata could not be fetched during validation.
    #[error("failed to fetch metadata for plugin {name}: {source}")]
    MetadataFailed {
        /// Plugin name.
        name: String,
        /// The RPC failure.
        #[source]
        source: RpcError,
    },

    /// The plugin's self-reported commit hash does not match the
    /// configured one.
    #[error("commit hash mismatch for plugin {name}: expected {expected}, got {actual}")]
    ValidationFailed {
        /// Plugin name.
        name: String,
        /// Hash required by configuration.
        expected: String,
        /// Hash the plugin reported.
        actual: String,
    },

    /// The plugin failed its readiness probe.
    #[error("plugin {name} is not ready: {source}")]
    NotReady {
        /// Plugin name.
        name: String,
        /// The RPC failure.
        #[source]
        source: RpcError,
    },

    /// A stopped plugin exited with an unexpected status.
    #[error("plugin {name} exited abnormally with code {code}")]
    ShutdownAnomaly {
        /// Plugin name.
        name: String,
        /// The exit code.
        code: i32,
    },

    /// Several plugins failed to stop cleanly.
    #[error("plugin shutdown failures: {}", join_errors(errors))]
    ShutdownErrors {
        /// The individual failures.
        errors: Vec<PluginError>,
    },
}

fn join_errors(errors: &[PluginError]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

/// Result type for plugin supervision.
pub type PluginResult<T> = Result<T, PluginError>;

/// Errors surfaced by pipeline execution.
#[derive(Debug, Error)]
pub enum PipelineError {
    /// A plugin marked required returned an RPC error (or timed out).
    #[error("required plugin failed: {name}: {source}")]
    RequiredPluginFailed {
        /// Plugin name.
        name: String,
        /// The RPC failure.
        #[source]
        source: RpcError,
    },

    /// The capability set for a plugin could not be fetched while
    /// filtering a category.
    #[error("capability check failed for plugin {name}: {source}")]
    CapabilityCheckFailed {
        /// Plugin name.
        name: String,
        /// The RPC failure.
        #[source]
        source: RpcError,
    },

    /// Failures collected while shutting the pipeline down.
    #[error("pipeline shutdown failures: {}", join_rpc_errors(errors))]
    ShutdownFailed {
        /// Per-plugin stop failures.
        errors: Vec<(String, RpcError)>,
    },
}

fn join_rpc_errors(errors: &[(String, RpcError)]) -> String {
    errors
        .iter()
        .map(|(name, e)| format!("{name}: {e}"))
        .collect::<Vec<_>>()
        .join("; ")
}
