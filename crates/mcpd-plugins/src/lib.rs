//! Plugin supervision and pipeline execution for mcpd.
//!
//! Plugins are untrusted out-of-process binaries spoken to over gRPC on a
//! Unix domain socket the daemon owns. This crate covers their whole
//! lifetime:
//!
//! - [`supervisor::PluginSupervisor`] discovers plugin binaries, spawns
//!   them, waits for their sockets, dials, configures, validates, and
//!   readiness-checks each one, then registers it with the pipeline; it
//!   also tears everything down, forcibly when needed.
//! - [`instance::PluginInstance`] wraps one live plugin: its RPC handle,
//!   required flag, configured flows, and a memoized capability cache.
//! - [`pipeline::PluginPipeline`] walks the fixed category order for both
//!   flows, filtering by capability and configured flow, executing
//!   serially or in parallel per category, and short-circuiting on
//!   rejection.

pub mod error;
pub mod instance;
pub mod pipeline;
pub mod proto;
pub mod rpc;
pub mod supervisor;
pub mod testing;

pub use error::{PipelineError, PluginError, PluginResult, RpcError};
pub use instance::PluginInstance;
pub use pipeline::PluginPipeline;
pub use proto::v1::{HttpRequest, HttpResponse, Metadata, PluginConfig};
pub use rpc::{GrpcPlugin, PluginRpc};
pub use supervisor::{PluginHealth, PluginSupervisor};
