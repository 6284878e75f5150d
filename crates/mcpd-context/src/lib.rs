//! Execution contexts for MCP servers.
//!
//! An execution context carries the arguments, environment variables, and
//! volume bindings handed to an MCP server at launch. Contexts are stored
//! in a TOML file keyed by server name. Values containing `${VAR}`
//! references are expanded against the daemon's environment at load time,
//! while the pre-expansion raw values are preserved verbatim — the raw
//! form is what later runtime layers inspect to decide whether a value may
//! cross a server boundary.
//!
//! The store persists under a secure filesystem policy by default
//! (directory `0700`, file `0600`) and offers a relaxed exported mode for
//! shareable copies.

pub mod context;
pub mod error;
pub mod expand;
pub mod store;

pub use context::ServerExecutionContext;
pub use error::{ContextError, ContextResult};
pub use store::{ExecutionContextStore, UpsertResult};
