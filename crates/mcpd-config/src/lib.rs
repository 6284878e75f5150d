//! Project configuration for mcpd (`.mcpd.toml`).
//!
//! The daemon consumes the parsed shape only: a list of MCP server
//! declarations and a plugins section naming the plugin directory and the
//! plugin entries to supervise. Command-line tooling that edits this file
//! lives elsewhere.

pub mod error;
pub mod types;

pub use error::{ConfigError, ConfigResult};
pub use types::{McpdConfig, PluginEntry, PluginsConfig, ServerEntry};
