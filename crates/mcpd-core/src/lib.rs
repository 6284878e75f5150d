//! Core types and filesystem policy shared across the mcpd daemon.
//!
//! This crate holds the pieces every other layer leans on:
//!
//! - [`Flow`] and [`Category`]: the closed vocabulary of the plugin
//!   pipeline (direction tags, the seven pipeline stages, and each stage's
//!   execution properties).
//! - [`dirs`]: XDG-aware resolution of the user-specific config and cache
//!   directories.
//! - [`perms`]: the "no more permissive than required" directory policy.
//! - [`discover`]: executable discovery for the plugin directory.

pub mod category;
pub mod dirs;
pub mod discover;
pub mod error;
pub mod flow;
pub mod perms;

pub use category::{Category, CategoryProperties};
pub use error::{CoreError, CoreResult};
pub use flow::Flow;

/// Application directory name used under the XDG base directories.
pub const APP_DIR_NAME: &str = "mcpd";
