//! The per-server execution context entity.

use std::collections::HashMap;

use crate::expand::{expand_args, expand_str, process_env};

/// Launch-time context for a single MCP server: arguments, environment
/// variables, and volume bindings, in both expanded and raw form.
///
/// The expanded collections are what gets passed to the server process;
/// the raw twins preserve the pre-expansion values byte-for-byte so a
/// later layer can tell a literal value apart from a `${VAR}` reference.
#[derive(Debug, Clone, Default)]
pub struct ServerExecutionContext {
    /// Unique server name.
    pub name: String,
    /// Command-line arguments after `${VAR}` expansion.
    pub args: Vec<String>,
    /// Environment variables after `${VAR}` expansion.
    pub env: HashMap<String, String>,
    /// Volume bindings (logical name → host path or named volume) after
    /// `${VAR}` expansion.
    pub volumes: HashMap<String, String>,
    /// Arguments exactly as configured.
    pub raw_args: Vec<String>,
    /// Environment variables exactly as configured.
    pub raw_env: HashMap<String, String>,
    /// Volume bindings exactly as configured.
    pub raw_volumes: HashMap<String, String>,
}

impl ServerExecutionContext {
    /// Create an empty context for `name`.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    /// Build a context from raw values, expanding `${VAR}` references
    /// against the process environment.
    #[must_use]
    pub fn from_raw(
        name: impl Into<String>,
        raw_args: Vec<String>,
        raw_env: HashMap<String, String>,
        raw_volumes: HashMap<String, String>,
    ) -> Self {
        Self::from_raw_with(name, raw_args, raw_env, raw_volumes, process_env)
    }

    /// Build a context from raw values with an explicit variable lookup.
    #[must_use]
    pub fn from_raw_with(
        name: impl Into<String>,
        raw_args: Vec<String>,
        raw_env: HashMap<String, String>,
        raw_volumes: HashMap<String, String>,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Self {
        let args = expand_args(&raw_args, &lookup);
        let env = raw_env
            .iter()
            .map(|(k, v)| (k.clone(), expand_str(v, &lookup)))
            .collect();
        let volumes = raw_volumes
            .iter()
            .map(|(k, v)| (k.clone(), expand_str(v, &lookup)))
            .collect();

        Self {
            name: name.into(),
            args,
            env,
            volumes,
            raw_args,
            raw_env,
            raw_volumes,
        }
    }

    /// Whether the context carries nothing: no expanded args, env, or
    /// volumes. Upserting an empty context deletes the stored entry.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.args.is_empty() && self.env.is_empty() && self.volumes.is_empty()
    }
}

/// Order-insensitive, count-sensitive comparison of two argument lists.
fn multiset_eq(a: &[String], b: &[String]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    let mut a_sorted: Vec<&String> = a.iter().collect();
    let mut b_sorted: Vec<&String> = b.iter().collect();
    a_sorted.sort();
    b_sorted.sort();
    a_sorted == b_sorted
}

impl PartialEq for ServerExecutionContext {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name
            && multiset_eq(&self.args, &other.args)
            && multiset_eq(&self.raw_args, &other.raw_args)
            && self.env == other.env
            && self.raw_env == other.raw_env
            && self.volumes == other.volumes
            && self.raw_volumes == other.raw_volumes
    }
}

impl Eq for ServerExecutionContext {}
