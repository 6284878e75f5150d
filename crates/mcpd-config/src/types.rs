//! Parsed `.mcpd.toml` shapes.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use mcpd_core::{Category, Flow};

use crate::error::{ConfigError, ConfigResult};

/// A declared MCP server.
///
/// Consumed by the server launcher and package resolvers, which sit
/// outside the supervision core; carried here because `.mcpd.toml` is one
/// file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ServerEntry {
    /// Unique server name.
    pub name: String,
    /// Package coordinate (e.g. `uvx::mcp-server-time@2025.1`).
    pub package: String,
    /// Tools exposed by this server that the daemon should allow.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tools: Vec<String>,
    /// Environment variable names the server requires at launch.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub required_env: Vec<String>,
}

/// One plugin to supervise.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PluginEntry {
    /// Plugin name; must match a binary filename in the plugin directory.
    pub name: String,
    /// Whether a failure or rejection from this plugin terminates the
    /// pipeline.
    #[serde(default)]
    pub required: bool,
    /// Expected commit hash; when non-empty the plugin's self-reported
    /// hash must match exactly.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub commit_hash: Option<String>,
    /// Flows this plugin is permitted to run in.
    pub flows: Vec<Flow>,
    /// Pipeline category the plugin registers under.
    pub category: Category,
}

/// The `[plugins]` section.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PluginsConfig {
    /// Absolute path to the directory holding plugin binaries.
    pub dir: PathBuf,
    /// Plugin entries, in declaration order.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub entries: Vec<PluginEntry>,
}

impl PluginsConfig {
    /// Names of all configured plugins.
    #[must_use]
    pub fn plugin_names(&self) -> HashSet<String> {
        self.entries.iter().map(|e| e.name.clone()).collect()
    }

    /// Entries grouped by the pipeline's category order; within one
    /// category, declaration order is preserved.
    #[must_use]
    pub fn entries_in_category_order(&self) -> Vec<&PluginEntry> {
        Category::ordered()
            .into_iter()
            .flat_map(|category| self.entries.iter().filter(move |e| e.category == category))
            .collect()
    }
}

/// Parsed project configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct McpdConfig {
    /// Declared MCP servers.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub servers: Vec<ServerEntry>,
    /// Plugin supervision section.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub plugins: Option<PluginsConfig>,
}

impl McpdConfig {
    /// Load and validate a project configuration from `path`.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::ReadError`] / [`ConfigError::ParseError`]
    /// naming the path, or [`ConfigError::DuplicatePlugin`] when two
    /// plugin entries share a name.
    pub fn load(path: &Path) -> ConfigResult<Self> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::ReadError {
            path: path.to_path_buf(),
            source,
        })?;
        let config: Self = toml::from_str(&content).map_err(|source| ConfigError::ParseError {
            path: path.to_path_buf(),
            source,
        })?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> ConfigResult<()> {
        if let Some(plugins) = &self.plugins {
            let mut seen = HashSet::new();
            for entry in &plugins.entries {
                if !seen.insert(entry.name.as_str()) {
                    return Err(ConfigError::DuplicatePlugin {
                        name: entry.name.clone(),
                    });
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
[[servers]]
name = "time"
package = "uvx::mcp-server-time@2025.1"
tools = ["get_current_time"]

[[servers]]
name = "github"
package = "npx::github-mcp@1.2"
required_env = ["GITHUB_TOKEN"]

[plugins]
dir = "/usr/lib/mcpd/plugins"

[[plugins.entries]]
name = "audit-log"
flows = ["request", "response"]
category = "audit"

[[plugins.entries]]
name = "token-auth"
required = true
commit_hash = "0a1b2c"
flows = ["request"]
category = "authentication"

[[plugins.entries]]
name = "metrics"
flows = ["request"]
category = "observability"
"#;

    #[test]
    fn test_parse_sample() {
        let config: McpdConfig = toml::from_str(SAMPLE).unwrap();
        assert_eq!(config.servers.len(), 2);

        let plugins = config.plugins.unwrap();
        assert_eq!(plugins.dir, PathBuf::from("/usr/lib/mcpd/plugins"));
        assert_eq!(plugins.entries.len(), 3);

        let auth = &plugins.entries[1];
        assert_eq!(auth.name, "token-auth");
        assert!(auth.required);
        assert_eq!(auth.commit_hash.as_deref(), Some("0a1b2c"));
        assert_eq!(auth.flows, vec![Flow::Request]);
        assert_eq!(auth.category, Category::Authentication);
    }

    #[test]
    fn test_required_defaults_to_false() {
        let config: McpdConfig = toml::from_str(SAMPLE).unwrap();
        let plugins = config.plugins.unwrap();
        assert!(!plugins.entries[0].required);
    }

    #[test]
    fn test_entries_follow_category_order() {
        let config: McpdConfig = toml::from_str(SAMPLE).unwrap();
        let plugins = config.plugins.unwrap();

        let names: Vec<&str> = plugins
            .entries_in_category_order()
            .into_iter()
            .map(|e| e.name.as_str())
            .collect();
        assert_eq!(names, vec!["metrics", "token-auth", "audit-log"]);
    }

    #[test]
    fn test_unknown_category_is_rejected() {
        let bad = r#"
[plugins]
dir = "/p"

[[plugins.entries]]
name = "x"
flows = ["request"]
category = "mystery"
"#;
        assert!(toml::from_str::<McpdConfig>(bad).is_err());
    }

    #[test]
    fn test_load_names_path_on_parse_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(".mcpd.toml");
        std::fs::write(&path, "servers = 42").unwrap();

        let err = McpdConfig::load(&path).unwrap_err();
        assert!(err.to_string().contains(".mcpd.toml"));
    }

    #[test]
    fn test_duplicate_plugin_names_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(".mcpd.toml");
        std::fs::write(
            &path,
            r#"
[plugins]
dir = "/p"

[[plugins.entries]]
name = "twin"
flows = ["request"]
category = "audit"

[[plugins.entries]]
name = "twin"
flows = ["response"]
category = "audit"
"#,
        )
        .unwrap();

        let err = McpdConfig::load(&path).unwrap_err();
        assert!(matches!(err, ConfigError::DuplicatePlugin { .. }));
    }

    #[test]
    fn test_empty_config_parses() {
        let config: McpdConfig = toml::from_str("").unwrap();
        assert!(config.servers.is_empty());
        assert!(config.plugins.is_none());
    }
}
