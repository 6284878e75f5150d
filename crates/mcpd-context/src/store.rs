//! TOML-backed execution-context store.

use std::collections::{BTreeMap, HashMap};
use std::io;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::debug;

use mcpd_core::perms::{ensure_at_least, write_with_mode};

use crate::context::ServerExecutionContext;
use crate::error::{ContextError, ContextResult};

/// Secure policy: directory mode for the context file's parent.
const SECURE_DIR_MODE: u32 = 0o700;
/// Secure policy: context file mode.
const SECURE_FILE_MODE: u32 = 0o600;
/// Exported policy: directory mode.
const EXPORT_DIR_MODE: u32 = 0o755;
/// Exported policy: file mode.
const EXPORT_FILE_MODE: u32 = 0o644;

/// Outcome of an [`ExecutionContextStore::upsert`] call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertResult {
    /// A new entry was inserted.
    Created,
    /// An existing entry was replaced.
    Updated,
    /// An existing entry was removed (empty payload over a stored entry).
    Deleted,
    /// Nothing changed.
    Noop,
}

impl std::fmt::Display for UpsertResult {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Created => write!(f, "created"),
            Self::Updated => write!(f, "updated"),
            Self::Deleted => write!(f, "deleted"),
            Self::Noop => write!(f, "noop"),
        }
    }
}

/// On-disk record for one server. Only raw values are persisted; the
/// expanded view is derived at load time.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct ServerContextRecord {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    args: Vec<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    env: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    volumes: BTreeMap<String, String>,
}

/// On-disk shape of the whole context file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct ContextFile {
    #[serde(default)]
    servers: BTreeMap<String, ServerContextRecord>,
}

/// Store of per-server execution contexts bound to a file on disk.
///
/// Not safe for concurrent writers; callers serialize mutations
/// externally.
#[derive(Debug)]
pub struct ExecutionContextStore {
    path: PathBuf,
    contexts: HashMap<String, ServerExecutionContext>,
}

impl ExecutionContextStore {
    /// Load a store from `path`.
    ///
    /// A missing file yields an empty store bound to `path`. `${VAR}`
    /// references are expanded against the process environment; the raw
    /// values are kept untouched.
    ///
    /// # Errors
    ///
    /// Returns [`ContextError::ParseError`] for a malformed file and
    /// [`ContextError::ReadError`] for any other read failure.
    pub fn load(path: impl Into<PathBuf>) -> ContextResult<Self> {
        Self::load_with(path, crate::expand::process_env)
    }

    /// Load a store with an explicit variable lookup (test seam).
    ///
    /// # Errors
    ///
    /// Same as [`load`](Self::load).
    pub fn load_with(
        path: impl Into<PathBuf>,
        lookup: impl Fn(&str) -> Option<String> + Copy,
    ) -> ContextResult<Self> {
        let path = path.into();

        let content = match std::fs::read_to_string(&path) {
            Ok(content) => content,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                debug!(path = %path.display(), "no execution context file, starting empty");
                return Ok(Self {
                    path,
                    contexts: HashMap::new(),
                });
            }
            Err(source) => {
                return Err(ContextError::ReadError { path, source });
            }
        };

        let file: ContextFile = toml::from_str(&content).map_err(|source| {
            ContextError::ParseError {
                path: path.clone(),
                source,
            }
        })?;

        let contexts = file
            .servers
            .into_iter()
            .map(|(name, record)| {
                let ctx = ServerExecutionContext::from_raw_with(
                    name.clone(),
                    record.args,
                    record.env.into_iter().collect(),
                    record.volumes.into_iter().collect(),
                    lookup,
                );
                (name, ctx)
            })
            .collect();

        Ok(Self { path, contexts })
    }

    /// The file this store persists to.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Number of stored contexts.
    #[must_use]
    pub fn len(&self) -> usize {
        self.contexts.len()
    }

    /// Whether the store holds no contexts.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.contexts.is_empty()
    }

    /// Get a deep copy of the context for `name`, if stored.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<ServerExecutionContext> {
        self.contexts.get(name).cloned()
    }

    /// All contexts, sorted by case-insensitive server name.
    #[must_use]
    pub fn list(&self) -> Vec<ServerExecutionContext> {
        let mut all: Vec<ServerExecutionContext> = self.contexts.values().cloned().collect();
        all.sort_by_key(|ctx| ctx.name.to_lowercase());
        all
    }

    /// Insert, replace, or delete the context for `ctx.name`.
    ///
    /// | stored | `ctx` empty | action | result |
    /// |---|---|---|---|
    /// | no  | yes | none | `Noop` |
    /// | yes | no, equal | none | `Noop` |
    /// | yes | yes | delete | `Deleted` |
    /// | yes | no, differs | replace | `Updated` |
    /// | no  | no | insert | `Created` |
    ///
    /// Any non-`Noop` outcome persists the whole file under the secure
    /// policy.
    ///
    /// # Errors
    ///
    /// Returns [`ContextError::EmptyName`] for an unnamed context, and
    /// save errors for persistence failures.
    pub fn upsert(&mut self, mut ctx: ServerExecutionContext) -> ContextResult<UpsertResult> {
        let name = ctx.name.trim().to_string();
        if name.is_empty() {
            return Err(ContextError::EmptyName);
        }
        ctx.name.clone_from(&name);

        let result = match self.contexts.get(&name) {
            None if ctx.is_empty() => UpsertResult::Noop,
            None => {
                self.contexts.insert(name, ctx);
                UpsertResult::Created
            }
            Some(_) if ctx.is_empty() => {
                self.contexts.remove(&name);
                UpsertResult::Deleted
            }
            Some(prev) if *prev == ctx => UpsertResult::Noop,
            Some(_) => {
                self.contexts.insert(name, ctx);
                UpsertResult::Updated
            }
        };

        if result != UpsertResult::Noop {
            self.save_config()?;
        }
        Ok(result)
    }

    /// Persist the store to its bound path under the secure policy
    /// (directory `0700`, file `0600`).
    ///
    /// # Errors
    ///
    /// Returns serialization failures, permission-policy violations on the
    /// parent directory, and write failures (all carrying the path).
    pub fn save_config(&self) -> ContextResult<()> {
        self.save_to(&self.path, SECURE_DIR_MODE, SECURE_FILE_MODE)
    }

    /// Persist a shareable copy of the store to `path` under the regular
    /// policy (directory `0755`, file `0644`).
    ///
    /// # Errors
    ///
    /// Same failure classes as [`save_config`](Self::save_config).
    pub fn save_exported_config(&self, path: &Path) -> ContextResult<()> {
        self.save_to(path, EXPORT_DIR_MODE, EXPORT_FILE_MODE)
    }

    fn save_to(&self, path: &Path, dir_mode: u32, file_mode: u32) -> ContextResult<()> {
        let file = ContextFile {
            servers: self
                .contexts
                .iter()
                .map(|(name, ctx)| {
                    let record = ServerContextRecord {
                        args: ctx.raw_args.clone(),
                        env: ctx.raw_env.iter().map(|(k, v)| (k.clone(), v.clone())).collect(),
                        volumes: ctx
                            .raw_volumes
                            .iter()
                            .map(|(k, v)| (k.clone(), v.clone()))
                            .collect(),
                    };
                    (name.clone(), record)
                })
                .collect(),
        };

        let content =
            toml::to_string_pretty(&file).map_err(|source| ContextError::SerializeError {
                path: path.to_path_buf(),
                source,
            })?;

        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            ensure_at_least(parent, dir_mode)?;
        }
        write_with_mode(path, content.as_bytes(), file_mode)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[cfg(unix)]
    use std::os::unix::fs::PermissionsExt;

    fn no_env(_: &str) -> Option<String> {
        None
    }

    fn ctx_with_args(name: &str, args: &[&str]) -> ServerExecutionContext {
        ServerExecutionContext::from_raw_with(
            name,
            args.iter().map(ToString::to_string).collect(),
            HashMap::new(),
            HashMap::new(),
            no_env,
        )
    }

    fn store_at(dir: &Path) -> ExecutionContextStore {
        ExecutionContextStore::load_with(dir.join("secrets").join("mcpd.toml"), no_env).unwrap()
    }

    #[test]
    fn test_load_missing_file_yields_empty_store() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_at(dir.path());
        assert!(store.is_empty());
    }

    #[test]
    fn test_load_malformed_file_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("mcpd.toml");
        std::fs::write(&path, "not [valid").unwrap();

        let err = ExecutionContextStore::load_with(&path, no_env).unwrap_err();
        match err {
            ContextError::ParseError { path: p, .. } => assert_eq!(p, path),
            other => panic!("expected ParseError, got {other:?}"),
        }
    }

    #[test]
    fn test_upsert_sequence_created_noop_deleted() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = store_at(dir.path());
        let path = store.path().to_path_buf();

        let result = store.upsert(ctx_with_args("s", &["--x"])).unwrap();
        assert_eq!(result, UpsertResult::Created);
        assert!(path.exists());
        #[cfg(unix)]
        {
            let mode = std::fs::metadata(&path).unwrap().permissions().mode() & 0o777;
            assert_eq!(mode, 0o600);
        }

        let result = store.upsert(ctx_with_args("s", &["--x"])).unwrap();
        assert_eq!(result, UpsertResult::Noop);

        let result = store.upsert(ctx_with_args("s", &[])).unwrap();
        assert_eq!(result, UpsertResult::Deleted);
        assert!(store.get("s").is_none());
        assert!(path.exists(), "file is rewritten, not removed");
    }

    #[test]
    fn test_upsert_differing_context_updates() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = store_at(dir.path());

        store.upsert(ctx_with_args("s", &["--x"])).unwrap();
        let result = store.upsert(ctx_with_args("s", &["--y"])).unwrap();
        assert_eq!(result, UpsertResult::Updated);
        assert_eq!(store.get("s").unwrap().args, vec!["--y"]);
    }

    #[test]
    fn test_upsert_empty_over_missing_is_noop() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = store_at(dir.path());

        let result = store.upsert(ctx_with_args("ghost", &[])).unwrap();
        assert_eq!(result, UpsertResult::Noop);
        assert!(!store.path().exists(), "noop must not create the file");
    }

    #[test]
    fn test_upsert_reordered_args_is_noop() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = store_at(dir.path());

        store.upsert(ctx_with_args("s", &["--a", "--b"])).unwrap();
        let result = store.upsert(ctx_with_args("s", &["--b", "--a"])).unwrap();
        assert_eq!(result, UpsertResult::Noop);
    }

    #[test]
    fn test_upsert_empty_name_fails() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = store_at(dir.path());

        let err = store.upsert(ctx_with_args("  ", &["--x"])).unwrap_err();
        assert!(matches!(err, ContextError::EmptyName));
    }

    #[test]
    fn test_get_returns_deep_copy() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = store_at(dir.path());
        store.upsert(ctx_with_args("s", &["--x"])).unwrap();

        let mut copy = store.get("s").unwrap();
        copy.args.push("--mutated".to_string());

        assert_eq!(store.get("s").unwrap().args, vec!["--x"]);
    }

    #[test]
    fn test_list_sorted_case_insensitively() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = store_at(dir.path());
        store.upsert(ctx_with_args("Zeta", &["--z"])).unwrap();
        store.upsert(ctx_with_args("alpha", &["--a"])).unwrap();
        store.upsert(ctx_with_args("Beta", &["--b"])).unwrap();

        let names: Vec<String> = store.list().into_iter().map(|c| c.name).collect();
        assert_eq!(names, vec!["alpha", "Beta", "Zeta"]);
    }

    #[test]
    fn test_round_trip_is_byte_identical() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = store_at(dir.path());
        let env: HashMap<String, String> =
            [("TOKEN".to_string(), "${GITHUB_TOKEN}".to_string())].into();
        let volumes: HashMap<String, String> = [("data".to_string(), "/srv/data".to_string())].into();
        store
            .upsert(ServerExecutionContext::from_raw_with(
                "github",
                vec!["--stdio".to_string()],
                env,
                volumes,
                no_env,
            ))
            .unwrap();
        store.upsert(ctx_with_args("time", &["--utc"])).unwrap();

        let first = std::fs::read_to_string(store.path()).unwrap();

        let reloaded = ExecutionContextStore::load_with(store.path(), no_env).unwrap();
        reloaded.save_config().unwrap();
        let second = std::fs::read_to_string(store.path()).unwrap();

        assert_eq!(first, second);
    }

    #[test]
    fn test_load_expands_but_preserves_raw() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("mcpd.toml");
        std::fs::write(
            &path,
            r#"
[servers.github]
args = ["--token", "${GITHUB_TOKEN}"]

[servers.github.env]
AUTH = "${GITHUB_TOKEN}"
"#,
        )
        .unwrap();

        let lookup = |name: &str| (name == "GITHUB_TOKEN").then(|| "ghp_abc".to_string());
        let store = ExecutionContextStore::load_with(&path, lookup).unwrap();
        let ctx = store.get("github").unwrap();

        assert_eq!(ctx.args, vec!["--token", "ghp_abc"]);
        assert_eq!(ctx.raw_args, vec!["--token", "${GITHUB_TOKEN}"]);
        assert_eq!(ctx.env["AUTH"], "ghp_abc");
        assert_eq!(ctx.raw_env["AUTH"], "${GITHUB_TOKEN}");
    }

    #[test]
    fn test_undefined_variable_expands_to_empty_on_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("mcpd.toml");
        std::fs::write(&path, "[servers.s]\nargs = [\"${FOO}\"]\n").unwrap();

        let store = ExecutionContextStore::load_with(&path, no_env).unwrap();
        assert_eq!(store.get("s").unwrap().args, vec![""]);
    }

    #[cfg(unix)]
    #[test]
    fn test_exported_save_uses_regular_policy() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = store_at(dir.path());
        store.upsert(ctx_with_args("s", &["--x"])).unwrap();

        let export = dir.path().join("export").join("mcpd.toml");
        store.save_exported_config(&export).unwrap();

        let file_mode = std::fs::metadata(&export).unwrap().permissions().mode() & 0o777;
        assert_eq!(file_mode, 0o644);
        let dir_mode = std::fs::metadata(export.parent().unwrap())
            .unwrap()
            .permissions()
            .mode()
            & 0o777;
        assert_eq!(dir_mode, 0o755);
    }

    #[cfg(unix)]
    #[test]
    fn test_save_rejects_overly_permissive_existing_dir() {
        let dir = tempfile::tempdir().unwrap();
        let secrets = dir.path().join("secrets");
        std::fs::create_dir(&secrets).unwrap();
        std::fs::set_permissions(&secrets, std::fs::Permissions::from_mode(0o755)).unwrap();

        let mut store =
            ExecutionContextStore::load_with(secrets.join("mcpd.toml"), no_env).unwrap();
        let err = store.upsert(ctx_with_args("s", &["--x"])).unwrap_err();
        assert!(matches!(
            err,
            ContextError::Fs(mcpd_core::CoreError::PermissionTooOpen { .. })
        ));
    }
}
