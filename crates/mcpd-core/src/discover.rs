//! Executable discovery for the plugin directory.

use std::collections::{HashMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};

use tracing::debug;

use crate::error::{CoreError, CoreResult};

/// Scan `dir` for executable entries.
///
/// Returns a map of filename → absolute path for every regular, non-hidden
/// entry with any execute bit set. Symlinks are followed when inspecting
/// entries; broken symlinks are skipped rather than fatal. When `allowed`
/// is provided, only filenames present in it are included.
///
/// # Errors
///
/// Returns [`CoreError::Io`] if the directory itself cannot be read.
pub fn discover_executables(
    dir: &Path,
    allowed: Option<&HashSet<String>>,
) -> CoreResult<HashMap<String, PathBuf>> {
    let entries = fs::read_dir(dir).map_err(|source| CoreError::Io {
        path: dir.to_path_buf(),
        source,
    })?;

    let mut found = HashMap::new();
    for entry in entries {
        let entry = entry.map_err(|source| CoreError::Io {
            path: dir.to_path_buf(),
            source,
        })?;

        let Some(name) = entry.file_name().to_str().map(str::to_string) else {
            continue;
        };
        if name.starts_with('.') {
            continue;
        }
        if let Some(allowed) = allowed
            && !allowed.contains(&name)
        {
            continue;
        }

        // metadata() follows symlinks; a broken link shows up as NotFound.
        let meta = match fs::metadata(entry.path()) {
            Ok(meta) => meta,
            Err(e) => {
                debug!(entry = %entry.path().display(), error = %e, "skipping unreadable entry");
                continue;
            }
        };
        if !meta.is_file() || !is_executable(&meta) {
            continue;
        }

        let path = std::path::absolute(entry.path()).map_err(|source| CoreError::Io {
            path: entry.path(),
            source,
        })?;
        found.insert(name, path);
    }

    Ok(found)
}

#[cfg(unix)]
fn is_executable(meta: &fs::Metadata) -> bool {
    use std::os::unix::fs::PermissionsExt;
    meta.permissions().mode() & 0o111 != 0
}

#[cfg(not(unix))]
fn is_executable(_meta: &fs::Metadata) -> bool {
    true
}

#[cfg(test)]
#[cfg(unix)]
mod tests {
    use super::*;
    use std::os::unix::fs::PermissionsExt;

    fn touch_with_mode(dir: &Path, name: &str, mode: u32) -> PathBuf {
        let path = dir.join(name);
        fs::write(&path, "#!/bin/sh\n").unwrap();
        fs::set_permissions(&path, fs::Permissions::from_mode(mode)).unwrap();
        path
    }

    #[test]
    fn test_finds_executable_regular_files() {
        let dir = tempfile::tempdir().unwrap();
        touch_with_mode(dir.path(), "auth", 0o755);
        touch_with_mode(dir.path(), "notes.txt", 0o644);

        let found = discover_executables(dir.path(), None).unwrap();
        assert_eq!(found.len(), 1);
        assert!(found.contains_key("auth"));
        assert!(found["auth"].is_absolute());
    }

    #[test]
    fn test_any_execute_bit_counts() {
        let dir = tempfile::tempdir().unwrap();
        touch_with_mode(dir.path(), "user-x", 0o700);
        touch_with_mode(dir.path(), "group-x", 0o610);
        touch_with_mode(dir.path(), "other-x", 0o601);

        let found = discover_executables(dir.path(), None).unwrap();
        assert_eq!(found.len(), 3);
    }

    #[test]
    fn test_skips_hidden_entries() {
        let dir = tempfile::tempdir().unwrap();
        touch_with_mode(dir.path(), ".hidden", 0o755);
        touch_with_mode(dir.path(), "visible", 0o755);

        let found = discover_executables(dir.path(), None).unwrap();
        assert_eq!(found.len(), 1);
        assert!(found.contains_key("visible"));
    }

    #[test]
    fn test_filters_by_allowed_set() {
        let dir = tempfile::tempdir().unwrap();
        touch_with_mode(dir.path(), "auth", 0o755);
        touch_with_mode(dir.path(), "audit", 0o755);

        let allowed: HashSet<String> = ["auth".to_string()].into();
        let found = discover_executables(dir.path(), Some(&allowed)).unwrap();
        assert_eq!(found.len(), 1);
        assert!(found.contains_key("auth"));
    }

    #[test]
    fn test_broken_symlink_is_skipped() {
        let dir = tempfile::tempdir().unwrap();
        touch_with_mode(dir.path(), "real", 0o755);
        std::os::unix::fs::symlink(dir.path().join("gone"), dir.path().join("dangling")).unwrap();

        let found = discover_executables(dir.path(), None).unwrap();
        assert_eq!(found.len(), 1);
        assert!(found.contains_key("real"));
    }

    #[test]
    fn test_valid_symlink_is_followed() {
        let dir = tempfile::tempdir().unwrap();
        let real = touch_with_mode(dir.path(), "real", 0o755);
        std::os::unix::fs::symlink(&real, dir.path().join("alias")).unwrap();

        let found = discover_executables(dir.path(), None).unwrap();
        assert!(found.contains_key("real"));
        assert!(found.contains_key("alias"));
    }

    #[test]
    fn test_missing_directory_is_an_error() {
        let err = discover_executables(Path::new("/nonexistent/plugins"), None).unwrap_err();
        assert!(matches!(err, CoreError::Io { .. }));
    }

    #[test]
    fn test_directories_are_not_executables() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir(dir.path().join("subdir")).unwrap();

        let found = discover_executables(dir.path(), None).unwrap();
        assert!(found.is_empty());
    }
}
