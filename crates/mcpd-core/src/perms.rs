//! "No more permissive than required" filesystem policy.
//!
//! Directories that may hold secrets (execution contexts, socket dirs) are
//! created with an exact mode and, when they already exist, accepted only
//! if every granted bit is also present in the required mode. Permissions
//! are never silently widened or repaired.

use std::fs;
use std::io;
use std::path::Path;

use crate::error::{CoreError, CoreResult};

/// Permission mask considered by the policy.
const MODE_MASK: u32 = 0o777;

/// Ensure `path` exists as a directory no more permissive than `required`.
///
/// A missing path is created (including parents) and set to exactly
/// `required`. An existing path is accepted iff its mode grants no bit
/// that `required` does not, i.e. `actual & !required == 0`. The final
/// component must not be a symlink.
///
/// # Errors
///
/// Returns [`CoreError::PermissionTooOpen`] when an existing path grants
/// extra bits, [`CoreError::SymlinkRejected`] for a symlinked final
/// component, and [`CoreError::Io`] for underlying filesystem failures.
pub fn ensure_at_least(path: &Path, required: u32) -> CoreResult<()> {
    match fs::symlink_metadata(path) {
        Ok(meta) => {
            if meta.file_type().is_symlink() {
                return Err(CoreError::SymlinkRejected {
                    path: path.to_path_buf(),
                });
            }
            check_mode(path, mode_of(&meta), required)
        }
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            fs::create_dir_all(path).map_err(|source| CoreError::Io {
                path: path.to_path_buf(),
                source,
            })?;
            // create_dir_all is subject to the umask; pin the final
            // component to the exact required mode.
            set_mode(path, required)
        }
        Err(source) => Err(CoreError::Io {
            path: path.to_path_buf(),
            source,
        }),
    }
}

/// Verify that `actual` grants no bit beyond `required`.
fn check_mode(path: &Path, actual: u32, required: u32) -> CoreResult<()> {
    if actual & !required & MODE_MASK != 0 {
        return Err(CoreError::PermissionTooOpen {
            path: path.to_path_buf(),
            actual: actual & MODE_MASK,
            required: required & MODE_MASK,
        });
    }
    Ok(())
}

#[cfg(unix)]
fn mode_of(meta: &fs::Metadata) -> u32 {
    use std::os::unix::fs::PermissionsExt;
    meta.permissions().mode() & MODE_MASK
}

#[cfg(not(unix))]
fn mode_of(_meta: &fs::Metadata) -> u32 {
    0
}

#[cfg(unix)]
fn set_mode(path: &Path, mode: u32) -> CoreResult<()> {
    use std::os::unix::fs::PermissionsExt;
    fs::set_permissions(path, fs::Permissions::from_mode(mode)).map_err(|source| CoreError::Io {
        path: path.to_path_buf(),
        source,
    })
}

#[cfg(not(unix))]
fn set_mode(_path: &Path, _mode: u32) -> CoreResult<()> {
    Ok(())
}

/// Write `contents` to `path` with the file pinned to exactly `mode`.
///
/// The file is created or truncated, written in full, and its permissions
/// set before the handle is closed. Errors carry the path.
///
/// # Errors
///
/// Returns [`CoreError::Io`] if the file cannot be created, written, or
/// have its permissions set.
pub fn write_with_mode(path: &Path, contents: &[u8], mode: u32) -> CoreResult<()> {
    let io_err = |source| CoreError::Io {
        path: path.to_path_buf(),
        source,
    };

    #[cfg(unix)]
    let file = {
        use std::os::unix::fs::OpenOptionsExt;
        fs::OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .mode(mode)
            .open(path)
            .map_err(io_err)?
    };
    #[cfg(not(unix))]
    let file = fs::OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .open(path)
        .map_err(io_err)?;

    use std::io::Write;
    let mut file = file;
    file.write_all(contents).map_err(io_err)?;
    // An existing file keeps its old mode through OpenOptions; pin it.
    set_mode(path, mode)?;
    file.sync_all().map_err(io_err)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[cfg(unix)]
    use std::os::unix::fs::PermissionsExt;

    #[test]
    fn test_creates_missing_directory_with_exact_mode() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("contexts");

        ensure_at_least(&target, 0o700).unwrap();

        assert!(target.is_dir());
        #[cfg(unix)]
        {
            let mode = fs::metadata(&target).unwrap().permissions().mode() & 0o777;
            assert_eq!(mode, 0o700);
        }
    }

    #[cfg(unix)]
    #[test]
    fn test_accepts_stricter_existing_directory() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("strict");
        fs::create_dir(&target).unwrap();
        fs::set_permissions(&target, fs::Permissions::from_mode(0o500)).unwrap();

        // 0o500 grants nothing beyond 0o700.
        ensure_at_least(&target, 0o700).unwrap();
    }

    #[cfg(unix)]
    #[test]
    fn test_rejects_wider_existing_directory() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("wide");
        fs::create_dir(&target).unwrap();
        fs::set_permissions(&target, fs::Permissions::from_mode(0o755)).unwrap();

        let err = ensure_at_least(&target, 0o700).unwrap_err();
        match err {
            CoreError::PermissionTooOpen {
                actual, required, ..
            } => {
                assert_eq!(actual, 0o755);
                assert_eq!(required, 0o700);
            }
            other => panic!("expected PermissionTooOpen, got {other:?}"),
        }
    }

    #[cfg(unix)]
    #[test]
    fn test_error_message_names_both_modes_in_octal() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("wide");
        fs::create_dir(&target).unwrap();
        fs::set_permissions(&target, fs::Permissions::from_mode(0o755)).unwrap();

        let err = ensure_at_least(&target, 0o700).unwrap_err();
        let message = err.to_string();
        assert!(message.contains("755"), "missing actual mode: {message}");
        assert!(message.contains("700"), "missing required mode: {message}");
    }

    #[cfg(unix)]
    #[test]
    fn test_rejects_symlink_final_component() {
        let dir = tempfile::tempdir().unwrap();
        let real = dir.path().join("real");
        fs::create_dir(&real).unwrap();
        let link = dir.path().join("link");
        std::os::unix::fs::symlink(&real, &link).unwrap();

        let err = ensure_at_least(&link, 0o700).unwrap_err();
        assert!(matches!(err, CoreError::SymlinkRejected { .. }));
    }

    #[cfg(unix)]
    #[test]
    fn test_succeeding_call_leaves_no_extra_bits() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("created");
        let required = 0o700;

        ensure_at_least(&target, required).unwrap();

        let actual = fs::metadata(&target).unwrap().permissions().mode() & 0o777;
        assert_eq!(actual & !required, 0);
    }

    #[cfg(unix)]
    #[test]
    fn test_write_with_mode_sets_file_mode() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("secrets.toml");

        write_with_mode(&file, b"[servers]\n", 0o600).unwrap();

        let mode = fs::metadata(&file).unwrap().permissions().mode() & 0o777;
        assert_eq!(mode, 0o600);
        assert_eq!(fs::read(&file).unwrap(), b"[servers]\n");
    }

    #[cfg(unix)]
    #[test]
    fn test_write_with_mode_truncates_existing() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("out.toml");
        fs::write(&file, "old contents that are longer").unwrap();

        write_with_mode(&file, b"new", 0o644).unwrap();

        assert_eq!(fs::read(&file).unwrap(), b"new");
    }
}
