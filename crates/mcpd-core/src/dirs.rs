//! XDG-aware user directory resolution.
//!
//! mcpd keeps user configuration under `$XDG_CONFIG_HOME/mcpd` and caches
//! under `$XDG_CACHE_HOME/mcpd`, falling back to `~/.config/mcpd` and
//! `~/.cache/mcpd` when the variables are unset or empty. Relative XDG
//! values are rejected rather than silently ignored.

use std::path::PathBuf;

use crate::APP_DIR_NAME;
use crate::error::{CoreError, CoreResult};

/// User-specific configuration directory (`$XDG_CONFIG_HOME/mcpd` or
/// `~/.config/mcpd`).
///
/// # Errors
///
/// Returns an error if `$XDG_CONFIG_HOME` holds a relative path, or if the
/// fallback is needed and `$HOME` is unset.
pub fn user_config_dir() -> CoreResult<PathBuf> {
    xdg_dir("XDG_CONFIG_HOME", ".config")
}

/// User-specific cache directory (`$XDG_CACHE_HOME/mcpd` or
/// `~/.cache/mcpd`).
///
/// # Errors
///
/// Returns an error if `$XDG_CACHE_HOME` holds a relative path, or if the
/// fallback is needed and `$HOME` is unset.
pub fn user_cache_dir() -> CoreResult<PathBuf> {
    xdg_dir("XDG_CACHE_HOME", ".cache")
}

/// Resolve an XDG base directory variable with a `$HOME`-relative fallback,
/// then append the application directory name.
///
/// `var` must belong to the XDG namespace; anything else is a programming
/// error surfaced as [`CoreError::NotXdgVariable`].
fn xdg_dir(var: &str, fallback: &str) -> CoreResult<PathBuf> {
    if !var.starts_with("XDG_") {
        return Err(CoreError::NotXdgVariable(var.to_string()));
    }

    if let Ok(value) = std::env::var(var)
        && !value.is_empty()
    {
        let base = PathBuf::from(&value);
        if !base.is_absolute() {
            return Err(CoreError::RelativeXdgPath {
                var: var.to_string(),
                value,
            });
        }
        return Ok(base.join(APP_DIR_NAME));
    }

    let home = std::env::var("HOME").map_err(|_| CoreError::NoHomeDir)?;
    if home.is_empty() {
        return Err(CoreError::NoHomeDir);
    }
    Ok(PathBuf::from(home).join(fallback).join(APP_DIR_NAME))
}

#[cfg(test)]
#[allow(unsafe_code)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    /// Serializes tests that mutate process-wide environment variables.
    static ENV_MUTEX: Mutex<()> = Mutex::new(());

    #[test]
    fn test_config_dir_honors_xdg_variable() {
        let _guard = ENV_MUTEX.lock().unwrap();
        // SAFETY: serialized by ENV_MUTEX
        unsafe { std::env::set_var("XDG_CONFIG_HOME", "/custom/config") };
        let dir = user_config_dir().unwrap();
        assert_eq!(dir, PathBuf::from("/custom/config/mcpd"));
        unsafe { std::env::remove_var("XDG_CONFIG_HOME") };
    }

    #[test]
    fn test_config_dir_falls_back_to_home() {
        let _guard = ENV_MUTEX.lock().unwrap();
        // SAFETY: serialized by ENV_MUTEX
        unsafe { std::env::remove_var("XDG_CONFIG_HOME") };
        unsafe { std::env::set_var("HOME", "/home/someone") };
        let dir = user_config_dir().unwrap();
        assert_eq!(dir, PathBuf::from("/home/someone/.config/mcpd"));
    }

    #[test]
    fn test_cache_dir_falls_back_to_home() {
        let _guard = ENV_MUTEX.lock().unwrap();
        // SAFETY: serialized by ENV_MUTEX
        unsafe { std::env::remove_var("XDG_CACHE_HOME") };
        unsafe { std::env::set_var("HOME", "/home/someone") };
        let dir = user_cache_dir().unwrap();
        assert_eq!(dir, PathBuf::from("/home/someone/.cache/mcpd"));
    }

    #[test]
    fn test_empty_xdg_value_uses_fallback() {
        let _guard = ENV_MUTEX.lock().unwrap();
        // SAFETY: serialized by ENV_MUTEX
        unsafe { std::env::set_var("XDG_CONFIG_HOME", "") };
        unsafe { std::env::set_var("HOME", "/home/someone") };
        let dir = user_config_dir().unwrap();
        assert_eq!(dir, PathBuf::from("/home/someone/.config/mcpd"));
        unsafe { std::env::remove_var("XDG_CONFIG_HOME") };
    }

    #[test]
    fn test_relative_xdg_value_is_rejected() {
        let _guard = ENV_MUTEX.lock().unwrap();
        // SAFETY: serialized by ENV_MUTEX
        unsafe { std::env::set_var("XDG_CONFIG_HOME", "relative/config") };
        let err = user_config_dir().unwrap_err();
        assert!(matches!(err, CoreError::RelativeXdgPath { .. }));
        unsafe { std::env::remove_var("XDG_CONFIG_HOME") };
    }

    #[test]
    fn test_non_xdg_variable_is_rejected() {
        let err = xdg_dir("MCPD_CONFIG_HOME", ".config").unwrap_err();
        assert!(matches!(err, CoreError::NotXdgVariable(_)));
    }
}
