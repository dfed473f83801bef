//!
//! Platform-native path resolution for ChatMux.
//!
//! Configuration files live in the platform config directory (XDG on Linux,
//! Application Support on macOS, %APPDATA% on Windows). Credentials live in a
//! separate home directory shared with other tools that speak the same
//! `auth.json` layout.
//!
//! Authors:
//!   Jaro <yarenty@gmail.com>
//!
//! Copyright (c) 2026 SkyCorp

/* --- uses ------------------------------------------------------------------------------------ */

use crate::config::Config;
use crate::error::{ProxyError, Result};
use directories::ProjectDirs;
use std::path::{Path, PathBuf};

/* --- constants ------------------------------------------------------------------------------- */

/// Application name for directory resolution
const APP_NAME: &str = "chatmux";
/// Organization qualifier for directory resolution
const ORGANIZATION: &str = "com";
/// Organization name for directory resolution
const ORG_NAME: &str = "SkyCorp";

/// Default credential home, relative to the user's home directory
const DEFAULT_AUTH_HOME: &str = ".chatgpt-local";
/// Credential home of the Codex CLI, read as a fallback
const CODEX_AUTH_HOME: &str = ".codex";

/* --- public functions ------------------------------------------------------------------------ */

/// Get the user configuration directory for ChatMux, creating it if needed
///
/// - Linux: ~/.config/chatmux/
/// - macOS: ~/Library/Application Support/com.SkyCorp.chatmux/
/// - Windows: %APPDATA%/SkyCorp/chatmux/config/
pub fn user_config_dir() -> Result<PathBuf> {
    let project_dirs = get_project_dirs()?;
    let config_dir = project_dirs.config_dir();

    ensure_directory_exists(config_dir)?;
    Ok(config_dir.to_path_buf())
}

/// Get the system configuration directory for ChatMux
///
/// Note: Does NOT create the directory (requires admin privileges)
pub fn system_config_dir() -> Result<PathBuf> {
    #[cfg(all(unix, not(target_os = "macos")))]
    {
        Ok(PathBuf::from("/etc").join(APP_NAME))
    }

    #[cfg(target_os = "macos")]
    {
        Ok(PathBuf::from("/Library/Preferences").join(APP_NAME))
    }

    #[cfg(windows)]
    {
        std::env::var("PROGRAMDATA").map(|path| PathBuf::from(path).join(APP_NAME)).map_err(|_| {
            ProxyError::Config("PROGRAMDATA environment variable not found".to_string())
        })
    }
}

/// Get the default user configuration file path
pub fn user_config_file() -> Result<PathBuf> {
    Ok(user_config_dir()?.join("config.toml"))
}

/// Get the system configuration file path
pub fn system_config_file() -> Result<PathBuf> {
    Ok(system_config_dir()?.join("config.toml"))
}

/// Directory where `auth.json` is written.
///
/// The configured `auth.home_dir` wins; otherwise `~/.chatgpt-local`.
pub fn auth_home_dir(config: &Config) -> Result<PathBuf> {
    match config.auth.home_dir.as_deref().map(str::trim).filter(|s| !s.is_empty()) {
        Some(dir) => expand_path(dir),
        None => Ok(home_dir()?.join(DEFAULT_AUTH_HOME)),
    }
}

/// Additional directories searched, in order, when the write location has no `auth.json`.
///
/// Empty when a home directory is configured explicitly, so isolated deployments
/// never pick up another tool's credentials.
pub fn auth_fallback_dirs(config: &Config) -> Vec<PathBuf> {
    if config.auth.home_dir.is_some() {
        return Vec::new();
    }
    match home_dir() {
        Ok(home) => vec![home.join(CODEX_AUTH_HOME)],
        Err(_) => Vec::new(),
    }
}

/// Expand tilde (~) and environment variables in file paths
///
/// # Examples
/// ```rust
/// let expanded = chatmux::config::paths::expand_path("~/.chatgpt-local").unwrap();
/// assert!(!expanded.to_string_lossy().starts_with('~'));
/// ```
pub fn expand_path<P: AsRef<Path>>(path: P) -> Result<PathBuf> {
    let path_str = path.as_ref().to_string_lossy();

    if let Some(rest) = path_str.strip_prefix("~/") {
        return Ok(home_dir()?.join(rest));
    }

    if path_str.contains('$') {
        let expanded = shellexpand::full(&path_str).map_err(|e| {
            ProxyError::Config(format!(
                "Failed to expand environment variables in path '{}': {}",
                path_str, e
            ))
        })?;
        return Ok(PathBuf::from(expanded.as_ref()));
    }

    Ok(path.as_ref().to_path_buf())
}

/// Check if a configuration file exists and is readable
pub fn validate_config_file<P: AsRef<Path>>(path: P) -> Result<()> {
    let path = path.as_ref();

    if !path.exists() {
        return Err(ProxyError::Config(format!(
            "Configuration file '{}' does not exist",
            path.display()
        )));
    }

    if !path.is_file() {
        return Err(ProxyError::Config(format!(
            "Configuration path '{}' exists but is not a regular file",
            path.display()
        )));
    }

    std::fs::File::open(path).map_err(|e| {
        ProxyError::Config(format!(
            "Configuration file '{}' exists but cannot be read: {}\n\
             \n\
             Please check file permissions. You can fix this with: chmod 644 '{}'",
            path.display(),
            e,
            path.display()
        ))
    })?;

    Ok(())
}

/// Get all possible configuration file paths in precedence order (highest first)
pub fn config_file_paths() -> Vec<PathBuf> {
    let mut paths = Vec::new();

    if let Ok(user_config) = user_config_file() {
        paths.push(user_config);
    }

    if let Ok(system_config) = system_config_file() {
        paths.push(system_config);
    }

    paths
}

/// Ensure a directory exists, creating it if necessary
pub fn ensure_directory_exists<P: AsRef<Path>>(path: P) -> Result<()> {
    let path = path.as_ref();

    if path.exists() {
        if !path.is_dir() {
            return Err(ProxyError::Config(format!(
                "Path '{}' exists but is not a directory",
                path.display()
            )));
        }
        return Ok(());
    }

    std::fs::create_dir_all(path).map_err(|e| {
        ProxyError::Config(format!("Failed to create directory '{}': {}", path.display(), e))
    })?;

    Ok(())
}

/* --- private functions ----------------------------------------------------------------------- */

/// Get ProjectDirs instance for ChatMux
fn get_project_dirs() -> Result<ProjectDirs> {
    ProjectDirs::from(ORGANIZATION, ORG_NAME, APP_NAME).ok_or_else(|| {
        ProxyError::Config(
            "Unable to determine user directories. Please ensure your user account has a valid home directory."
                .to_string(),
        )
    })
}

fn home_dir() -> Result<PathBuf> {
    directories::UserDirs::new().map(|dirs| dirs.home_dir().to_path_buf()).ok_or_else(|| {
        ProxyError::Config("Unable to determine user home directory".to_string())
    })
}

/* --- tests ----------------------------------------------------------------------------------- */
