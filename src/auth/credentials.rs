//!
//! Credential store: the `auth.json` token bundle on disk.
//!
//! Pure I/O. The file is read from the configured home directory (falling back
//! to the legacy locations when no home is configured) and written back to the
//! home directory only, atomically and with owner-only permissions. Parsed
//! contents are cached and re-read only when the file's mtime changes.
//!
//! Authors:
//!   Jaro <yarenty@gmail.com>
//!
//! Copyright (c) 2026 SkyCorp

/* --- uses ------------------------------------------------------------------------------------ */

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::SystemTime;

use chrono::{DateTime, NaiveDateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::auth::jwt;
use crate::config::{Config, paths};
use crate::error::{ProxyError, Result};

/* --- types ----------------------------------------------------------------------------------- */

///
/// OAuth token set as persisted in `auth.json`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenSet {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id_token: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub access_token: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub account_id: Option<String>,
}

///
/// Full `auth.json` document.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthFile {
    /** API key minted by the optional token-exchange grant */
    #[serde(rename = "OPENAI_API_KEY", default)]
    pub openai_api_key: Option<String>,
    #[serde(default)]
    pub tokens: Option<TokenSet>,
    /** RFC 3339 UTC timestamp of the last successful exchange or refresh */
    #[serde(default)]
    pub last_refresh: Option<String>,
}

///
/// Reads and writes `auth.json`.
///
/// Shared between the token manager and the CLI; the in-memory cache is
/// guarded by its own mutex.
pub struct CredentialStore {
    /** directory written to (and read first) */
    home: PathBuf,
    /** read-only fallback directories, in priority order */
    fallbacks: Vec<PathBuf>,
    cache: Mutex<Option<CachedAuth>>,
}

struct CachedAuth {
    path: PathBuf,
    modified: Option<SystemTime>,
    auth: AuthFile,
}

/* --- constants ------------------------------------------------------------------------------- */

pub const AUTH_FILE_NAME: &str = "auth.json";

/* --- start of code -------------------------------------------------------------------------- */

impl TokenSet {
    /// Account id from the stored field or, failing that, the id token claim
    pub fn effective_account_id(&self) -> Option<String> {
        self.account_id
            .clone()
            .filter(|id| !id.is_empty())
            .or_else(|| self.id_token.as_deref().and_then(jwt::account_id))
    }
}

impl AuthFile {
    /// Fresh bundle stamped with the current time
    pub fn new(tokens: TokenSet, openai_api_key: Option<String>) -> Self {
        Self { openai_api_key, tokens: Some(tokens), last_refresh: Some(now_rfc3339()) }
    }

    /// Parsed `last_refresh`, tolerating a missing offset (treated as UTC)
    pub fn last_refresh_at(&self) -> Option<DateTime<Utc>> {
        parse_timestamp(self.last_refresh.as_deref()?)
    }
}

impl CredentialStore {
    ///
    /// Store rooted at the configured credential home.
    ///
    /// # Arguments
    ///  * `config` - application configuration (`auth.home_dir`)
    ///
    /// # Returns
    ///  * Store reading from the home and, if unconfigured, the legacy fallbacks
    pub fn from_config(config: &Config) -> Result<Self> {
        let home = paths::auth_home_dir(config)?;
        Ok(Self::with_fallbacks(home, paths::auth_fallback_dirs(config)))
    }

    /// Store with a single directory and no fallbacks
    pub fn new(home: impl Into<PathBuf>) -> Self {
        Self::with_fallbacks(home.into(), Vec::new())
    }

    pub fn with_fallbacks(home: PathBuf, fallbacks: Vec<PathBuf>) -> Self {
        let fallbacks = fallbacks.into_iter().filter(|dir| *dir != home).collect();
        Self { home, fallbacks, cache: Mutex::new(None) }
    }

    pub fn home(&self) -> &Path {
        &self.home
    }

    /// Path the bundle is written to
    pub fn auth_path(&self) -> PathBuf {
        self.home.join(AUTH_FILE_NAME)
    }

    ///
    /// Load the first readable bundle.
    ///
    /// Unreadable or malformed files are skipped with a warning so a broken
    /// fallback never hides a good one.
    ///
    /// # Returns
    ///  * `Some(bundle)` from the first location that parses
    ///  * `None` when no location holds a usable file
    pub fn load(&self) -> Result<Option<AuthFile>> {
        for dir in std::iter::once(&self.home).chain(self.fallbacks.iter()) {
            let path = dir.join(AUTH_FILE_NAME);
            let Ok(metadata) = fs::metadata(&path) else { continue };
            let modified = metadata.modified().ok();

            if let Some(cached) = self.cached(&path, modified) {
                return Ok(Some(cached));
            }

            match fs::read_to_string(&path)
                .map_err(ProxyError::from)
                .and_then(|text| serde_json::from_str::<AuthFile>(&text).map_err(ProxyError::from))
            {
                Ok(auth) => {
                    debug!("Loaded credentials from {}", path.display());
                    self.remember(path, modified, auth.clone());
                    return Ok(Some(auth));
                }
                Err(e) => warn!("Skipping unreadable credential file {}: {}", path.display(), e),
            }
        }
        Ok(None)
    }

    ///
    /// Persist the bundle to the home directory.
    ///
    /// Written to a sibling temp file with owner-only permissions, then renamed
    /// over `auth.json` so readers never see a partial document.
    pub fn save(&self, auth: &AuthFile) -> Result<()> {
        paths::ensure_directory_exists(&self.home)?;

        let path = self.auth_path();
        let tmp = self.home.join(format!(".{AUTH_FILE_NAME}.tmp"));
        let body = serde_json::to_vec_pretty(auth)?;

        write_private(&tmp, &body)?;
        fs::rename(&tmp, &path)?;

        let modified = fs::metadata(&path).and_then(|m| m.modified()).ok();
        self.remember(path, modified, auth.clone());
        Ok(())
    }

    /* --- private methods ----------------------------------------------------------------- */

    fn cached(&self, path: &Path, modified: Option<SystemTime>) -> Option<AuthFile> {
        let guard = self.cache.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        guard
            .as_ref()
            .filter(|c| c.path == path && modified.is_some() && c.modified == modified)
            .map(|c| c.auth.clone())
    }

    fn remember(&self, path: PathBuf, modified: Option<SystemTime>, auth: AuthFile) {
        let mut guard = self.cache.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        *guard = Some(CachedAuth { path, modified, auth });
    }
}

/// Write `body` to `path` readable by the owner only
pub(crate) fn write_private(path: &Path, body: &[u8]) -> Result<()> {
    let mut options = fs::OpenOptions::new();
    options.write(true).create(true).truncate(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(0o600);
    }

    let mut file = options.open(path)?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        file.set_permissions(fs::Permissions::from_mode(0o600))?;
    }
    file.write_all(body)?;
    file.sync_all()?;
    Ok(())
}

/// Current time as `2026-01-02T03:04:05.123456Z`
pub fn now_rfc3339() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_timestamp(value: &str) -> Option<DateTime<Utc>> {
    let value = value.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(value) {
        return Some(dt.with_timezone(&Utc));
    }
    NaiveDateTime::parse_from_str(value, "%Y-%m-%dT%H:%M:%S%.f").ok().map(|naive| naive.and_utc())
}

/* --- tests ----------------------------------------------------------------------------------- */
