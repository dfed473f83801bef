//!
//! Backend rate-limit snapshots.
//!
//! The backend reports usage of its primary and secondary rate-limit windows in
//! `x-codex-*` response headers. The latest snapshot is written next to the
//! credentials so `chatmux info` can show it; persistence is best-effort.
//!
//! Authors:
//!   Jaro <yarenty@gmail.com>
//!
//! Copyright (c) 2026 SkyCorp

/* --- uses ------------------------------------------------------------------------------------ */

use std::fs;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Duration, Utc};
use reqwest::header::HeaderMap;
use serde::{Deserialize, Serialize};

use crate::auth::credentials::{now_rfc3339, write_private};
use crate::config::paths;
use crate::error::Result;

/* --- types ----------------------------------------------------------------------------------- */

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RateLimitWindow {
    /** share of the window already consumed, 0-100 */
    pub used_percent: f64,
    /** window length */
    pub window_minutes: Option<i64>,
    /** seconds until the window resets, relative to capture time */
    pub resets_in_seconds: Option<i64>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct RateLimitSnapshot {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub primary: Option<RateLimitWindow>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub secondary: Option<RateLimitWindow>,
}

///
/// Snapshot as persisted in `usage_limits.json`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredRateLimits {
    /** RFC 3339 capture timestamp */
    pub captured_at: String,
    #[serde(flatten)]
    pub snapshot: RateLimitSnapshot,
}

/* --- constants ------------------------------------------------------------------------------- */

pub const LIMITS_FILE_NAME: &str = "usage_limits.json";

const PRIMARY_HEADERS: WindowHeaders = WindowHeaders {
    used: "x-codex-primary-used-percent",
    window: "x-codex-primary-window-minutes",
    reset: "x-codex-primary-reset-after-seconds",
};

const SECONDARY_HEADERS: WindowHeaders = WindowHeaders {
    used: "x-codex-secondary-used-percent",
    window: "x-codex-secondary-window-minutes",
    reset: "x-codex-secondary-reset-after-seconds",
};

struct WindowHeaders {
    used: &'static str,
    window: &'static str,
    reset: &'static str,
}

/* --- start of code -------------------------------------------------------------------------- */

impl RateLimitSnapshot {
    ///
    /// Parse the rate-limit headers of a backend response.
    ///
    /// A window is dropped when its used-percent header is missing or not a finite
    /// number. Returns `None` when neither window is present.
    pub fn from_headers(headers: &HeaderMap) -> Option<Self> {
        let snapshot = Self {
            primary: parse_window(headers, &PRIMARY_HEADERS),
            secondary: parse_window(headers, &SECONDARY_HEADERS),
        };
        (!snapshot.is_empty()).then_some(snapshot)
    }

    pub fn is_empty(&self) -> bool {
        self.primary.is_none() && self.secondary.is_none()
    }
}

impl StoredRateLimits {
    pub fn captured_at(&self) -> Option<DateTime<Utc>> {
        DateTime::parse_from_rfc3339(self.captured_at.trim()).ok().map(|dt| dt.with_timezone(&Utc))
    }

    /// Absolute reset time of a window
    pub fn reset_at(&self, window: &RateLimitWindow) -> Option<DateTime<Utc>> {
        let captured = self.captured_at()?;
        captured.checked_add_signed(Duration::try_seconds(window.resets_in_seconds?)?)
    }
}

pub fn limits_path(home: &Path) -> PathBuf {
    home.join(LIMITS_FILE_NAME)
}

///
/// Persist a snapshot under `home` with owner-only permissions.
pub fn store_snapshot(home: &Path, snapshot: &RateLimitSnapshot) -> Result<()> {
    paths::ensure_directory_exists(home)?;
    let stored = StoredRateLimits { captured_at: now_rfc3339(), snapshot: snapshot.clone() };
    write_private(&limits_path(home), &serde_json::to_vec_pretty(&stored)?)
}

///
/// Capture the headers of a backend response, if they carry a snapshot.
///
/// # Returns
///  * `Ok(true)` when a snapshot was written, `Ok(false)` when there was nothing to store
pub fn record_from_headers(home: &Path, headers: &HeaderMap) -> Result<bool> {
    match RateLimitSnapshot::from_headers(headers) {
        Some(snapshot) => store_snapshot(home, &snapshot).map(|_| true),
        None => Ok(false),
    }
}

///
/// Load the stored snapshot.
///
/// Missing files, unparseable documents and snapshots without any window all read
/// as `None`.
pub fn load_snapshot(home: &Path) -> Option<StoredRateLimits> {
    let body = fs::read(limits_path(home)).ok()?;
    let stored: StoredRateLimits = serde_json::from_slice(&body).ok()?;
    stored.captured_at()?;
    (!stored.snapshot.is_empty()).then_some(stored)
}

fn parse_window(headers: &HeaderMap, names: &WindowHeaders) -> Option<RateLimitWindow> {
    let text = |name: &str| headers.get(name).and_then(|v| v.to_str().ok()).map(str::trim);

    let used_percent = text(names.used)?.parse::<f64>().ok().filter(|v| v.is_finite())?;
    Some(RateLimitWindow {
        used_percent,
        window_minutes: text(names.window).and_then(|v| v.parse().ok()),
        resets_in_seconds: text(names.reset).and_then(|v| v.parse().ok()),
    })
}

/* --- tests ----------------------------------------------------------------------------------- */
