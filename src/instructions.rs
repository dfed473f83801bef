//!
//! System instructions sent with every backend request.
//!
//! The backend requires an `instructions` string per model family. The text is
//! treated as opaque: it is either read once from the configured files or taken
//! from the built-in default.
//!
//! Authors:
//!   Jaro <yarenty@gmail.com>
//!
//! Copyright (c) 2026 SkyCorp

/* --- uses ------------------------------------------------------------------------------------ */

use std::path::Path;

use tracing::info;

use crate::config::Config;
use crate::config::paths::expand_path;
use crate::error::{ProxyError, Result};
use crate::models::is_codex_model;

/* --- types ----------------------------------------------------------------------------------- */

///
/// Instructions text per model family.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Instructions {
    base: String,
    codex: String,
}

/* --- constants ------------------------------------------------------------------------------- */

pub const DEFAULT_INSTRUCTIONS: &str =
    "You are a helpful AI assistant. Follow the user's instructions carefully.";

/* --- start of code -------------------------------------------------------------------------- */

impl Default for Instructions {
    fn default() -> Self {
        Self::new(DEFAULT_INSTRUCTIONS, DEFAULT_INSTRUCTIONS)
    }
}

impl Instructions {
    pub fn new(base: impl Into<String>, codex: impl Into<String>) -> Self {
        Self { base: base.into(), codex: codex.into() }
    }

    ///
    /// Load instructions from the configured files.
    ///
    /// A missing codex file falls back to the base text; a missing base file to the
    /// built-in default.
    ///
    /// # Returns
    ///  * Loaded instructions
    ///  * `ProxyError::Config` if a configured file cannot be read or is blank
    pub fn from_config(config: &Config) -> Result<Self> {
        let base = match &config.gateway.instructions_file {
            Some(path) => read_instructions(&expand_path(path)?)?,
            None => DEFAULT_INSTRUCTIONS.to_string(),
        };
        let codex = match &config.gateway.codex_instructions_file {
            Some(path) => read_instructions(&expand_path(path)?)?,
            None => base.clone(),
        };
        Ok(Self { base, codex })
    }

    /// Text for a resolved backend model
    pub fn for_model(&self, model: &str) -> &str {
        if is_codex_model(model) && !self.codex.trim().is_empty() { &self.codex } else { &self.base }
    }
}

fn read_instructions(path: &Path) -> Result<String> {
    let text = std::fs::read_to_string(path).map_err(|e| {
        ProxyError::Config(format!("Failed to read instructions file '{}': {}", path.display(), e))
    })?;
    if text.trim().is_empty() {
        return Err(ProxyError::Config(format!("Instructions file '{}' is empty", path.display())));
    }
    info!("Loaded {} bytes of instructions from {}", text.len(), path.display());
    Ok(text)
}

/* --- tests ----------------------------------------------------------------------------------- */
