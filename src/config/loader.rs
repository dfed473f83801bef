//!
//! Configuration loading system for ChatMux.
//!
//! Layers are applied lowest to highest:
//! 1. Built-in defaults
//! 2. System config file (/etc/chatmux/config.toml)
//! 3. User config file (~/.config/chatmux/config.toml)
//! 4. Environment variables (legacy names first, then CHATMUX_*)
//!
//! Files are deep-merged as TOML tables before deserialization so a later file only
//! overrides the keys it actually sets.
//!
//! Authors:
//!   Jaro <yarenty@gmail.com>
//!
//! Copyright (c) 2026 SkyCorp

/* --- uses ------------------------------------------------------------------------------------ */

use crate::config::paths;
use crate::config::{Config, LogLevel, ValidationSeverity};
use crate::error::{ProxyError, Result};
use crate::reasoning::{ReasoningDialect, ReasoningEffort, ReasoningSummary};

use std::collections::BTreeMap;
use std::env;
use std::path::Path;

/* --- constants ------------------------------------------------------------------------------- */

/** prefix for first-class environment overrides */
const ENV_PREFIX: &str = "CHATMUX_";

/** variables honoured for compatibility with older deployments */
const LEGACY_ENV_VARS: &[&str] = &[
    "CODEX_HOME",
    "CHATGPT_LOCAL_HOME",
    "CHATGPT_LOCAL_CLIENT_ID",
    "CHATGPT_LOCAL_ISSUER",
    "CHATGPT_LOCAL_REASONING_EFFORT",
    "CHATGPT_LOCAL_REASONING_SUMMARY",
    "CHATGPT_LOCAL_REASONING_COMPAT",
    "CHATGPT_LOCAL_DEBUG_MODEL",
    "PORT",
];

/* --- types ----------------------------------------------------------------------------------- */

///
/// Configuration loader implementing the Builder pattern.
///
/// Provides a fluent interface for building configuration from multiple sources
/// in the correct precedence order. Each method returns self for chaining.
pub struct ConfigLoader {
    /// Merged TOML layers seen so far
    layers: toml::Table,
    /// Environment overrides collected (legacy applied before CHATMUX_*)
    legacy_overrides: BTreeMap<String, String>,
    env_overrides: BTreeMap<String, String>,
    /// Whether defaults have been applied
    defaults_applied: bool,
}

/* --- implementations --------------------------------------------------------------------- */

impl ConfigLoader {
    /// Create a new configuration loader
    ///
    /// # Examples
    /// ```rust,no_run
    /// use chatmux::config::loader::ConfigLoader;
    ///
    /// # fn main() -> Result<(), Box<dyn std::error::Error>> {
    /// let config = ConfigLoader::new()
    ///     .with_defaults()
    ///     .with_user_config()?
    ///     .with_env_vars()?
    ///     .build()?;
    /// # Ok(())
    /// # }
    /// ```
    pub fn new() -> Self {
        Self {
            layers: toml::Table::new(),
            legacy_overrides: BTreeMap::new(),
            env_overrides: BTreeMap::new(),
            defaults_applied: false,
        }
    }

    /// Apply built-in default values
    pub fn with_defaults(mut self) -> Self {
        self.layers = toml::Table::new();
        self.defaults_applied = true;
        self
    }

    /// Load system-wide configuration file. A missing file is not an error.
    pub fn with_system_config(mut self) -> Result<Self> {
        let system_config_path = paths::system_config_file()?;

        if system_config_path.exists() {
            tracing::debug!("Loading system config from: {}", system_config_path.display());
            self.load_config_file(&system_config_path)?;
        } else {
            tracing::debug!("System config not found at: {}", system_config_path.display());
        }

        Ok(self)
    }

    /// Load user configuration file. A missing file is not an error.
    pub fn with_user_config(mut self) -> Result<Self> {
        let user_config_path = paths::user_config_file()?;

        if user_config_path.exists() {
            tracing::debug!("Loading user config from: {}", user_config_path.display());
            self.load_config_file(&user_config_path)?;
        } else {
            tracing::debug!("User config not found at: {}", user_config_path.display());
        }

        Ok(self)
    }

    /// Load configuration from specific file path
    pub fn with_config_file<P: AsRef<Path>>(mut self, path: P) -> Result<Self> {
        let path = path.as_ref();
        tracing::debug!("Loading custom config from: {}", path.display());
        self.load_config_file(path)?;
        Ok(self)
    }

    /// Apply environment variable overrides
    ///
    /// Supported environment variables:
    /// - CHATMUX_SERVER_HOST, CHATMUX_SERVER_PORT, CHATMUX_SERVER_LOG_LEVEL
    /// - CHATMUX_AUTH_HOME_DIR, CHATMUX_AUTH_CLIENT_ID, CHATMUX_AUTH_ISSUER
    /// - CHATMUX_UPSTREAM_RESPONSES_URL, CHATMUX_UPSTREAM_TIMEOUT_SECS, CHATMUX_UPSTREAM_DEBUG_MODEL
    /// - CHATMUX_REASONING_EFFORT, CHATMUX_REASONING_SUMMARY, CHATMUX_REASONING_COMPAT
    /// - CHATMUX_GATEWAY_DEFAULT_WEB_SEARCH, CHATMUX_GATEWAY_STORE_CAPACITY,
    ///   CHATMUX_GATEWAY_INSTRUCTIONS_FILE, CHATMUX_GATEWAY_CODEX_INSTRUCTIONS_FILE
    pub fn with_env_vars(mut self) -> Result<Self> {
        tracing::debug!("Loading configuration from environment variables");

        for (key, value) in env::vars() {
            if key.starts_with(ENV_PREFIX) {
                self.env_overrides.insert(key, value);
            } else if LEGACY_ENV_VARS.contains(&key.as_str()) {
                self.legacy_overrides.insert(key, value);
            }
        }

        Ok(self)
    }

    /// Build the final configuration, failing on any error-severity validation issue
    pub fn build(self) -> Result<Config> {
        let config = self.build_base()?;

        let issues = config.validate();
        for issue in issues.iter().filter(|i| i.severity == ValidationSeverity::Warning) {
            tracing::warn!("Configuration warning: {}: {}", issue.field, issue.message);
        }

        let errors: Vec<_> =
            issues.iter().filter(|i| i.severity == ValidationSeverity::Error).collect();
        if !errors.is_empty() {
            return Err(ProxyError::Config(format!(
                "Configuration validation failed with {} error(s):\n\n{}\n\
                 \n\
                 Run 'chatmux validate' for details.",
                errors.len(),
                errors
                    .iter()
                    .enumerate()
                    .map(|(i, e)| format!("{}. {}: {}", i + 1, e.field, e.message))
                    .collect::<Vec<_>>()
                    .join("\n")
            )));
        }

        Ok(config)
    }

    /// Build configuration without validation
    pub fn build_base(self) -> Result<Config> {
        if !self.defaults_applied {
            return Err(ProxyError::Config(
                "Configuration loader must call with_defaults() before build()".to_string(),
            ));
        }

        let mut config: Config = toml::Value::Table(self.layers).try_into().map_err(|e| {
            ProxyError::Config(format!("Invalid configuration values: {}", e))
        })?;

        for (key, value) in &self.legacy_overrides {
            apply_legacy_override(&mut config, key, value)?;
        }
        for (key, value) in &self.env_overrides {
            apply_env_override(&mut config, key, value)?;
        }

        tracing::debug!(
            "Config: server={}:{}, log_level={:?}, compat={:?}",
            config.server.host,
            config.server.port,
            config.server.log_level,
            config.reasoning.compat
        );

        Ok(config)
    }

    /* --- private methods ----------------------------------------------------------------- */

    /// Load and merge configuration from a TOML file
    fn load_config_file<P: AsRef<Path>>(&mut self, path: P) -> Result<()> {
        let path = path.as_ref();

        paths::validate_config_file(path)?;

        let contents = std::fs::read_to_string(path).map_err(|e| {
            ProxyError::Config(format!(
                "Failed to read configuration file '{}': {}",
                path.display(),
                e
            ))
        })?;

        let table: toml::Table = toml::from_str(&contents).map_err(|e| {
            ProxyError::Config(format!(
                "Failed to parse TOML configuration file '{}': {}\n\
                 \n\
                 Please check the syntax of your configuration file.\n\
                 Run 'chatmux validate' for more details.",
                path.display(),
                e
            ))
        })?;

        // Reject unknown values early so the error names the file
        let _: Config = toml::Value::Table(table.clone()).try_into().map_err(|e| {
            ProxyError::Config(format!(
                "Invalid values in configuration file '{}': {}",
                path.display(),
                e
            ))
        })?;

        merge_tables(&mut self.layers, table);

        tracing::debug!("Successfully loaded config from: {}", path.display());
        Ok(())
    }
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self::new()
    }
}

/* --- utility functions ------------------------------------------------------------------- */

/// Recursively overlay `other` onto `base`
fn merge_tables(base: &mut toml::Table, other: toml::Table) {
    for (key, value) in other {
        match (base.get_mut(&key), value) {
            (Some(toml::Value::Table(existing)), toml::Value::Table(incoming)) => {
                merge_tables(existing, incoming);
            }
            (_, value) => {
                base.insert(key, value);
            }
        }
    }
}

/// Apply a single CHATMUX_* variable
fn apply_env_override(config: &mut Config, key: &str, value: &str) -> Result<()> {
    match key {
        "CHATMUX_SERVER_HOST" => config.server.host = value.to_string(),
        "CHATMUX_SERVER_PORT" => config.server.port = parse_number(value, key)?,
        "CHATMUX_SERVER_LOG_LEVEL" => config.server.log_level = LogLevel::from_str(value)?,

        "CHATMUX_AUTH_HOME_DIR" => config.auth.home_dir = Some(value.to_string()),
        "CHATMUX_AUTH_CLIENT_ID" => config.auth.client_id = value.to_string(),
        "CHATMUX_AUTH_ISSUER" => config.auth.issuer = value.to_string(),

        "CHATMUX_UPSTREAM_RESPONSES_URL" => config.upstream.responses_url = value.to_string(),
        "CHATMUX_UPSTREAM_TIMEOUT_SECS" => config.upstream.timeout_secs = parse_number(value, key)?,
        "CHATMUX_UPSTREAM_DEBUG_MODEL" => config.upstream.debug_model = non_empty(value),

        "CHATMUX_REASONING_EFFORT" => config.reasoning.effort = parse_effort(value, key)?,
        "CHATMUX_REASONING_SUMMARY" => config.reasoning.summary = parse_summary(value, key)?,
        "CHATMUX_REASONING_COMPAT" => config.reasoning.compat = parse_compat(value, key)?,

        "CHATMUX_GATEWAY_DEFAULT_WEB_SEARCH" => {
            config.gateway.default_web_search = parse_bool_env(value, key)?
        }
        "CHATMUX_GATEWAY_STORE_CAPACITY" => {
            config.gateway.store_capacity = parse_number(value, key)?
        }
        "CHATMUX_GATEWAY_INSTRUCTIONS_FILE" => config.gateway.instructions_file = non_empty(value),
        "CHATMUX_GATEWAY_CODEX_INSTRUCTIONS_FILE" => {
            config.gateway.codex_instructions_file = non_empty(value)
        }

        _ => tracing::debug!("Ignoring unknown environment variable: {}", key),
    }
    Ok(())
}

/// Apply a deprecated variable with a warning
fn apply_legacy_override(config: &mut Config, key: &str, value: &str) -> Result<()> {
    let replacement = match key {
        "CODEX_HOME" | "CHATGPT_LOCAL_HOME" => "CHATMUX_AUTH_HOME_DIR",
        "CHATGPT_LOCAL_CLIENT_ID" => "CHATMUX_AUTH_CLIENT_ID",
        "CHATGPT_LOCAL_ISSUER" => "CHATMUX_AUTH_ISSUER",
        "CHATGPT_LOCAL_REASONING_EFFORT" => "CHATMUX_REASONING_EFFORT",
        "CHATGPT_LOCAL_REASONING_SUMMARY" => "CHATMUX_REASONING_SUMMARY",
        "CHATGPT_LOCAL_REASONING_COMPAT" => "CHATMUX_REASONING_COMPAT",
        "CHATGPT_LOCAL_DEBUG_MODEL" => "CHATMUX_UPSTREAM_DEBUG_MODEL",
        "PORT" => "CHATMUX_SERVER_PORT",
        _ => return Ok(()),
    };

    // CHATGPT_LOCAL_HOME outranks CODEX_HOME; BTreeMap order visits CHATGPT_ first
    if key == "CODEX_HOME" && config.auth.home_dir.is_some() {
        return Ok(());
    }

    tracing::warn!("{} is deprecated. Please use {}.", key, replacement);
    apply_env_override(config, replacement, value)
}

fn non_empty(value: &str) -> Option<String> {
    let trimmed = value.trim();
    if trimmed.is_empty() { None } else { Some(trimmed.to_string()) }
}

fn parse_number<T>(value: &str, var_name: &str) -> Result<T>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    value.trim().parse().map_err(|e| {
        ProxyError::Config(format!("Invalid {} value '{}': {}", var_name, value, e))
    })
}

fn parse_effort(value: &str, var_name: &str) -> Result<ReasoningEffort> {
    ReasoningEffort::parse(value).ok_or_else(|| {
        ProxyError::Config(format!(
            "Invalid {} value '{}'. Valid values: minimal, low, medium, high, none",
            var_name, value
        ))
    })
}

fn parse_summary(value: &str, var_name: &str) -> Result<ReasoningSummary> {
    ReasoningSummary::parse(value).ok_or_else(|| {
        ProxyError::Config(format!(
            "Invalid {} value '{}'. Valid values: auto, concise, detailed, none",
            var_name, value
        ))
    })
}

fn parse_compat(value: &str, var_name: &str) -> Result<ReasoningDialect> {
    ReasoningDialect::parse(value).ok_or_else(|| {
        ProxyError::Config(format!(
            "Invalid {} value '{}'. Valid values: think-tags, o3, legacy, suppressed",
            var_name, value
        ))
    })
}

/// Parse boolean value from environment variable
fn parse_bool_env(value: &str, var_name: &str) -> Result<bool> {
    match value.to_lowercase().as_str() {
        "true" | "yes" | "1" | "on" | "enabled" => Ok(true),
        "false" | "no" | "0" | "off" | "disabled" => Ok(false),
        _ => Err(ProxyError::Config(format!(
            "Invalid boolean value for {}: '{}'\n\
             Valid values: true/false, yes/no, 1/0, on/off, enabled/disabled",
            var_name, value
        ))),
    }
}

/* --- tests ------------------------------------------------------------------------------- */
