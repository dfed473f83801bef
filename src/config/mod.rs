//!
//! Configuration management for ChatMux.
//!
//! This module provides a layered configuration system using:
//! - Platform-native configuration directories (XDG on Linux, standard paths on macOS/Windows)
//! - TOML format for human-readable configuration files
//! - Multi-layered configuration hierarchy (CLI args > env vars > user config > defaults)
//!
//! Split into:
//! - `loader.rs` - Configuration loading logic
//! - `paths.rs` - Platform-native path resolution (config files, credential home)
//! - `validation.rs` - Configuration validation
//! - `cli.rs` - `config init` / `config show` commands
//!
//! Authors:
//!   Jaro <yarenty@gmail.com>
//!
//! Copyright (c) 2026 SkyCorp

/* --- modules --------------------------------------------------------------------------------- */

pub mod cli;
pub mod loader;
pub mod paths;
pub mod validation;

/* --- uses ------------------------------------------------------------------------------------ */

use crate::error::{ProxyError, Result};
use crate::reasoning::{ReasoningDialect, ReasoningEffort, ReasoningSummary};
use serde::{Deserialize, Serialize};

pub use validation::{ValidationIssue, ValidationSeverity};

/* --- types ----------------------------------------------------------------------------------- */

///
/// Main application configuration structure.
///
/// Every section is optional in TOML; missing sections take their defaults.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// HTTP server configuration
    #[serde(default)]
    pub server: ServerConfig,
    /// OAuth client and credential storage configuration
    #[serde(default)]
    pub auth: AuthConfig,
    /// Backend endpoint configuration
    #[serde(default)]
    pub upstream: UpstreamConfig,
    /// Reasoning defaults applied when the client does not override them
    #[serde(default)]
    pub reasoning: ReasoningConfig,
    /// Gateway feature switches
    #[serde(default)]
    pub gateway: GatewayConfig,
}

///
/// HTTP server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Interface to bind
    #[serde(default = "default_host")]
    pub host: String,
    /// HTTP server port number
    #[serde(default = "default_port")]
    pub port: u16,
    /// Application logging level
    #[serde(default = "default_log_level")]
    pub log_level: LogLevel,
}

///
/// OAuth client and credential storage configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthConfig {
    /// Directory holding `auth.json` and `usage_limits.json`.
    /// Unset means `~/.chatgpt-local` with read fallback to `~/.codex`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub home_dir: Option<String>,
    /// OAuth client identifier registered with the identity provider
    #[serde(default = "default_client_id")]
    pub client_id: String,
    /// OAuth issuer base URL
    #[serde(default = "default_issuer")]
    pub issuer: String,
}

///
/// Backend endpoint configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpstreamConfig {
    /// Responses endpoint URL
    #[serde(default = "default_responses_url")]
    pub responses_url: String,
    /// Overall timeout for one streamed backend request, in seconds
    #[serde(default = "default_upstream_timeout")]
    pub timeout_secs: u64,
    /// Forces every request onto this model when set
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub debug_model: Option<String>,
}

///
/// Reasoning defaults.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReasoningConfig {
    #[serde(default = "default_effort")]
    pub effort: ReasoningEffort,
    #[serde(default = "default_summary")]
    pub summary: ReasoningSummary,
    /// Client-facing reasoning dialect
    #[serde(default = "default_compat")]
    pub compat: ReasoningDialect,
}

///
/// Gateway feature switches.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    /// Add the web_search passthrough tool unless the client opts out
    #[serde(default)]
    pub default_web_search: bool,
    /// Maximum responses kept for `store: true` requests
    #[serde(default = "default_store_capacity")]
    pub store_capacity: usize,
    /// File with base instructions (built-in text when unset)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub instructions_file: Option<String>,
    /// File with instructions for the codex model family
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub codex_instructions_file: Option<String>,
}

///
/// Logging level enumeration.
///
/// Defines available log levels compatible with tracing crate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Trace,
    Debug,
    Info,
    #[serde(alias = "warning")]
    Warn,
    Error,
}

/* --- defaults -------------------------------------------------------------------------------- */

fn default_host() -> String {
    "127.0.0.1".to_string()
}

/// Default HTTP port
fn default_port() -> u16 {
    8000
}

/// Default logging level
fn default_log_level() -> LogLevel {
    LogLevel::Info
}

fn default_client_id() -> String {
    "app_EMoamEEZ73f0CkXaXp7hrann".to_string()
}

fn default_issuer() -> String {
    "https://auth.openai.com".to_string()
}

fn default_responses_url() -> String {
    "https://chatgpt.com/backend-api/codex/responses".to_string()
}

/// Reasoning responses can hold the connection open for minutes
fn default_upstream_timeout() -> u64 {
    600
}

fn default_effort() -> ReasoningEffort {
    ReasoningEffort::Medium
}

fn default_summary() -> ReasoningSummary {
    ReasoningSummary::Auto
}

fn default_compat() -> ReasoningDialect {
    ReasoningDialect::Bracketed
}

fn default_store_capacity() -> usize {
    200
}

/* --- implementations --------------------------------------------------------------------- */

impl Default for ServerConfig {
    fn default() -> Self {
        Self { host: default_host(), port: default_port(), log_level: default_log_level() }
    }
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self { home_dir: None, client_id: default_client_id(), issuer: default_issuer() }
    }
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            responses_url: default_responses_url(),
            timeout_secs: default_upstream_timeout(),
            debug_model: None,
        }
    }
}

impl Default for ReasoningConfig {
    fn default() -> Self {
        Self { effort: default_effort(), summary: default_summary(), compat: default_compat() }
    }
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            default_web_search: false,
            store_capacity: default_store_capacity(),
            instructions_file: None,
            codex_instructions_file: None,
        }
    }
}

impl Config {
    /// Load configuration from the standard hierarchy:
    /// 1. Environment variables (CLI flags are applied by the caller)
    /// 2. User config file (~/.config/chatmux/config.toml)
    /// 3. System config file (/etc/chatmux/config.toml)
    /// 4. Built-in defaults (lowest priority)
    ///
    /// # Examples
    /// ```rust,no_run
    /// use chatmux::config::Config;
    ///
    /// # fn main() -> Result<(), Box<dyn std::error::Error>> {
    /// let config = Config::load()?;
    /// println!("Gateway will listen on {}:{}", config.server.host, config.server.port);
    /// # Ok(())
    /// # }
    /// ```
    pub fn load() -> Result<Self> {
        loader::ConfigLoader::new()
            .with_defaults()
            .with_system_config()?
            .with_user_config()?
            .with_env_vars()?
            .build()
    }

    /// Validate the current configuration and return every issue found.
    pub fn validate(&self) -> Vec<ValidationIssue> {
        validation::ConfigValidator::new(self).issues()
    }

    /// Token endpoint derived from the issuer
    pub fn token_url(&self) -> String {
        format!("{}/oauth/token", self.auth.issuer.trim_end_matches('/'))
    }

    /// Authorize endpoint derived from the issuer
    pub fn authorize_url(&self) -> String {
        format!("{}/oauth/authorize", self.auth.issuer.trim_end_matches('/'))
    }

    /// Get configuration file example as TOML string
    pub fn example_toml() -> &'static str {
        r#"# ChatMux Configuration
# This file should be placed at:
#   Linux/Unix: ~/.config/chatmux/config.toml
#   macOS: ~/Library/Application Support/com.SkyCorp.chatmux/config.toml
#   Windows: %APPDATA%/SkyCorp/chatmux/config/config.toml

[server]
# Interface to bind (default: 127.0.0.1)
host = "127.0.0.1"

# HTTP server port (default: 8000)
port = 8000

# Logging level: trace, debug, info, warn, error (default: info)
log_level = "info"

[auth]
# Directory holding auth.json (default: ~/.chatgpt-local)
# home_dir = "~/.chatgpt-local"

[upstream]
# Backend request timeout in seconds (default: 600)
timeout_secs = 600

# Force every request onto one model
# debug_model = "gpt-5"

[reasoning]
# Effort: minimal, low, medium, high, none (default: medium)
effort = "medium"

# Summary: auto, concise, detailed, none (default: auto)
summary = "auto"

# How reasoning reaches clients (default: think-tags)
# - think-tags: <think>...</think> wrapped into the content channel
# - o3: separate structured "reasoning" field
# - legacy: flat reasoning_summary / reasoning fields
# - suppressed: requested from the backend but never shown
compat = "think-tags"

[gateway]
# Offer web_search to the backend unless the client opts out (default: false)
default_web_search = false

# Responses kept in memory for store=true requests (default: 200)
store_capacity = 200

# Custom instructions text files
# instructions_file = "~/.config/chatmux/prompt.md"
# codex_instructions_file = "~/.config/chatmux/prompt_gpt5_codex.md"
"#
    }
}

impl LogLevel {
    /// Convert to tracing::Level for logging setup
    pub fn to_tracing_level(&self) -> tracing::Level {
        match self {
            LogLevel::Trace => tracing::Level::TRACE,
            LogLevel::Debug => tracing::Level::DEBUG,
            LogLevel::Info => tracing::Level::INFO,
            LogLevel::Warn => tracing::Level::WARN,
            LogLevel::Error => tracing::Level::ERROR,
        }
    }

    /// Check if trace-level logging is enabled
    pub fn is_trace_enabled(self) -> bool {
        matches!(self, LogLevel::Trace | LogLevel::Debug)
    }

    /// Parse from string (case-insensitive)
    pub fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "trace" => Ok(LogLevel::Trace),
            "debug" => Ok(LogLevel::Debug),
            "info" => Ok(LogLevel::Info),
            "warn" | "warning" => Ok(LogLevel::Warn),
            "error" => Ok(LogLevel::Error),
            _ => Err(ProxyError::Config(format!(
                "Invalid log level '{}'. Valid levels are: trace, debug, info, warn, error",
                s
            ))),
        }
    }
}

/* --- tests ----------------------------------------------------------------------------------- */

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_documented_values() {
        let config = Config::default();
        assert_eq!(config.server.host, "127.0.0.1");
        assert_eq!(config.server.port, 8000);
        assert_eq!(config.upstream.timeout_secs, 600);
        assert_eq!(config.reasoning.compat, ReasoningDialect::Bracketed);
        assert_eq!(config.gateway.store_capacity, 200);
        assert!(config.auth.home_dir.is_none());
    }

    #[test]
    fn test_endpoints_derive_from_issuer() {
        let mut config = Config::default();
        config.auth.issuer = "http://127.0.0.1:9999/".to_string();
        assert_eq!(config.token_url(), "http://127.0.0.1:9999/oauth/token");
        assert_eq!(config.authorize_url(), "http://127.0.0.1:9999/oauth/authorize");
    }

    #[test]
    fn test_example_toml_parses() {
        let config: Config = toml::from_str(Config::example_toml()).expect("Example should parse");
        assert_eq!(config.server.port, 8000);
        assert_eq!(config.reasoning.effort, ReasoningEffort::Medium);
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let config: Config =
            toml::from_str("[reasoning]\ncompat = \"o3\"\n").expect("Partial config should parse");
        assert_eq!(config.reasoning.compat, ReasoningDialect::Structured);
        assert_eq!(config.server.port, 8000);
    }

    #[test]
    fn test_log_level_parsing() {
        assert_eq!(LogLevel::from_str("WARNING").expect("Should parse"), LogLevel::Warn);
        assert!(LogLevel::from_str("loud").is_err());
    }
}
