//! Configuration module tests
//!
//! Tests for configuration layering: TOML files, CHATMUX_* variables and the
//! deprecated variable names.
//!
//! Uses temp-env to safely manage environment variables during tests, automatically
//! restoring them after each test completes.

use std::fs;
use std::path::Path;

use chatmux::config::cli::ConfigCli;
use chatmux::config::loader::ConfigLoader;
use chatmux::config::{Config, LogLevel, paths};
use chatmux::reasoning::{ReasoningDialect, ReasoningEffort, ReasoningSummary};
use tempfile::TempDir;
use temp_env::with_vars;

/** variables that would otherwise leak in from the developer's shell */
const CLEARED_VARS: &[&str] = &[
    "CHATMUX_SERVER_HOST",
    "CHATMUX_SERVER_PORT",
    "CHATMUX_SERVER_LOG_LEVEL",
    "CHATMUX_AUTH_HOME_DIR",
    "CHATMUX_REASONING_EFFORT",
    "CHATMUX_REASONING_COMPAT",
    "CHATMUX_GATEWAY_DEFAULT_WEB_SEARCH",
    "CHATMUX_UPSTREAM_DEBUG_MODEL",
    "CHATGPT_LOCAL_HOME",
    "CHATGPT_LOCAL_REASONING_EFFORT",
    "CHATGPT_LOCAL_REASONING_COMPAT",
    "CODEX_HOME",
    "PORT",
];

/// Run `f` with every known variable cleared and `vars` set
fn with_env<F: FnOnce()>(vars: &[(&str, &str)], f: F) {
    let mut all: Vec<(&str, Option<&str>)> = CLEARED_VARS.iter().map(|k| (*k, None)).collect();
    for (key, value) in vars {
        all.retain(|(k, _)| k != key);
        all.push((*key, Some(*value)));
    }
    with_vars(all, f);
}

fn load_from(file: Option<&Path>) -> chatmux::error::Result<Config> {
    let mut loader = ConfigLoader::new().with_defaults();
    if let Some(file) = file {
        loader = loader.with_config_file(file)?;
    }
    loader.with_env_vars()?.build()
}

fn write_config(dir: &TempDir, body: &str) -> std::path::PathBuf {
    let path = dir.path().join("config.toml");
    fs::write(&path, body).unwrap();
    path
}

#[test]
fn test_defaults() {
    with_env(&[], || {
        let config = load_from(None).expect("defaults are valid");
        assert_eq!(config.server.host, "127.0.0.1");
        assert_eq!(config.server.port, 8000);
        assert_eq!(config.server.log_level, LogLevel::Info);
        assert_eq!(config.auth.client_id, "app_EMoamEEZ73f0CkXaXp7hrann");
        assert_eq!(config.auth.issuer, "https://auth.openai.com");
        assert_eq!(config.upstream.responses_url, "https://chatgpt.com/backend-api/codex/responses");
        assert_eq!(config.upstream.timeout_secs, 600);
        assert_eq!(config.reasoning.effort, ReasoningEffort::Medium);
        assert_eq!(config.reasoning.summary, ReasoningSummary::Auto);
        assert_eq!(config.reasoning.compat, ReasoningDialect::Bracketed);
        assert!(!config.gateway.default_web_search);
        assert_eq!(config.gateway.store_capacity, 200);
        assert_eq!(config.token_url(), "https://auth.openai.com/oauth/token");
        assert_eq!(config.authorize_url(), "https://auth.openai.com/oauth/authorize");
    });
}

#[test]
fn test_file_overrides_defaults_partially() {
    let dir = TempDir::new().unwrap();
    let path = write_config(
        &dir,
        r#"
[server]
port = 9100

[reasoning]
compat = "o3"
effort = "high"
"#,
    );

    with_env(&[], || {
        let config = load_from(Some(&path)).unwrap();
        assert_eq!(config.server.port, 9100);
        assert_eq!(config.server.host, "127.0.0.1");
        assert_eq!(config.reasoning.compat, ReasoningDialect::Structured);
        assert_eq!(config.reasoning.effort, ReasoningEffort::High);
        assert_eq!(config.reasoning.summary, ReasoningSummary::Auto);
    });
}

#[test]
fn test_env_overrides_file() {
    let dir = TempDir::new().unwrap();
    let path = write_config(&dir, "[server]\nport = 9100\n");

    with_env(
        &[
            ("CHATMUX_SERVER_PORT", "9200"),
            ("CHATMUX_REASONING_COMPAT", "legacy"),
            ("CHATMUX_GATEWAY_DEFAULT_WEB_SEARCH", "on"),
            ("CHATMUX_SERVER_LOG_LEVEL", "WARNING"),
        ],
        || {
            let config = load_from(Some(&path)).unwrap();
            assert_eq!(config.server.port, 9200);
            assert_eq!(config.reasoning.compat, ReasoningDialect::LegacyFlat);
            assert!(config.gateway.default_web_search);
            assert_eq!(config.server.log_level, LogLevel::Warn);
        },
    );
}

#[test]
fn test_legacy_variables_lose_to_new_names() {
    with_env(
        &[
            ("PORT", "7000"),
            ("CHATGPT_LOCAL_REASONING_EFFORT", "low"),
            ("CHATGPT_LOCAL_REASONING_COMPAT", "o3"),
            ("CHATMUX_REASONING_COMPAT", "suppressed"),
        ],
        || {
            let config = load_from(None).unwrap();
            assert_eq!(config.server.port, 7000);
            assert_eq!(config.reasoning.effort, ReasoningEffort::Low);
            assert_eq!(config.reasoning.compat, ReasoningDialect::Suppressed);
        },
    );
}

#[test]
fn test_legacy_home_variables() {
    with_env(&[("CODEX_HOME", "/tmp/codex"), ("CHATGPT_LOCAL_HOME", "/tmp/local")], || {
        let config = load_from(None).unwrap();
        assert_eq!(config.auth.home_dir.as_deref(), Some("/tmp/local"));
    });

    with_env(&[("CODEX_HOME", "/tmp/codex")], || {
        let config = load_from(None).unwrap();
        assert_eq!(config.auth.home_dir.as_deref(), Some("/tmp/codex"));
        assert_eq!(paths::auth_home_dir(&config).unwrap(), Path::new("/tmp/codex"));
        assert!(paths::auth_fallback_dirs(&config).is_empty());
    });
}

#[test]
fn test_invalid_values_are_rejected() {
    with_env(&[("CHATMUX_SERVER_PORT", "not-a-port")], || {
        let err = load_from(None).unwrap_err().to_string();
        assert!(err.contains("CHATMUX_SERVER_PORT"), "got: {}", err);
    });

    with_env(&[("CHATMUX_GATEWAY_DEFAULT_WEB_SEARCH", "maybe")], || {
        assert!(load_from(None).is_err());
    });

    with_env(&[("CHATMUX_REASONING_EFFORT", "extreme")], || {
        let err = load_from(None).unwrap_err().to_string();
        assert!(err.contains("minimal, low, medium, high"), "got: {}", err);
    });

    // Passes parsing, fails validation
    with_env(&[("CHATMUX_SERVER_PORT", "0")], || {
        let err = load_from(None).unwrap_err().to_string();
        assert!(err.contains("server.port"), "got: {}", err);
    });
}

#[test]
fn test_invalid_file_names_the_file() {
    let dir = TempDir::new().unwrap();
    let path = write_config(&dir, "[reasoning]\ncompat = \"sideways\"\n");

    with_env(&[], || {
        let err = load_from(Some(&path)).unwrap_err().to_string();
        assert!(err.contains("config.toml"), "got: {}", err);
    });

    let broken = write_config(&dir, "[server\nport = 1");
    with_env(&[], || {
        let err = load_from(Some(&broken)).unwrap_err().to_string();
        assert!(err.contains("Failed to parse TOML"), "got: {}", err);
    });
}

#[test]
fn test_missing_file_is_an_error() {
    let dir = TempDir::new().unwrap();
    with_env(&[], || {
        let err = load_from(Some(&dir.path().join("absent.toml"))).unwrap_err().to_string();
        assert!(err.contains("does not exist"));
    });
}

#[test]
fn test_example_config_round_trip() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("nested").join("config.toml");
    ConfigCli::write_example(&path).unwrap();

    with_env(&[], || {
        let config = load_from(Some(&path)).unwrap();
        assert_eq!(config.server.port, 8000);
        assert_eq!(config.reasoning.compat, ReasoningDialect::Bracketed);

        let rendered = ConfigCli::render(&config).unwrap();
        assert!(rendered.contains("[reasoning]"));
        assert!(rendered.contains("compat = \"think-tags\""));
    });
}

#[test]
fn test_home_dir_expansion() {
    with_env(&[("CHATMUX_AUTH_HOME_DIR", "$CHATMUX_TEST_ROOT/creds"), ("CHATMUX_TEST_ROOT", "/srv/chatmux")], || {
        let config = load_from(None).unwrap();
        assert_eq!(paths::auth_home_dir(&config).unwrap(), Path::new("/srv/chatmux/creds"));
    });
}
