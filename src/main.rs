//! # ChatMux - OpenAI-compatible gateway for the ChatGPT responses backend
//!
//! Command line entry point: `login`, `serve`, `info`, `doctor`, `validate` and
//! `config`. Running without a command starts the gateway.
//!
//! ## Quick Start
//!
//! ```bash
//! chatmux login              # one-time OAuth login in the browser
//! chatmux serve --port 8000  # start the gateway
//!
//! curl http://localhost:8000/v1/chat/completions \
//!   -H "Content-Type: application/json" \
//!   -d '{"model": "gpt-5", "messages": [{"role": "user", "content": "Hello!"}]}'
//! ```
//!
//! Authors:
//!   Jaro <yarenty@gmail.com>
//!
//! Copyright (c) 2026 SkyCorp

/* --- uses ------------------------------------------------------------------------------------ */

use std::env;
use std::io::ErrorKind;
use std::path::Path;
use std::sync::Arc;

use anyhow::Context;
use axum::Router;
use chrono::Utc;
use serde_json::{Value, json};
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

use chatmux::auth::tokens::needs_refresh;
use chatmux::auth::{AuthFile, CredentialStore, LoginFlow, jwt};
use chatmux::config::cli::ConfigCli;
use chatmux::config::loader::ConfigLoader;
use chatmux::config::paths;
use chatmux::error::Result;
use chatmux::limits::{self, RateLimitWindow, StoredRateLimits};
use chatmux::reasoning::{ReasoningDialect, ReasoningEffort, ReasoningSummary};
use chatmux::{Config, ProxyError, ValidationIssue, ValidationSeverity, build_router, server};

/* --- types ----------------------------------------------------------------------------------- */

///
/// `serve` flags, applied on top of the loaded configuration.
#[derive(Debug, Default, PartialEq)]
struct ServeOptions {
    host: Option<String>,
    port: Option<u16>,
    effort: Option<ReasoningEffort>,
    summary: Option<ReasoningSummary>,
    compat: Option<ReasoningDialect>,
}

/* --- constants ------------------------------------------------------------------------------ */

/** the version as defined in cargo.toml */
const VERSION: &str = env!("CARGO_PKG_VERSION");

/** exit code when the login callback port is taken */
const EXIT_PORT_IN_USE: i32 = 13;

/* --- start of code -------------------------------------------------------------------------- */

///
/// Main application entry point.
///
/// Loads `.env`, dispatches the command and exits with its status code.
#[tokio::main]
async fn main() {
    let _ = dotenvy::dotenv();

    let args: Vec<String> = env::args().skip(1).collect();
    let code = dispatch(&args).await;
    std::process::exit(code);
}

async fn dispatch(args: &[String]) -> i32 {
    let command = args.first().map(String::as_str).unwrap_or("serve");
    let rest = if args.is_empty() { &[][..] } else { &args[1..] };

    match command {
        "--version" | "-V" => {
            println!("chatmux {}", VERSION);
            0
        }
        "--help" | "-h" => {
            print_help();
            0
        }
        "serve" => report(run_serve(rest).await),
        "login" => match run_login(rest).await {
            Ok(code) => code,
            Err(e) => report_anyhow(e),
        },
        "info" => match run_info(rest) {
            Ok(code) => code,
            Err(e) => report_anyhow(e),
        },
        "doctor" => {
            run_doctor();
            0
        }
        "validate" => run_validate(),
        "config" => run_config(rest),
        other => {
            if other.starts_with('-') {
                eprintln!("Error: Unknown option: {}", other);
                eprintln!();
                print_help();
            } else {
                eprintln!("Error: Unknown command: {}", other);
                eprintln!();
                eprintln!("Run 'chatmux --help' for the list of commands.");
            }
            1
        }
    }
}

///
/// Print help information for the ChatMux CLI.
fn print_help() {
    println!("ChatMux v{}", VERSION);
    println!("OpenAI-compatible gateway in front of the ChatGPT responses backend");
    println!();
    println!("USAGE:");
    println!("    chatmux [COMMAND] [OPTIONS]");
    println!();
    println!("COMMANDS:");
    println!("    serve               Start the gateway (default)");
    println!("    login               Sign in with ChatGPT and store credentials");
    println!("    info                Show the signed-in account and stored rate limits");
    println!("    doctor              Check configuration and credentials");
    println!("    validate            Validate configuration and exit");
    println!("    config init         Write an example configuration file");
    println!("    config show         Print the effective configuration");
    println!();
    println!("SERVE OPTIONS:");
    println!("    --host <HOST>                  Interface to bind (default: 127.0.0.1)");
    println!("    --port <PORT>                  Port to listen on (default: 8000)");
    println!("    --reasoning-effort <EFFORT>    none, minimal, low, medium, high");
    println!("    --reasoning-summary <SUMMARY>  auto, concise, detailed, none");
    println!("    --reasoning-compat <DIALECT>   think-tags, o3, legacy, suppressed");
    println!();
    println!("OTHER OPTIONS:");
    println!("    login --no-browser  Print the login URL instead of opening a browser");
    println!("    info --json         Print account information as JSON");
    println!("    config init --force Overwrite an existing configuration file");
    println!("    -h, --help          Print help information");
    println!("    -V, --version       Print version information");
    println!();
    println!("CONFIGURATION:");
    println!("    ~/.config/chatmux/config.toml, /etc/chatmux/config.toml and");
    println!("    CHATMUX_<SECTION>_<KEY> environment variables, e.g. CHATMUX_SERVER_PORT=8001");
    println!();
    println!("For more information, visit: https://github.com/yarenty/chatmux");
}

/// Print an error line by line and return the failure exit code
fn report(result: Result<()>) -> i32 {
    match result {
        Ok(()) => 0,
        Err(e) => {
            let error_msg = format!("{}", e);
            eprintln!("Error:");
            for line in error_msg.lines() {
                eprintln!("{}", line);
            }
            1
        }
    }
}

fn report_anyhow(error: anyhow::Error) -> i32 {
    eprintln!("Error: {:#}", error);
    1
}

///
/// Parse `serve` flags.
///
/// # Returns
///  * Parsed options
///  * A message naming the offending flag
fn parse_serve_args(args: &[String]) -> std::result::Result<ServeOptions, String> {
    let mut options = ServeOptions::default();
    let mut iter = args.iter();

    while let Some(flag) = iter.next() {
        let mut value = || iter.next().cloned().ok_or_else(|| format!("Missing value for {}", flag));
        match flag.as_str() {
            "--host" => options.host = Some(value()?),
            "--port" | "-p" => {
                let raw = value()?;
                let port = raw.parse::<u16>().map_err(|_| format!("Invalid value for --port: {}", raw))?;
                options.port = Some(port);
            }
            "--reasoning-effort" => {
                let raw = value()?;
                options.effort = Some(
                    ReasoningEffort::parse(&raw)
                        .ok_or_else(|| format!("Invalid value for --reasoning-effort: {}", raw))?,
                );
            }
            "--reasoning-summary" => {
                let raw = value()?;
                options.summary = Some(
                    ReasoningSummary::parse(&raw)
                        .ok_or_else(|| format!("Invalid value for --reasoning-summary: {}", raw))?,
                );
            }
            "--reasoning-compat" => {
                let raw = value()?;
                options.compat = Some(
                    ReasoningDialect::parse(&raw)
                        .ok_or_else(|| format!("Invalid value for --reasoning-compat: {}", raw))?,
                );
            }
            other => return Err(format!("Unknown option for serve: {}", other)),
        }
    }
    Ok(options)
}

impl ServeOptions {
    /// CLI flags are the highest configuration layer
    fn apply(self, config: &mut Config) {
        if let Some(host) = self.host {
            config.server.host = host;
        }
        if let Some(port) = self.port {
            config.server.port = port;
        }
        if let Some(effort) = self.effort {
            config.reasoning.effort = effort;
        }
        if let Some(summary) = self.summary {
            config.reasoning.summary = summary;
        }
        if let Some(compat) = self.compat {
            config.reasoning.compat = compat;
        }
    }
}

///
/// Load configuration, apply flags and run the gateway until interrupted.
async fn run_serve(args: &[String]) -> Result<()> {
    let options = parse_serve_args(args).map_err(ProxyError::Config)?;
    let mut config = Config::load()?;
    options.apply(&mut config);

    let errors: Vec<ValidationIssue> =
        config.validate().into_iter().filter(|i| i.severity == ValidationSeverity::Error).collect();
    if let Some(issue) = errors.first() {
        return Err(ProxyError::Config(format!("{}: {}", issue.field, issue.message)));
    }

    initialize_logging(&config);

    let state = Arc::new(server::AppState::new(config.clone())?);
    start_server(&config, build_router(state)).await
}

///
/// Initialize logging with the configured level.
///
/// `RUST_LOG`, when set, takes precedence over the configuration.
///
/// # Arguments
///  * `config` - application configuration containing log level settings
fn initialize_logging(config: &Config) {
    let level = config.server.log_level.to_tracing_level();
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(level.to_string().to_lowercase()));

    let _ = tracing_subscriber::fmt().with_env_filter(filter).with_target(false).try_init();
}

///
/// Bind the listener and serve until Ctrl-C.
///
/// # Returns
///  * `Ok(())` when server shuts down gracefully
///  * `ProxyError::Http` if binding or serving fails
async fn start_server(config: &Config, app: Router) -> Result<()> {
    let address = format!("{}:{}", config.server.host, config.server.port);
    let listener = tokio::net::TcpListener::bind(&address).await.map_err(|e| {
        let error_msg = format!("Failed to bind to {}: {}", address, e);

        if e.kind() == ErrorKind::AddrInUse {
            ProxyError::Http(format!(
                "{}\n\n\
                Port {} is already in use. Here are some solutions:\n\n\
                1. Close the other instance:\n\
                   • Find the process using port {}:\n\
                     lsof -i :{}\n\n\
                2. Change the port:\n\
                   chatmux serve --port {}\n\n\
                Run 'chatmux doctor' for more help.",
                error_msg,
                config.server.port,
                config.server.port,
                config.server.port,
                config.server.port.saturating_add(1)
            ))
        } else {
            ProxyError::Http(format!(
                "{}\n\n\
                To fix this:\n\
                • Check that the host is a local interface and the port is valid (1-65535)\n\
                • Ensure you have permission to bind to the port\n\n\
                Run 'chatmux doctor' for more help.",
                error_msg
            ))
        }
    })?;

    log_startup_info(config);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .map_err(|e| ProxyError::Http(format!("Server error: {}", e)))?;

    info!("ChatMux stopped");
    Ok(())
}

async fn shutdown_signal() {
    if tokio::signal::ctrl_c().await.is_err() {
        std::future::pending::<()>().await;
    }
}

///
/// Log startup information and configuration details.
fn log_startup_info(config: &Config) {
    info!("ChatMux v{} running on {}:{}", VERSION, config.server.host, config.server.port);
    info!("OpenAI-compatible endpoint: http://{}:{}/v1", config.server.host, config.server.port);
    info!(
        "Reasoning: effort={} dialect={}",
        config.reasoning.effort.as_str(),
        config.reasoning.compat.as_str()
    );

    if config.server.log_level.is_trace_enabled() {
        info!("[TRACE] Trace logging is ENABLED (log_level={:?})", config.server.log_level);
    }
}

///
/// Run the interactive OAuth login.
///
/// # Returns
///  * `0` after credentials were stored, `13` when the callback port is taken
///  * An error for any other login failure
async fn run_login(args: &[String]) -> anyhow::Result<i32> {
    let no_browser = args.iter().any(|a| a == "--no-browser");
    let config = Config::load().context("Unable to load configuration")?;
    initialize_logging(&config);

    let store = Arc::new(CredentialStore::from_config(&config).context("Unable to resolve credential home")?);
    let flow = match LoginFlow::begin(&config, store.clone(), reqwest::Client::new()).await {
        Ok(flow) => flow,
        Err(ProxyError::Io(e)) if e.kind() == ErrorKind::AddrInUse => {
            eprintln!("Error: the login callback port is already in use.");
            eprintln!("Another 'chatmux login' may still be running; close it and try again.");
            return Ok(EXIT_PORT_IN_USE);
        }
        Err(e) => return Err(e).context("Unable to start the login listener"),
    };

    let url = flow.authorization_url();
    println!("Sign in with your ChatGPT account:");
    println!();
    println!("  {}", url);
    println!();
    if !no_browser {
        open_browser(&url);
    }
    println!("If the browser cannot reach this machine, paste the full redirect URL here and press Enter.");

    let auth = flow.run(true).await.context("Login failed")?;
    let summary = account_summary(Some(&auth), None, &store.auth_path());
    println!();
    println!("[OK] Logged in as {}", summary["email"].as_str().unwrap_or("unknown account"));
    println!("Credentials saved to {}", store.auth_path().display());
    Ok(0)
}

/// Best-effort attempt to open the system browser
fn open_browser(url: &str) {
    let mut command = if cfg!(target_os = "macos") {
        std::process::Command::new("open")
    } else if cfg!(target_os = "windows") {
        let mut command = std::process::Command::new("cmd");
        command.args(["/C", "start", ""]);
        command
    } else {
        std::process::Command::new("xdg-open")
    };

    if let Err(e) = command.arg(url).spawn() {
        debug!("Unable to open browser: {}", e);
    }
}

///
/// Print the signed-in account and the last captured rate limits.
fn run_info(args: &[String]) -> anyhow::Result<i32> {
    let as_json = args.iter().any(|a| a == "--json");
    let config = Config::load().context("Unable to load configuration")?;
    let store = CredentialStore::from_config(&config).context("Unable to resolve credential home")?;
    let auth = store.load().context("Unable to read credentials")?;
    let stored_limits = limits::load_snapshot(store.home());

    let summary = account_summary(auth.as_ref(), stored_limits.as_ref(), &store.auth_path());

    if as_json {
        println!("{}", serde_json::to_string_pretty(&summary)?);
        return Ok(0);
    }

    if summary["signed_in"] != json!(true) {
        println!("Not signed in. Run 'chatmux login' first.");
        return Ok(1);
    }

    let field = |name: &str| summary[name].as_str().unwrap_or("unknown").to_string();
    println!("Account");
    println!("  Email:       {}", field("email"));
    println!("  Plan:        {}", field("plan"));
    println!("  Account ID:  {}", field("account_id"));
    println!("  Credentials: {}", field("auth_file"));
    println!();

    match &summary["rate_limits"] {
        Value::Object(limits) => {
            println!("Rate limits (captured {})", limits["captured_at"].as_str().unwrap_or("unknown"));
            for name in ["primary", "secondary"] {
                if let Some(window) = limits.get(name).filter(|w| w.is_object()) {
                    println!(
                        "  {:<10} {:>5.1}% used, window {} min, resets {}",
                        name,
                        window["used_percent"].as_f64().unwrap_or(0.0),
                        window["window_minutes"].as_i64().map(|m| m.to_string()).unwrap_or("?".to_string()),
                        window["resets_at"].as_str().unwrap_or("unknown"),
                    );
                }
            }
        }
        _ => println!("Rate limits: none captured yet"),
    }
    Ok(0)
}

///
/// Account information as shown by `info`.
///
/// Token contents are never included, only claims decoded from them.
fn account_summary(auth: Option<&AuthFile>, stored_limits: Option<&StoredRateLimits>, path: &Path) -> Value {
    let tokens = auth.and_then(|a| a.tokens.as_ref());
    let email = tokens.and_then(|t| t.id_token.as_deref()).and_then(jwt::email);
    let plan = tokens.and_then(|t| t.access_token.as_deref()).and_then(jwt::plan_type);
    let account_id = tokens.and_then(|t| t.effective_account_id());

    let window = |stored: &StoredRateLimits, window: &Option<RateLimitWindow>| {
        window.as_ref().map(|w| {
            json!({
                "used_percent": w.used_percent,
                "window_minutes": w.window_minutes,
                "resets_at": stored.reset_at(w).map(|at| at.to_rfc3339()),
            })
        })
    };
    let rate_limits = stored_limits.map(|stored| {
        json!({
            "captured_at": stored.captured_at,
            "primary": window(stored, &stored.snapshot.primary),
            "secondary": window(stored, &stored.snapshot.secondary),
        })
    });

    json!({
        "signed_in": tokens.is_some_and(|t| t.access_token.is_some()),
        "email": email,
        "plan": plan,
        "account_id": account_id,
        "auth_file": path.display().to_string(),
        "last_refresh": auth.and_then(|a| a.last_refresh.clone()),
        "rate_limits": rate_limits,
    })
}

///
/// Run the doctor command to check configuration, credentials and system health.
fn run_doctor() {
    println!("ChatMux Doctor - Configuration Health Check");
    println!("{}", "=".repeat(60));
    println!();

    println!("Configuration Files:");
    for path in paths::config_file_paths() {
        if path.exists() {
            println!("  [OK] {}", path.display());
        } else {
            println!("  [INFO] {} (not present)", path.display());
        }
    }
    println!();

    println!("Configuration Validation:");
    let config = match load_unvalidated() {
        Ok(config) => {
            println!("  [OK] Configuration loaded successfully");
            config
        }
        Err(e) => {
            println!("  [ERROR] Failed to load configuration:");
            println!("     {}", e);
            println!();
            println!("Run 'chatmux config init' to create a fresh configuration file.");
            return;
        }
    };

    let issues = config.validate();
    if issues.is_empty() {
        println!("  [OK] No validation issues found");
    }
    for (severity, label) in [
        (ValidationSeverity::Error, "[ERROR]"),
        (ValidationSeverity::Warning, "[WARNING]"),
        (ValidationSeverity::Info, "[INFO]"),
    ] {
        print_issues(&issues, severity, label);
    }
    println!();

    println!("Credentials:");
    let signed_in = check_credentials(&config);
    println!();

    let has_errors = issues.iter().any(|i| i.severity == ValidationSeverity::Error);
    if has_errors {
        println!("[ERROR] Configuration has errors. Please fix them before running ChatMux.");
    } else if !signed_in {
        println!("[WARNING] Configuration is fine but no credentials were found. Run 'chatmux login'.");
    } else {
        println!("[SUCCESS] Everything looks good! You're ready to run 'chatmux serve'.");
    }
}

fn print_issues(issues: &[ValidationIssue], severity: ValidationSeverity, label: &str) {
    let matching: Vec<_> = issues.iter().filter(|i| i.severity == severity).collect();
    if matching.is_empty() {
        return;
    }
    println!("  {} Found {} issue(s):", label, matching.len());
    for issue in matching {
        println!("     • {}: {}", issue.field, issue.message);
        if let Some(suggestion) = &issue.suggestion {
            println!("       [TIP] {}", suggestion);
        }
    }
}

/// True when a usable token set is on disk
fn check_credentials(config: &Config) -> bool {
    let store = match CredentialStore::from_config(config) {
        Ok(store) => store,
        Err(e) => {
            println!("  [ERROR] {}", e);
            return false;
        }
    };

    match store.load() {
        Ok(Some(auth)) if auth.tokens.is_some() => {
            println!("  [OK] Found {}", store.auth_path().display());
            if needs_refresh(&auth, Utc::now()) {
                println!("  [INFO] Access token will be refreshed on the next request");
            }
            true
        }
        Ok(_) => {
            println!("  [WARNING] No credentials at {}", store.auth_path().display());
            false
        }
        Err(e) => {
            println!("  [ERROR] Unable to read credentials: {}", e);
            false
        }
    }
}

///
/// Run the validate command to validate configuration and exit.
///
/// Returns exit code 0 if valid, 1 if invalid.
fn run_validate() -> i32 {
    match load_unvalidated() {
        Ok(config) => {
            let issues = config.validate();
            let errors: Vec<_> = issues.iter().filter(|i| i.severity == ValidationSeverity::Error).collect();

            if errors.is_empty() {
                println!("[OK] Configuration is valid");
                0
            } else {
                eprintln!("[ERROR] Configuration validation failed:");
                for issue in &errors {
                    eprintln!("  • {}: {}", issue.field, issue.message);
                    if let Some(suggestion) = &issue.suggestion {
                        eprintln!("    Suggestion: {}", suggestion);
                    }
                }
                1
            }
        }
        Err(e) => {
            eprintln!("[ERROR] Configuration error: {}", e);
            1
        }
    }
}

/// Same layering as `Config::load`, without failing on validation errors
fn load_unvalidated() -> Result<Config> {
    ConfigLoader::new().with_defaults().with_system_config()?.with_user_config()?.with_env_vars()?.build_base()
}

fn run_config(args: &[String]) -> i32 {
    let result = match args.first().map(String::as_str) {
        Some("init") => ConfigCli::init(args.iter().any(|a| a == "--force")),
        Some("show") => ConfigCli::show(),
        _ => {
            eprintln!("Usage: chatmux config <init [--force] | show>");
            return 1;
        }
    };
    report(result)
}

/* --- tests ----------------------------------------------------------------------------------- */
