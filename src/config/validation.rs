//!
//! Configuration validation for ChatMux.
//!
//! Collects every issue in one pass so `doctor` and `validate` can report them
//! together. Errors block startup, warnings and info lines are advisory.
//!
//! Authors:
//!   Jaro <yarenty@gmail.com>
//!
//! Copyright (c) 2026 SkyCorp

/* --- uses ------------------------------------------------------------------------------------ */

use crate::config::Config;
use crate::config::paths;
use crate::reasoning::{ReasoningDialect, ReasoningEffort};

/* --- types ----------------------------------------------------------------------------------- */

///
/// Configuration validation issue.
#[derive(Debug, Clone)]
pub struct ValidationIssue {
    /// Configuration field name
    pub field: String,
    /// Severity of the issue
    pub severity: ValidationSeverity,
    /// Description of the issue
    pub message: String,
    /// Optional suggestion for fixing the issue
    pub suggestion: Option<String>,
}

///
/// Severity level for validation issues.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValidationSeverity {
    /// Error - configuration is invalid and will cause failures
    Error,
    /// Warning - configuration may work but has potential issues
    Warning,
    /// Info - informational note about configuration
    Info,
}

///
/// Configuration validator.
pub struct ConfigValidator<'a> {
    /// Configuration to validate
    config: &'a Config,
    /// Issues collected during validation
    issues: Vec<ValidationIssue>,
}

/* --- implementations --------------------------------------------------------------------- */

impl<'a> ConfigValidator<'a> {
    pub fn new(config: &'a Config) -> Self {
        Self { config, issues: Vec::new() }
    }

    /// Run every check and return the collected issues
    pub fn issues(mut self) -> Vec<ValidationIssue> {
        self.validate_server_config();
        self.validate_auth_config();
        self.validate_upstream_config();
        self.validate_reasoning_config();
        self.validate_gateway_config();
        self.issues
    }

    /* --- private validation methods ------------------------------------------------------ */

    fn validate_server_config(&mut self) {
        let server = &self.config.server;

        if server.port == 0 {
            self.add(
                "server.port",
                ValidationSeverity::Error,
                "Port cannot be 0".to_string(),
                Some("Use a valid port number between 1 and 65535"),
            );
        } else if server.port < 1024 {
            self.add(
                "server.port",
                ValidationSeverity::Warning,
                format!("Server port {} requires root/administrator privileges", server.port),
                None,
            );
        }

        if server.port == crate::auth::oauth::LOGIN_CALLBACK_PORT {
            self.add(
                "server.port",
                ValidationSeverity::Warning,
                format!("Port {} is reserved for the login callback listener", server.port),
                Some("Pick another port if you run 'chatmux login' while the gateway is up"),
            );
        }

        if server.host.trim().is_empty() {
            self.add(
                "server.host",
                ValidationSeverity::Error,
                "Host cannot be empty".to_string(),
                Some("Use 127.0.0.1 to accept local clients only"),
            );
        } else if server.host != "127.0.0.1" && server.host != "localhost" {
            self.add(
                "server.host",
                ValidationSeverity::Info,
                format!("Gateway will accept connections on {}", server.host),
                Some("Anyone who can reach this address can use your ChatGPT account"),
            );
        }
    }

    fn validate_auth_config(&mut self) {
        let auth = &self.config.auth;

        if auth.client_id.trim().is_empty() {
            self.add(
                "auth.client_id",
                ValidationSeverity::Error,
                "OAuth client id cannot be empty".to_string(),
                None,
            );
        }

        if !is_http_url(&auth.issuer) {
            self.add(
                "auth.issuer",
                ValidationSeverity::Error,
                format!("Issuer must be an http(s) URL: {}", auth.issuer),
                None,
            );
        } else if !auth.issuer.starts_with("https://") {
            self.add(
                "auth.issuer",
                ValidationSeverity::Warning,
                format!("Issuer should use HTTPS: {}", auth.issuer),
                Some("Use https:// for secure connections"),
            );
        }

        if let Some(ref home) = auth.home_dir {
            if let Err(e) = paths::expand_path(home) {
                self.add("auth.home_dir", ValidationSeverity::Error, e.to_string(), None);
            }
        }
    }

    fn validate_upstream_config(&mut self) {
        let upstream = &self.config.upstream;

        if !is_http_url(&upstream.responses_url) {
            self.add(
                "upstream.responses_url",
                ValidationSeverity::Error,
                format!("Responses URL must be an http(s) URL: {}", upstream.responses_url),
                None,
            );
        } else if !upstream.responses_url.starts_with("https://") {
            self.add(
                "upstream.responses_url",
                ValidationSeverity::Warning,
                format!("Responses URL should use HTTPS: {}", upstream.responses_url),
                Some("Use https:// for secure connections"),
            );
        }

        if upstream.timeout_secs == 0 {
            self.add(
                "upstream.timeout_secs",
                ValidationSeverity::Error,
                "Upstream timeout cannot be 0".to_string(),
                None,
            );
        } else if upstream.timeout_secs < 60 {
            self.add(
                "upstream.timeout_secs",
                ValidationSeverity::Warning,
                format!("Upstream timeout of {}s may cut off long reasoning", upstream.timeout_secs),
                Some("Reasoning responses can take several minutes; 600 is the default"),
            );
        }

        if let Some(ref model) = upstream.debug_model {
            self.add(
                "upstream.debug_model",
                ValidationSeverity::Info,
                format!("Every request will be sent as model '{}'", model),
                None,
            );
        }
    }

    fn validate_reasoning_config(&mut self) {
        let reasoning = &self.config.reasoning;

        if reasoning.effort == ReasoningEffort::None
            && reasoning.compat != ReasoningDialect::Suppressed
        {
            self.add(
                "reasoning.effort",
                ValidationSeverity::Info,
                "Reasoning effort 'none' leaves nothing for the reasoning dialect to show"
                    .to_string(),
                None,
            );
        }
    }

    fn validate_gateway_config(&mut self) {
        let gateway = &self.config.gateway;

        if gateway.store_capacity == 0 {
            self.add(
                "gateway.store_capacity",
                ValidationSeverity::Warning,
                "Store capacity 0 disables previous_response_id lookups".to_string(),
                None,
            );
        }

        let files = [
            ("gateway.instructions_file", &gateway.instructions_file),
            ("gateway.codex_instructions_file", &gateway.codex_instructions_file),
        ];
        for (field, file) in files {
            let Some(file) = file else { continue };
            match paths::expand_path(file) {
                Ok(path) if path.is_file() => {}
                Ok(path) => self.add(
                    field,
                    ValidationSeverity::Error,
                    format!("Instructions file not found: {}", path.display()),
                    Some("Remove the setting to use the built-in instructions"),
                ),
                Err(e) => self.add(field, ValidationSeverity::Error, e.to_string(), None),
            }
        }
    }

    fn add(
        &mut self,
        field: &str,
        severity: ValidationSeverity,
        message: String,
        suggestion: Option<&str>,
    ) {
        self.issues.push(ValidationIssue {
            field: field.to_string(),
            severity,
            message,
            suggestion: suggestion.map(str::to_string),
        });
    }
}

/* --- utility functions ------------------------------------------------------------------- */

fn is_http_url(value: &str) -> bool {
    url::Url::parse(value).map(|u| matches!(u.scheme(), "http" | "https")).unwrap_or(false)
}

/* --- tests ----------------------------------------------------------------------------------- */
