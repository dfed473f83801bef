//!
//! Error handling for the ChatMux gateway.
//!
//! Defines all error types used throughout the application using thiserror.
//! Variants line up with how a failure is surfaced to the client: missing or
//! unrefreshable credentials become 401, transport failures 502, backend
//! rejections keep the backend status, malformed client input 400.
//!
//! Authors:
//!   Jaro <yarenty@gmail.com>
//!
//! Copyright (c) 2026 SkyCorp

/* --- uses ------------------------------------------------------------------------------------ */

use thiserror::Error;

/* --- types ----------------------------------------------------------------------------------- */

///
/// Application error types.
///
/// Covers all error conditions that can occur during login, token refresh,
/// request translation and upstream streaming.
#[derive(Error, Debug)]
pub enum ProxyError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Authentication error: {0}")]
    Auth(String),

    /// No usable credentials on disk.
    #[error("{0}")]
    Unauthenticated(String),

    /// A refresh grant was attempted and failed; the stale token set is kept.
    #[error("Token refresh failed: {0}")]
    RefreshFailed(String),

    #[error("HTTP error: {0}")]
    Http(String),

    #[error("Upstream ChatGPT request failed: {0}")]
    UpstreamTransport(String),

    #[error("{message}")]
    UpstreamProtocol {
        /** HTTP status returned by the backend (502 for in-stream failures) */
        status: u16,
        /** backend error message, verbatim when available */
        message: String,
        /** backend or gateway error code */
        code: Option<String>,
        /** backend error type */
        error_type: Option<String>,
    },

    #[error("{message}")]
    InvalidRequest {
        /** client-facing message */
        message: String,
        /** machine-readable code for well-known rejections */
        code: Option<String>,
    },

    #[error("{0}")]
    NotFound(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Request error: {0}")]
    Request(#[from] reqwest::Error),

    #[error("Conversion error: {0}")]
    Conversion(String),
}

/* --- start of code -------------------------------------------------------------------------- */

/// Result type alias for cleaner error handling throughout the application
pub type Result<T> = std::result::Result<T, ProxyError>;

impl ProxyError {
    /// Shorthand for a 400 without a code.
    pub fn invalid(message: impl Into<String>) -> Self {
        ProxyError::InvalidRequest { message: message.into(), code: None }
    }

    /// Shorthand for a 400 carrying a machine-readable code.
    pub fn invalid_with_code(message: impl Into<String>, code: impl Into<String>) -> Self {
        ProxyError::InvalidRequest { message: message.into(), code: Some(code.into()) }
    }

    /// True for the two credential failures that surface as 401.
    pub fn is_unauthorized(&self) -> bool {
        matches!(self, ProxyError::Unauthenticated(_) | ProxyError::RefreshFailed(_))
    }
}

/* --- tests ----------------------------------------------------------------------------------- */

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transport_error_carries_prefix() {
        let err = ProxyError::UpstreamTransport("connection reset".to_string());
        assert_eq!(err.to_string(), "Upstream ChatGPT request failed: connection reset");
    }

    #[test]
    fn test_protocol_error_displays_backend_message() {
        let err = ProxyError::UpstreamProtocol {
            status: 429,
            message: "slow down".to_string(),
            code: Some("rate_limited".to_string()),
            error_type: None,
        };
        assert_eq!(err.to_string(), "slow down");
    }

    #[test]
    fn test_unauthorized_classification() {
        assert!(ProxyError::Unauthenticated("x".into()).is_unauthorized());
        assert!(ProxyError::RefreshFailed("x".into()).is_unauthorized());
        assert!(!ProxyError::invalid("x").is_unauthorized());
    }
}
