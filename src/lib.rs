//! # ChatMux - OpenAI-compatible gateway for the ChatGPT responses backend
//!
//! Lets OpenAI-API clients talk to the ChatGPT responses backend. The gateway
//! logs in once with OAuth PKCE, keeps the token set fresh, translates Chat
//! Completions / Completions / Responses requests into the backend schema and
//! re-translates the backend SSE stream into the formats clients expect.
//!
//! ## Library Usage
//!
//! ```rust,no_run
//! use chatmux::{Config, create_app};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = Config::load()?;
//!     let app = create_app(config).await?;
//!
//!     let listener = tokio::net::TcpListener::bind("127.0.0.1:8000").await?;
//!     axum::serve(listener, app).await?;
//!
//!     Ok(())
//! }
//! ```
//!
//! ## Modules
//!
//! - [`config`] - Layered TOML / environment configuration
//! - [`auth`] - OAuth login, credential file and token refresh
//! - [`session`] - Prompt-cache session keys
//! - [`converter`] - Chat messages and tools to backend input
//! - [`upstream`] - Backend payload and streaming POST
//! - [`stream`] - Backend SSE to client dialects
//! - [`responses`] - `/v1/responses` translation and local store
//! - [`server`] - Route handlers
//! - [`error`] - Error types and handling
//!
//! Authors:
//!   Jaro <yarenty@gmail.com>
//!
//! Copyright (c) 2026 SkyCorp

/* --- modules --------------------------------------------------------------------------------- */

pub mod auth;
pub mod config;
pub mod converter;
pub mod error;
pub mod instructions;
pub mod limits;
pub mod models;
pub mod reasoning;
pub mod responses;
pub mod server;
pub mod session;
pub mod stream;
pub mod upstream;

/* --- uses ------------------------------------------------------------------------------------ */

use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use axum::http::Method;
use axum::routing::{get, post};
use tower::ServiceBuilder;
use tower_http::cors::{AllowHeaders, AllowOrigin, CorsLayer};
use tower_http::trace::TraceLayer;

// Re-export commonly used types
pub use config::{Config, ValidationIssue, ValidationSeverity};
pub use error::ProxyError;

use server::AppState;

/* --- constants ------------------------------------------------------------------------------- */

/** how long browsers may cache a preflight answer */
const CORS_MAX_AGE: Duration = Duration::from_secs(86_400);

/* --- start of code -------------------------------------------------------------------------- */

///
/// Router with every endpoint and the CORS / tracing middleware.
///
/// CORS mirrors the request origin and headers, so browser-based clients on any
/// origin can use the gateway.
///
/// # Arguments
///  * `state` - shared application state
pub fn build_router(state: Arc<AppState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(AllowOrigin::mirror_request())
        .allow_methods([Method::POST, Method::GET, Method::OPTIONS])
        .allow_headers(AllowHeaders::mirror_request())
        .max_age(CORS_MAX_AGE);

    Router::new()
        .route("/v1/chat/completions", post(server::chat_completions))
        .route("/v1/completions", post(server::completions))
        .route("/v1/responses", post(server::create_response))
        .route("/v1/responses/{id}", get(server::get_response))
        .route("/v1/models", get(server::models))
        .route("/health", get(server::health))
        .layer(ServiceBuilder::new().layer(TraceLayer::new_for_http()).layer(cors))
        .with_state(state)
}

/// Creates a new ChatMux application with the given configuration.
///
/// Sets up credentials, the upstream client and routing. Nothing touches the
/// network until the first request arrives.
///
/// # Errors
///
/// Returns a `ProxyError` if the credential home or instructions files cannot be
/// resolved.
pub async fn create_app(config: Config) -> Result<Router, ProxyError> {
    let state = Arc::new(AppState::new(config)?);
    Ok(build_router(state))
}

/* --- tests ----------------------------------------------------------------------------------- */
