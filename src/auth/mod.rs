//!
//! ChatGPT account authentication.
//!
//! - `credentials.rs` - `auth.json` storage
//! - `jwt.rs` - unverified claim extraction
//! - `pkce.rs` - verifier/challenge generation
//! - `oauth.rs` - interactive login flow
//! - `tokens.rs` - refresh lifecycle and the request credential provider
//!
//! Authors:
//!   Jaro <yarenty@gmail.com>
//!
//! Copyright (c) 2026 SkyCorp

/* --- modules --------------------------------------------------------------------------------- */

pub mod credentials;
pub mod jwt;
pub mod oauth;
pub mod pkce;
pub mod tokens;

/* --- uses ------------------------------------------------------------------------------------ */

pub use credentials::{AuthFile, CredentialStore, TokenSet};
pub use oauth::{AuthorizationState, LOGIN_CALLBACK_PORT, LoginFlow};
pub use pkce::PkceCodes;
pub use tokens::{AccessTokenProvider, Credentials, TokenManager};
