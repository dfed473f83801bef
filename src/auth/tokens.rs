//!
//! Access-token lifecycle: freshness checks and the refresh grant.
//!
//! Authors:
//!   Jaro <yarenty@gmail.com>
//!
//! Copyright (c) 2026 SkyCorp

/* --- uses ------------------------------------------------------------------------------------ */

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, TimeDelta, Utc};
use serde::Deserialize;
use serde_json::json;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::auth::credentials::{AuthFile, CredentialStore, TokenSet, now_rfc3339};
use crate::auth::jwt;
use crate::config::Config;
use crate::error::{ProxyError, Result};

/* --- types ----------------------------------------------------------------------------------- */

///
/// Bearer token and account header value for one backend request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Credentials {
    pub access_token: String,
    pub account_id: String,
}

///
/// Supplies request credentials to the upstream client.
#[async_trait]
pub trait AccessTokenProvider: Send + Sync {
    ///
    /// Valid credentials, refreshing first when needed.
    ///
    /// # Returns
    ///  * `ProxyError::Unauthenticated` when nothing usable is stored
    ///  * `ProxyError::RefreshFailed` when a required refresh did not succeed
    async fn credentials(&self) -> Result<Credentials>;
}

///
/// Token manager backed by the credential store.
pub struct TokenManager {
    store: Arc<CredentialStore>,
    client: reqwest::Client,
    token_url: String,
    client_id: String,
    /** serializes refresh-and-persist so concurrent requests refresh once */
    refresh_lock: Mutex<()>,
}

#[derive(Debug, Deserialize)]
struct RefreshResponse {
    id_token: Option<String>,
    access_token: Option<String>,
    refresh_token: Option<String>,
}

/* --- constants ------------------------------------------------------------------------------- */

/** refresh when the access token expires within this many minutes */
const EXPIRY_MARGIN_MINUTES: i64 = 5;

/** refresh when the bundle is older than this many minutes */
const MAX_REFRESH_AGE_MINUTES: i64 = 55;

const REFRESH_TIMEOUT: Duration = Duration::from_secs(30);

const REFRESH_SCOPE: &str = "openid profile email";

pub const MISSING_CREDENTIALS_MESSAGE: &str =
    "Missing ChatGPT credentials. Run 'chatmux login' first.";

/* --- start of code -------------------------------------------------------------------------- */

impl TokenManager {
    pub fn new(config: &Config, store: Arc<CredentialStore>, client: reqwest::Client) -> Self {
        Self {
            store,
            client,
            token_url: config.token_url(),
            client_id: config.auth.client_id.clone(),
            refresh_lock: Mutex::new(()),
        }
    }

    pub fn store(&self) -> &Arc<CredentialStore> {
        &self.store
    }

    /* --- private methods ----------------------------------------------------------------- */

    async fn refresh(&self, auth: AuthFile, refresh_token: String) -> Result<Credentials> {
        info!("Refreshing ChatGPT access token");
        let refreshed = self.request_refresh(&refresh_token).await.map_err(|e| {
            warn!("Token refresh failed: {}", e);
            ProxyError::RefreshFailed(e.to_string())
        })?;

        let previous = auth.tokens.clone().unwrap_or_default();
        let account_id = refreshed.effective_account_id().or(previous.account_id);
        let tokens = TokenSet { account_id, ..refreshed };
        let updated =
            AuthFile { tokens: Some(tokens), last_refresh: Some(now_rfc3339()), ..auth };

        // The refreshed tokens are usable even if persisting them fails
        if let Err(e) = self.store.save(&updated) {
            warn!("Unable to persist refreshed credentials: {}", e);
        }
        resolve(&updated)
    }

    async fn request_refresh(&self, refresh_token: &str) -> Result<TokenSet> {
        let body = json!({
            "grant_type": "refresh_token",
            "refresh_token": refresh_token,
            "client_id": self.client_id,
            "scope": REFRESH_SCOPE,
        });

        let response = self
            .client
            .post(&self.token_url)
            .timeout(REFRESH_TIMEOUT)
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(ProxyError::Auth(format!("refresh request returned status {}", status)));
        }

        let payload: RefreshResponse = response.json().await?;
        let (Some(id_token), Some(access_token)) = (payload.id_token, payload.access_token) else {
            return Err(ProxyError::Auth("refresh response missing expected tokens".to_string()));
        };

        let refresh_token = payload
            .refresh_token
            .filter(|t| !t.is_empty())
            .unwrap_or_else(|| refresh_token.to_string());

        Ok(TokenSet {
            account_id: jwt::account_id(&id_token),
            id_token: Some(id_token),
            access_token: Some(access_token),
            refresh_token: Some(refresh_token),
        })
    }
}

#[async_trait]
impl AccessTokenProvider for TokenManager {
    async fn credentials(&self) -> Result<Credentials> {
        let auth = load_required(&self.store)?;
        if !needs_refresh(&auth, Utc::now()) {
            return resolve(&auth);
        }

        let _guard = self.refresh_lock.lock().await;

        // Another request may have refreshed while this one waited
        let auth = load_required(&self.store)?;
        let now = Utc::now();
        if !needs_refresh(&auth, now) {
            return resolve(&auth);
        }

        let tokens = auth.tokens.clone().unwrap_or_default();
        match tokens.refresh_token.clone().filter(|t| !t.is_empty()) {
            Some(refresh_token) => self.refresh(auth, refresh_token).await,
            None if access_token_unexpired(&tokens, now) => {
                debug!("No refresh token stored; using current access token");
                resolve(&auth)
            }
            None => Err(ProxyError::Unauthenticated(MISSING_CREDENTIALS_MESSAGE.to_string())),
        }
    }
}

fn load_required(store: &CredentialStore) -> Result<AuthFile> {
    store
        .load()?
        .filter(|auth| auth.tokens.is_some())
        .ok_or_else(|| ProxyError::Unauthenticated(MISSING_CREDENTIALS_MESSAGE.to_string()))
}

///
/// Freshness rule for a stored bundle.
///
/// A refresh is due when the access token is missing, its `exp` cannot be read
/// or falls within five minutes of `now`, or `last_refresh` is missing,
/// unparseable or older than 55 minutes.
pub fn needs_refresh(auth: &AuthFile, now: DateTime<Utc>) -> bool {
    let Some(access_token) =
        auth.tokens.as_ref().and_then(|t| t.access_token.as_deref()).filter(|t| !t.is_empty())
    else {
        return true;
    };

    let expiring = match jwt::expiry(access_token) {
        Some(exp) => exp <= now + TimeDelta::minutes(EXPIRY_MARGIN_MINUTES),
        None => true,
    };
    let stale = match auth.last_refresh_at() {
        Some(at) => at <= now - TimeDelta::minutes(MAX_REFRESH_AGE_MINUTES),
        None => true,
    };
    expiring || stale
}

fn access_token_unexpired(tokens: &TokenSet, now: DateTime<Utc>) -> bool {
    tokens
        .access_token
        .as_deref()
        .and_then(jwt::expiry)
        .is_some_and(|exp| exp > now)
}

fn resolve(auth: &AuthFile) -> Result<Credentials> {
    let missing = || ProxyError::Unauthenticated(MISSING_CREDENTIALS_MESSAGE.to_string());
    let tokens = auth.tokens.as_ref().ok_or_else(missing)?;
    let access_token =
        tokens.access_token.clone().filter(|t| !t.is_empty()).ok_or_else(missing)?;
    let account_id = tokens.effective_account_id().ok_or_else(missing)?;
    Ok(Credentials { access_token, account_id })
}

/* --- tests ----------------------------------------------------------------------------------- */

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::jwt::tests::make_token;
    use httpmock::prelude::*;
    use serde_json::Value;
    use tempfile::TempDir;

    fn token_expiring_in(delta: TimeDelta) -> String {
        make_token(&json!({"exp": (Utc::now() + delta).timestamp()}))
    }

    fn id_token(account: &str) -> String {
        make_token(&json!({jwt::AUTH_CLAIMS_NAMESPACE: {"chatgpt_account_id": account}}))
    }

    fn bundle(access: Option<String>, refresh: Option<&str>, last_refresh: Option<String>) -> AuthFile {
        AuthFile {
            openai_api_key: None,
            tokens: Some(TokenSet {
                id_token: Some(id_token("acc-1")),
                access_token: access,
                refresh_token: refresh.map(str::to_string),
                account_id: Some("acc-1".to_string()),
            }),
            last_refresh,
        }
    }

    fn manager(dir: &TempDir, issuer: &str) -> TokenManager {
        let mut config = Config::default();
        config.auth.issuer = issuer.to_string();
        let store = Arc::new(CredentialStore::new(dir.path()));
        TokenManager::new(&config, store, reqwest::Client::new())
    }

    #[test]
    fn test_fresh_bundle_needs_no_refresh() {
        let auth = bundle(Some(token_expiring_in(TimeDelta::hours(1))), Some("r"), Some(now_rfc3339()));
        assert!(!needs_refresh(&auth, Utc::now()));
    }

    #[test]
    fn test_refresh_triggers() {
        let now = Utc::now();
        let recent = Some(now_rfc3339());

        assert!(needs_refresh(&bundle(None, Some("r"), recent.clone()), now));
        assert!(needs_refresh(
            &bundle(Some(token_expiring_in(TimeDelta::minutes(4))), Some("r"), recent.clone()),
            now
        ));
        assert!(needs_refresh(&bundle(Some("opaque".to_string()), Some("r"), recent), now));

        let old = (now - TimeDelta::minutes(56)).to_rfc3339();
        assert!(needs_refresh(
            &bundle(Some(token_expiring_in(TimeDelta::hours(2))), Some("r"), Some(old)),
            now
        ));
        assert!(needs_refresh(
            &bundle(Some(token_expiring_in(TimeDelta::hours(2))), Some("r"), None),
            now
        ));
    }

    #[tokio::test]
    async fn test_fresh_tokens_make_no_network_call() {
        let server = MockServer::start();
        let token_endpoint = server.mock(|when, then| {
            when.method(POST).path("/oauth/token");
            then.status(500);
        });

        let dir = TempDir::new().unwrap();
        let manager = manager(&dir, &server.base_url());
        let access = token_expiring_in(TimeDelta::hours(1));
        manager.store().save(&bundle(Some(access.clone()), Some("r"), Some(now_rfc3339()))).unwrap();

        let creds = manager.credentials().await.unwrap();
        assert_eq!(creds, Credentials { access_token: access, account_id: "acc-1".to_string() });
        token_endpoint.assert_calls(0);
    }

    #[tokio::test]
    async fn test_expired_token_is_refreshed_and_persisted() {
        let server = MockServer::start();
        let new_access = token_expiring_in(TimeDelta::hours(1));
        let token_endpoint = server.mock(|when, then| {
            when.method(POST)
                .path("/oauth/token")
                .json_body_includes(json!({"grant_type": "refresh_token", "refresh_token": "old-refresh"}).to_string());
            then.status(200).json_body(json!({
                "id_token": id_token("acc-2"),
                "access_token": new_access,
            }));
        });

        let dir = TempDir::new().unwrap();
        let manager = manager(&dir, &server.base_url());
        let stale = bundle(Some(token_expiring_in(TimeDelta::minutes(-1))), Some("old-refresh"), None);
        manager.store().save(&stale).unwrap();

        let creds = manager.credentials().await.unwrap();
        token_endpoint.assert_calls(1);
        assert_eq!(creds.account_id, "acc-2");

        let saved: Value =
            serde_json::from_str(&std::fs::read_to_string(manager.store().auth_path()).unwrap())
                .unwrap();
        assert_eq!(saved["tokens"]["refresh_token"], "old-refresh");
        assert!(saved["last_refresh"].is_string());
    }

    #[tokio::test]
    async fn test_refresh_failure_is_unauthorized_and_keeps_tokens() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(POST).path("/oauth/token");
            then.status(400).body("invalid_grant");
        });

        let dir = TempDir::new().unwrap();
        let manager = manager(&dir, &server.base_url());
        let stale = bundle(Some(token_expiring_in(TimeDelta::minutes(-1))), Some("r"), None);
        manager.store().save(&stale).unwrap();

        let err = manager.credentials().await.unwrap_err();
        assert!(matches!(err, ProxyError::RefreshFailed(_)));
        assert!(err.is_unauthorized());
        assert_eq!(manager.store().load().unwrap().unwrap().tokens, stale.tokens);
    }

    #[tokio::test]
    async fn test_missing_credentials() {
        let dir = TempDir::new().unwrap();
        let manager = manager(&dir, "http://127.0.0.1:9");
        let err = manager.credentials().await.unwrap_err();
        assert!(matches!(err, ProxyError::Unauthenticated(_)));
    }

    #[tokio::test]
    async fn test_no_refresh_token_and_expired_access_is_unauthenticated() {
        let dir = TempDir::new().unwrap();
        let manager = manager(&dir, "http://127.0.0.1:9");
        manager
            .store()
            .save(&bundle(Some(token_expiring_in(TimeDelta::minutes(-10))), None, None))
            .unwrap();

        let err = manager.credentials().await.unwrap_err();
        assert!(matches!(err, ProxyError::Unauthenticated(_)));
    }
}
