//!
//! Interactive OAuth login: PKCE authorization-code flow with a loopback listener.
//!
//! [`LoginFlow::begin`] binds the callback listener on the fixed port registered
//! with the identity provider and prepares the authorize URL. [`LoginFlow::run`]
//! then waits for the browser redirect, or for the same redirect URL pasted on
//! stdin, whichever arrives first. Both paths go through the same state check and
//! code exchange, and the loser is cancelled.
//!
//! Authors:
//!   Jaro <yarenty@gmail.com>
//!
//! Copyright (c) 2026 SkyCorp

/* --- uses ------------------------------------------------------------------------------------ */

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::{Html, IntoResponse, Response};
use axum::routing::get;
use reqwest::header::CONTENT_TYPE;
use serde::Deserialize;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::net::TcpListener;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use url::form_urlencoded;

use crate::auth::credentials::{AuthFile, CredentialStore, TokenSet};
use crate::auth::jwt;
use crate::auth::pkce::{self, PkceCodes};
use crate::config::Config;
use crate::error::{ProxyError, Result};

/* --- types ----------------------------------------------------------------------------------- */

///
/// Values bound to one listener instance, used to validate the redirect.
#[derive(Debug, Clone)]
pub struct AuthorizationState {
    pub state_nonce: String,
    pub redirect_uri: String,
    pub issuer: String,
    pub client_id: String,
}

///
/// One login attempt.
pub struct LoginFlow {
    authorization: AuthorizationState,
    pkce: PkceCodes,
    authorize_endpoint: String,
    token_endpoint: String,
    store: Arc<CredentialStore>,
    client: reqwest::Client,
    listener: Option<TcpListener>,
}

/// Redirect parameters handed from the listener to the flow
struct CallbackRequest {
    params: HashMap<String, String>,
    reply: oneshot::Sender<std::result::Result<(), (StatusCode, String)>>,
}

#[derive(Debug, Deserialize)]
struct CodeExchangeResponse {
    #[serde(default)]
    id_token: String,
    #[serde(default)]
    access_token: String,
    #[serde(default)]
    refresh_token: String,
}

#[derive(Debug, Deserialize)]
struct ApiKeyExchangeResponse {
    access_token: Option<String>,
}

/* --- constants ------------------------------------------------------------------------------- */

/** the identity provider only accepts redirects to this port */
pub const LOGIN_CALLBACK_PORT: u16 = 1455;

pub const CALLBACK_PATH: &str = "/auth/callback";

const LOGIN_SCOPE: &str = "openid profile email offline_access";

const TOKEN_EXCHANGE_GRANT: &str = "urn:ietf:params:oauth:grant-type:token-exchange";
const ID_TOKEN_TYPE: &str = "urn:ietf:params:oauth:token-type:id_token";

/** time given to the listener to flush the success page before it stops */
const SHUTDOWN_GRACE: Duration = Duration::from_secs(2);

pub const LOGIN_SUCCESS_HTML: &str = r#"<!DOCTYPE html>
<html lang="en">
  <head>
    <meta charset="utf-8" />
    <title>Login successful</title>
  </head>
  <body>
    <div style="max-width: 640px; margin: 80px auto; font-family: system-ui, sans-serif;">
      <h1>Login successful</h1>
      <p>You can close this window, return to the terminal and run <code>chatmux serve</code>.</p>
    </div>
  </body>
</html>
"#;

/* --- start of code -------------------------------------------------------------------------- */

impl LoginFlow {
    ///
    /// Bind the loopback listener on [`LOGIN_CALLBACK_PORT`] and prepare PKCE codes.
    ///
    /// # Returns
    ///  * Ready flow; print [`LoginFlow::authorization_url`] then call [`LoginFlow::run`]
    ///  * `ProxyError::Io` with `AddrInUse` when another login is already listening
    pub async fn begin(
        config: &Config,
        store: Arc<CredentialStore>,
        client: reqwest::Client,
    ) -> Result<Self> {
        let listener = TcpListener::bind(("127.0.0.1", LOGIN_CALLBACK_PORT)).await?;
        Self::from_listener(listener, config, store, client)
    }

    /// Flow around an already bound listener; the redirect URI follows its port
    pub fn from_listener(
        listener: TcpListener,
        config: &Config,
        store: Arc<CredentialStore>,
        client: reqwest::Client,
    ) -> Result<Self> {
        let port = listener.local_addr()?.port();
        let authorization = AuthorizationState {
            state_nonce: pkce::generate_state(),
            redirect_uri: format!("http://localhost:{port}{CALLBACK_PATH}"),
            issuer: config.auth.issuer.clone(),
            client_id: config.auth.client_id.clone(),
        };

        Ok(Self {
            authorization,
            pkce: PkceCodes::generate(),
            authorize_endpoint: config.authorize_url(),
            token_endpoint: config.token_url(),
            store,
            client,
            listener: Some(listener),
        })
    }

    pub fn authorization(&self) -> &AuthorizationState {
        &self.authorization
    }

    /// Provider authorize URL with the PKCE challenge and state nonce embedded
    pub fn authorization_url(&self) -> String {
        let query = form_urlencoded::Serializer::new(String::new())
            .append_pair("response_type", "code")
            .append_pair("client_id", &self.authorization.client_id)
            .append_pair("redirect_uri", &self.authorization.redirect_uri)
            .append_pair("scope", LOGIN_SCOPE)
            .append_pair("code_challenge", &self.pkce.code_challenge)
            .append_pair("code_challenge_method", "S256")
            .append_pair("id_token_add_organizations", "true")
            .append_pair("codex_cli_simplified_flow", "true")
            .append_pair("state", &self.authorization.state_nonce)
            .finish();
        format!("{}?{}", self.authorize_endpoint, query)
    }

    ///
    /// Wait for the redirect and complete the exchange.
    ///
    /// # Arguments
    ///  * `accept_paste` - also read a pasted redirect URL from stdin
    ///
    /// # Returns
    ///  * The persisted token bundle
    ///  * `ProxyError::InvalidRequest` for a missing code or state mismatch
    ///  * `ProxyError::Auth` when the code exchange or persistence fails
    pub async fn run(mut self, accept_paste: bool) -> Result<AuthFile> {
        let listener = self
            .listener
            .take()
            .ok_or_else(|| ProxyError::Auth("login listener already consumed".to_string()))?;

        let (tx, mut rx) = mpsc::channel::<CallbackRequest>(4);
        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
        let server = tokio::spawn(async move {
            axum::serve(listener, callback_router(tx))
                .with_graceful_shutdown(async {
                    let _ = shutdown_rx.await;
                })
                .await
        });

        let mut paste: Option<JoinHandle<Option<HashMap<String, String>>>> =
            accept_paste.then(|| tokio::spawn(read_pasted_redirect()));

        let result = loop {
            tokio::select! {
                request = rx.recv() => {
                    let Some(request) = request else {
                        break Err(ProxyError::Auth("login listener stopped".to_string()));
                    };
                    let outcome = self.complete(&request.params).await;
                    let reply = match &outcome {
                        Ok(_) => Ok(()),
                        Err(e) => Err((callback_status(e), e.to_string())),
                    };
                    let _ = request.reply.send(reply);
                    break outcome;
                }
                pasted = wait_paste(&mut paste) => {
                    paste = None;
                    match pasted {
                        Some(params) => break self.complete(&params).await,
                        // stdin closed; keep waiting for the browser
                        None => continue,
                    }
                }
            }
        };

        if let Some(handle) = paste.take() {
            handle.abort();
        }
        let _ = shutdown_tx.send(());
        if tokio::time::timeout(SHUTDOWN_GRACE, server).await.is_err() {
            debug!("Login listener did not stop within the grace period");
        }

        result
    }

    ///
    /// Validate redirect parameters, exchange the code and persist the bundle.
    pub async fn complete(&self, params: &HashMap<String, String>) -> Result<AuthFile> {
        let code = params
            .get("code")
            .filter(|c| !c.is_empty())
            .ok_or_else(|| ProxyError::invalid("Missing auth code"))?;

        if params.get("state").map(String::as_str) != Some(self.authorization.state_nonce.as_str()) {
            warn!("Rejecting login callback with mismatched state");
            return Err(ProxyError::invalid("State mismatch"));
        }

        let auth = self
            .exchange_code(code)
            .await
            .map_err(|e| ProxyError::Auth(format!("Token exchange failed: {}", e)))?;

        self.store
            .save(&auth)
            .map_err(|e| ProxyError::Auth(format!("Unable to persist auth file: {}", e)))?;

        info!("Login complete; credentials written to {}", self.store.auth_path().display());
        Ok(auth)
    }

    /* --- private methods ----------------------------------------------------------------- */

    async fn exchange_code(&self, code: &str) -> Result<AuthFile> {
        let body = form_urlencoded::Serializer::new(String::new())
            .append_pair("grant_type", "authorization_code")
            .append_pair("code", code)
            .append_pair("redirect_uri", &self.authorization.redirect_uri)
            .append_pair("client_id", &self.authorization.client_id)
            .append_pair("code_verifier", &self.pkce.code_verifier)
            .finish();

        let payload: CodeExchangeResponse = self.post_form(body).await?;
        if payload.id_token.is_empty() || payload.access_token.is_empty() {
            return Err(ProxyError::Auth("token response missing id or access token".to_string()));
        }

        let api_key = self.obtain_api_key(&payload.id_token).await;
        let tokens = TokenSet {
            account_id: jwt::account_id(&payload.id_token),
            id_token: Some(payload.id_token),
            access_token: Some(payload.access_token),
            refresh_token: Some(payload.refresh_token).filter(|t| !t.is_empty()),
        };
        Ok(AuthFile::new(tokens, api_key))
    }

    /// Best-effort API key via token exchange, only for organization-scoped logins
    async fn obtain_api_key(&self, id_token: &str) -> Option<String> {
        let org_id = jwt::auth_claim(id_token, "organization_id");
        let project_id = jwt::auth_claim(id_token, "project_id");
        if org_id.is_none() || project_id.is_none() {
            debug!("No organization/project claims; skipping API key exchange");
            return None;
        }

        let today = chrono::Utc::now().format("%Y-%m-%d");
        let body = form_urlencoded::Serializer::new(String::new())
            .append_pair("grant_type", TOKEN_EXCHANGE_GRANT)
            .append_pair("client_id", &self.authorization.client_id)
            .append_pair("requested_token", "openai-api-key")
            .append_pair("subject_token", id_token)
            .append_pair("subject_token_type", ID_TOKEN_TYPE)
            .append_pair("name", &format!("ChatGPT Local [auto-generated] ({today})"))
            .finish();

        match self.post_form::<ApiKeyExchangeResponse>(body).await {
            Ok(response) => response.access_token,
            Err(e) => {
                warn!("API key exchange failed, continuing without it: {}", e);
                None
            }
        }
    }

    async fn post_form<T: serde::de::DeserializeOwned>(&self, body: String) -> Result<T> {
        let response = self
            .client
            .post(&self.token_endpoint)
            .header(CONTENT_TYPE, "application/x-www-form-urlencoded")
            .body(body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(ProxyError::Auth(format!("token endpoint returned status {}", status)));
        }
        Ok(response.json().await?)
    }
}

///
/// Extract redirect query parameters from a pasted URL.
///
/// # Returns
///  * Query parameters when the URL parses and carries a `code`
pub fn parse_redirect_url(input: &str) -> Option<HashMap<String, String>> {
    let url = url::Url::parse(input.trim()).ok()?;
    let params: HashMap<String, String> = url.query_pairs().into_owned().collect();
    params.contains_key("code").then_some(params)
}

fn callback_router(tx: mpsc::Sender<CallbackRequest>) -> Router {
    Router::new()
        .route(CALLBACK_PATH, get(handle_callback))
        .route("/success", get(|| async { Html(LOGIN_SUCCESS_HTML) }))
        .fallback(|| async { (StatusCode::NOT_FOUND, "Not Found") })
        .with_state(tx)
}

async fn handle_callback(
    State(tx): State<mpsc::Sender<CallbackRequest>>,
    Query(params): Query<HashMap<String, String>>,
) -> Response {
    let (reply, outcome) = oneshot::channel();
    if tx.send(CallbackRequest { params, reply }).await.is_err() {
        return (StatusCode::GONE, "Login already finished").into_response();
    }

    match outcome.await {
        Ok(Ok(())) => Html(LOGIN_SUCCESS_HTML).into_response(),
        Ok(Err((status, message))) => (status, message).into_response(),
        Err(_) => (StatusCode::INTERNAL_SERVER_ERROR, "Login aborted").into_response(),
    }
}

fn callback_status(error: &ProxyError) -> StatusCode {
    match error {
        ProxyError::InvalidRequest { .. } => StatusCode::BAD_REQUEST,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

async fn wait_paste(
    paste: &mut Option<JoinHandle<Option<HashMap<String, String>>>>,
) -> Option<HashMap<String, String>> {
    match paste.as_mut() {
        Some(handle) => handle.await.ok().flatten(),
        None => std::future::pending().await,
    }
}

async fn read_pasted_redirect() -> Option<HashMap<String, String>> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        if line.trim().is_empty() {
            continue;
        }
        match parse_redirect_url(&line) {
            Some(params) => return Some(params),
            None => warn!("Pasted text is not a redirect URL with a code; try again"),
        }
    }
    None
}

/* --- tests ----------------------------------------------------------------------------------- */

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::jwt::tests::make_token;
    use httpmock::prelude::*;
    use serde_json::json;
    use tempfile::TempDir;

    async fn flow(issuer: &str, dir: &TempDir) -> LoginFlow {
        let mut config = Config::default();
        config.auth.issuer = issuer.to_string();
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let store = Arc::new(CredentialStore::new(dir.path()));
        LoginFlow::from_listener(listener, &config, store, reqwest::Client::new()).unwrap()
    }

    fn query_map(url: &str) -> HashMap<String, String> {
        url::Url::parse(url).unwrap().query_pairs().into_owned().collect()
    }

    #[tokio::test]
    async fn test_authorization_url_embeds_state_and_challenge() {
        let dir = TempDir::new().unwrap();
        let flow = flow("https://auth.example.com", &dir).await;
        let url = flow.authorization_url();

        assert!(url.starts_with("https://auth.example.com/oauth/authorize?"));
        let params = query_map(&url);
        assert_eq!(params["response_type"], "code");
        assert_eq!(params["code_challenge_method"], "S256");
        assert_eq!(params["scope"], LOGIN_SCOPE);
        assert_eq!(params["state"], flow.authorization().state_nonce);
        assert_eq!(params["code_challenge"], pkce::code_challenge(&flow.pkce.code_verifier));
        assert!(params["redirect_uri"].ends_with(CALLBACK_PATH));
    }

    #[test]
    fn test_parse_redirect_url() {
        let params = parse_redirect_url(" http://localhost:1455/auth/callback?code=abc&state=xyz \n")
            .expect("Should parse");
        assert_eq!(params["code"], "abc");
        assert_eq!(params["state"], "xyz");
        assert!(parse_redirect_url("http://localhost:1455/auth/callback?state=xyz").is_none());
        assert!(parse_redirect_url("not a url").is_none());
    }

    #[tokio::test]
    async fn test_state_mismatch_is_rejected_without_exchange() {
        let server = MockServer::start();
        let token_endpoint = server.mock(|when, then| {
            when.method(POST).path("/oauth/token");
            then.status(200);
        });

        let dir = TempDir::new().unwrap();
        let flow = flow(&server.base_url(), &dir).await;
        let params = HashMap::from([
            ("code".to_string(), "abc".to_string()),
            ("state".to_string(), "forged".to_string()),
        ]);

        let err = flow.complete(&params).await.unwrap_err();
        assert!(matches!(err, ProxyError::InvalidRequest { .. }));
        token_endpoint.assert_calls(0);
    }

    #[tokio::test]
    async fn test_callback_completes_login() {
        let server = MockServer::start();
        let id_token = make_token(&json!({
            jwt::AUTH_CLAIMS_NAMESPACE: {"chatgpt_account_id": "acc-9"}
        }));
        let token_endpoint = server.mock(|when, then| {
            when.method(POST)
                .path("/oauth/token")
                .body_includes("grant_type=authorization_code")
                .body_includes("code=the-code");
            then.status(200).json_body(json!({
                "id_token": id_token,
                "access_token": "access",
                "refresh_token": "refresh"
            }));
        });

        let dir = TempDir::new().unwrap();
        let flow = flow(&server.base_url(), &dir).await;
        let redirect = flow.authorization().redirect_uri.clone();
        let state = flow.authorization().state_nonce.clone();
        let login = tokio::spawn(flow.run(false));

        let response = reqwest::get(format!("{redirect}?code=the-code&state={state}")).await.unwrap();
        assert_eq!(response.status(), 200);
        assert!(response.text().await.unwrap().contains("Login successful"));

        let auth = login.await.unwrap().expect("Login should succeed");
        token_endpoint.assert_calls(1);
        let tokens = auth.tokens.unwrap();
        assert_eq!(tokens.account_id.as_deref(), Some("acc-9"));
        assert!(auth.openai_api_key.is_none());
        assert!(dir.path().join("auth.json").exists());
    }

    #[tokio::test]
    async fn test_missing_code_fails_login_with_400() {
        let dir = TempDir::new().unwrap();
        let flow = flow("http://127.0.0.1:9", &dir).await;
        let redirect = flow.authorization().redirect_uri.clone();
        let login = tokio::spawn(flow.run(false));

        let response = reqwest::get(format!("{redirect}?state=whatever")).await.unwrap();
        assert_eq!(response.status(), 400);
        assert!(login.await.unwrap().is_err());
    }

    #[tokio::test]
    async fn test_api_key_exchange_runs_for_organization_logins() {
        let server = MockServer::start();
        let id_token = make_token(&json!({
            "organization_id": "org-1",
            "project_id": "proj-1",
            jwt::AUTH_CLAIMS_NAMESPACE: {"chatgpt_account_id": "acc"}
        }));
        server.mock(|when, then| {
            when.method(POST).path("/oauth/token").body_includes("requested_token=openai-api-key");
            then.status(200).json_body(json!({"access_token": "sk-generated"}));
        });
        server.mock(|when, then| {
            when.method(POST).path("/oauth/token").body_includes("grant_type=authorization_code");
            then.status(200).json_body(json!({
                "id_token": id_token,
                "access_token": "access",
                "refresh_token": "refresh"
            }));
        });

        let dir = TempDir::new().unwrap();
        let flow = flow(&server.base_url(), &dir).await;
        let params = HashMap::from([
            ("code".to_string(), "c".to_string()),
            ("state".to_string(), flow.authorization().state_nonce.clone()),
        ]);

        let auth = flow.complete(&params).await.unwrap();
        assert_eq!(auth.openai_api_key.as_deref(), Some("sk-generated"));
    }
}
