//!
//! Upstream client for the ChatGPT responses backend.
//!
//! Builds the backend payload from a translated request, attaches credentials and
//! the prompt-cache session id, and opens the streaming POST. The response body is
//! handed back untouched; translating its event stream is the job of `stream`.
//!
//! Authors:
//!   Jaro <yarenty@gmail.com>
//!
//! Copyright (c) 2026 SkyCorp

/* --- uses ------------------------------------------------------------------------------------ */

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use reqwest::StatusCode;
use reqwest::header::{ACCEPT, AUTHORIZATION, CONTENT_TYPE};
use serde_json::{Map, Value, json};
use tracing::{debug, error, info, warn};

use crate::auth::tokens::{AccessTokenProvider, Credentials};
use crate::config::Config;
use crate::converter::tools::{PassthroughTools, TOOLS_REJECTED_CODE};
use crate::error::{ProxyError, Result};
use crate::limits;
use crate::reasoning::{REASONING_INCLUDE, ReasoningParam};
use crate::session::SessionFingerprinter;

/* --- types ----------------------------------------------------------------------------------- */

///
/// Translated request, ready to become a backend payload.
///
/// Built fresh for every inbound request and never shared.
#[derive(Debug, Clone)]
pub struct UpstreamRequest {
    /** normalized backend model id */
    pub model: String,
    /** system instructions text */
    pub instructions: Option<String>,
    /** ordered backend input items */
    pub input: Vec<Value>,
    /** function tools */
    pub tools: Vec<Value>,
    /** optional built-in tools, dropped on the single retry */
    pub passthrough_tools: PassthroughTools,
    /** `auto`, `none` or a tool object */
    pub tool_choice: Value,
    pub parallel_tool_calls: bool,
    /** reasoning request, omitted when `None` */
    pub reasoning: Option<ReasoningParam>,
    /** additional backend fields forwarded verbatim (`stream`/`store` are ignored) */
    pub extra_fields: Map<String, Value>,
    /** session id supplied by the client via headers */
    pub client_session_id: Option<String>,
}

///
/// HTTP client for the responses endpoint.
pub struct UpstreamClient {
    http: reqwest::Client,
    responses_url: String,
    tokens: Arc<dyn AccessTokenProvider>,
    sessions: Arc<SessionFingerprinter>,
    /** directory receiving rate-limit snapshots, if any */
    limits_home: Option<PathBuf>,
}

/* --- constants ------------------------------------------------------------------------------- */

const OPENAI_BETA: &str = "responses=experimental";

const CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

const DEFAULT_UPSTREAM_ERROR: &str = "Upstream error";

/* --- start of code -------------------------------------------------------------------------- */

impl UpstreamRequest {
    ///
    /// Minimal request with default tool settings.
    pub fn new(model: impl Into<String>, instructions: Option<String>, input: Vec<Value>) -> Self {
        Self {
            model: model.into(),
            instructions,
            input,
            tools: Vec::new(),
            passthrough_tools: PassthroughTools::default(),
            tool_choice: Value::String("auto".to_string()),
            parallel_tool_calls: false,
            reasoning: None,
            extra_fields: Map::new(),
            client_session_id: None,
        }
    }

    ///
    /// Backend payload for this request.
    ///
    /// # Arguments
    ///  * `session_id` - prompt-cache key
    ///  * `with_passthrough` - whether to append the optional built-in tools
    pub fn to_payload(&self, session_id: &str, with_passthrough: bool) -> Value {
        let mut tools = self.tools.clone();
        if with_passthrough {
            tools.extend(self.passthrough_tools.tools.iter().cloned());
        }

        let mut payload = Map::new();
        payload.insert("model".to_string(), json!(self.model));
        payload.insert("instructions".to_string(), json!(self.instructions));
        payload.insert("input".to_string(), Value::Array(self.input.clone()));
        payload.insert("tools".to_string(), Value::Array(tools));
        payload.insert("tool_choice".to_string(), normalize_tool_choice(&self.tool_choice));
        payload.insert("parallel_tool_calls".to_string(), json!(self.parallel_tool_calls));
        payload.insert("store".to_string(), json!(false));
        payload.insert("stream".to_string(), json!(true));
        payload.insert("prompt_cache_key".to_string(), json!(session_id));

        let mut include: Vec<String> = self
            .extra_fields
            .get("include")
            .and_then(Value::as_array)
            .map(|items| items.iter().filter_map(Value::as_str).map(str::to_string).collect())
            .unwrap_or_default();
        if let Some(reasoning) = &self.reasoning {
            if reasoning.is_active() && !include.iter().any(|i| i == REASONING_INCLUDE) {
                include.push(REASONING_INCLUDE.to_string());
            }
            payload.insert("reasoning".to_string(), json!(reasoning));
        }

        for (key, value) in &self.extra_fields {
            if matches!(key.as_str(), "stream" | "store" | "include") {
                continue;
            }
            payload.insert(key.clone(), value.clone());
        }
        if !include.is_empty() {
            payload.insert("include".to_string(), json!(include));
        }

        Value::Object(payload)
    }
}

impl UpstreamClient {
    ///
    /// Create the upstream client.
    ///
    /// # Arguments
    ///  * `config` - endpoint URL and read timeout
    ///  * `tokens` - credential provider
    ///  * `sessions` - shared session fingerprinter
    ///  * `limits_home` - where rate-limit snapshots go, `None` to skip them
    pub fn new(
        config: &Config,
        tokens: Arc<dyn AccessTokenProvider>,
        sessions: Arc<SessionFingerprinter>,
        limits_home: Option<PathBuf>,
    ) -> Result<Self> {
        let http = reqwest::Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .read_timeout(Duration::from_secs(config.upstream.timeout_secs))
            .build()?;

        Ok(Self {
            http,
            responses_url: config.upstream.responses_url.clone(),
            tokens,
            sessions,
            limits_home,
        })
    }

    pub fn sessions(&self) -> &Arc<SessionFingerprinter> {
        &self.sessions
    }

    ///
    /// Open the streaming request.
    ///
    /// Credentials are resolved first, so a missing login fails without any network
    /// traffic. When the backend rejects a request that carried passthrough tools, the
    /// request is retried exactly once without them.
    ///
    /// # Returns
    ///  * Successful backend response whose body is the SSE stream
    ///  * `ProxyError::Unauthenticated` / `RefreshFailed` without credentials
    ///  * `ProxyError::UpstreamTransport` on connection failure
    ///  * `ProxyError::UpstreamProtocol` when the backend answers with an error status
    pub async fn start(&self, request: &UpstreamRequest) -> Result<reqwest::Response> {
        let credentials = self.tokens.credentials().await?;
        let session_id = self.sessions.ensure_session_id(
            request.instructions.as_deref(),
            &request.input,
            request.client_session_id.as_deref(),
        );

        let with_tools = !request.passthrough_tools.is_empty();
        let first = self.send(&credentials, &session_id, &request.to_payload(&session_id, true)).await;

        let original = match first {
            Err(err @ ProxyError::UpstreamProtocol { status: 400, .. }) if with_tools => err,
            other => return other,
        };

        warn!("Backend rejected request with passthrough tools ({}); retrying without them", original);
        match self.send(&credentials, &session_id, &request.to_payload(&session_id, false)).await {
            Ok(response) => Ok(response),
            Err(retry_err) => {
                debug!("Retry without passthrough tools failed: {}", retry_err);
                Err(with_code(original, TOOLS_REJECTED_CODE))
            }
        }
    }

    /* --- private methods ----------------------------------------------------------------- */

    async fn send(&self, credentials: &Credentials, session_id: &str, payload: &Value) -> Result<reqwest::Response> {
        let model = payload.get("model").and_then(Value::as_str).unwrap_or_default();
        info!("POST {} model={} session={}", self.responses_url, model, session_id);

        let response = self
            .http
            .post(&self.responses_url)
            .header(AUTHORIZATION, format!("Bearer {}", credentials.access_token))
            .header(CONTENT_TYPE, "application/json")
            .header(ACCEPT, "text/event-stream")
            .header("chatgpt-account-id", &credentials.account_id)
            .header("OpenAI-Beta", OPENAI_BETA)
            .header("session_id", session_id)
            .json(payload)
            .send()
            .await
            .map_err(|e| {
                error!("Upstream request failed: {}", e);
                ProxyError::UpstreamTransport(e.to_string())
            })?;

        if let Some(home) = &self.limits_home {
            if let Err(e) = limits::record_from_headers(home, response.headers()) {
                warn!("Unable to store rate-limit snapshot: {}", e);
            }
        }

        let status = response.status();
        if status.is_client_error() || status.is_server_error() {
            let body = response.bytes().await.unwrap_or_default();
            let err = protocol_error(status, &body);
            error!("Upstream returned {}: {}", status, err);
            return Err(err);
        }
        Ok(response)
    }
}

/// `auto`, `none` and objects pass; anything else becomes `auto`
fn normalize_tool_choice(choice: &Value) -> Value {
    match choice {
        Value::String(s) if s == "auto" || s == "none" => choice.clone(),
        Value::Object(_) => choice.clone(),
        _ => Value::String("auto".to_string()),
    }
}

///
/// Map a backend error response to `ProxyError::UpstreamProtocol`.
///
/// Reads `error.{message,code,type}`, then top-level `detail` / `message`, and falls
/// back to a generic message when the body is not JSON.
pub fn protocol_error(status: StatusCode, body: &[u8]) -> ProxyError {
    let parsed: Option<Value> = serde_json::from_slice(body).ok();
    let error = parsed.as_ref().and_then(|v| v.get("error")).filter(|e| e.is_object());
    let field = |name: &str| {
        error.and_then(|e| e.get(name)).and_then(Value::as_str).map(str::to_string)
    };

    let message = field("message")
        .or_else(|| {
            let top = parsed.as_ref()?;
            top.get("detail").or_else(|| top.get("message")).and_then(Value::as_str).map(str::to_string)
        })
        .filter(|m| !m.is_empty())
        .unwrap_or_else(|| DEFAULT_UPSTREAM_ERROR.to_string());

    ProxyError::UpstreamProtocol {
        status: status.as_u16(),
        message,
        code: field("code"),
        error_type: field("type"),
    }
}

fn with_code(err: ProxyError, new_code: &str) -> ProxyError {
    match err {
        ProxyError::UpstreamProtocol { status, message, error_type, .. } => {
            ProxyError::UpstreamProtocol { status, message, code: Some(new_code.to_string()), error_type }
        }
        other => other,
    }
}

/* --- tests ----------------------------------------------------------------------------------- */
