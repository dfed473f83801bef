//!
//! HTTP handlers for the OpenAI-compatible surface.
//!
//! Each endpoint parses the client body, builds an [`UpstreamRequest`], opens the
//! backend stream and hands the response to the matching translator in `stream`.
//! Errors are mapped to OpenAI-style `{"error": {...}}` bodies in one place.
//!
//! Authors:
//!   Jaro <yarenty@gmail.com>
//!
//! Copyright (c) 2026 SkyCorp

/* --- uses ------------------------------------------------------------------------------------ */

use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Instant;

use axum::Json;
use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use serde_json::{Value, json};
use tracing::{debug, error, info};

use crate::auth::{AccessTokenProvider, CredentialStore, TokenManager};
use crate::config::Config;
use crate::converter::MessageConverter;
use crate::converter::tools::{PassthroughTools, convert_tools_to_values, resolve_tool_choice};
use crate::error::{ProxyError, Result};
use crate::instructions::Instructions;
use crate::models::{model_list, resolve_model};
use crate::reasoning::{ReasoningDialect, build_reasoning_param};
use crate::responses::{self, ResponseCollector, ResponseStore};
use crate::session::SessionFingerprinter;
use crate::stream::{self, ChatStreamTranslator, TextStreamTranslator};
use crate::upstream::{UpstreamClient, UpstreamRequest};

/* --- types ----------------------------------------------------------------------------------- */

///
/// Application state shared by all handlers.
pub struct AppState {
    /** effective configuration */
    pub config: Config,
    /** backend client holding credentials and session keys */
    pub upstream: UpstreamClient,
    /** instructions text provider */
    pub instructions: Instructions,
    /** chat messages to backend input items */
    pub converter: MessageConverter,
    /** local store for `/v1/responses` */
    pub responses: ResponseStore,
    /** request counters for `/health` */
    pub metrics: AppMetrics,
}

///
/// Request counters reported by `/health`.
#[derive(Debug)]
pub struct AppMetrics {
    /** total number of proxied requests */
    pub total_requests: AtomicU64,
    /** requests answered without error */
    pub successful_requests: AtomicU64,
    /** requests answered with an error body */
    pub failed_requests: AtomicU64,
    started_at: Instant,
    /** RFC 3339 time of the last proxied request */
    last_request: Mutex<Option<String>>,
}

///
/// A translated chat or text completions request.
#[derive(Debug, Clone)]
pub struct CompletionPlan {
    pub request: UpstreamRequest,
    pub stream: bool,
    /** `stream_options.include_usage` */
    pub include_usage: bool,
    /** reasoning dialect; ignored by text completions */
    pub dialect: ReasoningDialect,
    /** model name echoed to the client */
    pub model_label: String,
}

/* --- constants ------------------------------------------------------------------------------- */

const INVALID_JSON_MESSAGE: &str = "Invalid JSON body";
const MISSING_MESSAGES_MESSAGE: &str = "Request must include messages: []";
const MISSING_PROMPT_MESSAGE: &str = "Request must include a non-empty prompt";
const INTERNAL_ERROR_MESSAGE: &str = "Internal server error";

const SESSION_HEADERS: &[&str] = &["x-session-id", "session_id"];

/* --- start of code -------------------------------------------------------------------------- */

impl Default for AppMetrics {
    fn default() -> Self {
        Self {
            total_requests: AtomicU64::new(0),
            successful_requests: AtomicU64::new(0),
            failed_requests: AtomicU64::new(0),
            started_at: Instant::now(),
            last_request: Mutex::new(None),
        }
    }
}

impl AppMetrics {
    fn begin(&self) {
        self.total_requests.fetch_add(1, Ordering::Relaxed);
        let now = chrono::Utc::now().to_rfc3339();
        *self.last_request.lock().unwrap_or_else(|poisoned| poisoned.into_inner()) = Some(now);
    }

    /// Count the outcome and render errors
    fn finish(&self, result: Result<Response>) -> Response {
        match result {
            Ok(response) => {
                self.successful_requests.fetch_add(1, Ordering::Relaxed);
                response
            }
            Err(e) => {
                self.failed_requests.fetch_add(1, Ordering::Relaxed);
                error!("Request failed: {}", e);
                create_error_response(&e)
            }
        }
    }

    /// Percentage of successful requests, 100 before the first request
    pub fn success_rate(&self) -> f64 {
        let total = self.total_requests.load(Ordering::Relaxed);
        if total == 0 {
            return 100.0;
        }
        let successful = self.successful_requests.load(Ordering::Relaxed);
        (successful as f64 / total as f64 * 100.0).round()
    }

    pub fn uptime_seconds(&self) -> u64 {
        self.started_at.elapsed().as_secs()
    }

    fn last_request(&self) -> Option<String> {
        self.last_request.lock().unwrap_or_else(|poisoned| poisoned.into_inner()).clone()
    }
}

impl AppState {
    ///
    /// Build the state from configuration, with the on-disk token manager.
    ///
    /// # Arguments
    ///  * `config` - effective configuration
    ///
    /// # Returns
    ///  * Ready state
    ///  * `ProxyError::Config` when the credential home or instructions files cannot be resolved
    pub fn new(config: Config) -> Result<Self> {
        let store = Arc::new(CredentialStore::from_config(&config)?);
        let limits_home = store.home().to_path_buf();
        let tokens = TokenManager::new(&config, store, reqwest::Client::new());
        Self::with_provider(config, Arc::new(tokens), Some(limits_home))
    }

    ///
    /// Build the state around any credential provider.
    ///
    /// # Arguments
    ///  * `config` - effective configuration
    ///  * `tokens` - credential provider
    ///  * `limits_home` - where rate-limit snapshots go, `None` to skip them
    pub fn with_provider(
        config: Config,
        tokens: Arc<dyn AccessTokenProvider>,
        limits_home: Option<PathBuf>,
    ) -> Result<Self> {
        let sessions = Arc::new(SessionFingerprinter::default());
        let upstream = UpstreamClient::new(&config, tokens, sessions, limits_home)?;
        let instructions = Instructions::from_config(&config)?;
        let converter = MessageConverter::new(config.server.log_level);
        let responses = ResponseStore::new(config.gateway.store_capacity);

        info!(
            "Gateway ready: upstream={} default effort={} dialect={}",
            config.upstream.responses_url,
            config.reasoning.effort.as_str(),
            config.reasoning.compat.as_str()
        );

        Ok(Self { config, upstream, instructions, converter, responses, metrics: AppMetrics::default() })
    }
}

///
/// Translate a `/v1/chat/completions` body.
///
/// `messages` is required; a bare `prompt` or `input` string is accepted as a single
/// user message.
///
/// # Arguments
///  * `payload` - parsed request body
///  * `headers` - request headers, for the client session id
///  * `state` - configuration, instructions and converter
///
/// # Returns
///  * The plan, with the upstream request ready to send
///  * `ProxyError::InvalidRequest` when no usable message remains
pub fn build_chat_plan(payload: &Value, headers: &HeaderMap, state: &AppState) -> Result<CompletionPlan> {
    let messages = match payload.get("messages") {
        Some(Value::Array(messages)) => messages.clone(),
        None | Some(Value::Null) => ["prompt", "input"]
            .iter()
            .find_map(|key| payload.get(*key).and_then(Value::as_str))
            .map(|text| vec![json!({"role": "user", "content": text})])
            .unwrap_or_default(),
        Some(_) => return Err(ProxyError::invalid(MISSING_MESSAGES_MESSAGE)),
    };

    let input = state.converter.convert_to_values(&messages)?;
    if input.is_empty() {
        return Err(ProxyError::invalid(MISSING_MESSAGES_MESSAGE));
    }

    let dialect = payload
        .get("reasoning_compat")
        .and_then(Value::as_str)
        .and_then(ReasoningDialect::parse)
        .unwrap_or(state.config.reasoning.compat);

    let mut plan = base_plan(payload, headers, state, input)?;
    plan.request.tools = convert_tools_to_values(payload.get("tools"));
    plan.request.passthrough_tools = PassthroughTools::from_request(
        payload.get("responses_tools"),
        payload.get("responses_tool_choice"),
        state.config.gateway.default_web_search,
    )?;
    plan.request.tool_choice =
        resolve_tool_choice(payload.get("tool_choice"), payload.get("responses_tool_choice"));
    plan.request.parallel_tool_calls =
        payload.get("parallel_tool_calls").and_then(Value::as_bool).unwrap_or(false);
    plan.dialect = dialect;
    Ok(plan)
}

///
/// Translate a `/v1/completions` body.
///
/// The prompt is a string, a list whose string entries are concatenated, or the
/// `suffix` field as a last resort.
pub fn build_text_plan(payload: &Value, headers: &HeaderMap, state: &AppState) -> Result<CompletionPlan> {
    let prompt = match payload.get("prompt") {
        Some(Value::String(prompt)) => prompt.clone(),
        Some(Value::Array(parts)) => parts.iter().filter_map(Value::as_str).collect(),
        _ => payload.get("suffix").and_then(Value::as_str).unwrap_or_default().to_string(),
    };

    let input = state.converter.convert_to_values(&[json!({"role": "user", "content": prompt})])?;
    if input.is_empty() {
        return Err(ProxyError::invalid(MISSING_PROMPT_MESSAGE));
    }
    base_plan(payload, headers, state, input)
}

/// Client session id from `X-Session-Id` or `session_id`
pub fn client_session_id(headers: &HeaderMap) -> Option<String> {
    SESSION_HEADERS.iter().find_map(|name| {
        headers
            .get(*name)
            .and_then(|v| v.to_str().ok())
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .map(str::to_string)
    })
}

///
/// Handle `POST /v1/chat/completions`.
pub async fn chat_completions(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    state.metrics.begin();
    let result = handle_chat(&state, &headers, &body).await;
    state.metrics.finish(result)
}

///
/// Handle `POST /v1/completions`.
pub async fn completions(State(state): State<Arc<AppState>>, headers: HeaderMap, body: Bytes) -> Response {
    state.metrics.begin();
    let result = handle_text(&state, &headers, &body).await;
    state.metrics.finish(result)
}

///
/// Handle `POST /v1/responses`.
///
/// Streaming requests get the backend SSE verbatim; otherwise the events are
/// aggregated into one `response` object.
pub async fn create_response(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    state.metrics.begin();
    let result = handle_responses(&state, &headers, &body).await;
    state.metrics.finish(result)
}

///
/// Handle `GET /v1/responses/{id}`.
pub async fn get_response(State(state): State<Arc<AppState>>, Path(id): Path<String>) -> Response {
    match state.responses.get(&id) {
        Some(response) => Json(response).into_response(),
        None => create_error_response(&ProxyError::NotFound("Not found".to_string())),
    }
}

///
/// Handle models listing endpoint for OpenAI compatibility.
pub async fn models() -> Json<Value> {
    Json(model_list())
}

///
/// Handle health check endpoint.
///
/// Reports uptime and request counters; never touches the backend.
pub async fn health(State(state): State<Arc<AppState>>) -> Json<Value> {
    let metrics = &state.metrics;
    let uptime = metrics.uptime_seconds();

    Json(json!({
      "status": "ok",
      "timestamp": chrono::Utc::now().to_rfc3339(),
      "uptime_seconds": uptime,
      "uptime_human": format_uptime(uptime),
      "requests": {
        "total": metrics.total_requests.load(Ordering::Relaxed),
        "success": metrics.successful_requests.load(Ordering::Relaxed),
        "error": metrics.failed_requests.load(Ordering::Relaxed),
        "success_rate": metrics.success_rate(),
      },
      "last_request": metrics.last_request(),
    }))
}

///
/// Create error response in OpenAI format.
///
/// Internal failures are rendered with a generic message so no local detail
/// reaches the client.
///
/// # Arguments
///  * `error` - the error to convert
///
/// # Returns
///  * HTTP response with the mapped status and `{"error": {"message", "type", "code"}}`
pub fn create_error_response(error: &ProxyError) -> Response {
    let (status, error_type, message, code) = match error {
        ProxyError::Unauthenticated(_) | ProxyError::RefreshFailed(_) | ProxyError::Auth(_) => {
            (StatusCode::UNAUTHORIZED, "authentication_error", error.to_string(), None)
        }
        ProxyError::InvalidRequest { message, code } => {
            (StatusCode::BAD_REQUEST, "invalid_request_error", message.clone(), code.clone())
        }
        ProxyError::NotFound(message) => (StatusCode::NOT_FOUND, "not_found_error", message.clone(), None),
        ProxyError::UpstreamTransport(_) => (StatusCode::BAD_GATEWAY, "upstream_error", error.to_string(), None),
        ProxyError::UpstreamProtocol { status, message, code, error_type } => (
            StatusCode::from_u16(*status).unwrap_or(StatusCode::BAD_GATEWAY),
            error_type.as_deref().unwrap_or("upstream_error"),
            message.clone(),
            code.clone(),
        ),
        ProxyError::Request(_) => (
            StatusCode::BAD_GATEWAY,
            "upstream_error",
            "Upstream ChatGPT request failed".to_string(),
            None,
        ),
        ProxyError::Config(_)
        | ProxyError::Http(_)
        | ProxyError::Io(_)
        | ProxyError::Serialization(_)
        | ProxyError::Conversion(_) => {
            (StatusCode::INTERNAL_SERVER_ERROR, "internal_error", INTERNAL_ERROR_MESSAGE.to_string(), None)
        }
    };

    let error_response = json!({
      "error": {
        "message": message,
        "type": error_type,
        "code": code,
      }
    });

    (status, Json(error_response)).into_response()
}

/// `1d 2h 3m 4s`, leading zero units omitted
pub fn format_uptime(seconds: u64) -> String {
    let (days, rest) = (seconds / 86_400, seconds % 86_400);
    let (hours, rest) = (rest / 3_600, rest % 3_600);
    let (minutes, secs) = (rest / 60, rest % 60);

    let mut parts = Vec::new();
    if days > 0 {
        parts.push(format!("{days}d"));
    }
    if days > 0 || hours > 0 {
        parts.push(format!("{hours}h"));
    }
    if days > 0 || hours > 0 || minutes > 0 {
        parts.push(format!("{minutes}m"));
    }
    parts.push(format!("{secs}s"));
    parts.join(" ")
}

/* --- private methods ------------------------------------------------------------------------- */

/// Empty body reads as `{}`; anything other than a JSON object is rejected
fn parse_body(body: &Bytes) -> Result<Value> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(json!({}));
    }
    match serde_json::from_slice::<Value>(body) {
        Ok(payload @ Value::Object(_)) => Ok(payload),
        _ => Err(ProxyError::invalid(INVALID_JSON_MESSAGE)),
    }
}

/// Model, instructions, reasoning and stream flags shared by both completions endpoints
fn base_plan(
    payload: &Value,
    headers: &HeaderMap,
    state: &AppState,
    input: Vec<Value>,
) -> Result<CompletionPlan> {
    let requested_model = payload.get("model").and_then(Value::as_str).filter(|m| !m.trim().is_empty());
    let resolved = resolve_model(requested_model, state.config.upstream.debug_model.as_deref());

    let overrides = match payload.get("reasoning") {
        Some(reasoning @ Value::Object(_)) => Some(reasoning.clone()),
        _ => resolved.effort.map(|effort| json!({ "effort": effort.as_str() })),
    };

    let instructions = state.instructions.for_model(&resolved.model).to_string();
    let mut request = UpstreamRequest::new(resolved.model.clone(), Some(instructions), input);
    request.reasoning = Some(build_reasoning_param(
        state.config.reasoning.effort,
        state.config.reasoning.summary,
        overrides.as_ref(),
    ));
    request.client_session_id = client_session_id(headers);

    Ok(CompletionPlan {
        request,
        stream: payload.get("stream").and_then(Value::as_bool).unwrap_or(false),
        include_usage: payload
            .get("stream_options")
            .and_then(|o| o.get("include_usage"))
            .and_then(Value::as_bool)
            .unwrap_or(false),
        dialect: state.config.reasoning.compat,
        model_label: requested_model.unwrap_or(&resolved.model).to_string(),
    })
}

async fn handle_chat(state: &AppState, headers: &HeaderMap, body: &Bytes) -> Result<Response> {
    let payload = parse_body(body)?;
    let plan = build_chat_plan(&payload, headers, state)?;
    debug!(
        "Chat request: model={} stream={} items={} tools={}",
        plan.request.model,
        plan.stream,
        plan.request.input.len(),
        plan.request.tools.len()
    );

    let response = state.upstream.start(&plan.request).await?;
    let created = chrono::Utc::now().timestamp();

    if plan.stream {
        let translator =
            ChatStreamTranslator::streaming(plan.model_label, created, plan.dialect, plan.include_usage);
        return Ok(stream::sse_response(response, translator));
    }

    let mut translator = ChatStreamTranslator::collecting(plan.model_label, created, plan.dialect);
    stream::drain(response, &mut translator).await;
    Ok(Json(translator.into_completion()?).into_response())
}

async fn handle_text(state: &AppState, headers: &HeaderMap, body: &Bytes) -> Result<Response> {
    let payload = parse_body(body)?;
    let plan = build_text_plan(&payload, headers, state)?;
    debug!("Completions request: model={} stream={}", plan.request.model, plan.stream);

    let response = state.upstream.start(&plan.request).await?;
    let created = chrono::Utc::now().timestamp();

    if plan.stream {
        let translator = TextStreamTranslator::streaming(plan.model_label, created, plan.include_usage);
        return Ok(stream::sse_response(response, translator));
    }

    let mut translator = TextStreamTranslator::collecting(plan.model_label, created);
    stream::drain(response, &mut translator).await;
    Ok(Json(translator.into_completion()?).into_response())
}

async fn handle_responses(state: &AppState, headers: &HeaderMap, body: &Bytes) -> Result<Response> {
    let payload = parse_body(body)?;
    let mut plan =
        responses::prepare(&payload, &state.config, &state.instructions, &state.converter, &state.responses)?;
    plan.request.client_session_id = client_session_id(headers);
    debug!(
        "Responses request: model={} stream={} store={} items={}",
        plan.request.model,
        plan.stream,
        plan.store,
        plan.request.input.len()
    );

    let response = state.upstream.start(&plan.request).await?;

    if plan.stream {
        return Ok(stream::passthrough_response(response));
    }

    let mut collector = ResponseCollector::new();
    stream::drain(response, &mut collector).await;
    let created = chrono::Utc::now().timestamp();
    Ok(Json(collector.complete(&plan, created, &state.responses)?).into_response())
}

/* --- tests ----------------------------------------------------------------------------------- */
