//!
//! `/v1/responses` support.
//!
//! Responses-style requests are already close to the backend schema, so they are
//! mostly forwarded: input is normalized into backend items, upstream `rs_*`
//! references are stripped, and client instructions move into the input because the
//! backend insists on its own instructions text. Streaming responses pass through
//! verbatim; non-streaming ones are aggregated into a single `response` object.
//!
//! `store: true` is never forwarded upstream. It is honored locally by a bounded
//! [`ResponseStore`], which also remembers a short conversation thread per response
//! so `previous_response_id` can be simulated.
//!
//! Authors:
//!   Jaro <yarenty@gmail.com>
//!
//! Copyright (c) 2026 SkyCorp

/* --- uses ------------------------------------------------------------------------------------ */

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;

use serde_json::{Map, Value, json};
use tracing::debug;

use crate::config::Config;
use crate::converter::MessageConverter;
use crate::converter::tools::{PassthroughTools, resolve_tool_choice, responses_request_tools};
use crate::error::{ProxyError, Result};
use crate::instructions::Instructions;
use crate::models::resolve_model;
use crate::reasoning::build_reasoning_param;
use crate::stream::{EventTranslator, Frame, Usage, event_kind, failure_message, response_id};
use crate::upstream::UpstreamRequest;

/* --- types ----------------------------------------------------------------------------------- */

///
/// A translated `/v1/responses` request.
#[derive(Debug, Clone)]
pub struct ResponsesPlan {
    pub request: UpstreamRequest,
    /** stream the backend SSE through (default) or aggregate */
    pub stream: bool,
    /** keep the aggregated response locally */
    pub store: bool,
    /** model name echoed in the aggregated object */
    pub model_label: String,
}

///
/// Bounded in-memory store of aggregated responses and their threads.
///
/// Both maps evict their oldest entry once `capacity` is exceeded.
pub struct ResponseStore {
    capacity: usize,
    inner: Mutex<StoreInner>,
}

#[derive(Default)]
struct StoreInner {
    responses: HashMap<String, Value>,
    response_order: VecDeque<String>,
    threads: HashMap<String, Vec<Value>>,
    thread_order: VecDeque<String>,
}

///
/// Aggregates backend events into a `response` object.
pub struct ResponseCollector {
    id: String,
    text: String,
    items: Vec<Value>,
    usage: Option<Usage>,
    error: Option<String>,
    finished: bool,
}

/* --- constants ------------------------------------------------------------------------------- */

/** items kept per conversation thread */
pub const MAX_THREAD_ITEMS: usize = 40;

/** fields forwarded to the backend as is */
const PASSTHROUGH_KEYS: &[&str] =
    &["temperature", "top_p", "seed", "stop", "text", "metadata", "include", "top_logprobs", "truncation"];

/** fields that may carry upstream `rs_*` references */
const REFERENCE_KEYS: &[&str] = &["previous_response_id", "response_id", "reference_id", "item_id"];

/** element types that make a bare `input` list a list of content parts */
const CONTENT_PART_TYPES: &[&str] = &["input_text", "input_image", "input_file", "output_text", "message"];

const EMPTY_INPUT_MESSAGE: &str = "Request must include non-empty 'input' (or 'messages'/'prompt')";

const NON_STREAM_ID: &str = "resp_nonstream";

/* --- start of code -------------------------------------------------------------------------- */

///
/// Translate a `/v1/responses` body.
///
/// # Arguments
///  * `payload` - parsed request body
///  * `config` - reasoning defaults, debug model and web-search default
///  * `instructions` - instructions text provider
///  * `converter` - chat message converter for the `messages`/`prompt` fallback
///  * `store` - local store used to resolve `previous_response_id`
///
/// # Returns
///  * The plan, with the upstream request ready to send
///  * `ProxyError::InvalidRequest` for empty input or rejected passthrough tools
pub fn prepare(
    payload: &Value,
    config: &Config,
    instructions: &Instructions,
    converter: &MessageConverter,
    store: &ResponseStore,
) -> Result<ResponsesPlan> {
    let requested_model = payload.get("model").and_then(Value::as_str);
    let resolved = resolve_model(requested_model, config.upstream.debug_model.as_deref());

    let mut input = strip_upstream_refs(normalize_input(payload, converter)?);

    if let Some(previous) = payload.get("previous_response_id").and_then(Value::as_str).map(str::trim) {
        if let Some(prior) = store.thread(previous) {
            debug!("Prepending {} item(s) from thread {}", prior.len(), previous);
            input = prior.into_iter().chain(input).collect();
        }
    }

    if let Some(client) = payload.get("instructions").and_then(Value::as_str).filter(|t| !t.trim().is_empty()) {
        input.insert(0, user_text_item(client));
    }

    let passthrough_tools = PassthroughTools::from_request(
        payload.get("responses_tools"),
        payload.get("responses_tool_choice"),
        config.gateway.default_web_search,
    )?;

    let overrides = match payload.get("reasoning") {
        Some(reasoning @ Value::Object(_)) => Some(reasoning.clone()),
        _ => resolved.effort.map(|effort| json!({ "effort": effort.as_str() })),
    };

    let mut extra_fields = Map::new();
    for key in PASSTHROUGH_KEYS {
        if let Some(value) = payload.get(*key).filter(|v| !v.is_null()) {
            extra_fields.insert(key.to_string(), value.clone());
        }
    }

    let mut request = UpstreamRequest::new(
        resolved.model.clone(),
        Some(instructions.for_model(&resolved.model).to_string()),
        input,
    );
    request.tools = responses_request_tools(payload.get("tools"));
    request.passthrough_tools = passthrough_tools;
    request.tool_choice = resolve_tool_choice(payload.get("tool_choice"), payload.get("responses_tool_choice"));
    request.parallel_tool_calls = payload.get("parallel_tool_calls").and_then(Value::as_bool).unwrap_or(false);
    request.reasoning =
        Some(build_reasoning_param(config.reasoning.effort, config.reasoning.summary, overrides.as_ref()));
    request.extra_fields = extra_fields;

    Ok(ResponsesPlan {
        request,
        stream: payload.get("stream").and_then(Value::as_bool).unwrap_or(true),
        store: payload.get("store").and_then(Value::as_bool).unwrap_or(false),
        model_label: requested_model.filter(|m| !m.is_empty()).unwrap_or(&resolved.model).to_string(),
    })
}

///
/// Backend input items from `input`, falling back to `messages` / `prompt`.
///
/// A list of bare content parts becomes one user message; a string becomes an
/// `input_text` user message; a single object is treated as one item.
pub fn normalize_input(payload: &Value, converter: &MessageConverter) -> Result<Vec<Value>> {
    let items = match payload.get("input") {
        Some(Value::Array(list)) => {
            if !list.is_empty() && list.iter().all(is_content_part) {
                Some(vec![json!({ "role": "user", "content": list })])
            } else {
                Some(list.iter().filter(|item| item.is_object()).cloned().collect())
            }
        }
        Some(Value::String(text)) => Some(vec![user_text_item(text)]),
        Some(Value::Object(item)) => match item.get("content") {
            Some(Value::Array(_)) if item.get("role").is_some_and(Value::is_string) => {
                Some(vec![Value::Object(item.clone())])
            }
            Some(content @ Value::Array(_)) => Some(vec![json!({ "role": "user", "content": content })]),
            _ => None,
        },
        _ => None,
    };

    let items = match items {
        Some(items) => items.into_iter().map(convert_message_parts).collect(),
        None => {
            let messages = match (payload.get("messages"), payload.get("prompt")) {
                (Some(Value::Array(messages)), _) => messages.clone(),
                (None, Some(Value::String(prompt))) => vec![json!({ "role": "user", "content": prompt })],
                _ => Vec::new(),
            };
            converter.convert_to_values(&messages)?
        }
    };

    if items.is_empty() {
        return Err(ProxyError::invalid(EMPTY_INPUT_MESSAGE));
    }
    Ok(items)
}

///
/// Remove `rs_*` references from items and their content parts.
///
/// Those ids point at backend-side state that is never stored (`store: false`).
pub fn strip_upstream_refs(items: Vec<Value>) -> Vec<Value> {
    items
        .into_iter()
        .filter(Value::is_object)
        .map(|mut item| {
            drop_ref_fields(&mut item);
            if let Some(Value::Array(parts)) = item.get_mut("content") {
                parts.iter_mut().for_each(drop_ref_fields);
            }
            item
        })
        .collect()
}

fn drop_ref_fields(value: &mut Value) {
    if let Value::Object(map) = value {
        map.retain(|key, v| {
            !(REFERENCE_KEYS.contains(&key.as_str()) && v.as_str().is_some_and(|s| s.trim().starts_with("rs_")))
        });
    }
}

fn is_content_part(value: &Value) -> bool {
    let Some(kind) = value.get("type").and_then(Value::as_str) else {
        return false;
    };
    CONTENT_PART_TYPES.contains(&kind) && value.get("role").is_none()
}

fn user_text_item(text: &str) -> Value {
    json!({ "role": "user", "content": [{ "type": "input_text", "text": text }] })
}

/// Rewrite `message` content parts into `input_text` and drop empty text parts
fn convert_message_parts(mut item: Value) -> Value {
    if let Some(Value::Array(parts)) = item.get_mut("content") {
        let converted: Vec<Value> = parts
            .drain(..)
            .map(|part| {
                if part.get("type").and_then(Value::as_str) == Some("message") {
                    debug!("Converting 'message' content part to input_text");
                    json!({ "type": "input_text", "text": message_part_text(part.get("content")) })
                } else {
                    part
                }
            })
            .filter(|part| {
                !(part.get("type").and_then(Value::as_str) == Some("input_text")
                    && part.get("text").and_then(Value::as_str).is_none_or(str::is_empty))
            })
            .collect();
        *parts = converted;
    }
    item
}

fn message_part_text(content: Option<&Value>) -> String {
    let fragments: Vec<String> = match content {
        Some(Value::Array(segments)) => segments
            .iter()
            .filter_map(|segment| match segment {
                Value::String(s) => Some(s.clone()),
                Value::Object(_) => segment
                    .get("text")
                    .and_then(Value::as_str)
                    .filter(|t| !t.trim().is_empty())
                    .or_else(|| segment.get("content").and_then(Value::as_str))
                    .map(str::to_string),
                _ => None,
            })
            .collect(),
        Some(Value::String(s)) => vec![s.clone()],
        Some(Value::Null) | None => Vec::new(),
        Some(other) => vec![other.to_string()],
    };
    fragments.into_iter().filter(|f| !f.trim().is_empty()).collect::<Vec<_>>().join("\n")
}

impl ResponseStore {
    pub fn new(capacity: usize) -> Self {
        Self { capacity: capacity.max(1), inner: Mutex::new(StoreInner::default()) }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, StoreInner> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    ///
    /// Keep a response under its `id`; re-storing an id refreshes its position.
    pub fn store_response(&self, response: &Value) {
        let Some(id) = response.get("id").and_then(Value::as_str).filter(|id| !id.is_empty()) else {
            return;
        };
        let mut inner = self.lock();
        inner.response_order.retain(|existing| existing != id);
        inner.response_order.push_back(id.to_string());
        inner.responses.insert(id.to_string(), response.clone());
        while inner.response_order.len() > self.capacity {
            if let Some(oldest) = inner.response_order.pop_front() {
                inner.responses.remove(&oldest);
            }
        }
    }

    pub fn get(&self, id: &str) -> Option<Value> {
        self.lock().responses.get(id).cloned()
    }

    ///
    /// Remember the conversation so far, keeping the last [`MAX_THREAD_ITEMS`] items.
    pub fn set_thread(&self, id: &str, items: &[Value]) {
        if id.is_empty() {
            return;
        }
        let start = items.len().saturating_sub(MAX_THREAD_ITEMS);
        let mut inner = self.lock();
        if !inner.threads.contains_key(id) {
            inner.thread_order.push_back(id.to_string());
        }
        inner.threads.insert(id.to_string(), items[start..].to_vec());
        while inner.thread_order.len() > self.capacity {
            if let Some(oldest) = inner.thread_order.pop_front() {
                inner.threads.remove(&oldest);
            }
        }
    }

    pub fn thread(&self, id: &str) -> Option<Vec<Value>> {
        self.lock().threads.get(id).filter(|items| !items.is_empty()).cloned()
    }

    pub fn len(&self) -> usize {
        self.lock().responses.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for ResponseCollector {
    fn default() -> Self {
        Self {
            id: NON_STREAM_ID.to_string(),
            text: String::new(),
            items: Vec::new(),
            usage: None,
            error: None,
            finished: false,
        }
    }
}

impl ResponseCollector {
    pub fn new() -> Self {
        Self::default()
    }

    ///
    /// Build the `response` object, store it when asked to and record its thread.
    ///
    /// # Returns
    ///  * The aggregated response
    ///  * `ProxyError::UpstreamProtocol` (502) when the backend reported `response.failed`
    pub fn complete(self, plan: &ResponsesPlan, created: i64, store: &ResponseStore) -> Result<Value> {
        if let Some(message) = self.error {
            return Err(ProxyError::UpstreamProtocol {
                status: 502,
                message,
                code: None,
                error_type: Some("upstream_error".to_string()),
            });
        }

        let mut output = Vec::new();
        if !self.text.is_empty() {
            output.push(json!({
                "type": "message",
                "role": "assistant",
                "content": [{ "type": "output_text", "text": self.text }],
            }));
        }
        output.extend(self.items);

        let mut response = json!({
            "id": self.id,
            "object": "response",
            "created_at": created,
            "model": plan.model_label,
            "output": output,
        });
        if let Some(usage) = self.usage {
            response["usage"] = json!(usage);
        }

        if plan.store {
            store.store_response(&response);
        }

        let mut thread = plan.request.input.clone();
        if !self.text.is_empty() {
            thread.push(json!({ "role": "assistant", "content": [{ "type": "output_text", "text": self.text }] }));
        }
        store.set_thread(&self.id, &thread);

        Ok(response)
    }
}

impl EventTranslator for ResponseCollector {
    fn on_event(&mut self, event: &Value) -> Vec<Frame> {
        if self.finished {
            return Vec::new();
        }
        if let Some(id) = response_id(event) {
            self.id = id.to_string();
        }
        if let Some(usage) = Usage::from_event(event) {
            self.usage = Some(usage);
        }

        match event_kind(event) {
            "response.output_text.delta" => {
                self.text.push_str(event.get("delta").and_then(Value::as_str).unwrap_or_default());
            }
            "response.output_item.done" => {
                if let Some(item) = event.get("item").filter(|item| {
                    matches!(item.get("type").and_then(Value::as_str), Some("function_call") | Some("web_search_call"))
                }) {
                    self.items.push(item.clone());
                }
            }
            "response.failed" => {
                self.error = Some(failure_message(event));
                self.finished = true;
            }
            "response.completed" => self.finished = true,
            _ => {}
        }
        Vec::new()
    }

    fn on_end(&mut self) -> Vec<Frame> {
        self.finished = true;
        Vec::new()
    }

    fn is_finished(&self) -> bool {
        self.finished
    }
}

/* --- tests ----------------------------------------------------------------------------------- */

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::LogLevel;
    use crate::reasoning::ReasoningEffort;

    fn converter() -> MessageConverter {
        MessageConverter::new(LogLevel::Info)
    }

    fn plan_for(payload: Value, store: &ResponseStore) -> ResponsesPlan {
        prepare(&payload, &Config::default(), &Instructions::new("base", "codex"), &converter(), store).unwrap()
    }

    #[test]
    fn test_string_input() {
        let items = normalize_input(&json!({"input": "hello"}), &converter()).unwrap();
        assert_eq!(items, vec![json!({"role": "user", "content": [{"type": "input_text", "text": "hello"}]})]);
    }

    #[test]
    fn test_bare_parts_are_wrapped() {
        let payload = json!({"input": [
            {"type": "input_text", "text": "look"},
            {"type": "message", "content": [{"text": "from a"}, "legacy client"]},
            {"type": "input_text", "text": ""}
        ]});
        let items = normalize_input(&payload, &converter()).unwrap();
        assert_eq!(
            items,
            vec![json!({"role": "user", "content": [
                {"type": "input_text", "text": "look"},
                {"type": "input_text", "text": "from a\nlegacy client"}
            ]})]
        );
    }

    #[test]
    fn test_items_are_kept() {
        let payload = json!({"input": [
            {"type": "message", "role": "user", "content": [{"type": "input_text", "text": "q"}]},
            {"type": "function_call_output", "call_id": "c1", "output": "42"},
            "junk"
        ]});
        let items = normalize_input(&payload, &converter()).unwrap();
        assert_eq!(items.len(), 2);
        assert_eq!(items[1]["type"], "function_call_output");
    }

    #[test]
    fn test_messages_and_prompt_fallbacks() {
        let items = normalize_input(&json!({"messages": [{"role": "user", "content": "hi"}]}), &converter()).unwrap();
        assert_eq!(items[0]["content"][0], json!({"type": "input_text", "text": "hi"}));

        let items = normalize_input(&json!({"prompt": "p"}), &converter()).unwrap();
        assert_eq!(items[0]["content"][0]["text"], "p");
    }

    #[test]
    fn test_empty_input_rejected() {
        for payload in [json!({}), json!({"input": []}), json!({"input": 5})] {
            match normalize_input(&payload, &converter()) {
                Err(ProxyError::InvalidRequest { message, .. }) => assert_eq!(message, EMPTY_INPUT_MESSAGE),
                other => panic!("unexpected result: {:?}", other),
            }
        }
    }

    #[test]
    fn test_strip_upstream_refs() {
        let items = vec![json!({
            "role": "user",
            "item_id": "rs_123",
            "reference_id": "keep_me",
            "content": [{"type": "input_text", "text": "rs_not_a_ref", "response_id": "rs_9"}]
        })];
        let out = strip_upstream_refs(items);
        assert!(out[0].get("item_id").is_none());
        assert_eq!(out[0]["reference_id"], "keep_me");
        assert_eq!(out[0]["content"][0], json!({"type": "input_text", "text": "rs_not_a_ref"}));
    }

    #[test]
    fn test_prepare_moves_client_instructions_into_input() {
        let store = ResponseStore::new(4);
        let plan = plan_for(
            json!({"model": "gpt-5-codex-high", "input": "go", "instructions": "be brief", "store": true, "temperature": 0.2, "max_output_tokens": 10}),
            &store,
        );

        assert!(plan.stream);
        assert!(plan.store);
        assert_eq!(plan.model_label, "gpt-5-codex-high");
        assert_eq!(plan.request.model, "gpt-5-codex");
        assert_eq!(plan.request.instructions.as_deref(), Some("codex"));
        assert_eq!(plan.request.input[0]["content"][0]["text"], "be brief");
        assert_eq!(plan.request.input[1]["content"][0]["text"], "go");
        assert_eq!(plan.request.reasoning.as_ref().unwrap().effort, ReasoningEffort::High);
        assert_eq!(plan.request.extra_fields.get("temperature"), Some(&json!(0.2)));
        assert!(!plan.request.extra_fields.contains_key("max_output_tokens"));
        assert!(!plan.request.extra_fields.contains_key("store"));
    }

    #[test]
    fn test_prepare_rejects_unknown_passthrough_tool() {
        let result = prepare(
            &json!({"input": "x", "responses_tools": [{"type": "code_interpreter"}]}),
            &Config::default(),
            &Instructions::default(),
            &converter(),
            &ResponseStore::new(1),
        );
        assert!(matches!(result, Err(ProxyError::InvalidRequest { .. })));
    }

    #[test]
    fn test_collector_store_and_thread() {
        let store = ResponseStore::new(4);
        let plan = plan_for(json!({"input": "first", "store": true, "stream": false}), &store);
        assert!(!plan.stream);

        let mut collector = ResponseCollector::new();
        for event in [
            json!({"type": "response.created", "response": {"id": "resp_1"}}),
            json!({"type": "response.output_text.delta", "delta": "ans"}),
            json!({"type": "response.output_item.done", "item": {"type": "function_call", "call_id": "c", "name": "f", "arguments": "{}"}}),
            json!({"type": "response.output_item.done", "item": {"type": "reasoning"}}),
            json!({"type": "response.completed", "response": {"id": "resp_1", "usage": {"input_tokens": 1, "output_tokens": 1}}}),
        ] {
            collector.on_event(&event);
        }
        assert!(collector.is_finished());

        let response = collector.complete(&plan, 10, &store).unwrap();
        assert_eq!(response["id"], "resp_1");
        assert_eq!(response["object"], "response");
        assert_eq!(response["model"], "gpt-5");
        assert_eq!(response["output"].as_array().unwrap().len(), 2);
        assert_eq!(response["output"][0]["content"][0]["text"], "ans");
        assert_eq!(response["usage"]["total_tokens"], 2);
        assert_eq!(store.get("resp_1"), Some(response));

        let next = plan_for(json!({"input": "second", "previous_response_id": "resp_1"}), &store);
        let texts: Vec<&str> =
            next.request.input.iter().filter_map(|i| i["content"][0]["text"].as_str()).collect();
        assert_eq!(texts, vec!["first", "ans", "second"]);
    }

    #[test]
    fn test_store_is_bounded() {
        let store = ResponseStore::new(2);
        for id in ["a", "b", "c"] {
            store.store_response(&json!({"id": id}));
        }
        assert_eq!(store.len(), 2);
        assert!(store.get("a").is_none());
        assert!(store.get("c").is_some());

        let items: Vec<Value> = (0..50).map(|n| json!({"n": n})).collect();
        store.set_thread("t", &items);
        let thread = store.thread("t").unwrap();
        assert_eq!(thread.len(), MAX_THREAD_ITEMS);
        assert_eq!(thread[0]["n"], 10);
    }

    #[test]
    fn test_failed_collection() {
        let mut collector = ResponseCollector::new();
        collector.on_event(&json!({"type": "response.failed", "response": {"error": {"message": "nope"}}}));
        let plan = plan_for(json!({"input": "x"}), &ResponseStore::new(1));
        assert!(matches!(
            collector.complete(&plan, 0, &ResponseStore::new(1)),
            Err(ProxyError::UpstreamProtocol { status: 502, .. })
        ));
    }
}
