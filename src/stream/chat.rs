//!
//! Backend events → OpenAI `chat.completion.chunk` / `chat.completion`.
//!
//! The translator keeps the per-response state: reasoning rendering (through the
//! request's [`ReasoningDialect`]), tool-call aggregation with first-seen display
//! indexes, accumulated text and the last usage counts.
//!
//! Authors:
//!   Jaro <yarenty@gmail.com>
//!
//! Copyright (c) 2026 SkyCorp

/* --- uses ------------------------------------------------------------------------------------ */

use std::collections::HashMap;

use serde_json::{Map, Value, json};
use tracing::debug;

use super::{EventTranslator, Frame, Usage, event_kind, failure_message, response_id};
use crate::error::{ProxyError, Result};
use crate::reasoning::{PARAGRAPH_SEPARATOR, ReasoningDialect, ReasoningKind, ReasoningRenderer};

/* --- types ----------------------------------------------------------------------------------- */

/// Argument state of one tool call
#[derive(Debug, Default)]
struct ToolCallState {
    /** display index, assigned on first sight */
    index: usize,
    name: Option<String>,
    /** search parameters merged from `web_search_call` events */
    params: Map<String, Value>,
    /** `function_call_arguments.delta` fragments */
    fragments: String,
}

///
/// Chat-completions translator for one backend response.
pub struct ChatStreamTranslator {
    id: String,
    model: String,
    created: i64,
    include_usage: bool,
    renderer: Box<dyn ReasoningRenderer>,

    saw_summary_part: bool,
    pending_paragraph: bool,

    /** tool calls by call key */
    calls: HashMap<String, ToolCallState>,
    /** backend item id → call key */
    aliases: HashMap<String, String>,
    next_index: usize,
    /** completed tool calls as `(index, call)` */
    tool_calls: Vec<(usize, Value)>,

    text: String,
    reasoning_summary: String,
    reasoning_full: String,
    usage: Option<Usage>,
    error: Option<String>,
    finished: bool,
}

/* --- constants ------------------------------------------------------------------------------- */

const STREAM_ID: &str = "chatcmpl-stream";
const COLLECT_ID: &str = "chatcmpl";

/** web-search calls surface to clients as a function call with this name */
const WEB_SEARCH_FUNCTION: &str = "web_search";

/* --- start of code -------------------------------------------------------------------------- */

impl ChatStreamTranslator {
    ///
    /// Translator for a streamed response.
    ///
    /// # Arguments
    ///  * `model` - model name echoed to the client
    ///  * `created` - unix timestamp shared by every chunk
    ///  * `dialect` - reasoning dialect for this request
    ///  * `include_usage` - append a usage-only chunk before `[DONE]`
    pub fn streaming(model: impl Into<String>, created: i64, dialect: ReasoningDialect, include_usage: bool) -> Self {
        Self::with_id(STREAM_ID, model.into(), created, dialect, include_usage)
    }

    /// Translator whose frames are discarded; see [`Self::into_completion`]
    pub fn collecting(model: impl Into<String>, created: i64, dialect: ReasoningDialect) -> Self {
        Self::with_id(COLLECT_ID, model.into(), created, dialect, false)
    }

    fn with_id(id: &str, model: String, created: i64, dialect: ReasoningDialect, include_usage: bool) -> Self {
        Self {
            id: id.to_string(),
            model,
            created,
            include_usage,
            renderer: dialect.renderer(),
            saw_summary_part: false,
            pending_paragraph: false,
            calls: HashMap::new(),
            aliases: HashMap::new(),
            next_index: 0,
            tool_calls: Vec::new(),
            text: String::new(),
            reasoning_summary: String::new(),
            reasoning_full: String::new(),
            usage: None,
            error: None,
            finished: false,
        }
    }

    pub fn usage(&self) -> Option<Usage> {
        self.usage
    }

    ///
    /// Final `chat.completion` object built from everything consumed so far.
    ///
    /// # Returns
    ///  * the completion object
    ///  * `ProxyError::UpstreamProtocol` (502) when the backend reported `response.failed`
    pub fn into_completion(mut self) -> Result<Value> {
        if let Some(message) = self.error.take() {
            return Err(ProxyError::UpstreamProtocol {
                status: 502,
                message,
                code: None,
                error_type: Some("upstream_error".to_string()),
            });
        }

        self.tool_calls.sort_by_key(|(index, _)| *index);
        let tool_calls: Vec<Value> = self
            .tool_calls
            .into_iter()
            .map(|(_, mut call)| {
                if let Some(obj) = call.as_object_mut() {
                    obj.remove("index");
                }
                call
            })
            .collect();

        let mut message = Map::new();
        message.insert("role".to_string(), json!("assistant"));
        message.insert(
            "content".to_string(),
            if self.text.is_empty() { Value::Null } else { Value::String(self.text) },
        );
        let finish_reason = if tool_calls.is_empty() { "stop" } else { "tool_calls" };
        if !tool_calls.is_empty() {
            message.insert("tool_calls".to_string(), Value::Array(tool_calls));
        }
        self.renderer.apply_to_message(&mut message, &self.reasoning_summary, &self.reasoning_full);

        let mut completion = json!({
            "id": self.id,
            "object": "chat.completion",
            "created": self.created,
            "model": self.model,
            "choices": [{ "index": 0, "message": message, "finish_reason": finish_reason }],
        });
        if let Some(usage) = self.usage {
            completion["usage"] = json!(usage);
        }
        Ok(completion)
    }

    fn chunk(&self, delta: Value, finish_reason: Option<&str>) -> Frame {
        Frame::Data(json!({
            "id": self.id,
            "object": "chat.completion.chunk",
            "created": self.created,
            "model": self.model,
            "choices": [{ "index": 0, "delta": delta, "finish_reason": finish_reason }],
        }))
    }

    fn chunks(&self, deltas: Vec<Value>) -> Vec<Frame> {
        deltas.into_iter().map(|delta| self.chunk(delta, None)).collect()
    }

    /// Call key for an id that may be an item alias
    fn call_key(&self, id: &str) -> String {
        self.aliases.get(id).cloned().unwrap_or_else(|| id.to_string())
    }

    fn register_call(&mut self, key: &str) -> &mut ToolCallState {
        let next_index = &mut self.next_index;
        self.calls.entry(key.to_string()).or_insert_with(|| {
            let state = ToolCallState { index: *next_index, ..Default::default() };
            *next_index += 1;
            state
        })
    }

    fn on_output_text(&mut self, event: &Value) -> Vec<Frame> {
        let delta = event.get("delta").and_then(Value::as_str).unwrap_or_default();
        self.text.push_str(delta);

        let deltas = self.renderer.on_output_text();
        let mut frames = self.chunks(deltas);
        frames.push(self.chunk(json!({ "content": delta }), None));
        frames
    }

    fn on_reasoning(&mut self, kind: ReasoningKind, event: &Value) -> Vec<Frame> {
        let delta = event.get("delta").and_then(Value::as_str).unwrap_or_default();
        let paragraph_break = kind == ReasoningKind::Summary && self.pending_paragraph;
        if paragraph_break {
            self.pending_paragraph = false;
        }

        let buffer = match kind {
            ReasoningKind::Summary => &mut self.reasoning_summary,
            ReasoningKind::Full => &mut self.reasoning_full,
        };
        if paragraph_break && !buffer.is_empty() {
            buffer.push_str(PARAGRAPH_SEPARATOR);
        }
        buffer.push_str(delta);

        let deltas = self.renderer.on_reasoning(kind, delta, paragraph_break);
        self.chunks(deltas)
    }

    fn on_summary_part(&mut self) {
        if self.saw_summary_part {
            self.pending_paragraph = true;
        } else {
            self.saw_summary_part = true;
        }
    }

    fn on_item_added(&mut self, item: &Value) {
        if !is_tool_item(item) {
            return;
        }
        let Some(key) = item_call_key(item) else {
            return;
        };
        let name = item.get("name").and_then(Value::as_str).map(str::to_string);
        let state = self.register_call(&key);
        if name.is_some() {
            state.name = name;
        }
        if let Some(item_id) = item.get("id").and_then(Value::as_str).filter(|id| *id != key) {
            self.aliases.insert(item_id.to_string(), key);
        }
    }

    fn on_arguments_delta(&mut self, event: &Value) {
        let Some(item_id) = event.get("item_id").and_then(Value::as_str) else {
            return;
        };
        let delta = event.get("delta").and_then(Value::as_str).unwrap_or_default();
        let key = self.call_key(item_id);
        self.register_call(&key).fragments.push_str(delta);
    }

    fn on_web_search_event(&mut self, event: &Value) {
        let item_id = event.get("item_id").and_then(Value::as_str).unwrap_or("ws_call");
        let key = self.call_key(item_id);
        let state = self.register_call(&key);
        if let Some(item) = event.get("item") {
            merge_search_params(&mut state.params, item);
        }
        merge_search_params(&mut state.params, event);
    }

    fn on_item_done(&mut self, item: &Value) -> Vec<Frame> {
        if !is_tool_item(item) {
            return Vec::new();
        }
        let is_search = item.get("type").and_then(Value::as_str) == Some("web_search_call");
        let id = item_call_key(item).unwrap_or_default();
        let key = if self.calls.contains_key(&id) {
            id
        } else {
            item.get("id").and_then(Value::as_str).map(|i| self.call_key(i)).unwrap_or(id)
        };

        let raw = item.get("arguments").or_else(|| item.get("parameters")).cloned().unwrap_or(Value::Null);
        let state = self.register_call(&key);
        if let Value::Object(map) = &raw {
            state.params.extend(map.clone());
        }

        let effective = if !state.params.is_empty() {
            Value::Object(state.params.clone())
        } else if matches!(&raw, Value::String(s) if !s.is_empty()) || raw.is_array() {
            raw
        } else if !state.fragments.is_empty() {
            Value::String(state.fragments.clone())
        } else {
            Value::Object(Map::new())
        };
        let arguments = serialize_tool_args(&effective);

        let name = item
            .get("name")
            .and_then(Value::as_str)
            .map(str::to_string)
            .or_else(|| state.name.clone())
            .unwrap_or_else(|| if is_search { WEB_SEARCH_FUNCTION.to_string() } else { String::new() });
        let index = state.index;
        debug!("Tool call {} (index {}) completed: {}", key, index, name);

        let call = json!({
            "index": index,
            "id": key,
            "type": "function",
            "function": { "name": name, "arguments": arguments },
        });
        self.tool_calls.push((index, call.clone()));

        vec![
            self.chunk(json!({ "tool_calls": [call] }), None),
            self.chunk(json!({}), Some("tool_calls")),
        ]
    }

    /// Terminal frames: close reasoning, finish reason, usage, `[DONE]`
    fn finish(&mut self) -> Vec<Frame> {
        if self.finished {
            return Vec::new();
        }
        self.finished = true;

        let deltas = self.renderer.on_terminal();
        let mut frames = self.chunks(deltas);
        if self.tool_calls.is_empty() {
            frames.push(self.chunk(json!({}), Some("stop")));
        }
        if self.include_usage {
            if let Some(usage) = self.usage {
                let mut chunk = json!({
                    "id": self.id,
                    "object": "chat.completion.chunk",
                    "created": self.created,
                    "model": self.model,
                    "choices": [{ "index": 0, "delta": {}, "finish_reason": null }],
                });
                chunk["usage"] = json!(usage);
                frames.push(Frame::Data(chunk));
            }
        }
        frames.push(Frame::Done);
        frames
    }
}

impl EventTranslator for ChatStreamTranslator {
    fn on_event(&mut self, event: &Value) -> Vec<Frame> {
        if self.finished {
            return Vec::new();
        }
        if let Some(id) = response_id(event) {
            self.id = id.to_string();
        }

        let kind = event_kind(event);
        if kind.contains("web_search_call") && !kind.starts_with("response.output_item") {
            self.on_web_search_event(event);
            return Vec::new();
        }

        match kind {
            "response.output_text.delta" => self.on_output_text(event),
            "response.reasoning_summary_text.delta" => self.on_reasoning(ReasoningKind::Summary, event),
            "response.reasoning_text.delta" => self.on_reasoning(ReasoningKind::Full, event),
            "response.reasoning_summary_part.added" => {
                self.on_summary_part();
                Vec::new()
            }
            "response.output_item.added" => {
                if let Some(item) = event.get("item") {
                    self.on_item_added(item);
                }
                Vec::new()
            }
            "response.function_call_arguments.delta" => {
                self.on_arguments_delta(event);
                Vec::new()
            }
            "response.output_item.done" => match event.get("item") {
                Some(item) => self.on_item_done(item),
                None => Vec::new(),
            },
            "response.failed" => {
                let message = failure_message(event);
                debug!("Backend reported failure: {}", message);
                self.error = Some(message.clone());
                self.finished = true;
                vec![Frame::Data(json!({ "error": { "message": message } }))]
            }
            "response.completed" => {
                if let Some(usage) = Usage::from_event(event) {
                    self.usage = Some(usage);
                }
                self.finish()
            }
            _ => Vec::new(),
        }
    }

    fn on_end(&mut self) -> Vec<Frame> {
        self.finish()
    }

    fn is_finished(&self) -> bool {
        self.finished
    }
}

fn is_tool_item(item: &Value) -> bool {
    matches!(item.get("type").and_then(Value::as_str), Some("function_call") | Some("web_search_call"))
}

/// `call_id`, falling back to the item `id`
fn item_call_key(item: &Value) -> Option<String> {
    item.get("call_id")
        .and_then(Value::as_str)
        .filter(|id| !id.is_empty())
        .or_else(|| item.get("id").and_then(Value::as_str))
        .map(str::to_string)
}

///
/// Merge web-search parameters found on `src` into `params`.
///
/// Whole parameter objects are merged first; well-known aliases only fill
/// keys that are still unset.
fn merge_search_params(params: &mut Map<String, Value>, src: &Value) {
    let Some(src) = src.as_object() else {
        return;
    };

    for whole in ["parameters", "args", "arguments", "input"] {
        if let Some(Value::Object(map)) = src.get(whole) {
            params.extend(map.clone());
        }
    }
    for key in ["query", "q"] {
        if let Some(Value::String(q)) = src.get(key) {
            params.entry("query").or_insert_with(|| Value::String(q.clone()));
        }
    }
    for key in ["recency", "time_range", "days"] {
        if let Some(value) = src.get(key).filter(|v| !v.is_null()) {
            params.entry(key).or_insert_with(|| value.clone());
        }
    }
    for key in ["domains", "include_domains", "include"] {
        if let Some(value) = src.get(key).filter(|v| v.is_array()) {
            params.entry("domains").or_insert_with(|| value.clone());
        }
    }
    for key in ["max_results", "topn", "limit"] {
        if let Some(value) = src.get(key).filter(|v| !v.is_null()) {
            params.entry("max_results").or_insert_with(|| value.clone());
        }
    }
}

///
/// Serialize tool arguments so clients always receive a JSON object or array.
///
/// Strings holding JSON objects/arrays are re-serialized compactly; any other
/// string is wrapped as `{"query": <string>}`.
pub fn serialize_tool_args(args: &Value) -> String {
    match args {
        Value::Object(_) | Value::Array(_) => args.to_string(),
        Value::String(s) => match serde_json::from_str::<Value>(s) {
            Ok(parsed @ (Value::Object(_) | Value::Array(_))) => parsed.to_string(),
            _ => json!({ "query": s }).to_string(),
        },
        _ => "{}".to_string(),
    }
}

/* --- tests ----------------------------------------------------------------------------------- */
