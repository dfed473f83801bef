//!
//! Chat Completions messages to backend input items.
//!
//! Converts the OpenAI `messages[]` array into the ordered `input[]` list the responses
//! backend expects: plain messages with typed content parts, assistant tool calls as
//! `function_call` items and tool results as `function_call_output` items.
//!
//! Client payloads are loosely shaped (strings or part lists, objects or bare URLs), so
//! input is read from `serde_json::Value` while output is strongly typed.
//!
//! Authors:
//!   Jaro <yarenty@gmail.com>
//!
//! Copyright (c) 2026 SkyCorp

/* --- uses ------------------------------------------------------------------------------------ */

use base64::Engine as _;
use base64::alphabet;
use base64::engine::{GeneralPurpose, GeneralPurposeConfig};
use serde::Serialize;
use serde_json::Value;

use crate::config::LogLevel;
use crate::error::Result;

/* --- types ----------------------------------------------------------------------------------- */

///
/// Backend input item.
///
/// Serialized with the backend's `type` tag, e.g. `{"type":"message","role":"user",...}`.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum InputItem {
    /** conversation message */
    Message {
        /** author, always user or assistant on the backend side */
        role: MessageRole,
        /** typed content parts, never empty */
        content: Vec<ContentPart>,
    },
    /** tool call previously made by the assistant */
    FunctionCall {
        /** function name */
        name: String,
        /** raw JSON argument string as produced by the model */
        arguments: String,
        /** call identifier tying the call to its output */
        call_id: String,
    },
    /** result of a tool call, supplied by the client */
    FunctionCallOutput {
        /** call identifier of the answered call */
        call_id: String,
        /** tool output text */
        output: String,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    User,
    Assistant,
}

///
/// Content part of a backend message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentPart {
    /** user-authored text */
    InputText { text: String },
    /** assistant-authored text */
    OutputText { text: String },
    /** image, as an http(s) or data URL */
    InputImage { image_url: String },
}

///
/// Converter from Chat Completions messages to backend input items.
///
/// Stateless apart from its log level; one instance can serve any number of requests.
pub struct MessageConverter {
    /** logging level for debug output */
    log_level: LogLevel,
}

/* --- constants ------------------------------------------------------------------------------- */

/** base64 decoder that accepts non-canonical trailing bits, padding required */
const LENIENT_BASE64: GeneralPurpose = GeneralPurpose::new(
    &alphabet::STANDARD,
    GeneralPurposeConfig::new().with_decode_allow_trailing_bits(true),
);

/* --- start of code -------------------------------------------------------------------------- */

impl MessageConverter {
    ///
    /// Create a new message converter.
    ///
    /// # Arguments
    ///  * `log_level` - logging level for debug output
    pub fn new(log_level: LogLevel) -> Self {
        Self { log_level }
    }

    ///
    /// Convert chat messages to backend input items.
    ///
    /// The first `system` message is hoisted to the front as a user message; any other
    /// system message is dropped. Messages without usable content are skipped, which
    /// includes assistant turns that only carried tool calls (those become
    /// `function_call` items).
    ///
    /// # Arguments
    ///  * `messages` - the request's `messages` array
    ///
    /// # Returns
    ///  * Ordered backend input items
    pub fn convert(&self, messages: &[Value]) -> Result<Vec<InputItem>> {
        self.debug(&format!("Converting {} chat message(s) to input items", messages.len()));

        let messages = hoist_system_message(messages);
        let mut items = Vec::with_capacity(messages.len());

        for message in &messages {
            let role = message.get("role").and_then(Value::as_str).unwrap_or_default();
            match role {
                "system" => {
                    self.debug("Dropping secondary system message");
                }
                "tool" => {
                    if let Some(item) = tool_output_item(message) {
                        items.push(item);
                    }
                }
                _ => {
                    if role == "assistant" {
                        items.extend(assistant_tool_calls(message));
                    }
                    let message_role =
                        if role == "assistant" { MessageRole::Assistant } else { MessageRole::User };
                    let content = self.convert_content(message.get("content"), message_role);
                    if !content.is_empty() {
                        items.push(InputItem::Message { role: message_role, content });
                    }
                }
            }
        }

        self.debug(&format!("Produced {} input item(s)", items.len()));
        Ok(items)
    }

    ///
    /// Convert and serialize in one step, for payload assembly.
    pub fn convert_to_values(&self, messages: &[Value]) -> Result<Vec<Value>> {
        let items = self.convert(messages)?;
        items_to_values(&items)
    }

    fn convert_content(&self, content: Option<&Value>, role: MessageRole) -> Vec<ContentPart> {
        let text_part = |text: &str| match role {
            MessageRole::Assistant => ContentPart::OutputText { text: text.to_string() },
            MessageRole::User => ContentPart::InputText { text: text.to_string() },
        };

        match content {
            Some(Value::String(text)) if !text.is_empty() => vec![text_part(text)],
            Some(Value::Array(parts)) => parts
                .iter()
                .filter_map(|part| match part.get("type").and_then(Value::as_str)? {
                    "text" => part
                        .get("text")
                        .and_then(Value::as_str)
                        .filter(|t| !t.is_empty())
                        .or_else(|| part.get("content").and_then(Value::as_str))
                        .filter(|t| !t.is_empty())
                        .map(text_part),
                    "image_url" => {
                        let image = part.get("image_url")?;
                        let url = image.get("url").unwrap_or(image).as_str()?;
                        if url.is_empty() {
                            return None;
                        }
                        Some(ContentPart::InputImage { image_url: normalize_image_data_url(url) })
                    }
                    other => {
                        self.debug(&format!("Skipping unsupported content part type: {}", other));
                        None
                    }
                })
                .collect(),
            _ => Vec::new(),
        }
    }

    ///
    /// Log debug message if trace level is enabled.
    ///
    /// # Arguments
    ///  * `msg` - message to log
    pub(crate) fn debug(&self, msg: &str) {
        if self.log_level.is_trace_enabled() {
            tracing::debug!("[TRACE] {}", msg);
        }
    }
}

/// Serialize typed items into the JSON values sent upstream
pub fn items_to_values(items: &[InputItem]) -> Result<Vec<Value>> {
    items.iter().map(|item| serde_json::to_value(item).map_err(Into::into)).collect()
}

///
/// Move the first system message to index 0 as a user message.
///
/// Later system messages stay in place and are dropped during conversion.
pub fn hoist_system_message(messages: &[Value]) -> Vec<Value> {
    let mut messages = messages.to_vec();
    let position = messages
        .iter()
        .position(|m| m.get("role").and_then(Value::as_str) == Some("system"));
    if let Some(index) = position {
        let system = messages.remove(index);
        let content = system.get("content").cloned().unwrap_or(Value::String(String::new()));
        messages.insert(0, serde_json::json!({"role": "user", "content": content}));
    }
    messages
}

fn tool_output_item(message: &Value) -> Option<InputItem> {
    let call_id = message
        .get("tool_call_id")
        .and_then(Value::as_str)
        .filter(|id| !id.is_empty())
        .or_else(|| message.get("id").and_then(Value::as_str))
        .filter(|id| !id.is_empty())?;

    let output = match message.get("content") {
        None | Some(Value::Null) => String::new(),
        Some(Value::String(text)) => text.clone(),
        Some(Value::Array(parts)) => parts
            .iter()
            .filter_map(|part| {
                part.get("text")
                    .and_then(Value::as_str)
                    .filter(|t| !t.is_empty())
                    .or_else(|| part.get("content").and_then(Value::as_str))
                    .filter(|t| !t.is_empty())
            })
            .collect::<Vec<_>>()
            .join("\n"),
        Some(_) => return None,
    };

    Some(InputItem::FunctionCallOutput { call_id: call_id.to_string(), output })
}

fn assistant_tool_calls(message: &Value) -> Vec<InputItem> {
    let Some(calls) = message.get("tool_calls").and_then(Value::as_array) else {
        return Vec::new();
    };

    calls
        .iter()
        .filter(|call| call.get("type").and_then(Value::as_str).unwrap_or("function") == "function")
        .filter_map(|call| {
            let call_id = call
                .get("id")
                .and_then(Value::as_str)
                .or_else(|| call.get("call_id").and_then(Value::as_str))?;
            let function = call.get("function")?;
            let name = function.get("name").and_then(Value::as_str)?;
            let arguments = function.get("arguments").and_then(Value::as_str)?;
            Some(InputItem::FunctionCall {
                name: name.to_string(),
                arguments: arguments.to_string(),
                call_id: call_id.to_string(),
            })
        })
        .collect()
}

///
/// Repair a base64 image data URL.
///
/// Applies only to `data:image/...;base64,` URLs: percent-decodes the payload, strips
/// line breaks, maps the URL-safe alphabet to the standard one and restores padding.
/// When the repaired payload still does not decode, the URL is returned unchanged.
pub fn normalize_image_data_url(url: &str) -> String {
    if !url.starts_with("data:image/") || !url.contains(";base64,") {
        return url.to_string();
    }
    let Some((header, data)) = url.split_once(',') else {
        return url.to_string();
    };

    let decoded = urlencoding::decode(data).map(|d| d.into_owned()).unwrap_or_else(|_| data.to_string());
    let mut payload: String = decoded
        .trim()
        .chars()
        .filter(|c| *c != '\n' && *c != '\r')
        .map(|c| match c {
            '-' => '+',
            '_' => '/',
            other => other,
        })
        .collect();
    let pad = (4 - payload.len() % 4) % 4;
    payload.extend(std::iter::repeat_n('=', pad));

    if LENIENT_BASE64.decode(payload.as_bytes()).is_err() {
        return url.to_string();
    }
    format!("{header},{payload}")
}

/* --- tests ----------------------------------------------------------------------------------- */
