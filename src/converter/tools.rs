//!
//! Tool definitions and tool-choice translation.
//!
//! Chat-style function tools are flattened into the backend's tool shape. Built-in
//! backend tools (web search) are accepted only through the `responses_tools`
//! extension field and only from a fixed allow-list.
//!
//! Authors:
//!   Jaro <yarenty@gmail.com>
//!
//! Copyright (c) 2026 SkyCorp

/* --- uses ------------------------------------------------------------------------------------ */

use serde::Serialize;
use serde_json::{Value, json};

use crate::error::{ProxyError, Result};

/* --- types ----------------------------------------------------------------------------------- */

///
/// Backend function tool definition.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FunctionTool {
    /** always "function" */
    #[serde(rename = "type")]
    pub tool_type: &'static str,
    /** function name */
    pub name: String,
    /** function description, empty when the client sent none */
    pub description: String,
    /** strict schema adherence, always off */
    pub strict: bool,
    /** JSON schema of the arguments */
    pub parameters: Value,
}

///
/// Built-in tools requested through `responses_tools`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PassthroughTools {
    /** validated tool objects, forwarded verbatim */
    pub tools: Vec<Value>,
}

/* --- constants ------------------------------------------------------------------------------- */

/** built-in backend tool types a client may request */
pub const PASSTHROUGH_TOOL_TYPES: &[&str] = &["web_search", "web_search_preview"];

/** serialized size ceiling of `responses_tools` */
pub const MAX_PASSTHROUGH_TOOLS_BYTES: usize = 32_768;

pub const TOOLS_TOO_LARGE_CODE: &str = "RESPONSES_TOOLS_TOO_LARGE";

/** code attached when the backend rejected a request with passthrough tools twice */
pub const TOOLS_REJECTED_CODE: &str = "RESPONSES_TOOLS_REJECTED";

/* --- start of code -------------------------------------------------------------------------- */

///
/// Convert Chat Completions `tools` to backend function tools.
///
/// Non-function tools and functions without a name are dropped. Missing parameters
/// default to an empty object schema.
///
/// # Arguments
///  * `tools` - the request's `tools` field, if any
///
/// # Returns
///  * Backend tool definitions, possibly empty
pub fn convert_tools(tools: Option<&Value>) -> Vec<FunctionTool> {
    let Some(tools) = tools.and_then(Value::as_array) else {
        return Vec::new();
    };

    tools
        .iter()
        .filter(|tool| tool.get("type").and_then(Value::as_str) == Some("function"))
        .filter_map(|tool| {
            let function = tool.get("function").filter(|f| f.is_object())?;
            let name = function.get("name").and_then(Value::as_str).filter(|n| !n.is_empty())?;
            let description =
                function.get("description").and_then(Value::as_str).unwrap_or_default();
            let parameters = function
                .get("parameters")
                .filter(|p| p.is_object())
                .cloned()
                .unwrap_or_else(|| json!({"type": "object", "properties": {}}));

            Some(FunctionTool {
                tool_type: "function",
                name: name.to_string(),
                description: description.to_string(),
                strict: false,
                parameters,
            })
        })
        .collect()
}

/// Function tools as JSON values
pub fn convert_tools_to_values(tools: Option<&Value>) -> Vec<Value> {
    convert_tools(tools).iter().filter_map(|tool| serde_json::to_value(tool).ok()).collect()
}

///
/// Tools for a Responses-style request.
///
/// Chat-style function tools are converted; anything else carrying a string `type`
/// is assumed to already be in backend shape and kept as is.
pub fn responses_request_tools(tools: Option<&Value>) -> Vec<Value> {
    let Some(tools) = tools.and_then(Value::as_array) else {
        return Vec::new();
    };

    let mut out = Vec::new();
    for tool in tools.iter().filter(|t| t.is_object()) {
        if tool.get("type").and_then(Value::as_str) == Some("function")
            && tool.get("function").is_some_and(Value::is_object)
        {
            out.extend(convert_tools_to_values(Some(&Value::Array(vec![tool.clone()]))));
        } else if tool.get("type").is_some_and(Value::is_string) {
            out.push(tool.clone());
        }
    }
    out
}

impl PassthroughTools {
    ///
    /// Validate `responses_tools` and apply the server default.
    ///
    /// # Arguments
    ///  * `requested` - the request's `responses_tools` field
    ///  * `tool_choice` - the request's `responses_tool_choice` field
    ///  * `default_web_search` - server-side default enable flag
    ///
    /// # Returns
    ///  * Validated tools, empty when none apply
    ///  * `ProxyError::InvalidRequest` for a type outside the allow-list or an oversized list
    pub fn from_request(
        requested: Option<&Value>,
        tool_choice: Option<&Value>,
        default_web_search: bool,
    ) -> Result<Self> {
        let mut tools = Vec::new();

        for tool in requested.and_then(Value::as_array).into_iter().flatten() {
            let Some(tool_type) = tool.get("type").and_then(Value::as_str) else {
                continue;
            };
            if !PASSTHROUGH_TOOL_TYPES.contains(&tool_type) {
                return Err(ProxyError::invalid(
                    "Only web_search/web_search_preview are supported in responses_tools",
                ));
            }
            tools.push(tool.clone());
        }

        let opted_out = tool_choice.and_then(Value::as_str) == Some("none");
        if tools.is_empty() && default_web_search && !opted_out {
            tools.push(json!({"type": "web_search"}));
        }

        if !tools.is_empty() {
            let size = serde_json::to_string(&tools)?.len();
            if size > MAX_PASSTHROUGH_TOOLS_BYTES {
                return Err(ProxyError::invalid_with_code(
                    "responses_tools too large",
                    TOOLS_TOO_LARGE_CODE,
                ));
            }
        }

        Ok(Self { tools })
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }
}

///
/// Backend `tool_choice`.
///
/// `responses_tool_choice` of `auto`/`none` wins; otherwise the client's `tool_choice`
/// is kept when it is `auto`, `none` or an object, and falls back to `auto`.
pub fn resolve_tool_choice(tool_choice: Option<&Value>, responses_tool_choice: Option<&Value>) -> Value {
    if let Some(choice) = responses_tool_choice.and_then(Value::as_str) {
        if choice == "auto" || choice == "none" {
            return Value::String(choice.to_string());
        }
    }
    match tool_choice {
        Some(Value::String(s)) if s == "auto" || s == "none" => Value::String(s.clone()),
        Some(obj @ Value::Object(_)) => obj.clone(),
        _ => Value::String("auto".to_string()),
    }
}

/* --- tests ----------------------------------------------------------------------------------- */
