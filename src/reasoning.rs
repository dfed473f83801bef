//!
//! Reasoning parameters and client-facing reasoning dialects.
//!
//! The backend is always asked for reasoning; what the client sees depends on the
//! selected [`ReasoningDialect`]. Each dialect has exactly one renderer, chosen once
//! per request, used both for streamed deltas and for the final non-streamed message.
//!
//! Authors:
//!   Jaro <yarenty@gmail.com>
//!
//! Copyright (c) 2026 SkyCorp

/* --- uses ------------------------------------------------------------------------------------ */

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};

/* --- types ----------------------------------------------------------------------------------- */

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReasoningEffort {
    Minimal,
    Low,
    Medium,
    High,
    None,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReasoningSummary {
    Auto,
    Concise,
    Detailed,
    None,
}

///
/// How reasoning text reaches the client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReasoningDialect {
    /// `<think>...</think>` interleaved into the content channel
    #[serde(rename = "think-tags", alias = "bracketed", alias = "think_tags")]
    Bracketed,
    /// Separate `reasoning.content[]` field alongside content
    #[serde(rename = "o3", alias = "structured")]
    Structured,
    /// Flat `reasoning_summary` / `reasoning` string fields
    #[serde(rename = "legacy", alias = "current", alias = "legacy-flat")]
    LegacyFlat,
    /// Requested upstream, never shown
    #[serde(rename = "suppressed", alias = "hidden", alias = "none")]
    Suppressed,
}

/// Which backend reasoning stream a fragment came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReasoningKind {
    Summary,
    Full,
}

///
/// Backend `reasoning` request object.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReasoningParam {
    pub effort: ReasoningEffort,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub summary: Option<ReasoningSummary>,
}

///
/// Renders reasoning for one client response.
///
/// Streaming methods return `delta` objects for `chat.completion.chunk` frames in the
/// order they must be emitted.
pub trait ReasoningRenderer: Send {
    /// A reasoning fragment arrived; `paragraph_break` is set when a new summary part began.
    fn on_reasoning(&mut self, kind: ReasoningKind, text: &str, paragraph_break: bool) -> Vec<Value>;

    /// An output-text delta is about to be emitted.
    fn on_output_text(&mut self) -> Vec<Value> {
        Vec::new()
    }

    /// The stream is terminating (completed, truncated or upstream `[DONE]`).
    fn on_terminal(&mut self) -> Vec<Value> {
        Vec::new()
    }

    /// Attach accumulated reasoning to a final, non-streamed message.
    fn apply_to_message(&self, message: &mut Map<String, Value>, summary: &str, full: &str);
}

/// Bracket sub-state for the think-tags dialect
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BracketState {
    Init,
    Open,
    Closed,
}

pub struct BracketedRenderer {
    state: BracketState,
}

pub struct StructuredRenderer;

#[derive(Default)]
pub struct LegacyFlatRenderer {
    summary: String,
    full: String,
}

pub struct SuppressedRenderer;

/* --- constants ------------------------------------------------------------------------------- */

pub const THINK_OPEN: &str = "<think>";
pub const THINK_CLOSE: &str = "</think>";

/** separator inserted between reasoning summary paragraphs */
pub const PARAGRAPH_SEPARATOR: &str = "\n";

/** backend include entry that exposes reasoning content */
pub const REASONING_INCLUDE: &str = "reasoning.encrypted_content";

/* --- start of code -------------------------------------------------------------------------- */

impl ReasoningEffort {
    /// Case-insensitive parse; unknown values yield `None`
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_lowercase().as_str() {
            "minimal" => Some(Self::Minimal),
            "low" => Some(Self::Low),
            "medium" => Some(Self::Medium),
            "high" => Some(Self::High),
            "none" => Some(Self::None),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Minimal => "minimal",
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
            Self::None => "none",
        }
    }
}

impl ReasoningSummary {
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_lowercase().as_str() {
            "auto" => Some(Self::Auto),
            "concise" => Some(Self::Concise),
            "detailed" => Some(Self::Detailed),
            "none" => Some(Self::None),
            _ => None,
        }
    }
}

impl ReasoningDialect {
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_lowercase().as_str() {
            "think-tags" | "think_tags" | "bracketed" => Some(Self::Bracketed),
            "o3" | "structured" => Some(Self::Structured),
            "legacy" | "current" | "legacy-flat" => Some(Self::LegacyFlat),
            "suppressed" | "hidden" | "none" => Some(Self::Suppressed),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Bracketed => "think-tags",
            Self::Structured => "o3",
            Self::LegacyFlat => "legacy",
            Self::Suppressed => "suppressed",
        }
    }

    /// Fresh renderer for one response
    pub fn renderer(self) -> Box<dyn ReasoningRenderer> {
        match self {
            Self::Bracketed => Box::new(BracketedRenderer::new()),
            Self::Structured => Box::new(StructuredRenderer),
            Self::LegacyFlat => Box::new(LegacyFlatRenderer::default()),
            Self::Suppressed => Box::new(SuppressedRenderer),
        }
    }
}

impl ReasoningParam {
    /// Reasoning content is only worth including when the model actually reasons
    pub fn is_active(&self) -> bool {
        self.effort != ReasoningEffort::None
    }
}

///
/// Build the backend reasoning object.
///
/// Overrides come from the request (`{"effort", "summary"}`); values outside the
/// enumerations are ignored and the configured defaults apply.
pub fn build_reasoning_param(
    base_effort: ReasoningEffort,
    base_summary: ReasoningSummary,
    overrides: Option<&Value>,
) -> ReasoningParam {
    let mut effort = base_effort;
    let mut summary = base_summary;

    if let Some(Value::Object(map)) = overrides {
        if let Some(e) = map.get("effort").and_then(Value::as_str).and_then(ReasoningEffort::parse) {
            effort = e;
        }
        if let Some(s) =
            map.get("summary").and_then(Value::as_str).and_then(ReasoningSummary::parse)
        {
            summary = s;
        }
    }

    ReasoningParam {
        effort,
        summary: if summary == ReasoningSummary::None { None } else { Some(summary) },
    }
}

/// Join non-blank summary and full reasoning with a blank line
fn joined_reasoning(summary: &str, full: &str) -> String {
    [summary, full].iter().filter(|p| !p.trim().is_empty()).copied().collect::<Vec<_>>().join("\n\n")
}

fn content_delta(text: &str) -> Value {
    json!({ "content": text })
}

fn structured_delta(text: &str) -> Value {
    json!({ "reasoning": { "content": [{ "type": "text", "text": text }] } })
}

impl BracketedRenderer {
    pub fn new() -> Self {
        Self { state: BracketState::Init }
    }

    pub fn state(&self) -> BracketState {
        self.state
    }
}

impl Default for BracketedRenderer {
    fn default() -> Self {
        Self::new()
    }
}

impl ReasoningRenderer for BracketedRenderer {
    fn on_reasoning(&mut self, _kind: ReasoningKind, text: &str, paragraph_break: bool) -> Vec<Value> {
        let mut out = Vec::new();
        match self.state {
            BracketState::Closed => return out,
            BracketState::Init => {
                out.push(content_delta(THINK_OPEN));
                self.state = BracketState::Open;
            }
            BracketState::Open => {
                if paragraph_break {
                    out.push(content_delta(PARAGRAPH_SEPARATOR));
                }
            }
        }
        out.push(content_delta(text));
        out
    }

    fn on_output_text(&mut self) -> Vec<Value> {
        self.on_terminal()
    }

    fn on_terminal(&mut self) -> Vec<Value> {
        if self.state == BracketState::Open {
            self.state = BracketState::Closed;
            return vec![content_delta(THINK_CLOSE)];
        }
        Vec::new()
    }

    fn apply_to_message(&self, message: &mut Map<String, Value>, summary: &str, full: &str) {
        let text = joined_reasoning(summary, full);
        if text.is_empty() {
            return;
        }
        let content = message.get("content").and_then(Value::as_str).unwrap_or_default();
        let combined = format!("{THINK_OPEN}{text}{THINK_CLOSE}{content}");
        message.insert("content".to_string(), Value::String(combined));
    }
}

impl ReasoningRenderer for StructuredRenderer {
    fn on_reasoning(&mut self, _kind: ReasoningKind, text: &str, paragraph_break: bool) -> Vec<Value> {
        let mut out = Vec::new();
        if paragraph_break {
            out.push(structured_delta(PARAGRAPH_SEPARATOR));
        }
        out.push(structured_delta(text));
        out
    }

    fn apply_to_message(&self, message: &mut Map<String, Value>, summary: &str, full: &str) {
        let text = joined_reasoning(summary, full);
        if !text.is_empty() {
            message.insert(
                "reasoning".to_string(),
                json!({ "content": [{ "type": "text", "text": text }] }),
            );
        }
    }
}

impl ReasoningRenderer for LegacyFlatRenderer {
    fn on_reasoning(&mut self, kind: ReasoningKind, text: &str, paragraph_break: bool) -> Vec<Value> {
        let buffer = match kind {
            ReasoningKind::Summary => &mut self.summary,
            ReasoningKind::Full => &mut self.full,
        };
        if paragraph_break && !buffer.is_empty() {
            buffer.push_str(PARAGRAPH_SEPARATOR);
        }
        buffer.push_str(text);
        Vec::new()
    }

    // Coalesced into a single delta at stream end
    fn on_terminal(&mut self) -> Vec<Value> {
        let summary = std::mem::take(&mut self.summary);
        let full = std::mem::take(&mut self.full);
        let mut delta = Map::new();
        self.apply_to_message(&mut delta, &summary, &full);
        if delta.is_empty() { Vec::new() } else { vec![Value::Object(delta)] }
    }

    fn apply_to_message(&self, message: &mut Map<String, Value>, summary: &str, full: &str) {
        if !summary.is_empty() {
            message.insert("reasoning_summary".to_string(), Value::String(summary.to_string()));
        }
        if !full.is_empty() {
            message.insert("reasoning".to_string(), Value::String(full.to_string()));
        }
    }
}

impl ReasoningRenderer for SuppressedRenderer {
    fn on_reasoning(&mut self, _kind: ReasoningKind, _text: &str, _paragraph_break: bool) -> Vec<Value> {
        Vec::new()
    }

    fn apply_to_message(&self, _message: &mut Map<String, Value>, _summary: &str, _full: &str) {}
}

/* --- tests ----------------------------------------------------------------------------------- */
