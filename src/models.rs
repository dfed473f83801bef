//!
//! Model name normalization and the served model list.
//!
//! Authors:
//!   Jaro <yarenty@gmail.com>
//!
//! Copyright (c) 2026 SkyCorp

/* --- uses ------------------------------------------------------------------------------------ */

use serde_json::{Value, json};

use crate::reasoning::ReasoningEffort;

/* --- types ----------------------------------------------------------------------------------- */

///
/// Backend model resolved from a client model name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedModel {
    /** canonical backend model id */
    pub model: String,
    /** effort carried by a `-high` style suffix, if any */
    pub effort: Option<ReasoningEffort>,
}

/* --- constants ------------------------------------------------------------------------------- */

pub const DEFAULT_MODEL: &str = "gpt-5";

/** models listed by `GET /v1/models` */
pub const SERVED_MODELS: &[&str] = &["gpt-5", "gpt-5-codex", "codex-mini-latest"];

const MODEL_ALIASES: &[(&str, &str)] = &[
    ("gpt5", "gpt-5"),
    ("gpt-5-latest", "gpt-5"),
    ("gpt-5", "gpt-5"),
    ("gpt5-codex", "gpt-5-codex"),
    ("gpt-5-codex", "gpt-5-codex"),
    ("gpt-5-codex-latest", "gpt-5-codex"),
    ("codex", "codex-mini-latest"),
    ("codex-mini", "codex-mini-latest"),
    ("codex-mini-latest", "codex-mini-latest"),
];

const EFFORT_SUFFIXES: &[ReasoningEffort] = &[
    ReasoningEffort::Minimal,
    ReasoningEffort::Low,
    ReasoningEffort::Medium,
    ReasoningEffort::High,
];

/* --- start of code -------------------------------------------------------------------------- */

///
/// Resolve a client model name.
///
/// Strips a `:qualifier`, then one trailing `-effort` / `_effort` suffix
/// (case-insensitive), then maps known aliases. Blank names resolve to
/// [`DEFAULT_MODEL`]; a non-blank `debug_model` replaces the result outright.
pub fn resolve_model(name: Option<&str>, debug_model: Option<&str>) -> ResolvedModel {
    let mut resolved = resolve_client_name(name);
    if let Some(forced) = debug_model.map(str::trim).filter(|m| !m.is_empty()) {
        resolved.model = forced.to_string();
    }
    resolved
}

/// Canonical model id only
pub fn normalize_model_name(name: Option<&str>, debug_model: Option<&str>) -> String {
    resolve_model(name, debug_model).model
}

fn resolve_client_name(name: Option<&str>) -> ResolvedModel {
    let Some(name) = name.map(str::trim).filter(|n| !n.is_empty()) else {
        return ResolvedModel { model: DEFAULT_MODEL.to_string(), effort: None };
    };

    let mut base = name.split(':').next().unwrap_or(name).trim().to_string();
    let mut effort = None;

    let lowered = base.to_lowercase();
    'suffix: for sep in ['-', '_'] {
        for candidate in EFFORT_SUFFIXES {
            let suffix = format!("{sep}{}", candidate.as_str());
            if lowered.ends_with(&suffix) {
                base.truncate(base.len() - suffix.len());
                effort = Some(*candidate);
                break 'suffix;
            }
        }
    }

    let model = MODEL_ALIASES
        .iter()
        .find(|(alias, _)| *alias == base)
        .map(|(_, canonical)| canonical.to_string())
        .unwrap_or(base);

    ResolvedModel { model, effort }
}

/// True for models that expect the codex instructions
pub fn is_codex_model(model: &str) -> bool {
    model.to_lowercase().contains("codex")
}

/// `GET /v1/models` body
pub fn model_list() -> Value {
    let data: Vec<Value> = SERVED_MODELS
        .iter()
        .map(|id| json!({"id": id, "object": "model", "owned_by": "owner"}))
        .collect();
    json!({"object": "list", "data": data})
}

/* --- tests ----------------------------------------------------------------------------------- */
