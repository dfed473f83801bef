//!
//! Session fingerprinting for the backend prompt cache.
//!
//! The backend keys its prompt cache by the `prompt_cache_key` / `session_id`
//! sent with each request. Requests sharing the same instructions and first user
//! message get the same generated id, so repeated conversations hit the cache
//! without the gateway storing any history.
//!
//! Authors:
//!   Jaro <yarenty@gmail.com>
//!
//! Copyright (c) 2026 SkyCorp

/* --- uses ------------------------------------------------------------------------------------ */

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;

use serde_json::{Map, Value, json};
use sha2::{Digest, Sha256};
use uuid::Uuid;

/* --- types ----------------------------------------------------------------------------------- */

///
/// Bounded fingerprint → session id map, oldest entry evicted first.
pub struct SessionFingerprinter {
    capacity: usize,
    inner: Mutex<SessionMap>,
}

#[derive(Default)]
struct SessionMap {
    ids: HashMap<String, String>,
    order: VecDeque<String>,
}

/* --- constants ------------------------------------------------------------------------------- */

pub const DEFAULT_SESSION_CAPACITY: usize = 10_000;

/* --- start of code -------------------------------------------------------------------------- */

impl Default for SessionFingerprinter {
    fn default() -> Self {
        Self::new(DEFAULT_SESSION_CAPACITY)
    }
}

impl SessionFingerprinter {
    pub fn new(capacity: usize) -> Self {
        Self { capacity: capacity.max(1), inner: Mutex::new(SessionMap::default()) }
    }

    ///
    /// Session id for a request.
    ///
    /// # Arguments
    ///  * `instructions` - instructions text sent upstream
    ///  * `input_items` - backend input items
    ///  * `client_supplied` - id from the request headers, returned trimmed when non-blank
    ///
    /// # Returns
    ///  * The remembered id for this prefix, or a freshly minted UUID v4
    pub fn ensure_session_id(
        &self,
        instructions: Option<&str>,
        input_items: &[Value],
        client_supplied: Option<&str>,
    ) -> String {
        if let Some(id) = client_supplied.map(str::trim).filter(|id| !id.is_empty()) {
            return id.to_string();
        }

        let fingerprint = fingerprint(&canonical_prefix(instructions, input_items));

        let mut map = self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        if let Some(id) = map.ids.get(&fingerprint) {
            return id.clone();
        }

        let id = Uuid::new_v4().to_string();
        map.ids.insert(fingerprint.clone(), id.clone());
        map.order.push_back(fingerprint);
        while map.order.len() > self.capacity {
            if let Some(oldest) = map.order.pop_front() {
                map.ids.remove(&oldest);
            }
        }
        id
    }

    pub fn len(&self) -> usize {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner()).ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

///
/// Canonical JSON of the cache-relevant prefix.
///
/// Holds the trimmed instructions (when non-blank) and the first user message
/// reduced to its non-empty `input_text` / `input_image` parts, serialized
/// compactly with sorted keys so equal prefixes serialize identically.
pub fn canonical_prefix(instructions: Option<&str>, input_items: &[Value]) -> String {
    let mut prefix = Map::new();
    if let Some(text) = instructions.map(str::trim).filter(|t| !t.is_empty()) {
        prefix.insert("instructions".to_string(), Value::String(text.to_string()));
    }
    if let Some(message) = first_user_message(input_items) {
        prefix.insert("first_user_message".to_string(), message);
    }
    sorted_keys(&Value::Object(prefix)).to_string()
}

/// Rebuild objects in key order; holds even when `serde_json` preserves insertion order
fn sorted_keys(value: &Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut entries: Vec<_> = map.iter().collect();
            entries.sort_by(|a, b| a.0.cmp(b.0));
            Value::Object(entries.into_iter().map(|(k, v)| (k.clone(), sorted_keys(v))).collect())
        }
        Value::Array(items) => Value::Array(items.iter().map(sorted_keys).collect()),
        other => other.clone(),
    }
}

fn first_user_message(input_items: &[Value]) -> Option<Value> {
    input_items.iter().find_map(|item| {
        if item.get("type").and_then(Value::as_str) != Some("message")
            || item.get("role").and_then(Value::as_str) != Some("user")
        {
            return None;
        }

        let parts: Vec<Value> = item
            .get("content")?
            .as_array()?
            .iter()
            .filter_map(|part| match part.get("type").and_then(Value::as_str)? {
                "input_text" => part
                    .get("text")
                    .and_then(Value::as_str)
                    .filter(|t| !t.is_empty())
                    .map(|t| json!({"type": "input_text", "text": t})),
                "input_image" => part
                    .get("image_url")
                    .and_then(Value::as_str)
                    .filter(|u| !u.is_empty())
                    .map(|u| json!({"type": "input_image", "image_url": u})),
                _ => None,
            })
            .collect();

        (!parts.is_empty()).then(|| json!({"type": "message", "role": "user", "content": parts}))
    })
}

fn fingerprint(canonical: &str) -> String {
    Sha256::digest(canonical.as_bytes()).iter().map(|b| format!("{b:02x}")).collect()
}

/* --- tests ----------------------------------------------------------------------------------- */
