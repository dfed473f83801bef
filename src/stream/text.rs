//!
//! Backend events → OpenAI `text_completion.chunk` / `text_completion`.
//!
//! Authors:
//!   Jaro <yarenty@gmail.com>
//!
//! Copyright (c) 2026 SkyCorp

/* --- uses ------------------------------------------------------------------------------------ */

use serde_json::{Value, json};

use super::{EventTranslator, Frame, Usage, event_kind, failure_message, response_id};
use crate::error::{ProxyError, Result};

/* --- types ----------------------------------------------------------------------------------- */

///
/// Legacy completions translator for one backend response.
///
/// Reasoning events are ignored; only output text reaches the client.
pub struct TextStreamTranslator {
    id: String,
    model: String,
    created: i64,
    include_usage: bool,
    text: String,
    usage: Option<Usage>,
    /** a `finish_reason: "stop"` chunk was sent */
    stopped: bool,
    error: Option<String>,
    finished: bool,
}

/* --- constants ------------------------------------------------------------------------------- */

const STREAM_ID: &str = "cmpl-stream";
const COLLECT_ID: &str = "cmpl";

/* --- start of code -------------------------------------------------------------------------- */

impl TextStreamTranslator {
    pub fn streaming(model: impl Into<String>, created: i64, include_usage: bool) -> Self {
        Self::with_id(STREAM_ID, model.into(), created, include_usage)
    }

    pub fn collecting(model: impl Into<String>, created: i64) -> Self {
        Self::with_id(COLLECT_ID, model.into(), created, false)
    }

    fn with_id(id: &str, model: String, created: i64, include_usage: bool) -> Self {
        Self {
            id: id.to_string(),
            model,
            created,
            include_usage,
            text: String::new(),
            usage: None,
            stopped: false,
            error: None,
            finished: false,
        }
    }

    ///
    /// Final `text_completion` object.
    ///
    /// # Returns
    ///  * the completion object
    ///  * `ProxyError::UpstreamProtocol` (502) when the backend reported `response.failed`
    pub fn into_completion(self) -> Result<Value> {
        if let Some(message) = self.error {
            return Err(ProxyError::UpstreamProtocol {
                status: 502,
                message,
                code: None,
                error_type: Some("upstream_error".to_string()),
            });
        }

        let mut completion = json!({
            "id": self.id,
            "object": "text_completion",
            "created": self.created,
            "model": self.model,
            "choices": [{ "index": 0, "text": self.text, "finish_reason": "stop", "logprobs": null }],
        });
        if let Some(usage) = self.usage {
            completion["usage"] = json!(usage);
        }
        Ok(completion)
    }

    fn chunk(&self, text: &str, finish_reason: Option<&str>) -> Value {
        json!({
            "id": self.id,
            "object": "text_completion.chunk",
            "created": self.created,
            "model": self.model,
            "choices": [{ "index": 0, "text": text, "finish_reason": finish_reason }],
        })
    }

    fn stop(&mut self) -> Option<Frame> {
        if self.stopped {
            return None;
        }
        self.stopped = true;
        Some(Frame::Data(self.chunk("", Some("stop"))))
    }
}

impl EventTranslator for TextStreamTranslator {
    fn on_event(&mut self, event: &Value) -> Vec<Frame> {
        if self.finished {
            return Vec::new();
        }
        if let Some(id) = response_id(event) {
            self.id = id.to_string();
        }

        match event_kind(event) {
            "response.output_text.delta" => {
                let delta = event.get("delta").and_then(Value::as_str).unwrap_or_default();
                self.text.push_str(delta);
                vec![Frame::Data(self.chunk(delta, None))]
            }
            "response.output_text.done" => self.stop().into_iter().collect(),
            "response.failed" => {
                let message = failure_message(event);
                self.error = Some(message.clone());
                self.finished = true;
                vec![Frame::Data(json!({ "error": { "message": message } }))]
            }
            "response.completed" => {
                if let Some(usage) = Usage::from_event(event) {
                    self.usage = Some(usage);
                }
                self.finished = true;

                let mut frames = Vec::new();
                if self.include_usage {
                    if let Some(usage) = self.usage {
                        let mut chunk = self.chunk("", None);
                        chunk["usage"] = json!(usage);
                        frames.push(Frame::Data(chunk));
                    }
                }
                frames.push(Frame::Done);
                frames
            }
            _ => Vec::new(),
        }
    }

    fn on_end(&mut self) -> Vec<Frame> {
        if self.finished {
            return Vec::new();
        }
        self.finished = true;
        let mut frames: Vec<Frame> = self.stop().into_iter().collect();
        frames.push(Frame::Done);
        frames
    }

    fn is_finished(&self) -> bool {
        self.finished
    }
}

/* --- tests ----------------------------------------------------------------------------------- */

#[cfg(test)]
mod tests {
    use super::*;

    fn data(frame: &Frame) -> &Value {
        match frame {
            Frame::Data(v) => v,
            Frame::Done => panic!("unexpected [DONE]"),
        }
    }

    #[test]
    fn test_stream_with_usage() {
        let mut translator = TextStreamTranslator::streaming("gpt-5", 3, true);
        let mut frames = Vec::new();
        for event in [
            json!({"type": "response.reasoning_text.delta", "delta": "ignored"}),
            json!({"type": "response.output_text.delta", "delta": "Hello"}),
            json!({"type": "response.output_text.done"}),
            json!({"type": "response.completed", "response": {"id": "resp_9", "usage": {"input_tokens": 2, "output_tokens": 1}}}),
        ] {
            frames.extend(translator.on_event(&event));
        }

        assert_eq!(frames.len(), 4);
        assert_eq!(data(&frames[0])["choices"][0]["text"], "Hello");
        assert_eq!(data(&frames[0])["object"], "text_completion.chunk");
        assert_eq!(data(&frames[1])["choices"][0]["finish_reason"], "stop");
        assert_eq!(data(&frames[2])["usage"]["total_tokens"], 3);
        assert_eq!(data(&frames[2])["id"], "resp_9");
        assert_eq!(frames[3], Frame::Done);
    }

    #[test]
    fn test_end_without_completion() {
        let mut translator = TextStreamTranslator::streaming("gpt-5", 3, false);
        translator.on_event(&json!({"type": "response.output_text.delta", "delta": "partial"}));
        let frames = translator.on_end();
        assert_eq!(frames.len(), 2);
        assert_eq!(data(&frames[0])["choices"][0]["finish_reason"], "stop");
        assert_eq!(frames[1], Frame::Done);
        assert!(translator.on_end().is_empty());
    }

    #[test]
    fn test_collected_completion() {
        let mut translator = TextStreamTranslator::collecting("gpt-5", 3);
        translator.on_event(&json!({"type": "response.output_text.delta", "delta": "a"}));
        translator.on_event(&json!({"type": "response.output_text.delta", "delta": "b"}));
        translator.on_event(&json!({"type": "response.completed", "response": {}}));

        let completion = translator.into_completion().unwrap();
        assert_eq!(completion["object"], "text_completion");
        assert_eq!(completion["id"], "cmpl");
        assert_eq!(completion["choices"][0]["text"], "ab");
        assert_eq!(completion["choices"][0]["logprobs"], Value::Null);
    }

    #[test]
    fn test_failed_collection() {
        let mut translator = TextStreamTranslator::collecting("gpt-5", 3);
        translator.on_event(&json!({"type": "response.failed"}));
        assert!(matches!(
            translator.into_completion(),
            Err(ProxyError::UpstreamProtocol { status: 502, .. })
        ));
    }
}
