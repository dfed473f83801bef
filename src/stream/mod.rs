//!
//! Streaming protocol translation.
//!
//! Backend SSE events are fed, strictly in arrival order, through an
//! [`EventTranslator`] that produces client frames. The same translators run in
//! non-streaming mode; their frames are discarded and the accumulated state is
//! turned into a single response object instead.
//!
//! - `sse.rs` - line framing of the backend body
//! - `chat.rs` - `chat.completion(.chunk)` dialect
//! - `text.rs` - `text_completion(.chunk)` dialect
//!
//! Authors:
//!   Jaro <yarenty@gmail.com>
//!
//! Copyright (c) 2026 SkyCorp

/* --- modules --------------------------------------------------------------------------------- */

pub mod chat;
pub mod sse;
pub mod text;

/* --- uses ------------------------------------------------------------------------------------ */

use std::convert::Infallible;

use axum::body::Body;
use axum::response::sse::Event;
use axum::response::{IntoResponse, Response, Sse};
use serde::Serialize;
use serde_json::Value;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_stream::StreamExt;
use tokio_stream::wrappers::ReceiverStream;
use tracing::{debug, warn};

use crate::error::Result;
use sse::SseItem;

pub use chat::ChatStreamTranslator;
pub use text::TextStreamTranslator;

/* --- types ----------------------------------------------------------------------------------- */

///
/// One client-facing SSE frame.
#[derive(Debug, Clone, PartialEq)]
pub enum Frame {
    /** JSON payload sent as `data: <json>` */
    Data(Value),
    /** the `data: [DONE]` sentinel */
    Done,
}

///
/// Per-response translation state machine.
///
/// Implementations are pure functions of the event history: replaying the same
/// events yields the same frames.
pub trait EventTranslator: Send {
    /// Handle one backend event.
    fn on_event(&mut self, event: &Value) -> Vec<Frame>;

    /// The backend stream ended without a terminal event (`[DONE]`, truncation or EOF).
    fn on_end(&mut self) -> Vec<Frame>;

    /// A terminal event has been handled; nothing more will be emitted.
    fn is_finished(&self) -> bool;
}

///
/// Token usage in the OpenAI shape.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Usage {
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    pub total_tokens: u64,
}

/* --- constants ------------------------------------------------------------------------------- */

/** channel buffer between the pump task and the client body */
const STREAMING_CHANNEL_BUFFER: usize = 100;

const DONE_SENTINEL: &str = "[DONE]";

/* --- start of code -------------------------------------------------------------------------- */

impl Frame {
    /// Payload as written after `data: `
    pub fn to_data(&self) -> String {
        match self {
            Frame::Data(value) => value.to_string(),
            Frame::Done => DONE_SENTINEL.to_string(),
        }
    }
}

impl Usage {
    ///
    /// Usage from `response.usage` of a backend event.
    ///
    /// Missing counts read as zero; a missing total is the sum of the other two.
    pub fn from_event(event: &Value) -> Option<Self> {
        let usage = event.get("response")?.get("usage")?.as_object()?;
        let count = |name: &str| usage.get(name).and_then(Value::as_u64);

        let prompt_tokens = count("input_tokens").unwrap_or(0);
        let completion_tokens = count("output_tokens").unwrap_or(0);
        let total_tokens = count("total_tokens")
            .filter(|t| *t > 0)
            .unwrap_or(prompt_tokens.saturating_add(completion_tokens));
        Some(Self { prompt_tokens, completion_tokens, total_tokens })
    }
}

/// `type` of a backend event
pub fn event_kind(event: &Value) -> &str {
    event.get("type").and_then(Value::as_str).unwrap_or_default()
}

/// `response.id` of a backend event, when present and non-empty
pub fn response_id(event: &Value) -> Option<&str> {
    event.get("response")?.get("id")?.as_str().filter(|id| !id.is_empty())
}

/// Error message of a `response.failed` event
pub fn failure_message(event: &Value) -> String {
    event
        .get("response")
        .and_then(|r| r.get("error"))
        .and_then(|e| e.get("message"))
        .and_then(Value::as_str)
        .unwrap_or("response.failed")
        .to_string()
}

///
/// Stream a translated backend response to the client.
///
/// A pump task drains the backend body through the translator into a channel. When
/// the client goes away the channel closes, the pump is dropped and with it the
/// backend connection.
///
/// # Arguments
///  * `response` - successful backend response
///  * `translator` - fresh translator for this response
///
/// # Returns
///  * `text/event-stream` response
pub fn sse_response<T>(response: reqwest::Response, translator: T) -> Response
where
    T: EventTranslator + 'static,
{
    let (rx, _pump) = spawn_pump(response, translator);
    Sse::new(ReceiverStream::new(rx)).into_response()
}

///
/// Start the pump task feeding the returned receiver.
///
/// The task ends when the translator finishes, the backend body ends or the
/// receiver is dropped, whichever comes first.
pub(crate) fn spawn_pump<T>(response: reqwest::Response, translator: T) -> (mpsc::Receiver<Result<Event>>, JoinHandle<()>)
where
    T: EventTranslator + 'static,
{
    let (tx, rx) = mpsc::channel::<Result<Event>>(STREAMING_CHANNEL_BUFFER);

    let handle = tokio::spawn(async move {
        tokio::select! {
            _ = pump(response, translator, tx.clone()) => {}
            _ = tx.closed() => debug!("Client disconnected; closing backend stream"),
        }
    });

    (rx, handle)
}

///
/// Drain a backend response through a translator without emitting anything.
///
/// Returns once the translator has finished or the backend stream has ended.
pub async fn drain<T: EventTranslator>(response: reqwest::Response, translator: &mut T) {
    let mut items = std::pin::pin!(sse::events(response.bytes_stream()));

    while let Some(item) = items.next().await {
        match item {
            SseItem::Event(event) => {
                translator.on_event(&event);
            }
            SseItem::Done => break,
            SseItem::Truncated(reason) => {
                warn!("Backend stream truncated: {}", reason);
                break;
            }
        }
        if translator.is_finished() {
            return;
        }
    }
    if !translator.is_finished() {
        translator.on_end();
    }
}

///
/// Forward the backend SSE body verbatim.
///
/// A transport error ends the body cleanly after the bytes already received.
pub fn passthrough_response(response: reqwest::Response) -> Response {
    let body = response
        .bytes_stream()
        .map_while(|chunk| match chunk {
            Ok(bytes) => Some(bytes),
            Err(e) => {
                warn!("Backend stream truncated: {}", e);
                None
            }
        })
        .map(Ok::<_, Infallible>);

    Response::builder()
        .header(axum::http::header::CONTENT_TYPE, "text/event-stream")
        .header(axum::http::header::CACHE_CONTROL, "no-cache")
        .body(Body::from_stream(body))
        .unwrap_or_else(|_| Response::new(Body::empty()))
}

/* --- private methods ------------------------------------------------------------------------- */

async fn pump<T: EventTranslator>(response: reqwest::Response, mut translator: T, tx: mpsc::Sender<Result<Event>>) {
    let mut items = std::pin::pin!(sse::events(response.bytes_stream()));

    while let Some(item) = items.next().await {
        let frames = match item {
            SseItem::Event(event) => translator.on_event(&event),
            SseItem::Done => translator.on_end(),
            SseItem::Truncated(reason) => {
                warn!("Backend stream truncated: {}", reason);
                translator.on_end()
            }
        };
        if !send_frames(&tx, frames).await || translator.is_finished() {
            return;
        }
    }

    if !translator.is_finished() {
        let frames = translator.on_end();
        send_frames(&tx, frames).await;
    }
}

/// False once the client is gone
async fn send_frames(tx: &mpsc::Sender<Result<Event>>, frames: Vec<Frame>) -> bool {
    for frame in frames {
        if tx.send(Ok(Event::default().data(frame.to_data()))).await.is_err() {
            return false;
        }
    }
    true
}

/* --- tests ----------------------------------------------------------------------------------- */
