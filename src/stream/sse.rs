//!
//! SSE framing of the backend response body.
//!
//! The backend sends `data: <json>` lines separated by blank lines and finishes with
//! a literal `data: [DONE]`. Network chunks split lines arbitrarily, so bytes are
//! buffered until a full line is available.
//!
//! Authors:
//!   Jaro <yarenty@gmail.com>
//!
//! Copyright (c) 2026 SkyCorp

/* --- uses ------------------------------------------------------------------------------------ */

use std::fmt::Display;

use bytes::Bytes;
use futures::Stream;
use serde_json::Value;
use tokio_stream::StreamExt;
use tracing::{debug, warn};

/* --- types ----------------------------------------------------------------------------------- */

///
/// One item read from the backend stream.
#[derive(Debug, Clone, PartialEq)]
pub enum SseItem {
    /** parsed JSON event */
    Event(Value),
    /** literal `[DONE]` terminator */
    Done,
    /** transport failed mid-stream; carries the error text */
    Truncated(String),
}

///
/// Accumulates raw bytes and hands out complete lines.
///
/// Lines longer than the limit are dropped whole, up to and including their newline.
#[derive(Debug)]
pub struct SseLineBuffer {
    pending: Vec<u8>,
    /** prefix of `pending` already known to hold no newline */
    scanned: usize,
    /** discarding an over-long line until its newline arrives */
    overflowed: bool,
    limit: usize,
}

/* --- constants ------------------------------------------------------------------------------- */

/** ceiling for one buffered line; completed responses can be large */
pub const MAX_LINE_BYTES: usize = 16 * 1024 * 1024;

/* --- start of code -------------------------------------------------------------------------- */

impl Default for SseLineBuffer {
    fn default() -> Self {
        Self::with_limit(MAX_LINE_BYTES)
    }
}

impl SseLineBuffer {
    pub fn with_limit(limit: usize) -> Self {
        Self { pending: Vec::new(), scanned: 0, overflowed: false, limit }
    }

    ///
    /// Append a chunk and return every line it completed.
    ///
    /// Lines are decoded lossily and stripped of `\r\n` / `\n`. Only the new bytes
    /// are searched for line ends.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        self.pending.extend_from_slice(chunk);

        let mut lines = Vec::new();
        let mut start = 0;
        let mut from = self.scanned;
        while let Some(offset) = self.pending[from..].iter().position(|b| *b == b'\n') {
            let end = from + offset;
            if self.overflowed {
                self.overflowed = false;
            } else if end - start > self.limit {
                warn!("Dropping SSE line longer than {} bytes", self.limit);
            } else {
                lines.push(decode_line(&self.pending[start..end]));
            }
            start = end + 1;
            from = start;
        }
        self.pending.drain(..start);
        self.scanned = self.pending.len();

        if self.pending.len() > self.limit {
            warn!("Dropping SSE line longer than {} bytes", self.limit);
            self.pending.clear();
            self.scanned = 0;
            self.overflowed = true;
        }
        lines
    }

    /// Remaining partial line once the body has ended
    pub fn finish(&mut self) -> Option<String> {
        let rest = std::mem::take(&mut self.pending);
        self.scanned = 0;
        if std::mem::take(&mut self.overflowed) || rest.is_empty() {
            return None;
        }
        Some(decode_line(&rest))
    }
}

///
/// Parse one SSE line.
///
/// Only `data:` lines matter; comments, `event:` lines, blank payloads and
/// undecodable JSON are skipped.
pub fn parse_line(line: &str) -> Option<SseItem> {
    let data = line.strip_prefix("data:")?.trim();
    if data.is_empty() {
        return None;
    }
    if data == "[DONE]" {
        return Some(SseItem::Done);
    }
    match serde_json::from_str::<Value>(data) {
        Ok(event) => Some(SseItem::Event(event)),
        Err(e) => {
            debug!("Skipping undecodable SSE payload: {}", e);
            None
        }
    }
}

fn decode_line(bytes: &[u8]) -> String {
    let bytes = bytes.strip_suffix(b"\r").unwrap_or(bytes);
    String::from_utf8_lossy(bytes).into_owned()
}

///
/// Turn a byte stream into SSE items.
///
/// The stream ends after `[DONE]`, after a transport error (reported once as
/// [`SseItem::Truncated`]) or when the body ends.
pub fn events<S, E>(body: S) -> impl Stream<Item = SseItem> + Send
where
    S: Stream<Item = std::result::Result<Bytes, E>> + Send + 'static,
    E: Display + Send + 'static,
{
    async_stream::stream! {
        let mut lines = SseLineBuffer::default();
        tokio::pin!(body);

        while let Some(chunk) = body.next().await {
            match chunk {
                Ok(bytes) => {
                    for line in lines.push(&bytes) {
                        if let Some(item) = parse_line(&line) {
                            let done = item == SseItem::Done;
                            yield item;
                            if done {
                                return;
                            }
                        }
                    }
                }
                Err(e) => {
                    yield SseItem::Truncated(e.to_string());
                    return;
                }
            }
        }

        if let Some(item) = lines.finish().as_deref().and_then(parse_line) {
            yield item;
        }
    }
}

/* --- tests ----------------------------------------------------------------------------------- */
