//!
//! Request translation from OpenAI client formats to the responses backend.
//!
//! - `messages.rs` - chat messages to backend input items
//! - `tools.rs` - function tools, passthrough built-in tools and tool choice
//!
//! Authors:
//!   Jaro <yarenty@gmail.com>
//!
//! Copyright (c) 2026 SkyCorp

/* --- modules --------------------------------------------------------------------------------- */

pub mod messages;
pub mod tools;

/* --- start of code -------------------------------------------------------------------------- */

pub use messages::{ContentPart, InputItem, MessageConverter, MessageRole};
pub use tools::{FunctionTool, PassthroughTools};
