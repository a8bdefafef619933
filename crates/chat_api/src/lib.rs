//! Transport-only streaming chat-completions client.
//!
//! This crate owns request building, SSE parsing, typed error
//! classification, and transport-level retry for a chat-completions style
//! endpoint. It intentionally contains no conversation state, no approval
//! logic, and no runtime UI coupling; the agent engine consumes it through
//! the stream-delta events it emits.

pub mod client;
pub mod config;
pub mod error;
pub mod events;
pub mod headers;
pub mod payload;
pub mod retry;
pub mod sse;
pub mod url;

pub use client::ChatApiClient;
pub use client::StreamOutcome;
pub use config::ChatApiConfig;
pub use error::{ChatApiError, ErrorKind};
pub use events::{ChatStreamEvent, ToolCallDelta};
pub use payload::{ChatRequest, WireMessage, WireToolCall};
pub use sse::SseStreamParser;
pub use url::normalize_chat_url;
