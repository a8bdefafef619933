//! Provider-neutral message and tool-call data model.
//!
//! These are the types that cross every seam of the engine: what the stream
//! assembler produces, what the orchestrator consumes, and what is rendered
//! back into the conversation for the next model turn.

use std::collections::BTreeMap;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::ToolError;

/// Conversation role for a [`ChatMessage`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatRole {
    System,
    User,
    Assistant,
    Tool,
}

/// One conversation history item, including tool-call requests and tool
/// feedback carried alongside plain content.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: ChatRole,
    pub content: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<ToolCall>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
}

impl ChatMessage {
    #[must_use]
    pub fn system(content: impl Into<String>) -> Self {
        Self::plain(ChatRole::System, content)
    }

    #[must_use]
    pub fn user(content: impl Into<String>) -> Self {
        Self::plain(ChatRole::User, content)
    }

    #[must_use]
    pub fn assistant(content: impl Into<String>) -> Self {
        Self::plain(ChatRole::Assistant, content)
    }

    /// Assistant message carrying the tool calls requested in this turn.
    #[must_use]
    pub fn assistant_with_calls(content: impl Into<String>, tool_calls: Vec<ToolCall>) -> Self {
        Self {
            role: ChatRole::Assistant,
            content: content.into(),
            tool_calls,
            tool_call_id: None,
        }
    }

    /// Tool-feedback message correlated to one call by `tool_call_id`.
    #[must_use]
    pub fn tool(call_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::Tool,
            content: content.into(),
            tool_calls: Vec::new(),
            tool_call_id: Some(call_id.into()),
        }
    }

    fn plain(role: ChatRole, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
            tool_calls: Vec::new(),
            tool_call_id: None,
        }
    }
}

/// A completed request to invoke a named tool with JSON arguments.
///
/// Identity is `id`. Ids are taken from the wire when the protocol carries
/// them and assigned sequentially (`call_0`, `call_1`, …) when it does not.
/// A call mutates only while its fragments are still streaming; once emitted
/// by the assembler it is immutable.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolCall {
    pub id: String,
    pub name: String,
    /// Raw argument payload; parsed into a parameter map by the orchestrator.
    pub arguments_json: String,
    /// Position of the call within the model output that produced it.
    pub source_index: usize,
}

impl ToolCall {
    #[must_use]
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        arguments_json: impl Into<String>,
        source_index: usize,
    ) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            arguments_json: arguments_json.into(),
            source_index,
        }
    }
}

/// One incremental fragment of model output, normalized from the provider
/// stream. Ephemeral; one per chunk.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StreamDelta {
    pub content: Option<String>,
    pub tool_calls: Vec<PartialToolCall>,
    pub finish_reason: Option<String>,
}

impl StreamDelta {
    #[must_use]
    pub fn text(content: impl Into<String>) -> Self {
        Self {
            content: Some(content.into()),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn finish(reason: impl Into<String>) -> Self {
        Self {
            finish_reason: Some(reason.into()),
            ..Self::default()
        }
    }
}

/// A native structured tool-call fragment addressed by `index`.
///
/// Fragments append, never replace: the name is set once, argument fragments
/// concatenate onto the call accumulating at `index`.
#[derive(Debug, Clone, PartialEq)]
pub struct PartialToolCall {
    pub index: usize,
    pub name: Option<String>,
    pub arguments_fragment: Option<String>,
}

/// The fully-assembled output of one model turn.
///
/// Invariant: `clean_text` never contains a tool-call payload substring —
/// every recognized span has been extracted into `tool_calls`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ParsedTurn {
    pub clean_text: String,
    pub tool_calls: Vec<ToolCall>,
}

/// Outcome of executing one tool call. Exactly one of `result`/`error` is
/// set; the orchestrator creates each record once and never mutates it after
/// returning the batch.
#[derive(Debug, Clone)]
pub struct ToolResult {
    pub call_id: String,
    pub tool_name: String,
    pub result: Option<Value>,
    pub error: Option<ToolError>,
    pub started_at: Instant,
    pub duration: Duration,
    pub metadata: BTreeMap<String, Value>,
}

impl ToolResult {
    #[must_use]
    pub fn success(
        call_id: impl Into<String>,
        tool_name: impl Into<String>,
        result: Value,
        started_at: Instant,
    ) -> Self {
        Self {
            call_id: call_id.into(),
            tool_name: tool_name.into(),
            result: Some(result),
            error: None,
            started_at,
            duration: started_at.elapsed(),
            metadata: BTreeMap::new(),
        }
    }

    #[must_use]
    pub fn failure(
        call_id: impl Into<String>,
        tool_name: impl Into<String>,
        error: ToolError,
        started_at: Instant,
    ) -> Self {
        Self {
            call_id: call_id.into(),
            tool_name: tool_name.into(),
            result: None,
            error: Some(error),
            started_at,
            duration: started_at.elapsed(),
            metadata: BTreeMap::new(),
        }
    }

    #[must_use]
    pub fn is_error(&self) -> bool {
        self.error.is_some()
    }

    #[must_use]
    pub fn with_metadata(mut self, key: impl Into<String>, value: Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }
}
