use serde::{Deserialize, Serialize};
use serde_json::Value;

/// One native tool-call fragment addressed by choice-local `index`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolCallDelta {
    pub index: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub arguments: Option<String>,
}

/// Normalized stream event emitted by the SSE parser.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ChatStreamEvent {
    /// Incremental content and/or tool-call fragments.
    Delta {
        #[serde(skip_serializing_if = "Option::is_none")]
        content: Option<String>,
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        tool_calls: Vec<ToolCallDelta>,
        #[serde(skip_serializing_if = "Option::is_none")]
        finish_reason: Option<String>,
    },
    /// The `[DONE]` sentinel terminating the stream.
    Done,
    /// Provider-reported stream failure.
    Error { message: String },
}

// ── Wire shapes ────────────────────────────────────────────────────────
//
// The chunk layout of a streaming chat-completions response; only the
// fields the engine consumes are modeled.

#[derive(Debug, Deserialize)]
pub(crate) struct WireChunk {
    #[serde(default)]
    pub choices: Vec<WireChoice>,
    #[serde(default)]
    pub error: Option<WireError>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct WireError {
    pub message: Option<String>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct WireChoice {
    #[serde(default)]
    pub delta: WireDelta,
    #[serde(default)]
    pub finish_reason: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub(crate) struct WireDelta {
    #[serde(default)]
    pub content: Option<String>,
    #[serde(default)]
    pub tool_calls: Vec<WireToolCallDelta>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct WireToolCallDelta {
    pub index: usize,
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub function: Option<WireFunctionDelta>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct WireFunctionDelta {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub arguments: Option<String>,
}

pub(crate) fn map_chunk(value: Value) -> Option<ChatStreamEvent> {
    let chunk: WireChunk = serde_json::from_value(value).ok()?;

    if let Some(error) = chunk.error {
        return Some(ChatStreamEvent::Error {
            message: error.message.unwrap_or_else(|| "stream error".to_string()),
        });
    }

    let choice = chunk.choices.into_iter().next()?;
    let tool_calls = choice
        .delta
        .tool_calls
        .into_iter()
        .map(|delta| ToolCallDelta {
            index: delta.index,
            id: delta.id,
            name: delta.function.as_ref().and_then(|function| function.name.clone()),
            arguments: delta
                .function
                .as_ref()
                .and_then(|function| function.arguments.clone()),
        })
        .collect();

    Some(ChatStreamEvent::Delta {
        content: choice.delta.content,
        tool_calls,
        finish_reason: choice.finish_reason,
    })
}
