//! Adapter from the chat-completions transport to engine stream deltas.

use agent_core::{ChatMessage, ChatRole, PartialToolCall, StreamDelta, ToolDefinition};
use async_trait::async_trait;
use chat_api::{ChatApiClient, ChatRequest, ChatStreamEvent, WireMessage, WireToolCall};
use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;

use super::{ChatProvider, ProviderError};

pub struct ChatCompletionsProvider {
    client: ChatApiClient,
    model: String,
}

impl ChatCompletionsProvider {
    pub fn new(client: ChatApiClient, model: impl Into<String>) -> Self {
        Self {
            client,
            model: model.into(),
        }
    }
}

#[async_trait]
impl ChatProvider for ChatCompletionsProvider {
    fn name(&self) -> &str {
        "chat-completions"
    }

    async fn stream_turn(
        &self,
        messages: &[ChatMessage],
        tools: &[ToolDefinition],
        cancel: &CancellationToken,
        on_delta: &mut (dyn FnMut(StreamDelta) + Send),
    ) -> Result<(), ProviderError> {
        let request = ChatRequest::new(self.model.clone(), messages.iter().map(to_wire).collect())
            .with_tools(tools.iter().map(tool_to_wire).collect());

        self.client
            .stream_with_handler(&request, cancel, |event| {
                if let ChatStreamEvent::Delta {
                    content,
                    tool_calls,
                    finish_reason,
                } = event
                {
                    on_delta(StreamDelta {
                        content,
                        tool_calls: tool_calls
                            .into_iter()
                            .map(|fragment| PartialToolCall {
                                index: fragment.index,
                                name: fragment.name,
                                arguments_fragment: fragment.arguments,
                            })
                            .collect(),
                        finish_reason,
                    });
                }
            })
            .await
            .map_err(|error| ProviderError(error.to_string()))?;
        Ok(())
    }
}

fn to_wire(message: &ChatMessage) -> WireMessage {
    let role = match message.role {
        ChatRole::System => "system",
        ChatRole::User => "user",
        ChatRole::Assistant => "assistant",
        ChatRole::Tool => "tool",
    };

    WireMessage {
        role: role.to_string(),
        content: Some(message.content.clone()),
        tool_calls: message
            .tool_calls
            .iter()
            .map(|call| WireToolCall::function(&call.id, &call.name, &call.arguments_json))
            .collect(),
        tool_call_id: message.tool_call_id.clone(),
    }
}

fn tool_to_wire(definition: &ToolDefinition) -> Value {
    json!({
        "type": "function",
        "function": {
            "name": definition.name,
            "description": definition.description,
            "parameters": definition.input_schema,
        }
    })
}
