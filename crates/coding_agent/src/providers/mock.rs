//! Deterministic scripted provider for tests and offline demos.

use std::collections::VecDeque;
use std::sync::Mutex;

use agent_core::{ChatMessage, StreamDelta, ToolDefinition};
use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use super::{ChatProvider, ProviderError};

/// Plays back pre-scripted turns, one `Vec<StreamDelta>` per model call.
pub struct MockProvider {
    turns: Mutex<VecDeque<Vec<StreamDelta>>>,
}

impl MockProvider {
    pub fn new(turns: Vec<Vec<StreamDelta>>) -> Self {
        Self {
            turns: Mutex::new(turns.into()),
        }
    }

    /// A provider that answers every prompt with one plain-text delta.
    pub fn text_only(reply: impl Into<String>) -> Self {
        Self::new(vec![vec![
            StreamDelta::text(reply),
            StreamDelta::finish("stop"),
        ]])
    }
}

#[async_trait]
impl ChatProvider for MockProvider {
    fn name(&self) -> &str {
        "mock"
    }

    async fn stream_turn(
        &self,
        _messages: &[ChatMessage],
        _tools: &[ToolDefinition],
        cancel: &CancellationToken,
        on_delta: &mut (dyn FnMut(StreamDelta) + Send),
    ) -> Result<(), ProviderError> {
        let turn = {
            let mut turns = self
                .turns
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            turns.pop_front()
        };
        let Some(turn) = turn else {
            return Err(ProviderError("mock script exhausted".to_string()));
        };

        for delta in turn {
            if cancel.is_cancelled() {
                return Err(ProviderError("cancelled".to_string()));
            }
            on_delta(delta);
        }
        Ok(())
    }
}
