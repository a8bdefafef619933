//! Provider contract consumed by the turn loop.

pub mod chat_completions;
pub mod mock;

use agent_core::{ChatMessage, StreamDelta, ToolDefinition};
use async_trait::async_trait;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

pub use chat_completions::ChatCompletionsProvider;
pub use mock::MockProvider;

#[derive(Debug, Error)]
#[error("{0}")]
pub struct ProviderError(pub String);

/// A model backend capable of streaming one turn.
///
/// Implementations deliver raw [`StreamDelta`]s through `on_delta` in wire
/// order; the caller owns assembly, extraction, and everything downstream.
#[async_trait]
pub trait ChatProvider: Send + Sync {
    fn name(&self) -> &str;

    async fn stream_turn(
        &self,
        messages: &[ChatMessage],
        tools: &[ToolDefinition],
        cancel: &CancellationToken,
        on_delta: &mut (dyn FnMut(StreamDelta) + Send),
    ) -> Result<(), ProviderError>;
}
