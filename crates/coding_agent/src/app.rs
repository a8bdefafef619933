//! The conversation turn loop.
//!
//! One user prompt can fan out into several model rounds: the model streams
//! a response, requested tools execute, their feedback is appended, and the
//! model is called again until it stops requesting tools (or the round
//! budget runs out).

use agent_core::{
    feedback_message, ChatMessage, OrchestratorError, ResultCache, StreamAssembler,
    ToolExecutionOrchestrator, TurnContext,
};
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::providers::{ChatProvider, ProviderError};

/// Safety bound on model rounds per user prompt.
const MAX_TOOL_ROUNDS: usize = 16;

#[derive(Debug, Error)]
pub enum TurnError {
    #[error("provider failed: {0}")]
    Provider(#[from] ProviderError),

    #[error(transparent)]
    Orchestrator(#[from] OrchestratorError),

    #[error("tool-round budget ({0}) exhausted without a final answer")]
    RoundsExhausted(usize),
}

/// Everything a caller wants to render from one completed turn.
#[derive(Debug, Default)]
pub struct TurnOutcome {
    /// Narrative text per model round, in order.
    pub narrative: Vec<String>,
    /// Human-oriented tool reports, in completion order.
    pub tool_reports: Vec<String>,
}

pub struct AgentApp {
    provider: Box<dyn ChatProvider>,
    orchestrator: ToolExecutionOrchestrator,
    cache: ResultCache,
    session_id: String,
    messages: Vec<ChatMessage>,
}

impl AgentApp {
    pub fn new(
        provider: Box<dyn ChatProvider>,
        orchestrator: ToolExecutionOrchestrator,
        cache: ResultCache,
        session_id: impl Into<String>,
        instructions: impl Into<String>,
    ) -> Self {
        Self {
            provider,
            orchestrator,
            cache,
            session_id: session_id.into(),
            messages: vec![ChatMessage::system(instructions)],
        }
    }

    pub fn messages(&self) -> &[ChatMessage] {
        &self.messages
    }

    /// Run one user turn to completion.
    pub async fn run_turn(
        &mut self,
        prompt: impl Into<String>,
        cancel: &CancellationToken,
    ) -> Result<TurnOutcome, TurnError> {
        self.messages.push(ChatMessage::user(prompt));
        let mut outcome = TurnOutcome::default();
        let tools = self.orchestrator.registry().definitions();

        for round in 0..MAX_TOOL_ROUNDS {
            let mut assembler = StreamAssembler::new();
            {
                let mut on_delta = |delta: agent_core::StreamDelta| {
                    let _ = assembler.process(&delta);
                };
                self.provider
                    .stream_turn(&self.messages, &tools, cancel, &mut on_delta)
                    .await?;
            }
            let turn = assembler.finalize();
            debug!(
                round,
                provider = self.provider.name(),
                calls = turn.tool_calls.len(),
                "model round assembled"
            );

            if !turn.clean_text.trim().is_empty() {
                outcome.narrative.push(turn.clean_text.clone());
            }

            if turn.tool_calls.is_empty() {
                self.messages.push(ChatMessage::assistant(turn.clean_text));
                return Ok(outcome);
            }

            self.messages.push(ChatMessage::assistant_with_calls(
                turn.clean_text,
                turn.tool_calls.clone(),
            ));

            let ctx = TurnContext {
                session_id: Some(self.session_id.clone()),
                cancel: cancel.clone(),
            };
            let results = self.orchestrator.execute(&ctx, turn.tool_calls).await?;
            info!(round, results = results.len(), "tool batch finished");

            for result in &results {
                let output = self.cache.process(result);
                outcome.tool_reports.push(output.display.clone());
                self.messages.push(feedback_message(result, &output));
            }
        }

        Err(TurnError::RoundsExhausted(MAX_TOOL_ROUNDS))
    }
}
