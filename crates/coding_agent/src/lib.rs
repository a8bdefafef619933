//! CLI coding agent: turn loop, approval prompting, and provider adapters
//! on top of the `agent_core` engine.

pub mod app;
pub mod prompt;
pub mod providers;

pub use app::{AgentApp, TurnError, TurnOutcome};
pub use prompt::StdinPrompt;
pub use providers::{ChatCompletionsProvider, ChatProvider, MockProvider, ProviderError};
