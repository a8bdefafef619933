//! Turn-execution engine for a CLI coding agent.
//!
//! A user converses with a language model that can request file and code
//! operations through tools, subject to human approval. This crate is the
//! engine that makes one such turn happen:
//!
//! - [`stream::StreamAssembler`] incrementally separates narrative text from
//!   embedded tool invocations across two model-output protocols (native
//!   structured deltas and inline JSON-in-text), with
//!   [`extract`] handling the inline pattern and the structured-output
//!   schema.
//! - [`orchestrator::ToolExecutionOrchestrator`] validates, approves (via
//!   [`approval::ApprovalGate`]), and executes a batch of tool calls with
//!   bounded concurrency and retry/backoff.
//! - [`results::ResultCache`] turns raw tool outputs into bounded,
//!   model-consumable feedback.
//!
//! Terminal rendering, session persistence, workspace config loading, and
//! the provider HTTP transport are collaborators, not residents: the binary
//! crate wires them in. Tool implementations live in `agent_tools`; the
//! streaming provider client lives in `chat_api`.

pub mod approval;
pub mod chat;
pub mod config;
pub mod error;
pub mod extract;
pub mod orchestrator;
pub mod registry;
pub mod results;
pub mod retry;
pub mod stream;

pub use approval::{ApprovalGate, ApprovalMode, ApprovalPrompt, ApprovalRule, ApprovalState};
pub use chat::{ChatMessage, ChatRole, ParsedTurn, PartialToolCall, StreamDelta, ToolCall, ToolResult};
pub use config::{CacheConfig, EngineConfig};
pub use error::{ApprovalError, ToolError};
pub use orchestrator::{OrchestratorError, ToolExecutionOrchestrator, TurnContext};
pub use registry::{SecurityValidator, Tool, ToolDefinition, ToolRegistry};
pub use results::{feedback_message, ProcessedOutput, ResultCache};
pub use retry::RetryPolicy;
pub use stream::{StepOutput, StreamAssembler};
