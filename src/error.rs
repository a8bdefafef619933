//! Failure taxonomy for tool execution.
//!
//! Every failure mode is captured as data on a `ToolResult`; nothing here is
//! thrown past the orchestrator boundary. A single failing call degrades that
//! call's result only.

use thiserror::Error;

/// Terminal classification of a failed tool call.
///
/// Only [`ToolError::Execution`] is retryable; parse, validation, and
/// approval failures are deterministic and re-running them cannot change the
/// outcome. `ApprovalRejected` is a normal terminal outcome, not an
/// exceptional condition.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ToolError {
    #[error("malformed tool arguments: {0}")]
    Parse(String),

    #[error("path policy violation: {0}")]
    Validation(String),

    #[error("approval denied: {0}")]
    ApprovalRejected(String),

    #[error("tool execution failed: {0}")]
    Execution(String),

    #[error("execution cancelled: {0}")]
    Cancelled(String),
}

impl ToolError {
    /// True only for failures where another attempt could succeed.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Execution(_))
    }
}

/// Error raised while asking for an approval decision, distinct from the
/// decision itself being "no".
#[derive(Debug, Error)]
pub enum ApprovalError {
    #[error("approval input source closed")]
    PromptClosed,

    #[error("failed to read approval response: {0}")]
    Io(String),
}
