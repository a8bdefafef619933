//! Approval-gated, concurrency-bounded execution of one tool-call batch.
//!
//! Fan-out/fan-in: every call runs in its own task, the execution phase is
//! bounded by a semaphore, and results flow over a channel into a single
//! collector. Workers never share a mutable slice. One call's failure never
//! cancels its siblings; every input call yields exactly one [`ToolResult`],
//! in completion order. Callers correlate by `call_id`.

use std::sync::Arc;
use std::time::Instant;

use serde_json::Value;
use thiserror::Error;
use tokio::sync::{mpsc, Semaphore};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::approval::{ApprovalGate, PATH_PARAMETER_KEYS};
use crate::chat::{ToolCall, ToolResult};
use crate::config::EngineConfig;
use crate::error::ToolError;
use crate::registry::{SecurityValidator, ToolRegistry};
use crate::retry::RetryPolicy;

/// Ambient context for one batch: the session the calls belong to and the
/// caller's cancellation signal.
#[derive(Debug, Clone, Default)]
pub struct TurnContext {
    pub session_id: Option<String>,
    pub cancel: CancellationToken,
}

impl TurnContext {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_session(session_id: impl Into<String>) -> Self {
        Self {
            session_id: Some(session_id.into()),
            cancel: CancellationToken::new(),
        }
    }
}

/// Conditions that prevent any result from being produced. Per-call failures
/// are never reported here — they live on the individual [`ToolResult`]s.
#[derive(Debug, Error)]
pub enum OrchestratorError {
    #[error("execution cancelled before any tool ran")]
    Cancelled,
}

pub struct ToolExecutionOrchestrator {
    registry: Arc<ToolRegistry>,
    validator: Arc<dyn SecurityValidator>,
    gate: Arc<ApprovalGate>,
    config: EngineConfig,
    semaphore: Arc<Semaphore>,
}

impl ToolExecutionOrchestrator {
    #[must_use]
    pub fn new(
        registry: Arc<ToolRegistry>,
        validator: Arc<dyn SecurityValidator>,
        gate: Arc<ApprovalGate>,
        config: EngineConfig,
    ) -> Self {
        let semaphore = Arc::new(Semaphore::new(config.concurrency.max(1)));
        Self {
            registry,
            validator,
            gate,
            config,
            semaphore,
        }
    }

    #[must_use]
    pub fn gate(&self) -> &Arc<ApprovalGate> {
        &self.gate
    }

    #[must_use]
    pub fn registry(&self) -> &Arc<ToolRegistry> {
        &self.registry
    }

    /// Execute a batch. Blocks until every call has reported, or until the
    /// configured deadline cancels the stragglers (which then report
    /// `Cancelled` results themselves — the count always matches the input).
    pub async fn execute(
        &self,
        ctx: &TurnContext,
        calls: Vec<ToolCall>,
    ) -> Result<Vec<ToolResult>, OrchestratorError> {
        if ctx.cancel.is_cancelled() {
            return Err(OrchestratorError::Cancelled);
        }
        if calls.is_empty() {
            return Ok(Vec::new());
        }

        let batch_token = ctx.cancel.child_token();
        let expected = calls.len();
        let (result_tx, mut result_rx) = mpsc::channel::<ToolResult>(expected);

        debug!(calls = expected, "dispatching tool-call batch");
        for call in calls {
            let worker = CallWorker {
                registry: Arc::clone(&self.registry),
                validator: Arc::clone(&self.validator),
                gate: Arc::clone(&self.gate),
                retry: self.config.retry,
                semaphore: Arc::clone(&self.semaphore),
                session_id: ctx.session_id.clone(),
                token: batch_token.clone(),
            };
            let result_tx = result_tx.clone();
            tokio::spawn(async move {
                let result = worker.run(call).await;
                let _ = result_tx.send(result).await;
            });
        }
        drop(result_tx);

        let mut results = Vec::with_capacity(expected);
        let deadline = tokio::time::sleep(self.config.execute_timeout);
        tokio::pin!(deadline);
        let mut deadline_fired = false;

        while results.len() < expected {
            tokio::select! {
                maybe = result_rx.recv() => match maybe {
                    Some(result) => results.push(result),
                    None => break,
                },
                () = &mut deadline, if !deadline_fired => {
                    deadline_fired = true;
                    warn!("batch deadline reached, cancelling in-flight tool calls");
                    batch_token.cancel();
                }
            }
        }

        Ok(results)
    }
}

/// Everything one spawned call needs, cloned per task.
struct CallWorker {
    registry: Arc<ToolRegistry>,
    validator: Arc<dyn SecurityValidator>,
    gate: Arc<ApprovalGate>,
    retry: RetryPolicy,
    semaphore: Arc<Semaphore>,
    session_id: Option<String>,
    token: CancellationToken,
}

impl CallWorker {
    /// Sequential per-call pipeline: parse, validate, approve, then execute
    /// under a semaphore permit with retry. Each step's failure is terminal
    /// for this call only.
    async fn run(&self, call: ToolCall) -> ToolResult {
        let started_at = Instant::now();

        let arguments = match serde_json::from_str::<Value>(&call.arguments_json) {
            Ok(value @ Value::Object(_)) => value,
            Ok(other) => {
                return ToolResult::failure(
                    &call.id,
                    &call.name,
                    ToolError::Parse(format!(
                        "expected a JSON object of parameters, got {}",
                        json_type_name(&other)
                    )),
                    started_at,
                );
            }
            Err(error) => {
                return ToolResult::failure(
                    &call.id,
                    &call.name,
                    ToolError::Parse(error.to_string()),
                    started_at,
                );
            }
        };

        if let Err(error) = self.validate_paths(&arguments) {
            return ToolResult::failure(&call.id, &call.name, error, started_at);
        }

        if !self.gate.is_auto_approved(&call.name) {
            // The prompt itself may block indefinitely, but this worker
            // abandons the wait when the batch is cancelled.
            let decision = tokio::select! {
                decision = self.gate.decide(self.session_id.as_deref(), &call.name, &arguments) => decision,
                () = self.token.cancelled() => {
                    return ToolResult::failure(
                        &call.id,
                        &call.name,
                        ToolError::Cancelled("cancelled while awaiting approval".to_string()),
                        started_at,
                    );
                }
            };
            match decision {
                Ok(true) => {}
                Ok(false) => {
                    return ToolResult::failure(
                        &call.id,
                        &call.name,
                        ToolError::ApprovalRejected("rejected by user or rule".to_string()),
                        started_at,
                    );
                }
                Err(error) => {
                    return ToolResult::failure(
                        &call.id,
                        &call.name,
                        ToolError::ApprovalRejected(format!("approval unavailable: {error}")),
                        started_at,
                    );
                }
            }
        }

        // The execution slot is acquired only after approval, so a pending
        // human prompt never starves the semaphore.
        let permit = tokio::select! {
            permit = Arc::clone(&self.semaphore).acquire_owned() => match permit {
                Ok(permit) => permit,
                Err(_) => {
                    return ToolResult::failure(
                        &call.id,
                        &call.name,
                        ToolError::Cancelled("executor shut down".to_string()),
                        started_at,
                    );
                }
            },
            () = self.token.cancelled() => {
                return ToolResult::failure(
                    &call.id,
                    &call.name,
                    ToolError::Cancelled("cancelled while waiting for an execution slot".to_string()),
                    started_at,
                );
            }
        };

        let result = self.execute_with_retry(&call, arguments, started_at).await;
        drop(permit);
        result
    }

    fn validate_paths(&self, arguments: &Value) -> Result<(), ToolError> {
        let Some(object) = arguments.as_object() else {
            return Ok(());
        };
        for key in PATH_PARAMETER_KEYS {
            if let Some(path) = object.get(*key).and_then(Value::as_str) {
                self.validator.validate_path(path)?;
            }
        }
        Ok(())
    }

    async fn execute_with_retry(
        &self,
        call: &ToolCall,
        arguments: Value,
        started_at: Instant,
    ) -> ToolResult {
        let max_attempts = self.retry.max_attempts.max(1);
        let mut last_error = None;

        for attempt in 1..=max_attempts {
            if attempt > 1 {
                let delay = self.retry.delay_before_retry(attempt - 1);
                tokio::select! {
                    () = tokio::time::sleep(delay) => {}
                    () = self.token.cancelled() => {
                        return ToolResult::failure(
                            &call.id,
                            &call.name,
                            ToolError::Cancelled("cancelled during retry backoff".to_string()),
                            started_at,
                        );
                    }
                }
            }

            let outcome = tokio::select! {
                outcome = self.registry.execute(&call.name, arguments.clone()) => outcome,
                () = self.token.cancelled() => {
                    return ToolResult::failure(
                        &call.id,
                        &call.name,
                        ToolError::Cancelled("cancelled mid-execution".to_string()),
                        started_at,
                    );
                }
            };

            match outcome {
                Ok(value) => {
                    return ToolResult::success(&call.id, &call.name, value, started_at)
                        .with_metadata("attempts", Value::from(attempt));
                }
                Err(error) if error.is_retryable() && attempt < max_attempts => {
                    warn!(tool = %call.name, attempt, %error, "tool failed, retrying");
                    last_error = Some(error);
                }
                Err(error) => {
                    return ToolResult::failure(&call.id, &call.name, error, started_at)
                        .with_metadata("attempts", Value::from(attempt));
                }
            }
        }

        let error = last_error
            .unwrap_or_else(|| ToolError::Execution("retry budget exhausted".to_string()));
        ToolResult::failure(&call.id, &call.name, error, started_at)
            .with_metadata("attempts", Value::from(max_attempts))
    }
}

fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    use assert_matches::assert_matches;
    use async_trait::async_trait;
    use serde_json::{json, Value};

    use super::{OrchestratorError, ToolExecutionOrchestrator, TurnContext};
    use crate::approval::{ApprovalGate, ApprovalMode, ApprovalPrompt, ApprovalState};
    use crate::chat::ToolCall;
    use crate::config::EngineConfig;
    use crate::error::{ApprovalError, ToolError};
    use crate::registry::{AllowAllValidator, SecurityValidator, Tool, ToolDefinition, ToolRegistry};
    use crate::retry::RetryPolicy;

    struct ScriptedPrompt {
        replies: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl ApprovalPrompt for ScriptedPrompt {
        async fn request_approval(&self, _rendered: &str) -> Result<String, ApprovalError> {
            let mut replies = self.replies.lock().expect("reply lock");
            if replies.is_empty() {
                return Err(ApprovalError::PromptClosed);
            }
            Ok(replies.remove(0))
        }
    }

    fn prompt(replies: &[&str]) -> Box<ScriptedPrompt> {
        Box::new(ScriptedPrompt {
            replies: Mutex::new(replies.iter().map(|reply| (*reply).to_string()).collect()),
        })
    }

    /// Records concurrent occupancy so tests can assert the semaphore bound.
    struct GaugedTool {
        name: String,
        active: Arc<AtomicUsize>,
        peak: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl Tool for GaugedTool {
        fn definition(&self) -> ToolDefinition {
            ToolDefinition {
                name: self.name.clone(),
                description: None,
                input_schema: json!({"type": "object"}),
            }
        }

        async fn execute(&self, _arguments: Value) -> Result<Value, ToolError> {
            let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(20)).await;
            self.active.fetch_sub(1, Ordering::SeqCst);
            Ok(json!("done"))
        }
    }

    /// Fails `failures` times with a retryable error, then succeeds.
    struct FlakyTool {
        failures: AtomicU32,
    }

    #[async_trait]
    impl Tool for FlakyTool {
        fn definition(&self) -> ToolDefinition {
            ToolDefinition {
                name: "flaky".to_string(),
                description: None,
                input_schema: json!({"type": "object"}),
            }
        }

        async fn execute(&self, _arguments: Value) -> Result<Value, ToolError> {
            if self.failures.fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| {
                (left > 0).then(|| left - 1)
            })
            .is_ok()
            {
                return Err(ToolError::Execution("transient failure".to_string()));
            }
            Ok(json!("recovered"))
        }
    }

    struct EchoTool;

    #[async_trait]
    impl Tool for EchoTool {
        fn definition(&self) -> ToolDefinition {
            ToolDefinition {
                name: "echo".to_string(),
                description: None,
                input_schema: json!({"type": "object"}),
            }
        }

        async fn execute(&self, arguments: Value) -> Result<Value, ToolError> {
            Ok(arguments)
        }
    }

    struct SleepyTool;

    #[async_trait]
    impl Tool for SleepyTool {
        fn definition(&self) -> ToolDefinition {
            ToolDefinition {
                name: "sleepy".to_string(),
                description: None,
                input_schema: json!({"type": "object"}),
            }
        }

        async fn execute(&self, _arguments: Value) -> Result<Value, ToolError> {
            tokio::time::sleep(Duration::from_secs(3600)).await;
            Ok(json!("never"))
        }
    }

    struct DenySubdirValidator;

    impl SecurityValidator for DenySubdirValidator {
        fn validate_path(&self, path: &str) -> Result<(), ToolError> {
            if path.starts_with("/forbidden") {
                return Err(ToolError::Validation(format!("path escapes workspace: {path}")));
            }
            Ok(())
        }
    }

    fn orchestrator_with(
        registry: ToolRegistry,
        mode: ApprovalMode,
        replies: &[&str],
        config: EngineConfig,
    ) -> ToolExecutionOrchestrator {
        let gate = ApprovalGate::new(mode, ApprovalState::new(), prompt(replies), 64);
        ToolExecutionOrchestrator::new(
            Arc::new(registry),
            Arc::new(AllowAllValidator),
            Arc::new(gate),
            config,
        )
    }

    fn call(id: &str, name: &str, arguments: &str) -> ToolCall {
        ToolCall::new(id, name, arguments, 0)
    }

    #[tokio::test]
    async fn every_call_yields_exactly_one_result() {
        let mut registry = ToolRegistry::new();
        registry.register(EchoTool).expect("register");
        let orchestrator = orchestrator_with(
            registry,
            ApprovalMode::ApproveAll,
            &[],
            EngineConfig::default().with_retry(RetryPolicy::no_retry()),
        );

        let calls = vec![
            call("call_0", "echo", r#"{"n": 0}"#),
            call("call_1", "echo", "not json"),
            call("call_2", "missing_tool", "{}"),
        ];
        let results = orchestrator
            .execute(&TurnContext::new(), calls)
            .await
            .expect("batch should run");

        assert_eq!(results.len(), 3);
        for result in &results {
            assert!(
                result.result.is_some() ^ result.error.is_some(),
                "exactly one of result/error must be set for {}",
                result.call_id
            );
        }
        let failed: Vec<_> = results.iter().filter(|result| result.is_error()).collect();
        assert_eq!(failed.len(), 2);
    }

    #[tokio::test]
    async fn parse_failures_are_terminal_and_not_retried() {
        let mut registry = ToolRegistry::new();
        registry.register(EchoTool).expect("register");
        let orchestrator = orchestrator_with(
            registry,
            ApprovalMode::ApproveAll,
            &[],
            EngineConfig::default(),
        );

        let results = orchestrator
            .execute(&TurnContext::new(), vec![call("call_0", "echo", "[1, 2]")])
            .await
            .expect("batch");

        assert_matches!(results[0].error, Some(ToolError::Parse(_)));
        assert!(results[0].metadata.get("attempts").is_none());
    }

    #[tokio::test]
    async fn path_validation_runs_before_approval_and_execution() {
        let mut registry = ToolRegistry::new();
        registry.register(EchoTool).expect("register");
        let gate = ApprovalGate::new(
            ApprovalMode::ApproveAll,
            ApprovalState::new(),
            prompt(&[]),
            8,
        );
        let orchestrator = ToolExecutionOrchestrator::new(
            Arc::new(registry),
            Arc::new(DenySubdirValidator),
            Arc::new(gate),
            EngineConfig::default(),
        );

        let results = orchestrator
            .execute(
                &TurnContext::new(),
                vec![call("call_0", "echo", r#"{"file_path": "/forbidden/x"}"#)],
            )
            .await
            .expect("batch");

        assert_matches!(results[0].error, Some(ToolError::Validation(_)));
    }

    #[tokio::test]
    async fn concurrency_never_exceeds_the_semaphore_width() {
        let active = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));
        let mut registry = ToolRegistry::new();
        registry
            .register(GaugedTool {
                name: "gauged".to_string(),
                active: Arc::clone(&active),
                peak: Arc::clone(&peak),
            })
            .expect("register");

        let orchestrator = orchestrator_with(
            registry,
            ApprovalMode::ApproveAll,
            &[],
            EngineConfig::default().with_concurrency(2),
        );

        let calls: Vec<ToolCall> = (0..8)
            .map(|n| call(&format!("call_{n}"), "gauged", "{}"))
            .collect();
        let results = orchestrator
            .execute(&TurnContext::new(), calls)
            .await
            .expect("batch");

        assert_eq!(results.len(), 8);
        assert!(results.iter().all(|result| !result.is_error()));
        assert!(
            peak.load(Ordering::SeqCst) <= 2,
            "peak occupancy {} exceeded the limit",
            peak.load(Ordering::SeqCst)
        );
    }

    #[tokio::test(start_paused = true)]
    async fn retry_backs_off_then_succeeds() {
        let mut registry = ToolRegistry::new();
        registry
            .register(FlakyTool {
                failures: AtomicU32::new(2),
            })
            .expect("register");

        let orchestrator = orchestrator_with(
            registry,
            ApprovalMode::ApproveAll,
            &[],
            EngineConfig::default().with_retry(RetryPolicy {
                max_attempts: 3,
                base_delay: Duration::from_secs(1),
                backoff_multiplier: 2.0,
            }),
        );

        let before = tokio::time::Instant::now();
        let results = orchestrator
            .execute(&TurnContext::new(), vec![call("call_0", "flaky", "{}")])
            .await
            .expect("batch");

        assert!(results[0].error.is_none());
        assert_eq!(results[0].metadata.get("attempts"), Some(&serde_json::json!(3)));
        // Backoff schedule: 0s before the first retry, 2s before the second.
        assert!(before.elapsed() >= Duration::from_secs(2));
    }

    #[tokio::test]
    async fn retries_stop_once_the_budget_is_exhausted() {
        let mut registry = ToolRegistry::new();
        registry
            .register(FlakyTool {
                failures: AtomicU32::new(10),
            })
            .expect("register");

        let orchestrator = orchestrator_with(
            registry,
            ApprovalMode::ApproveAll,
            &[],
            EngineConfig::default().with_retry(RetryPolicy {
                max_attempts: 2,
                base_delay: Duration::ZERO,
                backoff_multiplier: 1.0,
            }),
        );

        let results = orchestrator
            .execute(&TurnContext::new(), vec![call("call_0", "flaky", "{}")])
            .await
            .expect("batch");

        assert_matches!(results[0].error, Some(ToolError::Execution(_)));
        assert_eq!(results[0].metadata.get("attempts"), Some(&serde_json::json!(2)));
    }

    #[tokio::test]
    async fn rejected_write_leaves_sibling_read_unaffected() {
        let mut registry = ToolRegistry::new();
        registry
            .register(GaugedTool {
                name: "read_file".to_string(),
                active: Arc::new(AtomicUsize::new(0)),
                peak: Arc::new(AtomicUsize::new(0)),
            })
            .expect("register read");
        registry
            .register(GaugedTool {
                name: "write_file".to_string(),
                active: Arc::new(AtomicUsize::new(0)),
                peak: Arc::new(AtomicUsize::new(0)),
            })
            .expect("register write");

        let orchestrator = orchestrator_with(
            registry,
            ApprovalMode::ApproveWrite,
            &["n"],
            EngineConfig::default().with_concurrency(1),
        );

        let results = orchestrator
            .execute(
                &TurnContext::new(),
                vec![
                    call("call_0", "read_file", r#"{"path": "README.md"}"#),
                    call("call_1", "write_file", r#"{"path": "out.txt"}"#),
                ],
            )
            .await
            .expect("batch");

        assert_eq!(results.len(), 2);
        let read = results
            .iter()
            .find(|result| result.call_id == "call_0")
            .expect("read result");
        let write = results
            .iter()
            .find(|result| result.call_id == "call_1")
            .expect("write result");

        assert!(read.error.is_none(), "auto-approved read must succeed");
        assert_matches!(write.error, Some(ToolError::ApprovalRejected(_)));
    }

    #[tokio::test]
    async fn pre_cancelled_context_is_a_batch_level_error() {
        let registry = ToolRegistry::new();
        let orchestrator = orchestrator_with(
            registry,
            ApprovalMode::ApproveAll,
            &[],
            EngineConfig::default(),
        );

        let ctx = TurnContext::new();
        ctx.cancel.cancel();
        let error = orchestrator
            .execute(&ctx, vec![call("call_0", "echo", "{}")])
            .await
            .expect_err("cancelled before start");
        assert_matches!(error, OrchestratorError::Cancelled);
    }

    #[tokio::test(start_paused = true)]
    async fn deadline_cancels_stragglers_but_reports_every_call() {
        let mut registry = ToolRegistry::new();
        registry.register(SleepyTool).expect("register");

        let orchestrator = orchestrator_with(
            registry,
            ApprovalMode::ApproveAll,
            &[],
            EngineConfig::default().with_execute_timeout(Duration::from_secs(1)),
        );

        let results = orchestrator
            .execute(
                &TurnContext::new(),
                vec![
                    call("call_0", "sleepy", "{}"),
                    call("call_1", "sleepy", "{}"),
                ],
            )
            .await
            .expect("batch");

        assert_eq!(results.len(), 2);
        for result in results {
            assert_matches!(result.error, Some(ToolError::Cancelled(_)));
        }
    }

    #[tokio::test]
    async fn empty_batch_returns_no_results() {
        let registry = ToolRegistry::new();
        let orchestrator = orchestrator_with(
            registry,
            ApprovalMode::ApproveAll,
            &[],
            EngineConfig::default(),
        );
        let results = orchestrator
            .execute(&TurnContext::new(), Vec::new())
            .await
            .expect("empty batch");
        assert!(results.is_empty());
    }
}
