//! Approval policy for tool execution.
//!
//! The gate decides, per tool invocation, whether execution may proceed. It
//! combines static rules (session-scoped, path-scoped, global) with optional
//! human confirmation, and keeps an append-only audit trail of every
//! decision. Rule state lives in an explicit [`ApprovalState`] owned by the
//! gate; there are no process-wide singletons.

use std::collections::{HashMap, VecDeque};
use std::sync::{Mutex, RwLock};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use time::OffsetDateTime;
use tracing::debug;

use crate::error::ApprovalError;

/// Tools that only read workspace state and never mutate it. These skip the
/// gate in `ApproveWrite` mode and on the [`ApprovalGate::is_auto_approved`]
/// fast path.
pub const SAFE_READ_TOOLS: &[&str] = &["read_file", "list_directory", "search_files"];

/// Parameter keys whose values are treated as filesystem paths.
pub const PATH_PARAMETER_KEYS: &[&str] = &["path", "file_path", "directory"];

/// How the gate resolves a decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApprovalMode {
    /// Every call is approved without consultation.
    ApproveAll,
    /// Every call is rejected without consultation.
    ApproveNone,
    /// Read-only tools pass, everything else goes interactive.
    ApproveWrite,
    /// Full rule evaluation with a human prompt as the last resort.
    Interactive,
}

/// One persisted approval rule. Precedence when several match: session, then
/// path, then global; first match wins.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "scope", rename_all = "snake_case")]
pub enum ApprovalRule {
    Global {
        tool: String,
        approved: bool,
    },
    Path {
        pattern: String,
        approved: bool,
    },
    Session {
        session_id: String,
        tool: String,
        approved: bool,
    },
}

/// Immutable audit entry; one per decision regardless of how it was reached.
#[derive(Debug, Clone)]
pub struct ApprovalRecord {
    pub timestamp: OffsetDateTime,
    pub tool: String,
    pub parameters: Value,
    pub approved: bool,
    pub reason: String,
    pub mode: ApprovalMode,
}

/// Rule storage injected into the gate at construction.
#[derive(Debug, Default)]
pub struct ApprovalState {
    global: HashMap<String, bool>,
    /// Ordered prefix patterns; earlier installs win.
    path: Vec<(String, bool)>,
    session: HashMap<(String, String), bool>,
}

impl ApprovalState {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed the state with persisted rules, e.g. from workspace config.
    pub fn install(&mut self, rule: ApprovalRule) {
        match rule {
            ApprovalRule::Global { tool, approved } => {
                self.global.insert(tool, approved);
            }
            ApprovalRule::Path { pattern, approved } => {
                self.path.push((pattern, approved));
            }
            ApprovalRule::Session {
                session_id,
                tool,
                approved,
            } => {
                self.session.insert((session_id, tool), approved);
            }
        }
    }

    fn session_rule(&self, session_id: &str, tool: &str) -> Option<bool> {
        self.session
            .get(&(session_id.to_string(), tool.to_string()))
            .copied()
    }

    fn path_rule(&self, parameters: &Value) -> Option<bool> {
        let object = parameters.as_object()?;
        for key in PATH_PARAMETER_KEYS {
            let Some(path) = object.get(*key).and_then(Value::as_str) else {
                continue;
            };
            for (pattern, approved) in &self.path {
                if path.starts_with(pattern.as_str()) {
                    return Some(*approved);
                }
            }
        }
        None
    }

    fn global_rule(&self, tool: &str) -> Option<bool> {
        self.global.get(tool).copied()
    }
}

/// A human (or scripted stand-in) that can answer one approval request.
///
/// The returned line is interpreted by the gate; unrecognized input causes a
/// re-prompt. Implementations may block indefinitely — the orchestrator
/// guarantees no execution slot is held during this wait.
#[async_trait]
pub trait ApprovalPrompt: Send + Sync {
    async fn request_approval(&self, rendered: &str) -> Result<String, ApprovalError>;
}

/// What one prompt reply means.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PromptReply {
    ApproveOnce,
    RejectOnce,
    AlwaysTool,
    NeverTool,
    SessionTool,
}

fn parse_reply(line: &str) -> Option<PromptReply> {
    match line.trim().to_ascii_lowercase().as_str() {
        "y" | "yes" => Some(PromptReply::ApproveOnce),
        "n" | "no" => Some(PromptReply::RejectOnce),
        "a" | "always" => Some(PromptReply::AlwaysTool),
        "never" => Some(PromptReply::NeverTool),
        "session" => Some(PromptReply::SessionTool),
        _ => None,
    }
}

/// The approval gate. One instance per engine; construction takes the rule
/// state and the interactive prompt explicitly.
pub struct ApprovalGate {
    mode: ApprovalMode,
    state: RwLock<ApprovalState>,
    records: Mutex<VecDeque<ApprovalRecord>>,
    record_cap: usize,
    prompt: Box<dyn ApprovalPrompt>,
}

impl ApprovalGate {
    #[must_use]
    pub fn new(
        mode: ApprovalMode,
        state: ApprovalState,
        prompt: Box<dyn ApprovalPrompt>,
        record_cap: usize,
    ) -> Self {
        Self {
            mode,
            state: RwLock::new(state),
            records: Mutex::new(VecDeque::with_capacity(record_cap.min(64))),
            record_cap,
            prompt,
        }
    }

    #[must_use]
    pub fn mode(&self) -> ApprovalMode {
        self.mode
    }

    /// Decide whether `tool` may run with `parameters`.
    ///
    /// Interactive resolution order: session rule, path rule, global rule,
    /// then a human prompt. Every decision appends one audit record.
    pub async fn decide(
        &self,
        session_id: Option<&str>,
        tool: &str,
        parameters: &Value,
    ) -> Result<bool, ApprovalError> {
        match self.mode {
            ApprovalMode::ApproveAll => {
                self.record(tool, parameters, true, "approve-all mode");
                Ok(true)
            }
            ApprovalMode::ApproveNone => {
                self.record(tool, parameters, false, "approve-none mode");
                Ok(false)
            }
            ApprovalMode::ApproveWrite => {
                if SAFE_READ_TOOLS.contains(&tool) {
                    self.record(tool, parameters, true, "read-only allow-list");
                    Ok(true)
                } else {
                    self.decide_interactive(session_id, tool, parameters).await
                }
            }
            ApprovalMode::Interactive => self.decide_interactive(session_id, tool, parameters).await,
        }
    }

    /// Fast path consulted before [`decide`](Self::decide): true only when
    /// the gate would approve without any session/path rule in play, so the
    /// orchestrator can skip the gate entirely for established allowances.
    #[must_use]
    pub fn is_auto_approved(&self, tool: &str) -> bool {
        match self.mode {
            ApprovalMode::ApproveAll => true,
            ApprovalMode::ApproveNone => false,
            // ApproveWrite consults the allow-list before any rule, exactly
            // as `decide` does.
            ApprovalMode::ApproveWrite if SAFE_READ_TOOLS.contains(&tool) => true,
            ApprovalMode::ApproveWrite | ApprovalMode::Interactive => {
                let state = self.state.read().unwrap_or_else(|poisoned| poisoned.into_inner());
                match state.global_rule(tool) {
                    Some(approved) => approved,
                    None => SAFE_READ_TOOLS.contains(&tool),
                }
            }
        }
    }

    /// Snapshot of the audit trail, oldest first.
    #[must_use]
    pub fn records(&self) -> Vec<ApprovalRecord> {
        let records = self
            .records
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        records.iter().cloned().collect()
    }

    async fn decide_interactive(
        &self,
        session_id: Option<&str>,
        tool: &str,
        parameters: &Value,
    ) -> Result<bool, ApprovalError> {
        // Rule check under the read lock; the lock is released before any
        // prompt I/O.
        let ruled = {
            let state = self.state.read().unwrap_or_else(|poisoned| poisoned.into_inner());
            session_id
                .and_then(|session| state.session_rule(session, tool).map(|approved| (approved, "session rule")))
                .or_else(|| state.path_rule(parameters).map(|approved| (approved, "path rule")))
                .or_else(|| state.global_rule(tool).map(|approved| (approved, "global rule")))
        };

        if let Some((approved, reason)) = ruled {
            self.record(tool, parameters, approved, reason);
            return Ok(approved);
        }

        // Pure reads skip the prompt; this keeps `decide` consistent with
        // the `is_auto_approved` fast path when no rule matched.
        if SAFE_READ_TOOLS.contains(&tool) {
            self.record(tool, parameters, true, "safe-operation allow-list");
            return Ok(true);
        }

        let rendered = render_request(tool, parameters);
        loop {
            let line = self.prompt.request_approval(&rendered).await?;
            let Some(reply) = parse_reply(&line) else {
                debug!(tool, input = %line.trim(), "unrecognized approval reply, re-prompting");
                continue;
            };

            let (approved, reason) = match reply {
                PromptReply::ApproveOnce => (true, "approved once"),
                PromptReply::RejectOnce => (false, "rejected once"),
                PromptReply::AlwaysTool => {
                    self.install(ApprovalRule::Global {
                        tool: tool.to_string(),
                        approved: true,
                    });
                    (true, "approved; global allow rule installed")
                }
                PromptReply::NeverTool => {
                    self.install(ApprovalRule::Global {
                        tool: tool.to_string(),
                        approved: false,
                    });
                    (false, "rejected; global deny rule installed")
                }
                PromptReply::SessionTool => {
                    if let Some(session) = session_id {
                        self.install(ApprovalRule::Session {
                            session_id: session.to_string(),
                            tool: tool.to_string(),
                            approved: true,
                        });
                    }
                    (true, "approved; session rule installed")
                }
            };

            self.record(tool, parameters, approved, reason);
            return Ok(approved);
        }
    }

    fn install(&self, rule: ApprovalRule) {
        let mut state = self
            .state
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        state.install(rule);
    }

    fn record(&self, tool: &str, parameters: &Value, approved: bool, reason: &str) {
        let mut records = self
            .records
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if records.len() == self.record_cap {
            records.pop_front();
        }
        records.push_back(ApprovalRecord {
            timestamp: OffsetDateTime::now_utc(),
            tool: tool.to_string(),
            parameters: parameters.clone(),
            approved,
            reason: reason.to_string(),
            mode: self.mode,
        });
    }
}

fn render_request(tool: &str, parameters: &Value) -> String {
    let arguments = serde_json::to_string(parameters).unwrap_or_else(|_| "{}".to_string());
    format!("Allow tool '{tool}' with arguments {arguments}? [y/n/a/never/session] ")
}
