//! Shell command execution with timeout and output bounds.

use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use agent_core::registry::{Tool, ToolDefinition};
use agent_core::ToolError;
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::debug;

use crate::workspace::WorkspaceRoot;

const DEFAULT_BASH_TIMEOUT_SEC: u64 = 30;
const DEFAULT_BASH_MAX_OUTPUT_BYTES: usize = 100 * 1024;

#[derive(Debug, Deserialize)]
struct BashArgs {
    command: String,
    #[serde(default)]
    timeout_sec: Option<u64>,
    #[serde(default)]
    cwd: Option<String>,
}

pub struct BashTool {
    workspace: Arc<WorkspaceRoot>,
    default_timeout_sec: u64,
    max_output_bytes: usize,
}

impl BashTool {
    pub fn new(workspace: Arc<WorkspaceRoot>) -> Self {
        Self {
            workspace,
            default_timeout_sec: DEFAULT_BASH_TIMEOUT_SEC,
            max_output_bytes: DEFAULT_BASH_MAX_OUTPUT_BYTES,
        }
    }
}

#[async_trait]
impl Tool for BashTool {
    fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: "bash".to_string(),
            description: Some(
                "Run a bash command in the workspace; reports status, stdout, and stderr"
                    .to_string(),
            ),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "command": { "type": "string" },
                    "timeout_sec": { "type": "integer" },
                    "cwd": { "type": "string" }
                },
                "required": ["command"]
            }),
        }
    }

    async fn execute(&self, arguments: Value) -> Result<Value, ToolError> {
        let args: BashArgs = serde_json::from_value(arguments)
            .map_err(|error| ToolError::Parse(error.to_string()))?;
        if args.command.trim().is_empty() {
            return Err(ToolError::Parse("command must not be empty".to_string()));
        }

        let cwd = match args.cwd.as_deref() {
            Some(cwd) => {
                let resolved = self.workspace.resolve_existing(cwd)?;
                if !resolved.is_dir() {
                    return Err(ToolError::Execution(
                        "invalid bash cwd: expected a directory".to_string(),
                    ));
                }
                resolved
            }
            None => self.workspace.root().to_path_buf(),
        };

        let timeout = Duration::from_secs(args.timeout_sec.unwrap_or(self.default_timeout_sec));
        debug!(command = %args.command, cwd = %cwd.display(), "running bash command");

        let child = tokio::process::Command::new("bash")
            .arg("-lc")
            .arg(&args.command)
            .current_dir(&cwd)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .output();

        let output = match tokio::time::timeout(timeout, child).await {
            Ok(Ok(output)) => output,
            Ok(Err(error)) => {
                return Err(ToolError::Execution(format!(
                    "failed to launch bash command: {error}"
                )));
            }
            Err(_) => {
                return Err(ToolError::Execution(format!(
                    "command timed out after {}s",
                    timeout.as_secs()
                )));
            }
        };

        let status_label = match output.status.code() {
            Some(code) => format!("exit_code={code}"),
            None => "exit_code=terminated_by_signal".to_string(),
        };

        let report = format!(
            "status: {status_label}\nstdout:\n{}\nstderr:\n{}",
            String::from_utf8_lossy(&output.stdout),
            String::from_utf8_lossy(&output.stderr)
        );
        Ok(Value::String(truncate_to_byte_limit(
            report,
            self.max_output_bytes,
        )))
    }
}

fn truncate_to_byte_limit(content: String, max_bytes: usize) -> String {
    if content.len() <= max_bytes {
        return content;
    }

    let mut cutoff = max_bytes.min(content.len());
    while cutoff > 0 && !content.is_char_boundary(cutoff) {
        cutoff -= 1;
    }

    let mut truncated = content[..cutoff].to_string();
    truncated.push_str("\n[truncated]");
    truncated
}
