//! Filesystem tools: read, write, edit, list.

use std::sync::Arc;

use agent_core::registry::{Tool, ToolDefinition};
use agent_core::ToolError;
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};

use crate::workspace::WorkspaceRoot;

const DEFAULT_READ_MAX_BYTES: usize = 200 * 1024;

fn bind_arguments<T: for<'de> Deserialize<'de>>(arguments: Value) -> Result<T, ToolError> {
    serde_json::from_value(arguments).map_err(|error| ToolError::Parse(error.to_string()))
}

// ── read_file ──────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct ReadFileArgs {
    path: String,
}

pub struct ReadFileTool {
    workspace: Arc<WorkspaceRoot>,
    max_bytes: usize,
}

impl ReadFileTool {
    pub fn new(workspace: Arc<WorkspaceRoot>) -> Self {
        Self {
            workspace,
            max_bytes: DEFAULT_READ_MAX_BYTES,
        }
    }
}

#[async_trait]
impl Tool for ReadFileTool {
    fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: "read_file".to_string(),
            description: Some("Read a UTF-8 text file inside the workspace".to_string()),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "path": { "type": "string" }
                },
                "required": ["path"]
            }),
        }
    }

    async fn execute(&self, arguments: Value) -> Result<Value, ToolError> {
        let args: ReadFileArgs = bind_arguments(arguments)?;
        let resolved = self.workspace.resolve_existing(&args.path)?;

        let bytes = tokio::fs::read(&resolved).await.map_err(|error| {
            ToolError::Execution(format!("failed to read file {}: {error}", resolved.display()))
        })?;

        if bytes.len() > self.max_bytes {
            return Err(ToolError::Execution(format!(
                "file exceeds max read size ({} bytes > {} bytes)",
                bytes.len(),
                self.max_bytes
            )));
        }

        let content = String::from_utf8(bytes)
            .map_err(|_| ToolError::Execution("file is not valid UTF-8 text".to_string()))?;
        Ok(Value::String(content))
    }
}

// ── write_file ─────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct WriteFileArgs {
    path: String,
    content: String,
}

pub struct WriteFileTool {
    workspace: Arc<WorkspaceRoot>,
}

impl WriteFileTool {
    pub fn new(workspace: Arc<WorkspaceRoot>) -> Self {
        Self { workspace }
    }
}

#[async_trait]
impl Tool for WriteFileTool {
    fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: "write_file".to_string(),
            description: Some("Create or overwrite a file inside the workspace".to_string()),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "path": { "type": "string" },
                    "content": { "type": "string" }
                },
                "required": ["path", "content"]
            }),
        }
    }

    async fn execute(&self, arguments: Value) -> Result<Value, ToolError> {
        let args: WriteFileArgs = bind_arguments(arguments)?;
        let resolved = self.workspace.resolve_write(&args.path)?;

        if let Some(parent) = resolved.parent() {
            tokio::fs::create_dir_all(parent).await.map_err(|error| {
                ToolError::Execution(format!(
                    "failed to create parent directories {}: {error}",
                    parent.display()
                ))
            })?;
        }

        let byte_count = args.content.len();
        tokio::fs::write(&resolved, args.content).await.map_err(|error| {
            ToolError::Execution(format!("failed to write file {}: {error}", resolved.display()))
        })?;

        Ok(Value::String(format!(
            "Wrote {} ({byte_count} bytes)",
            self.workspace.relative_display(&resolved)
        )))
    }
}

// ── edit_file ──────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct EditFileArgs {
    path: String,
    old_text: String,
    new_text: String,
}

pub struct EditFileTool {
    workspace: Arc<WorkspaceRoot>,
}

impl EditFileTool {
    pub fn new(workspace: Arc<WorkspaceRoot>) -> Self {
        Self { workspace }
    }
}

#[async_trait]
impl Tool for EditFileTool {
    fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: "edit_file".to_string(),
            description: Some(
                "Replace one exact occurrence of old_text with new_text".to_string(),
            ),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "path": { "type": "string" },
                    "old_text": { "type": "string" },
                    "new_text": { "type": "string" }
                },
                "required": ["path", "old_text", "new_text"]
            }),
        }
    }

    async fn execute(&self, arguments: Value) -> Result<Value, ToolError> {
        let args: EditFileArgs = bind_arguments(arguments)?;
        if args.old_text.is_empty() {
            return Err(ToolError::Parse("old_text must not be empty".to_string()));
        }

        let resolved = self.workspace.resolve_existing(&args.path)?;
        let current = tokio::fs::read_to_string(&resolved).await.map_err(|error| {
            ToolError::Execution(format!("failed to read file {}: {error}", resolved.display()))
        })?;

        let occurrences = current.match_indices(&args.old_text).count();
        if occurrences != 1 {
            return Err(ToolError::Execution(format!(
                "edit_file requires exactly one match; found {occurrences}"
            )));
        }

        let updated = current.replacen(&args.old_text, &args.new_text, 1);
        tokio::fs::write(&resolved, updated).await.map_err(|error| {
            ToolError::Execution(format!("failed to write file {}: {error}", resolved.display()))
        })?;

        Ok(Value::String(format!(
            "Updated {}",
            self.workspace.relative_display(&resolved)
        )))
    }
}

// ── list_directory ─────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct ListDirectoryArgs {
    directory: String,
}

pub struct ListDirectoryTool {
    workspace: Arc<WorkspaceRoot>,
}

impl ListDirectoryTool {
    pub fn new(workspace: Arc<WorkspaceRoot>) -> Self {
        Self { workspace }
    }
}

#[async_trait]
impl Tool for ListDirectoryTool {
    fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: "list_directory".to_string(),
            description: Some("List entries of a workspace directory".to_string()),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "directory": { "type": "string" }
                },
                "required": ["directory"]
            }),
        }
    }

    async fn execute(&self, arguments: Value) -> Result<Value, ToolError> {
        let args: ListDirectoryArgs = bind_arguments(arguments)?;
        let resolved = self.workspace.resolve_existing(&args.directory)?;

        let mut reader = tokio::fs::read_dir(&resolved).await.map_err(|error| {
            ToolError::Execution(format!(
                "failed to list directory {}: {error}",
                resolved.display()
            ))
        })?;

        let mut entries = Vec::new();
        while let Some(entry) = reader.next_entry().await.map_err(|error| {
            ToolError::Execution(format!(
                "failed to read directory entry in {}: {error}",
                resolved.display()
            ))
        })? {
            let mut name = entry.file_name().to_string_lossy().into_owned();
            if entry.path().is_dir() {
                name.push('/');
            }
            entries.push(name);
        }

        entries.sort();
        Ok(Value::Array(entries.into_iter().map(Value::String).collect()))
    }
}
