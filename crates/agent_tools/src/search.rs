//! Literal text search across workspace files.

use std::sync::Arc;

use agent_core::registry::{Tool, ToolDefinition};
use agent_core::ToolError;
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::debug;
use walkdir::WalkDir;

use crate::workspace::WorkspaceRoot;

const DEFAULT_MAX_RESULTS: usize = 100;
const MAX_LINE_PREVIEW_CHARS: usize = 200;

#[derive(Debug, Deserialize)]
struct SearchFilesArgs {
    query: String,
    #[serde(default)]
    directory: Option<String>,
}

pub struct SearchFilesTool {
    workspace: Arc<WorkspaceRoot>,
    max_results: usize,
}

impl SearchFilesTool {
    pub fn new(workspace: Arc<WorkspaceRoot>) -> Self {
        Self {
            workspace,
            max_results: DEFAULT_MAX_RESULTS,
        }
    }
}

#[async_trait]
impl Tool for SearchFilesTool {
    fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: "search_files".to_string(),
            description: Some(
                "Search workspace files for a literal string, returning path:line matches"
                    .to_string(),
            ),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "query": { "type": "string" },
                    "directory": { "type": "string" }
                },
                "required": ["query"]
            }),
        }
    }

    async fn execute(&self, arguments: Value) -> Result<Value, ToolError> {
        let args: SearchFilesArgs = serde_json::from_value(arguments)
            .map_err(|error| ToolError::Parse(error.to_string()))?;
        if args.query.is_empty() {
            return Err(ToolError::Parse("query must not be empty".to_string()));
        }

        let start = match args.directory.as_deref() {
            Some(directory) => self.workspace.resolve_existing(directory)?,
            None => self.workspace.root().to_path_buf(),
        };

        let workspace = Arc::clone(&self.workspace);
        let query = args.query.clone();
        let max_results = self.max_results;

        // The directory walk is synchronous; keep it off the runtime threads.
        let matches = tokio::task::spawn_blocking(move || {
            search_tree(&workspace, &start, &query, max_results)
        })
        .await
        .map_err(|error| ToolError::Execution(format!("search worker failed: {error}")))?;

        debug!(query = %args.query, matches = matches.len(), "search completed");
        Ok(Value::Array(matches))
    }
}

fn search_tree(
    workspace: &WorkspaceRoot,
    start: &std::path::Path,
    query: &str,
    max_results: usize,
) -> Vec<Value> {
    let mut matches = Vec::new();

    let walker = WalkDir::new(start).into_iter().filter_entry(|entry| {
        let name = entry.file_name().to_string_lossy();
        !(entry.depth() > 0 && name.starts_with('.')) && name != "target"
    });

    for entry in walker {
        let Ok(entry) = entry else {
            continue;
        };
        if !entry.file_type().is_file() {
            continue;
        }
        // Binary and non-UTF-8 files are skipped silently.
        let Ok(content) = std::fs::read_to_string(entry.path()) else {
            continue;
        };

        for (number, line) in content.lines().enumerate() {
            if !line.contains(query) {
                continue;
            }
            let mut preview = line.trim_end().to_string();
            if preview.chars().count() > MAX_LINE_PREVIEW_CHARS {
                preview = preview.chars().take(MAX_LINE_PREVIEW_CHARS).collect();
            }
            matches.push(json!({
                "path": workspace.relative_display(entry.path()),
                "line": number + 1,
                "text": preview,
            }));
            if matches.len() >= max_results {
                return matches;
            }
        }
    }

    matches
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use agent_core::registry::Tool;
    use serde_json::json;

    use super::SearchFilesTool;
    use crate::workspace::WorkspaceRoot;

    fn workspace() -> (tempfile::TempDir, Arc<WorkspaceRoot>) {
        let dir = tempfile::tempdir().expect("tempdir");
        let workspace = Arc::new(WorkspaceRoot::new(dir.path()).expect("workspace"));
        (dir, workspace)
    }

    #[tokio::test]
    async fn matches_report_path_line_and_text() {
        let (dir, workspace) = workspace();
        std::fs::write(dir.path().join("lib.rs"), "fn alpha() {}\nfn beta() {}\n")
            .expect("fixture");

        let result = SearchFilesTool::new(workspace)
            .execute(json!({"query": "beta"}))
            .await
            .expect("search");

        assert_eq!(result, json!([{"path": "lib.rs", "line": 2, "text": "fn beta() {}"}]));
    }

    #[tokio::test]
    async fn no_matches_yields_an_empty_array() {
        let (_dir, workspace) = workspace();
        let result = SearchFilesTool::new(workspace)
            .execute(json!({"query": "nothing-here"}))
            .await
            .expect("search");
        assert_eq!(result, json!([]));
    }

    #[tokio::test]
    async fn hidden_directories_are_skipped() {
        let (dir, workspace) = workspace();
        std::fs::create_dir(dir.path().join(".git")).expect("mkdir");
        std::fs::write(dir.path().join(".git/config"), "needle").expect("fixture");
        std::fs::write(dir.path().join("visible.txt"), "needle").expect("fixture");

        let result = SearchFilesTool::new(workspace)
            .execute(json!({"query": "needle"}))
            .await
            .expect("search");
        let matches = result.as_array().expect("array");
        assert_eq!(matches.len(), 1);
        assert_eq!(matches[0]["path"], "visible.txt");
    }
}
