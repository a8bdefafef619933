//! Tool registry and the seams the orchestrator executes through.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::error::ToolError;

/// Schema advertised to the model for one tool.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDefinition {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub input_schema: Value,
}

/// One executable capability. Implementations parse their own arguments and
/// report failures as [`ToolError`] values; an `Execution` error is the only
/// kind the orchestrator will retry.
#[async_trait]
pub trait Tool: Send + Sync {
    fn definition(&self) -> ToolDefinition;

    async fn execute(&self, arguments: Value) -> Result<Value, ToolError>;
}

/// Path policy consulted before any tool runs. Implementations reject paths
/// that escape the permitted root.
pub trait SecurityValidator: Send + Sync {
    fn validate_path(&self, path: &str) -> Result<(), ToolError>;
}

/// A validator that accepts every path. Useful for tests and trusted setups.
#[derive(Debug, Clone, Copy, Default)]
pub struct AllowAllValidator;

impl SecurityValidator for AllowAllValidator {
    fn validate_path(&self, _path: &str) -> Result<(), ToolError> {
        Ok(())
    }
}

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("tool with name '{0}' is already registered")]
    DuplicateName(String),
}

/// Name-keyed tool lookup. Thread-safe via `Arc` wrapping of each tool.
#[derive(Default)]
pub struct ToolRegistry {
    tools: HashMap<String, Arc<dyn Tool>>,
}

impl ToolRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a tool; rejects duplicate names.
    pub fn register(&mut self, tool: impl Tool + 'static) -> Result<(), RegistryError> {
        let name = tool.definition().name;
        if self.tools.contains_key(&name) {
            return Err(RegistryError::DuplicateName(name));
        }
        self.tools.insert(name, Arc::new(tool));
        Ok(())
    }

    #[must_use]
    pub fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools.get(name).cloned()
    }

    /// All registered definitions, for advertising to the model.
    #[must_use]
    pub fn definitions(&self) -> Vec<ToolDefinition> {
        let mut definitions: Vec<ToolDefinition> =
            self.tools.values().map(|tool| tool.definition()).collect();
        definitions.sort_by(|a, b| a.name.cmp(&b.name));
        definitions
    }

    /// Execute by name. An unknown name is an execution failure on the call,
    /// not a panic or a batch-level error.
    pub async fn execute(&self, name: &str, arguments: Value) -> Result<Value, ToolError> {
        let Some(tool) = self.get(name) else {
            return Err(ToolError::Execution(format!("unknown tool '{name}'")));
        };
        tool.execute(arguments).await
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.tools.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }
}
