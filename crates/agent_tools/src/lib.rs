//! Builtin workspace tools for the coding agent.
//!
//! Every tool resolves paths through a shared [`WorkspaceRoot`] that
//! confines reads and writes to the workspace. The same root implements the
//! engine's `SecurityValidator`, so policy checks and tool behavior cannot
//! drift apart.

pub mod bash;
pub mod fs_tools;
pub mod search;
pub mod workspace;

use std::sync::Arc;

use agent_core::registry::{RegistryError, ToolRegistry};

pub use bash::BashTool;
pub use fs_tools::{EditFileTool, ListDirectoryTool, ReadFileTool, WriteFileTool};
pub use search::SearchFilesTool;
pub use workspace::WorkspaceRoot;

/// Register the full builtin tool set against one workspace root.
pub fn register_builtin_tools(
    registry: &mut ToolRegistry,
    workspace: Arc<WorkspaceRoot>,
) -> Result<(), RegistryError> {
    registry.register(ReadFileTool::new(Arc::clone(&workspace)))?;
    registry.register(WriteFileTool::new(Arc::clone(&workspace)))?;
    registry.register(EditFileTool::new(Arc::clone(&workspace)))?;
    registry.register(ListDirectoryTool::new(Arc::clone(&workspace)))?;
    registry.register(SearchFilesTool::new(Arc::clone(&workspace)))?;
    registry.register(BashTool::new(workspace))?;
    Ok(())
}
