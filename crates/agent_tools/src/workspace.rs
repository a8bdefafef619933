//! Workspace-root path confinement.
//!
//! Every builtin tool resolves its paths through a [`WorkspaceRoot`], which
//! canonicalizes candidates and rejects anything that escapes the root. The
//! same type implements the engine's `SecurityValidator` seam, so the
//! orchestrator applies the identical policy before a tool ever runs.

use std::path::{Path, PathBuf};

use agent_core::registry::SecurityValidator;
use agent_core::ToolError;

#[derive(Debug, Clone)]
pub struct WorkspaceRoot {
    root: PathBuf,
}

impl WorkspaceRoot {
    pub fn new(root: impl Into<PathBuf>) -> Result<Self, ToolError> {
        let root = root.into();
        let canonical = root.canonicalize().map_err(|error| {
            ToolError::Validation(format!("failed to resolve workspace root: {error}"))
        })?;
        if !canonical.is_dir() {
            return Err(ToolError::Validation(
                "workspace root must be a directory".to_string(),
            ));
        }
        Ok(Self { root: canonical })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Resolve a path that must already exist inside the workspace.
    pub fn resolve_existing(&self, path: &str) -> Result<PathBuf, ToolError> {
        if path.trim().is_empty() {
            return Err(ToolError::Validation("path must not be empty".to_string()));
        }

        let candidate = self.absolute_candidate(path);
        let canonical = candidate.canonicalize().map_err(|error| {
            ToolError::Execution(format!("failed to resolve path {}: {error}", candidate.display()))
        })?;

        self.ensure_inside(&canonical)?;
        Ok(canonical)
    }

    /// Resolve a path that may not exist yet; its nearest existing ancestor
    /// must be inside the workspace.
    pub fn resolve_write(&self, path: &str) -> Result<PathBuf, ToolError> {
        if path.trim().is_empty() {
            return Err(ToolError::Validation("path must not be empty".to_string()));
        }

        let candidate = self.absolute_candidate(path);
        let parent = candidate.parent().ok_or_else(|| {
            ToolError::Validation(format!(
                "path {} has no parent directory and cannot be written safely",
                candidate.display()
            ))
        })?;

        let anchor = canonicalize_existing_ancestor(parent)?;
        self.ensure_inside(&anchor)?;
        Ok(candidate)
    }

    pub fn relative_display(&self, path: &Path) -> String {
        path.strip_prefix(&self.root)
            .map(|relative| relative.display().to_string())
            .unwrap_or_else(|_| path.display().to_string())
    }

    fn absolute_candidate(&self, path: &str) -> PathBuf {
        let path = Path::new(path);
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.root.join(path)
        }
    }

    fn ensure_inside(&self, canonical: &Path) -> Result<(), ToolError> {
        if canonical.starts_with(&self.root) {
            Ok(())
        } else {
            Err(ToolError::Validation(format!(
                "path escapes workspace root: {}",
                canonical.display()
            )))
        }
    }
}

impl SecurityValidator for WorkspaceRoot {
    fn validate_path(&self, path: &str) -> Result<(), ToolError> {
        if path.trim().is_empty() {
            return Err(ToolError::Validation("path must not be empty".to_string()));
        }

        let candidate = self.absolute_candidate(path);
        let anchor = canonicalize_existing_ancestor(&candidate)?;
        self.ensure_inside(&anchor)
    }
}

fn canonicalize_existing_ancestor(path: &Path) -> Result<PathBuf, ToolError> {
    for ancestor in path.ancestors() {
        if ancestor.exists() {
            return ancestor.canonicalize().map_err(|error| {
                ToolError::Validation(format!(
                    "failed to resolve path {}: {error}",
                    ancestor.display()
                ))
            });
        }
    }

    Err(ToolError::Validation(format!(
        "no existing ancestor found for path {}",
        path.display()
    )))
}
