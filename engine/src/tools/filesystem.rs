//! `file_operations` tool
//!
//! Reads and writes inside the workspace. Every path goes through
//! [`FileSystemGuard`] before any I/O; guard violations surface as
//! `PermissionDenied` so the orchestrator never retries them.

use async_trait::async_trait;
use sdk::errors::EngineError;
use sdk::{SideEffect, Tool, ToolError, ToolRequest, ToolResult};
use serde_json::json;
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::{debug, info, warn};

use crate::fs_guard::FileSystemGuard;

const OPERATIONS: &[&str] = &[
    "read_file",
    "write_file",
    "create_file",
    "list_directory",
    "create_directory",
    "delete_file",
];

#[derive(Debug)]
pub struct FilesystemTool {
    guard: FileSystemGuard,
}

impl FilesystemTool {
    pub fn new(workspace: impl AsRef<Path>) -> Result<Self, EngineError> {
        Ok(Self {
            guard: FileSystemGuard::new(workspace)?,
        })
    }

    pub fn workspace(&self) -> &Path {
        self.guard.workspace()
    }

    async fn read_file(&self, path: &str) -> Result<ToolResult, ToolError> {
        let path = self.resolve_existing(path)?;
        info!("Reading file: {}", path.display());

        let content = fs::read_to_string(&path).await.map_err(|e| {
            ToolError::ExecutionFailure(format!("Failed to read {}: {}", path.display(), e))
        })?;

        debug!("Read {} bytes from {}", content.len(), path.display());
        Ok(ToolResult::json(json!({
            "path": path.display().to_string(),
            "content": content,
        })))
    }

    /// Creates parent directories as needed
    async fn write_file(&self, path: &str, content: &str) -> Result<ToolResult, ToolError> {
        let path = self.resolve_new(path)?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await.map_err(|e| {
                ToolError::ExecutionFailure(format!(
                    "Failed to create directories {}: {}",
                    parent.display(),
                    e
                ))
            })?;
        }

        info!("Writing {} bytes to: {}", content.len(), path.display());
        fs::write(&path, content).await.map_err(|e| {
            ToolError::ExecutionFailure(format!("Failed to write {}: {}", path.display(), e))
        })?;

        let target = path.display().to_string();
        Ok(ToolResult::json(json!({ "path": target, "bytes": content.len() }))
            .with_side_effect(SideEffect::new("file_write", target)))
    }

    async fn list_directory(&self, path: &str) -> Result<ToolResult, ToolError> {
        let path = self.resolve_existing(path)?;
        info!("Listing directory: {}", path.display());

        let mut entries = fs::read_dir(&path).await.map_err(|e| {
            ToolError::ExecutionFailure(format!(
                "Failed to read directory {}: {}",
                path.display(),
                e
            ))
        })?;

        let mut listed = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| ToolError::ExecutionFailure(e.to_string()))?
        {
            let file_type = entry
                .file_type()
                .await
                .map_err(|e| ToolError::ExecutionFailure(e.to_string()))?;
            let kind = if file_type.is_dir() {
                "dir"
            } else if file_type.is_symlink() {
                "link"
            } else {
                "file"
            };
            let size = entry.metadata().await.map(|m| m.len()).unwrap_or(0);
            listed.push(json!({
                "name": entry.file_name().to_string_lossy(),
                "kind": kind,
                "size": size,
            }));
        }

        listed.sort_by(|a, b| a["name"].as_str().cmp(&b["name"].as_str()));
        Ok(ToolResult::json(json!({
            "path": path.display().to_string(),
            "entries": listed,
        })))
    }

    async fn create_directory(&self, path: &str) -> Result<ToolResult, ToolError> {
        let path = self.resolve_new(path)?;
        info!("Creating directory: {}", path.display());

        fs::create_dir_all(&path).await.map_err(|e| {
            ToolError::ExecutionFailure(format!("Failed to create {}: {}", path.display(), e))
        })?;

        let target = path.display().to_string();
        Ok(ToolResult::json(json!({ "path": target }))
            .with_side_effect(SideEffect::new("directory_create", target)))
    }

    async fn delete_file(&self, path: &str) -> Result<ToolResult, ToolError> {
        let path = self.resolve_existing(path)?;
        if path == self.guard.workspace() {
            return Err(ToolError::PermissionDenied(
                "refusing to delete the workspace root".to_string(),
            ));
        }
        warn!("Deleting: {}", path.display());

        let metadata = fs::metadata(&path)
            .await
            .map_err(|e| ToolError::ExecutionFailure(e.to_string()))?;
        let removed = if metadata.is_dir() {
            fs::remove_dir_all(&path).await
        } else {
            fs::remove_file(&path).await
        };
        removed.map_err(|e| {
            ToolError::ExecutionFailure(format!("Failed to delete {}: {}", path.display(), e))
        })?;

        let target = path.display().to_string();
        Ok(ToolResult::json(json!({ "path": target }))
            .with_side_effect(SideEffect::new("file_delete", target)))
    }

    fn resolve_existing(&self, path: &str) -> Result<PathBuf, ToolError> {
        self.guard
            .validate_path(Path::new(path))
            .map_err(|e| guard_error(path, e))
    }

    fn resolve_new(&self, path: &str) -> Result<PathBuf, ToolError> {
        self.guard
            .validate_new_path(Path::new(path))
            .map_err(|e| guard_error(path, e))
    }
}

fn guard_error(path: &str, error: EngineError) -> ToolError {
    warn!("Path validation failed for {}: {}", path, error);
    match error {
        EngineError::PathCanonicalization(p, reason) => {
            ToolError::ExecutionFailure(format!("{}: {}", p.display(), reason))
        }
        other => ToolError::PermissionDenied(other.to_string()),
    }
}

#[async_trait]
impl Tool for FilesystemTool {
    fn name(&self) -> &str {
        "file_operations"
    }

    fn operations(&self) -> &[&'static str] {
        OPERATIONS
    }

    fn is_destructive(&self, request: &ToolRequest) -> bool {
        request.destructive || request.operation() == Some("delete_file")
    }

    fn validate(&self, request: &ToolRequest) -> Result<(), ToolError> {
        let operation = request.param_str("operation")?;
        if !OPERATIONS.contains(&operation.as_str()) {
            return Err(ToolError::InvalidParameters(format!(
                "unknown file operation '{}'",
                operation
            )));
        }
        if operation != "list_directory" {
            request.param_str("path")?;
        }
        if matches!(operation.as_str(), "write_file" | "create_file") {
            request.param_str("content")?;
        }
        Ok(())
    }

    async fn invoke(&self, request: &ToolRequest) -> Result<ToolResult, ToolError> {
        let operation = request.param_str("operation")?;
        let path = request
            .param_str_opt("path")
            .unwrap_or_else(|| ".".to_string());

        match operation.as_str() {
            "read_file" => self.read_file(&path).await,
            "write_file" | "create_file" => {
                let content = request.param_str("content")?;
                self.write_file(&path, &content).await
            }
            "list_directory" => self.list_directory(&path).await,
            "create_directory" => self.create_directory(&path).await,
            "delete_file" => self.delete_file(&path).await,
            other => Err(ToolError::InvalidParameters(format!(
                "unknown file operation '{}'",
                other
            ))),
        }
    }
}
