//! Error types and handling
//!
//! This module provides the error taxonomy used throughout the Waypoint engine.
//! Graph construction fails with [`ValidationError`], planning with
//! [`PlanningError`], tool dispatch with [`ToolError`](crate::types::ToolError).
//! [`EngineError`] wraps all of them plus the ambient failures (config,
//! database, I/O). Every engine error implements [`ErrorExt`], which provides a
//! display-safe hint and says whether a retry could help.
//!
//! # Examples
//!
//! ```
//! use sdk::errors::{EngineError, ErrorExt, ValidationError};
//!
//! let error = EngineError::from(ValidationError::Cycle {
//!     path: vec!["a".into(), "b".into(), "a".into()],
//! });
//! println!("Hint: {}", error.user_hint());
//! assert!(!error.is_recoverable());
//!
//! let error = EngineError::Database("disk I/O error".into());
//! assert!(error.is_recoverable());
//! ```

use crate::types::ToolError;
use thiserror::Error;

/// Hint and recoverability information for errors
pub trait ErrorExt {
    /// Returns a user-friendly hint for the error
    ///
    /// The hint never contains paths, parameters or tool output.
    fn user_hint(&self) -> &str;

    /// Returns whether the error is recoverable
    ///
    /// Recoverable errors can be retried or worked around. Non-recoverable
    /// errors need the input (goal, graph, config) to change first.
    fn is_recoverable(&self) -> bool;
}

/// Task graph construction errors
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    /// A depth-first traversal revisited a node on its recursion stack
    #[error("Dependency cycle detected: {}", path.join(" -> "))]
    Cycle { path: Vec<String> },

    #[error("Task '{task}' depends on unknown task '{missing}'")]
    DanglingDependency { task: String, missing: String },

    #[error("Duplicate task id: {0}")]
    DuplicateTask(String),

    #[error("Task '{0}' depends on itself")]
    SelfDependency(String),

    #[error("Task graph is empty")]
    EmptyGraph,
}

/// Planning errors
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PlanningError {
    /// Kahn's algorithm stopped with tasks left over
    #[error("Unschedulable graph: {} task(s) could not be ordered ({})", remaining.len(), remaining.join(", "))]
    UnschedulableGraph { remaining: Vec<String> },
}

/// Main engine error type
#[derive(Debug, Error)]
pub enum EngineError {
    // Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    // Persistence errors
    #[error("Database error: {0}")]
    Database(String),

    // Pipeline errors
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error(transparent)]
    Planning(#[from] PlanningError),

    #[error(transparent)]
    Tool(#[from] ToolError),

    #[error("Goal decomposition failed: {0}")]
    Decomposition(String),

    #[error("Escalation for task '{task_id}' unresolved after {defers} defer(s)")]
    EscalationTimeout { task_id: String, defers: u32 },

    #[error("Goal not found: {0}")]
    GoalNotFound(String),

    #[error("Task not found: {0}")]
    TaskNotFound(String),

    #[error("Invalid transition for task '{task}': {from} -> {to}")]
    InvalidTransition {
        task: String,
        from: String,
        to: String,
    },

    // File system security errors
    #[error("Path denied: {0:?}")]
    PathDenied(std::path::PathBuf),

    #[error("Path outside workspace: {0:?}")]
    PathOutsideWorkspace(std::path::PathBuf),

    #[error("Path canonicalization failed for {0:?}: {1}")]
    PathCanonicalization(std::path::PathBuf, String),

    // Operation errors
    #[error("Unknown operation: {0}")]
    UnknownOperation(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    // Generic IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<serde_json::Error> for EngineError {
    fn from(err: serde_json::Error) -> Self {
        EngineError::Serialization(err.to_string())
    }
}

impl ErrorExt for ValidationError {
    fn user_hint(&self) -> &str {
        match self {
            Self::Cycle { .. } => "Tasks depend on each other in a loop. Remove one of the edges",
            Self::DanglingDependency { .. } => "A dependency names a task that does not exist",
            Self::DuplicateTask(_) => "Two tasks share the same id",
            Self::SelfDependency(_) => "A task cannot depend on itself",
            Self::EmptyGraph => "The goal produced no tasks",
        }
    }

    fn is_recoverable(&self) -> bool {
        false
    }
}

impl ErrorExt for EngineError {
    fn user_hint(&self) -> &str {
        match self {
            Self::Config(_) => "Check your config.toml file for errors",
            Self::Database(_) => "Database operation failed. Try again",

            Self::Validation(inner) => inner.user_hint(),
            Self::Planning(_) => "The task graph could not be scheduled",
            Self::Tool(ToolError::NotFound(_)) => "The requested tool is not available",
            Self::Tool(ToolError::InvalidParameters(_)) => "The tool rejected its parameters",
            Self::Tool(ToolError::Timeout(_)) => "The tool took too long to respond. Try again",
            Self::Tool(ToolError::ExecutionFailure(_)) => "Tool operation failed",
            Self::Tool(ToolError::PermissionDenied(_)) => "This operation needs approval",
            Self::Decomposition(_) => "The goal could not be broken into tasks",
            Self::EscalationTimeout { .. } => "No decision was made in time. Retry the goal",
            Self::GoalNotFound(_) => "No session exists for that goal id",
            Self::TaskNotFound(_) => "No task exists with that id",
            Self::InvalidTransition { .. } => "Task state changed unexpectedly",

            Self::PathDenied(_) => "Access to this path is not allowed",
            Self::PathOutsideWorkspace(_) => "Operation must be within workspace",
            Self::PathCanonicalization(_, _) => "Invalid path specified",

            Self::UnknownOperation(_) => "Unknown operation requested",
            Self::Serialization(_) => "Stored data could not be read",
            Self::Io(_) => "File system operation failed",
        }
    }

    fn is_recoverable(&self) -> bool {
        match self {
            // Non-recoverable errors
            Self::Validation(_)
            | Self::Planning(_)
            | Self::Decomposition(_)
            | Self::Config(_)
            | Self::InvalidTransition { .. }
            | Self::PathDenied(_)
            | Self::PathOutsideWorkspace(_) => false,

            Self::Tool(err) => err.is_retryable(),

            // All other errors are potentially recoverable
            _ => true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cycle_display_joins_path() {
        let err = ValidationError::Cycle {
            path: vec!["a".into(), "b".into(), "a".into()],
        };
        assert_eq!(err.to_string(), "Dependency cycle detected: a -> b -> a");
    }

    #[test]
    fn test_validation_converts_to_engine_error() {
        let err: EngineError = ValidationError::SelfDependency("t1".into()).into();
        assert!(matches!(err, EngineError::Validation(_)));
        assert_eq!(err.to_string(), "Task 't1' depends on itself");
        assert!(!err.is_recoverable());
    }

    #[test]
    fn test_tool_error_recoverability_follows_retry_policy() {
        assert!(EngineError::from(ToolError::Timeout(5)).is_recoverable());
        assert!(!EngineError::from(ToolError::NotFound("x".into())).is_recoverable());
    }

    #[test]
    fn test_unschedulable_display() {
        let err = PlanningError::UnschedulableGraph {
            remaining: vec!["x".into(), "y".into()],
        };
        assert_eq!(
            err.to_string(),
            "Unschedulable graph: 2 task(s) could not be ordered (x, y)"
        );
    }

    #[test]
    fn test_hints_do_not_leak_paths() {
        let err = EngineError::PathDenied(std::path::PathBuf::from("/home/user/.ssh/id_rsa"));
        assert!(!err.user_hint().contains(".ssh"));
    }

    #[test]
    fn test_serde_json_error_converts() {
        let parse: Result<serde_json::Value, _> = serde_json::from_str("{");
        let err: EngineError = parse.unwrap_err().into();
        assert!(matches!(err, EngineError::Serialization(_)));
    }
}
