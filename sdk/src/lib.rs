//! Waypoint SDK
//!
//! Shared contract crate for the Waypoint engine and its tool collaborators:
//! the error taxonomy, the tool request/response envelope and the `Tool` trait.

/// Error types and handling
pub mod errors;

/// Tool request/response types
pub mod types;

/// Tool handler trait
pub mod tool;

// Re-export commonly used types
pub use errors::{EngineError, ErrorExt, PlanningError, ValidationError};
pub use tool::Tool;
pub use types::{ErrorKind, SideEffect, ToolError, ToolRequest, ToolResult};
