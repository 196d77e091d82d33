//! Tool request/response envelope
//!
//! Every tool invocation travels as a `ToolRequest` and comes back either as a
//! `ToolResult` or a `ToolError`. The parameters are an opaque JSON object; only
//! the tool that receives them validates their shape.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;

/// A single tool invocation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolRequest {
    /// Registered tool name (e.g. `file_operations`)
    pub tool: String,

    /// Opaque key/value payload
    #[serde(default)]
    pub params: Map<String, Value>,

    /// Caller-side destructive flag, forwarded as-is
    #[serde(default)]
    pub destructive: bool,

    /// Set once a human approved the destructive action
    #[serde(default)]
    pub confirmed: bool,
}

impl ToolRequest {
    /// Create a new request with no parameters
    pub fn new(tool: impl Into<String>) -> Self {
        Self {
            tool: tool.into(),
            params: Map::new(),
            destructive: false,
            confirmed: false,
        }
    }

    /// Add a parameter
    pub fn with_param(mut self, key: impl Into<String>, value: Value) -> Self {
        self.params.insert(key.into(), value);
        self
    }

    /// Replace the whole parameter map
    pub fn with_params(mut self, params: Map<String, Value>) -> Self {
        self.params = params;
        self
    }

    /// Mark the request as destructive
    pub fn destructive(mut self, destructive: bool) -> Self {
        self.destructive = destructive;
        self
    }

    /// Mark the request as confirmed by a human
    pub fn confirmed(mut self, confirmed: bool) -> Self {
        self.confirmed = confirmed;
        self
    }

    /// The `operation` parameter, when present
    pub fn operation(&self) -> Option<&str> {
        self.params.get("operation").and_then(|v| v.as_str())
    }

    /// Get a string parameter
    pub fn param_str(&self, key: &str) -> Result<String, ToolError> {
        self.params
            .get(key)
            .and_then(|v| v.as_str())
            .map(String::from)
            .ok_or_else(|| ToolError::InvalidParameters(format!("missing string '{}'", key)))
    }

    /// Get an i64 parameter
    pub fn param_i64(&self, key: &str) -> Result<i64, ToolError> {
        self.params
            .get(key)
            .and_then(|v| v.as_i64())
            .ok_or_else(|| ToolError::InvalidParameters(format!("missing integer '{}'", key)))
    }

    /// Get an optional string parameter
    pub fn param_str_opt(&self, key: &str) -> Option<String> {
        self.params
            .get(key)
            .and_then(|v| v.as_str())
            .map(String::from)
    }

    /// Get an optional bool parameter
    pub fn param_bool_opt(&self, key: &str) -> Option<bool> {
        self.params.get(key).and_then(|v| v.as_bool())
    }

    /// Get an optional list of strings
    pub fn param_str_list(&self, key: &str) -> Result<Vec<String>, ToolError> {
        match self.params.get(key) {
            None => Ok(Vec::new()),
            Some(Value::Array(items)) => items
                .iter()
                .map(|item| {
                    item.as_str().map(String::from).ok_or_else(|| {
                        ToolError::InvalidParameters(format!("'{}' must hold strings", key))
                    })
                })
                .collect(),
            Some(Value::String(single)) => Ok(vec![single.clone()]),
            Some(_) => Err(ToolError::InvalidParameters(format!(
                "'{}' must be a list of strings",
                key
            ))),
        }
    }
}

/// Audit descriptor of what a tool changed
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SideEffect {
    /// Kind of change (e.g. `file_write`, `git_commit`, `http_post`)
    pub kind: String,

    /// What was changed (path, ref, url)
    pub target: String,
}

impl SideEffect {
    pub fn new(kind: impl Into<String>, target: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            target: target.into(),
        }
    }
}

/// Uniform success envelope returned by tools
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolResult {
    pub success: bool,
    pub output: Value,
    #[serde(default)]
    pub side_effect: Option<SideEffect>,
}

impl ToolResult {
    /// Create a successful result with text
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            success: true,
            output: serde_json::json!({ "text": text.into() }),
            side_effect: None,
        }
    }

    /// Create a successful result with JSON data
    pub fn json(output: Value) -> Self {
        Self {
            success: true,
            output,
            side_effect: None,
        }
    }

    /// Create an unsuccessful result; the orchestrator treats it as an execution failure
    pub fn failure(error: impl Into<String>) -> Self {
        Self {
            success: false,
            output: serde_json::json!({ "error": error.into() }),
            side_effect: None,
        }
    }

    /// Attach a side-effect descriptor
    pub fn with_side_effect(mut self, side_effect: SideEffect) -> Self {
        self.side_effect = Some(side_effect);
        self
    }

    /// Error message carried by an unsuccessful result
    pub fn error_message(&self) -> Option<String> {
        if self.success {
            return None;
        }
        Some(
            self.output
                .get("error")
                .and_then(|e| e.as_str())
                .map(String::from)
                .unwrap_or_else(|| "tool reported failure".to_string()),
        )
    }
}

/// Classification of a task failure, stable across the tool boundary
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    NotFound,
    InvalidParameters,
    Timeout,
    ExecutionFailure,
    PermissionDenied,
    /// Escalation ran out of defers
    Unresolved,
    /// Human declined and the task has no fallback
    Declined,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::NotFound => "not_found",
            ErrorKind::InvalidParameters => "invalid_parameters",
            ErrorKind::Timeout => "timeout",
            ErrorKind::ExecutionFailure => "execution_failure",
            ErrorKind::PermissionDenied => "permission_denied",
            ErrorKind::Unresolved => "unresolved",
            ErrorKind::Declined => "declined",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Tool-level errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error, Serialize, Deserialize)]
pub enum ToolError {
    #[error("Tool not found: {0}")]
    NotFound(String),

    #[error("Invalid parameters: {0}")]
    InvalidParameters(String),

    #[error("Tool timed out after {0} ms")]
    Timeout(u64),

    #[error("Execution failed: {0}")]
    ExecutionFailure(String),

    #[error("Permission denied: {0}")]
    PermissionDenied(String),
}

impl ToolError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            ToolError::NotFound(_) => ErrorKind::NotFound,
            ToolError::InvalidParameters(_) => ErrorKind::InvalidParameters,
            ToolError::Timeout(_) => ErrorKind::Timeout,
            ToolError::ExecutionFailure(_) => ErrorKind::ExecutionFailure,
            ToolError::PermissionDenied(_) => ErrorKind::PermissionDenied,
        }
    }

    /// Only transient failures go back through the retry policy
    pub fn is_retryable(&self) -> bool {
        matches!(self, ToolError::Timeout(_) | ToolError::ExecutionFailure(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_tool_request_new() {
        let request = ToolRequest::new("file_operations");
        assert_eq!(request.tool, "file_operations");
        assert!(request.params.is_empty());
        assert!(!request.destructive);
        assert!(!request.confirmed);
    }

    #[test]
    fn test_tool_request_with_param() {
        let request = ToolRequest::new("file_operations")
            .with_param("operation", json!("read_file"))
            .with_param("path", json!("README.md"));

        assert_eq!(request.params.len(), 2);
        assert_eq!(request.operation(), Some("read_file"));
        assert_eq!(request.param_str("path").unwrap(), "README.md");
    }

    #[test]
    fn test_param_str_missing_is_invalid_parameters() {
        let request = ToolRequest::new("t");
        let err = request.param_str("path").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidParameters);
    }

    #[test]
    fn test_param_i64() {
        let request = ToolRequest::new("t").with_param("count", json!(42));
        assert_eq!(request.param_i64("count").unwrap(), 42);
        assert!(request.param_i64("missing").is_err());
    }

    #[test]
    fn test_param_str_list_accepts_single_string() {
        let request = ToolRequest::new("t")
            .with_param("files", json!("a.txt"))
            .with_param("many", json!(["a", "b"]))
            .with_param("bad", json!([1, 2]));

        assert_eq!(request.param_str_list("files").unwrap(), vec!["a.txt"]);
        assert_eq!(request.param_str_list("many").unwrap(), vec!["a", "b"]);
        assert!(request.param_str_list("missing").unwrap().is_empty());
        assert!(request.param_str_list("bad").is_err());
    }

    #[test]
    fn test_optional_params() {
        let request = ToolRequest::new("t")
            .with_param("name", json!("Bob"))
            .with_param("flag", json!(false));

        assert_eq!(request.param_str_opt("name"), Some("Bob".to_string()));
        assert_eq!(request.param_str_opt("missing"), None);
        assert_eq!(request.param_bool_opt("flag"), Some(false));
    }

    #[test]
    fn test_tool_result_failure_message() {
        let result = ToolResult::failure("disk full");
        assert!(!result.success);
        assert_eq!(result.error_message(), Some("disk full".to_string()));
        assert_eq!(ToolResult::text("ok").error_message(), None);
    }

    #[test]
    fn test_tool_result_side_effect() {
        let result =
            ToolResult::text("wrote").with_side_effect(SideEffect::new("file_write", "a.txt"));
        assert_eq!(result.side_effect.unwrap().target, "a.txt");
    }

    #[test]
    fn test_tool_error_kinds_and_retryability() {
        assert!(ToolError::Timeout(10).is_retryable());
        assert!(ToolError::ExecutionFailure("boom".into()).is_retryable());
        assert!(!ToolError::NotFound("x".into()).is_retryable());
        assert!(!ToolError::InvalidParameters("x".into()).is_retryable());
        assert!(!ToolError::PermissionDenied("x".into()).is_retryable());

        assert_eq!(ToolError::Timeout(1).kind(), ErrorKind::Timeout);
        assert_eq!(
            ToolError::PermissionDenied("x".into()).kind(),
            ErrorKind::PermissionDenied
        );
    }

    #[test]
    fn test_tool_error_display() {
        let err = ToolError::NotFound("ftp".to_string());
        assert_eq!(err.to_string(), "Tool not found: ftp");

        let err = ToolError::Timeout(1500);
        assert_eq!(err.to_string(), "Tool timed out after 1500 ms");
    }

    #[test]
    fn test_error_kind_serializes_snake_case() {
        let encoded = serde_json::to_string(&ErrorKind::ExecutionFailure).unwrap();
        assert_eq!(encoded, "\"execution_failure\"");
        assert_eq!(ErrorKind::Unresolved.to_string(), "unresolved");
    }
}
