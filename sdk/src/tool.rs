//! Tool handler trait
//!
//! This module defines the `Tool` trait that every tool collaborator registered
//! in the engine's gateway must implement.

use crate::types::{ToolError, ToolRequest, ToolResult};
use async_trait::async_trait;

/// Trait that all tool collaborators must implement
///
/// A tool only validates and executes requests. It never retries, and it never
/// decides on its own that a destructive action is acceptable: the gateway
/// refuses unconfirmed destructive requests before `invoke` is called.
#[async_trait]
pub trait Tool: Send + Sync {
    /// Returns the registered name of the tool
    fn name(&self) -> &str;

    /// Operations this tool understands, for listings
    fn operations(&self) -> &[&'static str] {
        &[]
    }

    /// Whether this request would perform an irreversible action
    ///
    /// The caller-side `destructive` flag is always honoured; tools may add
    /// their own knowledge on top (e.g. `delete_file`, `git push`).
    fn is_destructive(&self, request: &ToolRequest) -> bool {
        request.destructive
    }

    /// Check the request payload without side effects
    fn validate(&self, _request: &ToolRequest) -> Result<(), ToolError> {
        Ok(())
    }

    /// Execute the request
    async fn invoke(&self, request: &ToolRequest) -> Result<ToolResult, ToolError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    struct Echo;

    #[async_trait]
    impl Tool for Echo {
        fn name(&self) -> &str {
            "echo"
        }

        async fn invoke(&self, request: &ToolRequest) -> Result<ToolResult, ToolError> {
            Ok(ToolResult::json(json!(request.params)))
        }
    }

    #[tokio::test]
    async fn test_default_methods() {
        let tool = Echo;
        let request = ToolRequest::new("echo").with_param("x", json!(1));

        assert!(tool.operations().is_empty());
        assert!(tool.validate(&request).is_ok());
        assert!(!tool.is_destructive(&request));
        assert!(tool.is_destructive(&request.clone().destructive(true)));

        let result = tool.invoke(&request).await.unwrap();
        assert_eq!(result.output, json!({"x": 1}));
    }
}
