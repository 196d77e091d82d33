pub mod filesystem;
pub mod git;
pub mod terminal;
pub mod web;

pub use filesystem::FilesystemTool;
pub use git::GitTool;
pub use terminal::TerminalTool;
pub use web::WebTool;

use crate::command_executor::CommandExecutor;
use crate::config::ToolsConfig;
use sdk::errors::EngineError;
use sdk::{Tool, ToolError, ToolRequest, ToolResult};
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Registry mapping tool names to handlers.
///
/// The gateway validates, refuses unconfirmed destructive requests, applies
/// the per-task timeout and normalises unsuccessful results into
/// `ExecutionFailure`. It never retries.
#[derive(Default, Clone)]
pub struct ToolGateway {
    tools: BTreeMap<String, Arc<dyn Tool>>,
}

impl ToolGateway {
    pub fn new() -> Self {
        Self::default()
    }

    /// Built-in tools enabled in `config`, rooted at `workspace`
    pub fn from_config(config: &ToolsConfig, workspace: &Path) -> Result<Self, EngineError> {
        let mut gateway = Self::new();

        if config.file_operations {
            gateway.register(Arc::new(FilesystemTool::new(workspace)?));
        }
        if config.command_executor {
            gateway.register(Arc::new(TerminalTool::new(
                workspace,
                CommandExecutor::with_allowlist(config.allowed_commands.iter().cloned()),
                Duration::from_secs(config.command_timeout_secs),
            )));
        }
        if config.git_operations {
            gateway.register(Arc::new(GitTool::new(
                workspace,
                Duration::from_secs(config.command_timeout_secs),
            )));
        }
        if config.web_operations {
            let web = WebTool::new(Duration::from_secs(config.web_timeout_secs))?;
            gateway.register(Arc::new(web));
        }

        debug!("Tool gateway ready: {}", gateway.names().join(", "));
        Ok(gateway)
    }

    /// Register a handler, replacing any previous one with the same name
    pub fn register(&mut self, tool: Arc<dyn Tool>) {
        let name = tool.name().to_string();
        if self.tools.insert(name.clone(), tool).is_some() {
            warn!("Tool '{}' registered twice; keeping the latest", name);
        }
    }

    pub fn with_tool(mut self, tool: Arc<dyn Tool>) -> Self {
        self.register(tool);
        self
    }

    pub fn get(&self, name: &str) -> Option<&Arc<dyn Tool>> {
        self.tools.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.tools.contains_key(name)
    }

    pub fn names(&self) -> Vec<&str> {
        self.tools.keys().map(String::as_str).collect()
    }

    pub fn tools(&self) -> impl Iterator<Item = &Arc<dyn Tool>> {
        self.tools.values()
    }

    /// Checks that need no I/O: known tool, valid parameters, confirmation
    /// present for destructive requests
    pub fn preflight(&self, request: &ToolRequest) -> Result<&Arc<dyn Tool>, ToolError> {
        let tool = self
            .tools
            .get(&request.tool)
            .ok_or_else(|| ToolError::NotFound(request.tool.clone()))?;

        tool.validate(request)?;

        if tool.is_destructive(request) && !request.confirmed {
            return Err(ToolError::PermissionDenied(format!(
                "{} requires confirmation",
                describe(request)
            )));
        }

        Ok(tool)
    }

    /// Dispatch once with a deadline
    pub async fn invoke(
        &self,
        request: &ToolRequest,
        timeout: Duration,
    ) -> Result<ToolResult, ToolError> {
        let tool = self.preflight(request)?;
        debug!("Invoking {}", describe(request));

        let result = tokio::time::timeout(timeout, tool.invoke(request))
            .await
            .map_err(|_| ToolError::Timeout(timeout.as_millis() as u64))??;

        match result.error_message() {
            Some(message) => Err(ToolError::ExecutionFailure(message)),
            None => Ok(result),
        }
    }
}

fn describe(request: &ToolRequest) -> String {
    match request.operation() {
        Some(operation) => format!("{}.{}", request.tool, operation),
        None => request.tool.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use serde_json::json;
    use tempfile::TempDir;

    struct Scripted {
        result: ToolResult,
        delay: Duration,
    }

    #[async_trait]
    impl Tool for Scripted {
        fn name(&self) -> &str {
            "scripted"
        }

        async fn invoke(&self, _request: &ToolRequest) -> Result<ToolResult, ToolError> {
            tokio::time::sleep(self.delay).await;
            Ok(self.result.clone())
        }
    }

    fn gateway(result: ToolResult, delay: Duration) -> ToolGateway {
        ToolGateway::new().with_tool(Arc::new(Scripted { result, delay }))
    }

    #[tokio::test]
    async fn test_unknown_tool_is_not_found() {
        let result = ToolGateway::new()
            .invoke(&ToolRequest::new("nope"), Duration::from_secs(1))
            .await;
        assert_eq!(result.unwrap_err(), ToolError::NotFound("nope".to_string()));
    }

    #[tokio::test]
    async fn test_unconfirmed_destructive_is_denied() {
        let gateway = gateway(ToolResult::text("ok"), Duration::ZERO);
        let request = ToolRequest::new("scripted").destructive(true);

        let result = gateway.invoke(&request, Duration::from_secs(1)).await;
        assert!(matches!(result, Err(ToolError::PermissionDenied(_))));

        let result = gateway
            .invoke(&request.confirmed(true), Duration::from_secs(1))
            .await;
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn test_timeout() {
        let gateway = gateway(ToolResult::text("late"), Duration::from_millis(200));
        let result = gateway
            .invoke(&ToolRequest::new("scripted"), Duration::from_millis(20))
            .await;
        assert_eq!(result.unwrap_err(), ToolError::Timeout(20));
    }

    #[tokio::test]
    async fn test_unsuccessful_result_becomes_execution_failure() {
        let gateway = gateway(ToolResult::failure("disk full"), Duration::ZERO);
        let result = gateway
            .invoke(&ToolRequest::new("scripted"), Duration::from_secs(1))
            .await;
        assert_eq!(
            result.unwrap_err(),
            ToolError::ExecutionFailure("disk full".to_string())
        );
    }

    #[test]
    fn test_from_config_respects_flags() {
        let temp = TempDir::new().unwrap();
        let config = ToolsConfig {
            web_operations: false,
            git_operations: false,
            ..ToolsConfig::default()
        };

        let gateway = ToolGateway::from_config(&config, temp.path()).unwrap();
        assert_eq!(gateway.names(), vec!["command_executor", "file_operations"]);
    }

    #[test]
    fn test_preflight_uses_tool_knowledge() {
        let temp = TempDir::new().unwrap();
        let gateway = ToolGateway::from_config(&ToolsConfig::default(), temp.path()).unwrap();
        let request = ToolRequest::new("file_operations")
            .with_param("operation", json!("delete_file"))
            .with_param("path", json!("x.txt"));

        assert!(matches!(
            gateway.preflight(&request),
            Err(ToolError::PermissionDenied(_))
        ));
        assert!(gateway.preflight(&request.confirmed(true)).is_ok());
    }
}
