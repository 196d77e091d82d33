//! `command_executor` tool
//!
//! Runs allowlisted programs in the workspace through [`CommandExecutor`]:
//! no shell, no metacharacters, killed on timeout.

use async_trait::async_trait;
use sdk::{SideEffect, Tool, ToolError, ToolRequest, ToolResult};
use serde_json::json;
use std::path::PathBuf;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::command_executor::{CommandError, CommandExecutor, CommandOutput};

const DANGEROUS_FLAGS: &[&str] = &["--force", "-rf", "--delete", "--hard"];

#[derive(Debug)]
pub struct TerminalTool {
    work_dir: PathBuf,
    timeout: Duration,
    executor: CommandExecutor,
}

impl TerminalTool {
    pub fn new(work_dir: impl Into<PathBuf>, executor: CommandExecutor, timeout: Duration) -> Self {
        Self {
            work_dir: work_dir.into(),
            timeout,
            executor,
        }
    }

    /// Program and arguments from either `command` + `args` or a single
    /// whitespace-separated `command` line
    fn command_line(request: &ToolRequest) -> Result<(String, Vec<String>), ToolError> {
        let command = request.param_str("command")?;
        let extra = request.param_str_list("args")?;
        let (program, mut args) = CommandExecutor::split(&command).map_err(command_error)?;
        args.extend(extra);
        Ok((program, args))
    }

    pub(crate) async fn run(
        &self,
        program: &str,
        args: &[String],
    ) -> Result<CommandOutput, ToolError> {
        info!("Executing command: {} {}", program, args.join(" "));
        self.executor
            .run(program, args, &self.work_dir, self.timeout)
            .await
            .map_err(command_error)
    }
}

pub(crate) fn command_error(error: CommandError) -> ToolError {
    match error {
        CommandError::EmptyCommand => ToolError::InvalidParameters("empty command".to_string()),
        CommandError::TimedOut(limit) => ToolError::Timeout(limit.as_millis() as u64),
        CommandError::ExecutionFailed(e) => ToolError::ExecutionFailure(e.to_string()),
        rejected => {
            warn!("Command rejected: {}", rejected);
            ToolError::PermissionDenied(rejected.to_string())
        }
    }
}

/// Envelope for a finished process; non-zero exit is an unsuccessful result
pub(crate) fn output_result(output: CommandOutput, side_effect: Option<SideEffect>) -> ToolResult {
    if output.success() {
        debug!("Command succeeded");
        let result = ToolResult::json(json!({
            "exit_code": output.exit_code,
            "stdout": output.stdout,
            "stderr": output.stderr,
        }));
        match side_effect {
            Some(effect) => result.with_side_effect(effect),
            None => result,
        }
    } else {
        ToolResult {
            success: false,
            output: json!({
                "error": format!(
                    "exit code {}: {}",
                    output
                        .exit_code
                        .map_or_else(|| "none".to_string(), |c| c.to_string()),
                    output.stderr.trim()
                ),
                "exit_code": output.exit_code,
                "stdout": output.stdout,
                "stderr": output.stderr,
            }),
            side_effect: None,
        }
    }
}

#[async_trait]
impl Tool for TerminalTool {
    fn name(&self) -> &str {
        "command_executor"
    }

    fn operations(&self) -> &[&'static str] {
        &["execute"]
    }

    fn is_destructive(&self, request: &ToolRequest) -> bool {
        if request.destructive {
            return true;
        }
        Self::command_line(request)
            .map(|(_, args)| {
                args.iter()
                    .any(|arg| DANGEROUS_FLAGS.iter().any(|flag| arg.contains(flag)))
            })
            .unwrap_or(false)
    }

    fn validate(&self, request: &ToolRequest) -> Result<(), ToolError> {
        if let Some(operation) = request.operation() {
            if operation != "execute" {
                return Err(ToolError::InvalidParameters(format!(
                    "unknown command operation '{}'",
                    operation
                )));
            }
        }
        let (program, args) = Self::command_line(request)?;
        self.executor
            .validate(&program, &args)
            .map_err(command_error)
    }

    async fn invoke(&self, request: &ToolRequest) -> Result<ToolResult, ToolError> {
        let (program, args) = Self::command_line(request)?;
        let output = self.run(&program, &args).await?;
        let effect = SideEffect::new("command", format!("{} {}", program, args.join(" ")));
        Ok(output_result(output, Some(effect)))
    }
}
