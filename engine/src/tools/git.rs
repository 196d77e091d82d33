//! `git_operations` tool
//!
//! Thin layer over [`TerminalTool`] with a `git`-only allowlist. Each
//! operation maps to a fixed argument vector; `push` and `reset` are
//! destructive.

use async_trait::async_trait;
use sdk::{SideEffect, Tool, ToolError, ToolRequest, ToolResult};
use std::path::PathBuf;
use std::time::Duration;

use super::terminal::{output_result, TerminalTool};
use crate::command_executor::CommandExecutor;

const OPERATIONS: &[&str] = &[
    "init",
    "status",
    "add",
    "commit",
    "create_branch",
    "current_branch",
    "pull",
    "push",
    "reset",
];

#[derive(Debug)]
pub struct GitTool {
    terminal: TerminalTool,
}

impl GitTool {
    pub fn new(work_dir: impl Into<PathBuf>, timeout: Duration) -> Self {
        Self {
            terminal: TerminalTool::new(
                work_dir,
                CommandExecutor::with_allowlist(["git"]),
                timeout,
            ),
        }
    }

    /// git arguments and the side effect a successful run reports
    fn plan(request: &ToolRequest) -> Result<(Vec<String>, Option<SideEffect>), ToolError> {
        let operation = request.param_str("operation")?;
        let remote = request
            .param_str_opt("remote")
            .unwrap_or_else(|| "origin".to_string());

        let (args, effect): (Vec<String>, Option<SideEffect>) = match operation.as_str() {
            "init" => (vec!["init".into()], Some(SideEffect::new("git_init", "."))),
            "status" => (vec!["status".into(), "--porcelain".into()], None),
            "current_branch" => (vec!["branch".into(), "--show-current".into()], None),
            "add" => {
                let mut paths = request.param_str_list("paths")?;
                if paths.is_empty() {
                    paths.push(".".to_string());
                }
                let target = paths.join(" ");
                let mut args = vec!["add".to_string(), "--".to_string()];
                args.extend(paths);
                (args, Some(SideEffect::new("git_add", target)))
            }
            "commit" => {
                let message = request.param_str("message")?;
                (
                    vec!["commit".into(), "-m".into(), message.clone()],
                    Some(SideEffect::new("git_commit", message)),
                )
            }
            "create_branch" => {
                let name = request.param_str("name")?;
                (
                    vec!["checkout".into(), "-b".into(), name.clone()],
                    Some(SideEffect::new("git_branch", name)),
                )
            }
            "pull" => {
                let mut args = vec!["pull".to_string(), remote.clone()];
                args.extend(request.param_str_opt("branch"));
                (args, Some(SideEffect::new("git_pull", remote)))
            }
            "push" => {
                let mut args = vec!["push".to_string(), remote.clone()];
                args.extend(request.param_str_opt("branch"));
                if request.param_bool_opt("force").unwrap_or(false) {
                    args.push("--force".to_string());
                }
                (args, Some(SideEffect::new("git_push", remote)))
            }
            "reset" => {
                let target = request
                    .param_str_opt("target")
                    .unwrap_or_else(|| "HEAD".to_string());
                let mode = if request.param_bool_opt("hard").unwrap_or(false) {
                    "--hard"
                } else {
                    "--mixed"
                };
                (
                    vec!["reset".into(), mode.into(), target.clone()],
                    Some(SideEffect::new("git_reset", target)),
                )
            }
            other => {
                return Err(ToolError::InvalidParameters(format!(
                    "unknown git operation '{}'",
                    other
                )))
            }
        };

        if let Some(bad) = args.iter().skip(1).find(|a| a.starts_with('-') && !is_known_flag(a)) {
            return Err(ToolError::InvalidParameters(format!(
                "parameter looks like a flag: {}",
                bad
            )));
        }

        Ok((args, effect))
    }
}

fn is_known_flag(arg: &str) -> bool {
    matches!(
        arg,
        "--porcelain" | "--show-current" | "--" | "-m" | "-b" | "--force" | "--hard" | "--mixed"
    )
}

#[async_trait]
impl Tool for GitTool {
    fn name(&self) -> &str {
        "git_operations"
    }

    fn operations(&self) -> &[&'static str] {
        OPERATIONS
    }

    fn is_destructive(&self, request: &ToolRequest) -> bool {
        request.destructive || matches!(request.operation(), Some("push" | "reset"))
    }

    fn validate(&self, request: &ToolRequest) -> Result<(), ToolError> {
        Self::plan(request).map(|_| ())
    }

    async fn invoke(&self, request: &ToolRequest) -> Result<ToolResult, ToolError> {
        let (args, effect) = Self::plan(request)?;
        let output = self.terminal.run("git", &args).await?;
        Ok(output_result(output, effect))
    }
}
