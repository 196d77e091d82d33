use std::collections::HashSet;
use std::path::Path;
use std::process::Stdio;
use std::time::Duration;
use thiserror::Error;
use tokio::process::Command;
use tracing::debug;

/// Runs allowlisted programs without a shell.
///
/// # Security Gates
/// - Allowlist-based command validation
/// - Shell interpreter rejection (sh, bash, zsh, fish)
/// - Shell metacharacter detection
/// - Dangerous pipe pattern detection
/// - execve-style execution, stdin null, stdout/stderr piped
#[derive(Debug, Clone)]
pub struct CommandExecutor {
    allowlist: HashSet<String>,
}

#[derive(Debug, Error)]
pub enum CommandError {
    #[error("Empty command")]
    EmptyCommand,

    #[error("Command not allowed: {0}")]
    CommandNotAllowed(String),

    #[error("Shell invocation attempt detected")]
    ShellInjectionAttempt,

    #[error("Shell metacharacters detected in argument: {0}")]
    ShellMetacharactersDetected(String),

    #[error("Dangerous pipe pattern detected")]
    DangerousPipeDetected,

    #[error("Command timed out after {0:?}")]
    TimedOut(Duration),

    #[error("Command execution failed: {0}")]
    ExecutionFailed(#[from] std::io::Error),
}

impl CommandError {
    /// Rejections by a gate, as opposed to failures while running
    pub fn is_rejection(&self) -> bool {
        !matches!(
            self,
            CommandError::TimedOut(_) | CommandError::ExecutionFailed(_)
        )
    }
}

/// Captured result of a finished process
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandOutput {
    pub exit_code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.exit_code == Some(0)
    }
}

impl CommandExecutor {
    /// Executor allowing exactly `commands`
    pub fn with_allowlist<I, S>(commands: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            allowlist: commands.into_iter().map(Into::into).collect(),
        }
    }

    pub fn allow_command(&mut self, command: impl Into<String>) {
        self.allowlist.insert(command.into());
    }

    pub fn is_allowed(&self, command: &str) -> bool {
        self.allowlist.contains(command)
    }

    /// Split a command line on whitespace into program and arguments
    pub fn split(command_line: &str) -> Result<(String, Vec<String>), CommandError> {
        let mut parts = command_line.split_whitespace().map(String::from);
        let program = parts.next().ok_or(CommandError::EmptyCommand)?;
        Ok((program, parts.collect()))
    }

    /// Run every gate without executing anything
    pub fn validate(&self, command: &str, args: &[String]) -> Result<(), CommandError> {
        if matches!(command, "sh" | "bash" | "zsh" | "fish") {
            return Err(CommandError::ShellInjectionAttempt);
        }

        if !self.allowlist.contains(command) {
            return Err(CommandError::CommandNotAllowed(command.to_string()));
        }

        if let Some(arg) = args.iter().find(|a| has_shell_metacharacters(a)) {
            return Err(CommandError::ShellMetacharactersDetected(arg.clone()));
        }

        let full_command = format!("{} {}", command, args.join(" "));
        if has_dangerous_pipe(&full_command) {
            return Err(CommandError::DangerousPipeDetected);
        }

        Ok(())
    }

    /// Validate, then run in `work_dir` with a deadline. The child is killed
    /// when the deadline passes.
    ///
    /// A non-zero exit is not an error here; callers inspect
    /// [`CommandOutput::exit_code`].
    pub async fn run(
        &self,
        command: &str,
        args: &[String],
        work_dir: &Path,
        timeout: Duration,
    ) -> Result<CommandOutput, CommandError> {
        self.validate(command, args)?;
        debug!("Running {} {:?} in {}", command, args, work_dir.display());

        let child = Command::new(command)
            .args(args)
            .current_dir(work_dir)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()?;

        let output = match tokio::time::timeout(timeout, child.wait_with_output()).await {
            Ok(result) => result?,
            Err(_) => return Err(CommandError::TimedOut(timeout)),
        };

        Ok(CommandOutput {
            exit_code: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }
}

/// Detects: | & ; ' " ` \n < > $
fn has_shell_metacharacters(s: &str) -> bool {
    s.chars()
        .any(|c| matches!(c, '|' | '&' | ';' | '\'' | '"' | '`' | '\n' | '<' | '>' | '$'))
}

fn has_dangerous_pipe(cmd: &str) -> bool {
    const DANGEROUS: &[&str] = &[
        "| sudo",
        "| su",
        "| chmod 777",
        "curl | bash",
        "wget | sh",
        "curl | sh",
        "wget | bash",
    ];
    DANGEROUS.iter().any(|d| cmd.contains(d))
}
