//! Risk assessment module
//!
//! This module classifies a task's tool operation into three risk tiers:
//!
//! - **Tier 0 (Read-only)**: runs without confirmation
//!   - read_file, list_directory, git status, web get
//!
//! - **Tier 1 (Write/Reversible)**: runs without confirmation
//!   - write_file, create_directory, git commit, command execution
//!
//! - **Tier 2 (Destructive/Irreversible)**: needs an approved escalation
//!   - delete_file, git push, git reset
//!
//! Dangerous flags (--force, -rf, --delete, --hard) and destructive verbs in
//! the task description escalate to Tier 2. The assessor also flags vague
//! wording ("maybe", "not sure", ...) so the orchestrator can ask a human
//! before guessing.

use crate::graph::Task;
use regex::Regex;
use sdk::errors::EngineError;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Risk tier classification for operations
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum RiskTier {
    /// Tier 0: Read-only operations
    Tier0 = 0,
    /// Tier 1: Write/reversible operations
    Tier1 = 1,
    /// Tier 2: Destructive/irreversible operations (explicit approval)
    Tier2 = 2,
}

impl RiskTier {
    /// Escalate the risk tier by one level
    pub fn escalate(self) -> Self {
        match self {
            RiskTier::Tier0 => RiskTier::Tier1,
            RiskTier::Tier1 => RiskTier::Tier2,
            RiskTier::Tier2 => RiskTier::Tier2,
        }
    }
}

/// A tool operation as seen by the assessor
#[derive(Debug, Clone)]
pub struct Operation {
    /// Tool name (e.g. "file_operations")
    pub tool: String,
    /// Operation inside the tool (e.g. "delete_file")
    pub name: String,
    /// Flattened string arguments
    pub args: Vec<String>,
}

impl Operation {
    pub fn new(tool: impl Into<String>, name: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            tool: tool.into(),
            name: name.into(),
            args,
        }
    }
}

/// Result of assessing one task
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RiskAssessment {
    /// None when the tool/operation pair is unknown to the assessor
    pub tier: Option<RiskTier>,
    /// Whether the task needs approval before it may run
    pub destructive: bool,
    /// Vague wording found in the description
    pub ambiguity: Option<String>,
}

/// Risk assessor for task classification
///
/// # Examples
///
/// ```
/// use waypoint_engine::risk_assessor::{Operation, RiskAssessor, RiskTier};
///
/// let assessor = RiskAssessor::new().unwrap();
///
/// let op = Operation::new("file_operations", "read_file", vec!["notes.txt".into()]);
/// assert_eq!(assessor.assess(&op).unwrap(), RiskTier::Tier0);
///
/// let op = Operation::new("git_operations", "push", vec!["--force".into()]);
/// assert_eq!(assessor.assess(&op).unwrap(), RiskTier::Tier2);
///
/// assert_eq!(
///     assessor.find_ambiguity("maybe add a readme"),
///     Some("maybe".to_string())
/// );
/// ```
pub struct RiskAssessor {
    destructive_verbs: Regex,
    ambiguity: Regex,
}

impl RiskAssessor {
    /// Create a new RiskAssessor
    ///
    /// # Errors
    ///
    /// Returns an error if a pattern fails to compile (never happens with the
    /// hardcoded patterns).
    pub fn new() -> anyhow::Result<Self> {
        Ok(Self {
            destructive_verbs: Regex::new(
                r"(?i)\b(delete|remove|drop|destroy|wipe|truncate|format|uninstall|clear)\b",
            )?,
            ambiguity: Regex::new(
                r"(?i)\b(maybe|perhaps|possibly|might|unclear|not sure|vague|or something)\b",
            )?,
        })
    }

    /// Assess the risk tier of an operation
    pub fn assess(&self, operation: &Operation) -> Result<RiskTier, EngineError> {
        let mut tier = self.classify_operation(&operation.tool, &operation.name)?;

        // Dangerous flags always escalate to Tier 2
        if self.has_dangerous_flags(&operation.args) {
            tier = RiskTier::Tier2;
        }

        Ok(tier)
    }

    /// Assess a task: tier, approval need and ambiguity
    pub fn assess_task(&self, task: &Task) -> RiskAssessment {
        let tier = task.tool.as_deref().and_then(|tool| {
            let name = task
                .params
                .get("operation")
                .and_then(Value::as_str)
                .unwrap_or_default();
            let op = Operation::new(tool, name, flatten_args(&task.params));
            self.assess(&op).ok()
        });

        let destructive = task.destructive
            || tier == Some(RiskTier::Tier2)
            || self.destructive_verbs.is_match(&task.description);

        RiskAssessment {
            tier,
            destructive,
            ambiguity: self.find_ambiguity(&task.description),
        }
    }

    /// First vague phrase in `text`, lowercased
    pub fn find_ambiguity(&self, text: &str) -> Option<String> {
        self.ambiguity
            .find(text)
            .map(|m| m.as_str().to_lowercase())
    }

    /// Classify an operation by tool and operation name
    fn classify_operation(&self, tool: &str, operation: &str) -> Result<RiskTier, EngineError> {
        match (tool, operation) {
            // Tier 0: Read-only operations
            ("file_operations", "read_file" | "list_directory")
            | ("git_operations", "status" | "current_branch")
            | ("web_operations", "get") => Ok(RiskTier::Tier0),

            // Tier 1: Write/reversible operations
            ("file_operations", "write_file" | "create_file" | "create_directory")
            | ("git_operations", "init" | "add" | "commit" | "create_branch" | "pull")
            | ("command_executor", "execute")
            | ("web_operations", "post") => Ok(RiskTier::Tier1),

            // Tier 2: Destructive/irreversible operations
            ("file_operations", "delete_file") | ("git_operations", "push" | "reset") => {
                Ok(RiskTier::Tier2)
            }

            _ => Err(EngineError::UnknownOperation(format!("{}.{}", tool, operation))),
        }
    }

    /// Check if arguments contain dangerous flags
    fn has_dangerous_flags(&self, args: &[String]) -> bool {
        const DANGEROUS_FLAGS: &[&str] = &["--force", "-rf", "--delete", "--hard"];

        args.iter()
            .any(|arg| DANGEROUS_FLAGS.iter().any(|flag| arg.contains(flag)))
    }
}

/// String values of a parameter map, arrays flattened one level
fn flatten_args(params: &serde_json::Map<String, Value>) -> Vec<String> {
    let mut args = Vec::new();
    for value in params.values() {
        match value {
            Value::String(s) => args.extend(s.split_whitespace().map(String::from)),
            Value::Array(items) => args.extend(
                items
                    .iter()
                    .filter_map(Value::as_str)
                    .map(String::from),
            ),
            _ => {}
        }
    }
    args
}
