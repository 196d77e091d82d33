//! Outcome records and adaptation summaries

use super::pattern::PatternKey;
use crate::graph::TaskId;
use chrono::{DateTime, Utc};
use sdk::types::ErrorKind;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

/// Terminal result of a task, as remembered
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutcomeStatus {
    Succeeded,
    Failed,
    Skipped,
}

impl OutcomeStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            OutcomeStatus::Succeeded => "succeeded",
            OutcomeStatus::Failed => "failed",
            OutcomeStatus::Skipped => "skipped",
        }
    }
}

/// Immutable record of one terminal task outcome
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutcomeRecord {
    /// Replay guard: a record id is absorbed at most once
    pub id: Uuid,
    pub goal_id: String,
    pub task_id: TaskId,
    pub tool: Option<String>,
    pub params: Map<String, Value>,
    pub status: OutcomeStatus,
    pub attempt: u32,
    pub duration_ms: u64,
    pub error_kind: Option<ErrorKind>,
    pub timestamp: DateTime<Utc>,
}

impl OutcomeRecord {
    pub fn new(
        goal_id: impl Into<String>,
        task_id: impl Into<TaskId>,
        tool: Option<String>,
        params: Map<String, Value>,
        status: OutcomeStatus,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            goal_id: goal_id.into(),
            task_id: task_id.into(),
            tool,
            params,
            status,
            attempt: 0,
            duration_ms: 0,
            error_kind: None,
            timestamp: Utc::now(),
        }
    }

    pub fn with_attempt(mut self, attempt: u32) -> Self {
        self.attempt = attempt;
        self
    }

    pub fn with_duration(mut self, duration_ms: u64) -> Self {
        self.duration_ms = duration_ms;
        self
    }

    pub fn with_error_kind(mut self, kind: Option<ErrorKind>) -> Self {
        self.error_kind = kind;
        self
    }

    /// Pattern this outcome feeds, if the task had a tool
    pub fn pattern_key(&self) -> Option<PatternKey> {
        self.tool
            .as_deref()
            .map(|tool| PatternKey::from_params(tool, &self.params))
    }
}

/// Success statistics of one shape within a single goal
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ShapeStat {
    pub key: PatternKey,
    pub successes: u32,
    pub failures: u32,
}

impl ShapeStat {
    pub fn success_rate(&self) -> f64 {
        let total = self.successes + self.failures;
        if total == 0 {
            return 0.0;
        }
        self.successes as f64 / total as f64
    }
}

/// What one goal taught the pattern index
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AdaptationSummary {
    pub goal_id: String,
    pub generated_at: DateTime<Utc>,
    pub outcomes: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub skipped: usize,
    pub most_successful: Vec<ShapeStat>,
    pub least_successful: Vec<ShapeStat>,
}
