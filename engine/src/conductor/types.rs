//! Conductor types
//!
//! Goals, execution plans and the reports produced when a goal stops.

use crate::graph::{AttemptRecord, BlockedTask, StatusCounts, TaskError, TaskGraph, TaskId, TaskStatus};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};

/// Goal lifecycle status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GoalStatus {
    Pending,
    InProgress,
    Completed,
    Failed,
    Cancelled,
}

impl GoalStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            GoalStatus::Pending => "pending",
            GoalStatus::InProgress => "in_progress",
            GoalStatus::Completed => "completed",
            GoalStatus::Failed => "failed",
            GoalStatus::Cancelled => "cancelled",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            GoalStatus::Completed | GoalStatus::Failed | GoalStatus::Cancelled
        )
    }
}

impl std::fmt::Display for GoalStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A user goal and the task graph it was decomposed into
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Goal {
    pub id: String,
    pub text: String,
    #[serde(default)]
    pub context: Option<String>,
    pub created_at: DateTime<Utc>,
    pub status: GoalStatus,
    pub graph: TaskGraph,
    #[serde(default)]
    pub plan: Option<ExecutionPlan>,
}

impl Goal {
    pub fn new(text: impl Into<String>, graph: TaskGraph) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            text: text.into(),
            context: None,
            created_at: Utc::now(),
            status: GoalStatus::Pending,
            graph,
            plan: None,
        }
    }

    pub fn with_context(mut self, context: Option<String>) -> Self {
        self.context = context;
        self
    }

    pub fn progress(&self) -> StatusCounts {
        self.graph.counts()
    }
}

/// Ordered parallel groups; concatenated they form a topological order
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionPlan {
    pub groups: Vec<Vec<TaskId>>,
    /// Tasks whose learned confidence fell below the planner threshold
    #[serde(default)]
    pub low_confidence: BTreeSet<TaskId>,
    /// Pending tasks left out because an ancestor failed
    #[serde(default)]
    pub blocked: BTreeSet<TaskId>,
    pub created_at: DateTime<Utc>,
}

impl ExecutionPlan {
    pub fn task_order(&self) -> Vec<TaskId> {
        self.groups.iter().flatten().cloned().collect()
    }

    pub fn task_count(&self) -> usize {
        self.groups.iter().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.groups.iter().all(Vec::is_empty)
    }

    pub fn is_low_confidence(&self, id: &str) -> bool {
        self.low_confidence.contains(id)
    }

    /// Every planned task exists once and only depends on planned tasks in
    /// earlier groups or on tasks outside the plan
    pub fn is_valid_for(&self, graph: &TaskGraph) -> bool {
        let mut group_of: HashMap<&str, usize> = HashMap::new();
        for (index, group) in self.groups.iter().enumerate() {
            for id in group {
                if !graph.contains(id) || group_of.insert(id.as_str(), index).is_some() {
                    return false;
                }
            }
        }

        group_of.iter().all(|(id, index)| {
            graph.task(id).is_some_and(|task| {
                task.dependencies
                    .iter()
                    .all(|dep| group_of.get(dep.as_str()).map_or(true, |dep_index| dep_index < index))
            })
        })
    }
}

/// A failed task with everything needed to decide on a retry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FailedTask {
    pub id: TaskId,
    pub error: Option<TaskError>,
    pub attempt_count: u32,
    pub attempts: Vec<AttemptRecord>,
}

/// Goal-level result of an execution run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GoalReport {
    pub goal_id: String,
    pub status: GoalStatus,
    pub counts: StatusCounts,
    pub percent_complete: f64,
    pub succeeded: Vec<TaskId>,
    pub skipped: Vec<TaskId>,
    pub failed: Vec<FailedTask>,
    pub blocked: Vec<BlockedTask>,
    /// Non-terminal tasks left behind (cancellation, stopped drain)
    pub unfinished: Vec<TaskId>,
}

impl GoalReport {
    pub fn from_goal(goal: &Goal) -> Self {
        let counts = goal.progress();
        let mut report = Self {
            goal_id: goal.id.clone(),
            status: goal.status,
            percent_complete: counts.percent_complete(),
            counts,
            succeeded: Vec::new(),
            skipped: Vec::new(),
            failed: Vec::new(),
            blocked: goal.graph.blocked(),
            unfinished: Vec::new(),
        };

        for task in goal.graph.tasks() {
            match task.status {
                TaskStatus::Succeeded => report.succeeded.push(task.id.clone()),
                TaskStatus::Skipped => report.skipped.push(task.id.clone()),
                TaskStatus::Failed => report.failed.push(FailedTask {
                    id: task.id.clone(),
                    error: task.last_error.clone(),
                    attempt_count: task.attempt_count,
                    attempts: task.attempts.clone(),
                }),
                _ => report.unfinished.push(task.id.clone()),
            }
        }

        report
    }

    pub fn is_blocked(&self, id: &str) -> bool {
        self.blocked.iter().any(|b| b.id == id)
    }
}

/// Persisted snapshot of a goal for browsing, resume and retry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GoalSession {
    pub goal: Goal,
    #[serde(default)]
    pub report: Option<GoalReport>,
    pub updated_at: DateTime<Utc>,
}

impl GoalSession {
    pub fn new(goal: Goal, report: Option<GoalReport>) -> Self {
        Self {
            goal,
            report,
            updated_at: Utc::now(),
        }
    }
}
