//! Task graph
//!
//! A goal owns exactly one `TaskGraph`: the tasks keyed by id plus the
//! dependency relation between them. Construction rejects cycles, dangling
//! edges, duplicate ids and self-references, so every graph that exists is a
//! DAG. Status changes go through [`TaskGraph::mark_status`], which enforces
//! the task state machine.

use chrono::{DateTime, Utc};
use sdk::errors::{EngineError, ValidationError};
use sdk::types::{ErrorKind, SideEffect};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::{BTreeMap, BTreeSet, HashMap};

pub type TaskId = String;

/// Task lifecycle status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    Ready,
    Running,
    AwaitingHuman,
    Succeeded,
    Failed,
    Skipped,
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Pending => "pending",
            TaskStatus::Ready => "ready",
            TaskStatus::Running => "running",
            TaskStatus::AwaitingHuman => "awaiting_human",
            TaskStatus::Succeeded => "succeeded",
            TaskStatus::Failed => "failed",
            TaskStatus::Skipped => "skipped",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TaskStatus::Succeeded | TaskStatus::Failed | TaskStatus::Skipped
        )
    }

    /// Whether a dependent may start once its dependency is in this status
    pub fn satisfies_dependency(&self) -> bool {
        matches!(self, TaskStatus::Succeeded | TaskStatus::Skipped)
    }

    /// Allowed edges of the task state machine
    pub fn can_transition_to(&self, next: TaskStatus) -> bool {
        use TaskStatus::*;
        matches!(
            (self, next),
            (Pending, Ready)
                | (Pending, Skipped)
                | (Ready, Running)
                | (Ready, AwaitingHuman)
                | (Ready, Failed)
                | (Ready, Skipped)
                | (Running, Succeeded)
                | (Running, Failed)
                | (Running, Ready)
                | (Running, AwaitingHuman)
                | (AwaitingHuman, Ready)
                | (AwaitingHuman, Skipped)
                | (AwaitingHuman, Failed)
        )
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

fn default_cost() -> f64 {
    1.0
}

/// Task as produced by decomposition, before it joins a graph
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskSpec {
    pub id: TaskId,
    #[serde(default)]
    pub description: String,
    /// Absent tool means the task needs the reasoning collaborator first
    #[serde(default)]
    pub tool: Option<String>,
    #[serde(default)]
    pub params: Map<String, Value>,
    #[serde(default)]
    pub dependencies: Vec<TaskId>,
    #[serde(default)]
    pub destructive: bool,
    #[serde(default = "default_cost")]
    pub estimated_cost: f64,
}

impl TaskSpec {
    pub fn new(id: impl Into<TaskId>, tool: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            description: String::new(),
            tool: Some(tool.into()),
            params: Map::new(),
            dependencies: Vec::new(),
            destructive: false,
            estimated_cost: default_cost(),
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_param(mut self, key: impl Into<String>, value: Value) -> Self {
        self.params.insert(key.into(), value);
        self
    }

    pub fn depends_on(mut self, id: impl Into<TaskId>) -> Self {
        self.dependencies.push(id.into());
        self
    }

    pub fn destructive(mut self, destructive: bool) -> Self {
        self.destructive = destructive;
        self
    }

    pub fn with_cost(mut self, cost: f64) -> Self {
        self.estimated_cost = cost;
        self
    }
}

/// Explicit dependency edge: `task` waits for `depends_on`
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Dependency {
    pub task: TaskId,
    pub depends_on: TaskId,
}

impl Dependency {
    pub fn new(task: impl Into<TaskId>, depends_on: impl Into<TaskId>) -> Self {
        Self {
            task: task.into(),
            depends_on: depends_on.into(),
        }
    }
}

/// Last error recorded on a task
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskError {
    pub kind: ErrorKind,
    pub message: String,
}

impl TaskError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
}

/// One dispatch of a task to its tool
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttemptRecord {
    pub attempt: u32,
    pub started_at: DateTime<Utc>,
    pub duration_ms: u64,
    pub error: Option<TaskError>,
}

/// Recorded human approval for an escalation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Approval {
    pub reason: String,
    pub option: String,
    pub approved_at: DateTime<Utc>,
}

/// A task inside a graph
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub id: TaskId,
    pub description: String,
    pub tool: Option<String>,
    pub params: Map<String, Value>,
    pub dependencies: BTreeSet<TaskId>,
    pub destructive: bool,
    pub estimated_cost: f64,
    pub status: TaskStatus,
    pub attempt_count: u32,
    /// Attempts granted on top of the configured maximum by a human
    #[serde(default)]
    pub extra_attempts: u32,
    pub last_error: Option<TaskError>,
    #[serde(default)]
    pub attempts: Vec<AttemptRecord>,
    #[serde(default)]
    pub approvals: Vec<Approval>,
    #[serde(default)]
    pub output: Option<Value>,
    /// What the last successful dispatch changed
    #[serde(default)]
    pub side_effect: Option<SideEffect>,
    /// Steps returned by the reasoning collaborator, when it was consulted
    #[serde(default)]
    pub reasoning: Vec<String>,
}

impl Task {
    fn from_spec(spec: TaskSpec) -> Self {
        Self {
            id: spec.id,
            description: spec.description,
            tool: spec.tool,
            params: spec.params,
            dependencies: spec.dependencies.into_iter().collect(),
            destructive: spec.destructive,
            estimated_cost: spec.estimated_cost,
            status: TaskStatus::Pending,
            attempt_count: 0,
            extra_attempts: 0,
            last_error: None,
            attempts: Vec::new(),
            approvals: Vec::new(),
            output: None,
            side_effect: None,
            reasoning: Vec::new(),
        }
    }

    pub fn has_approval(&self, reason: &str) -> bool {
        self.approvals.iter().any(|a| a.reason == reason)
    }
}

/// A non-terminal task that cannot run because an ancestor failed
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockedTask {
    pub id: TaskId,
    pub blocked_by: Vec<TaskId>,
}

/// Task counts per status
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusCounts {
    pub total: usize,
    pub pending: usize,
    pub ready: usize,
    pub running: usize,
    pub awaiting_human: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub skipped: usize,
}

impl StatusCounts {
    /// Share of tasks that succeeded or were skipped, 0..=100
    pub fn percent_complete(&self) -> f64 {
        if self.total == 0 {
            return 100.0;
        }
        (self.succeeded + self.skipped) as f64 * 100.0 / self.total as f64
    }
}

/// Validated dependency graph of tasks
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TaskGraph {
    tasks: BTreeMap<TaskId, Task>,
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Visit {
    OnStack,
    Done,
}

impl TaskGraph {
    /// Build a graph from task specs plus extra edges
    ///
    /// Edges given separately are merged with each spec's own `dependencies`.
    pub fn build(specs: Vec<TaskSpec>, edges: Vec<Dependency>) -> Result<Self, ValidationError> {
        if specs.is_empty() {
            return Err(ValidationError::EmptyGraph);
        }

        let mut tasks = BTreeMap::new();
        for spec in specs {
            if tasks.contains_key(&spec.id) {
                return Err(ValidationError::DuplicateTask(spec.id));
            }
            tasks.insert(spec.id.clone(), Task::from_spec(spec));
        }

        for edge in edges {
            let Some(task) = tasks.get_mut(&edge.task) else {
                return Err(ValidationError::DanglingDependency {
                    missing: edge.task.clone(),
                    task: edge.task,
                });
            };
            task.dependencies.insert(edge.depends_on);
        }

        for task in tasks.values() {
            for dep in &task.dependencies {
                if dep == &task.id {
                    return Err(ValidationError::SelfDependency(task.id.clone()));
                }
                if !tasks.contains_key(dep) {
                    return Err(ValidationError::DanglingDependency {
                        task: task.id.clone(),
                        missing: dep.clone(),
                    });
                }
            }
        }

        let graph = Self { tasks };
        graph.check_acyclic()?;
        Ok(graph)
    }

    pub fn from_specs(specs: Vec<TaskSpec>) -> Result<Self, ValidationError> {
        Self::build(specs, Vec::new())
    }

    /// Iterative depth-first search; a node seen again while still on the
    /// recursion stack closes a cycle.
    fn check_acyclic(&self) -> Result<(), ValidationError> {
        let mut state: HashMap<&str, Visit> = HashMap::new();

        for root in self.tasks.keys() {
            if state.contains_key(root.as_str()) {
                continue;
            }

            let mut stack: Vec<(&str, Vec<&str>, usize)> =
                vec![(root.as_str(), self.deps_of(root), 0)];
            state.insert(root.as_str(), Visit::OnStack);

            while let Some((node, deps, idx)) = stack.last_mut() {
                if *idx < deps.len() {
                    let next = deps[*idx];
                    *idx += 1;
                    match state.get(next) {
                        Some(Visit::OnStack) => {
                            let start = stack.iter().position(|(n, _, _)| *n == next).unwrap_or(0);
                            let mut path: Vec<String> =
                                stack[start..].iter().map(|(n, _, _)| n.to_string()).collect();
                            path.push(next.to_string());
                            return Err(ValidationError::Cycle { path });
                        }
                        Some(Visit::Done) => {}
                        None => {
                            state.insert(next, Visit::OnStack);
                            stack.push((next, self.deps_of(next), 0));
                        }
                    }
                } else {
                    state.insert(*node, Visit::Done);
                    stack.pop();
                }
            }
        }

        Ok(())
    }

    fn deps_of(&self, id: &str) -> Vec<&str> {
        self.tasks
            .get(id)
            .map(|t| t.dependencies.iter().map(String::as_str).collect())
            .unwrap_or_default()
    }

    /// Tasks whose dependencies are all succeeded or skipped
    ///
    /// Recomputed from current statuses on every call.
    pub fn ready_tasks(&self) -> BTreeSet<TaskId> {
        self.tasks
            .values()
            .filter(|t| matches!(t.status, TaskStatus::Pending | TaskStatus::Ready))
            .filter(|t| self.dependencies_satisfied(&t.id))
            .map(|t| t.id.clone())
            .collect()
    }

    pub fn dependencies_satisfied(&self, id: &str) -> bool {
        self.tasks.get(id).is_some_and(|task| {
            task.dependencies.iter().all(|dep| {
                self.tasks
                    .get(dep)
                    .is_some_and(|d| d.status.satisfies_dependency())
            })
        })
    }

    /// Move a task to `status`, returning its previous status
    pub fn mark_status(&mut self, id: &str, status: TaskStatus) -> Result<TaskStatus, EngineError> {
        let task = self
            .tasks
            .get_mut(id)
            .ok_or_else(|| EngineError::TaskNotFound(id.to_string()))?;

        let previous = task.status;
        if !previous.can_transition_to(status) {
            return Err(EngineError::InvalidTransition {
                task: id.to_string(),
                from: previous.to_string(),
                to: status.to_string(),
            });
        }

        task.status = status;
        Ok(previous)
    }

    pub fn task(&self, id: &str) -> Option<&Task> {
        self.tasks.get(id)
    }

    pub(crate) fn task_mut(&mut self, id: &str) -> Result<&mut Task, EngineError> {
        self.tasks
            .get_mut(id)
            .ok_or_else(|| EngineError::TaskNotFound(id.to_string()))
    }

    pub fn tasks(&self) -> impl Iterator<Item = &Task> {
        self.tasks.values()
    }

    pub fn ids(&self) -> impl Iterator<Item = &TaskId> {
        self.tasks.keys()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.tasks.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    pub fn status(&self, id: &str) -> Option<TaskStatus> {
        self.tasks.get(id).map(|t| t.status)
    }

    /// All dependency edges, ordered by task id
    pub fn edges(&self) -> Vec<Dependency> {
        self.tasks
            .values()
            .flat_map(|t| {
                t.dependencies
                    .iter()
                    .map(move |d| Dependency::new(t.id.clone(), d.clone()))
            })
            .collect()
    }

    /// Direct dependents of a task
    pub fn dependents(&self, id: &str) -> Vec<TaskId> {
        self.tasks
            .values()
            .filter(|t| t.dependencies.contains(id))
            .map(|t| t.id.clone())
            .collect()
    }

    pub fn all_terminal(&self) -> bool {
        self.tasks.values().all(|t| t.status.is_terminal())
    }

    pub fn counts(&self) -> StatusCounts {
        let mut counts = StatusCounts {
            total: self.tasks.len(),
            ..Default::default()
        };
        for task in self.tasks.values() {
            match task.status {
                TaskStatus::Pending => counts.pending += 1,
                TaskStatus::Ready => counts.ready += 1,
                TaskStatus::Running => counts.running += 1,
                TaskStatus::AwaitingHuman => counts.awaiting_human += 1,
                TaskStatus::Succeeded => counts.succeeded += 1,
                TaskStatus::Failed => counts.failed += 1,
                TaskStatus::Skipped => counts.skipped += 1,
            }
        }
        counts
    }

    /// Non-terminal tasks with at least one failed ancestor
    pub fn blocked(&self) -> Vec<BlockedTask> {
        let mut blocked = Vec::new();

        for task in self.tasks.values().filter(|t| !t.status.is_terminal()) {
            let mut failed = BTreeSet::new();
            let mut seen = BTreeSet::new();
            let mut frontier: Vec<&str> = task.dependencies.iter().map(String::as_str).collect();

            while let Some(id) = frontier.pop() {
                if !seen.insert(id) {
                    continue;
                }
                let Some(ancestor) = self.tasks.get(id) else {
                    continue;
                };
                if ancestor.status == TaskStatus::Failed {
                    failed.insert(id.to_string());
                }
                frontier.extend(ancestor.dependencies.iter().map(String::as_str));
            }

            if !failed.is_empty() {
                blocked.push(BlockedTask {
                    id: task.id.clone(),
                    blocked_by: failed.into_iter().collect(),
                });
            }
        }

        blocked
    }

    /// Whether the graph can still end with every task succeeded or skipped
    pub fn can_complete(&self) -> bool {
        !self.tasks.values().any(|t| t.status == TaskStatus::Failed)
    }

    /// Put failed tasks back to pending for a targeted retry
    ///
    /// Attempt counters restart; the attempt history is kept.
    pub fn reset_failed(&mut self) -> Vec<TaskId> {
        let mut reset = Vec::new();
        for task in self.tasks.values_mut() {
            if task.status == TaskStatus::Failed {
                task.status = TaskStatus::Pending;
                task.attempt_count = 0;
                task.extra_attempts = 0;
                task.last_error = None;
                reset.push(task.id.clone());
            }
        }
        reset
    }

    /// Put tasks that were in flight when a session stopped back to pending
    pub fn reset_interrupted(&mut self) -> Vec<TaskId> {
        let mut reset = Vec::new();
        for task in self.tasks.values_mut() {
            if matches!(
                task.status,
                TaskStatus::Running | TaskStatus::Ready | TaskStatus::AwaitingHuman
            ) {
                task.status = TaskStatus::Pending;
                reset.push(task.id.clone());
            }
        }
        reset
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec(id: &str) -> TaskSpec {
        TaskSpec::new(id, "file_operations")
    }

    #[test]
    fn test_build_rejects_two_node_cycle() {
        let result = TaskGraph::build(
            vec![spec("a").depends_on("b"), spec("b").depends_on("a")],
            vec![],
        );

        match result {
            Err(ValidationError::Cycle { path }) => {
                assert_eq!(path.first(), path.last());
                assert!(path.contains(&"a".to_string()));
                assert!(path.contains(&"b".to_string()));
            }
            other => panic!("expected cycle, got {:?}", other),
        }
    }

    #[test]
    fn test_build_rejects_cycle_through_explicit_edges() {
        let result = TaskGraph::build(
            vec![spec("a"), spec("b"), spec("c")],
            vec![
                Dependency::new("b", "a"),
                Dependency::new("c", "b"),
                Dependency::new("a", "c"),
            ],
        );
        assert!(matches!(result, Err(ValidationError::Cycle { .. })));
    }

    #[test]
    fn test_build_rejects_dangling_dependency() {
        let result = TaskGraph::build(vec![spec("a").depends_on("ghost")], vec![]);
        assert_eq!(
            result.unwrap_err(),
            ValidationError::DanglingDependency {
                task: "a".into(),
                missing: "ghost".into()
            }
        );
    }

    #[test]
    fn test_build_rejects_edge_from_unknown_task() {
        let result = TaskGraph::build(vec![spec("a")], vec![Dependency::new("ghost", "a")]);
        assert!(matches!(
            result,
            Err(ValidationError::DanglingDependency { .. })
        ));
    }

    #[test]
    fn test_build_rejects_self_and_duplicate() {
        assert_eq!(
            TaskGraph::build(vec![spec("a").depends_on("a")], vec![]).unwrap_err(),
            ValidationError::SelfDependency("a".into())
        );
        assert_eq!(
            TaskGraph::build(vec![spec("a"), spec("a")], vec![]).unwrap_err(),
            ValidationError::DuplicateTask("a".into())
        );
        assert_eq!(
            TaskGraph::build(vec![], vec![]).unwrap_err(),
            ValidationError::EmptyGraph
        );
    }

    #[test]
    fn test_diamond_is_accepted() {
        let graph = TaskGraph::from_specs(vec![
            spec("a"),
            spec("b").depends_on("a"),
            spec("c").depends_on("a"),
            spec("d").depends_on("b").depends_on("c"),
        ])
        .unwrap();

        assert_eq!(graph.len(), 4);
        assert_eq!(graph.edges().len(), 4);
        assert_eq!(graph.dependents("a"), vec!["b".to_string(), "c".to_string()]);
    }

    #[test]
    fn test_ready_tasks_recomputed_from_statuses() {
        let mut graph =
            TaskGraph::from_specs(vec![spec("a"), spec("b").depends_on("a")]).unwrap();

        assert_eq!(graph.ready_tasks(), BTreeSet::from(["a".to_string()]));

        graph.mark_status("a", TaskStatus::Ready).unwrap();
        graph.mark_status("a", TaskStatus::Running).unwrap();
        assert!(graph.ready_tasks().is_empty());

        graph.mark_status("a", TaskStatus::Succeeded).unwrap();
        assert_eq!(graph.ready_tasks(), BTreeSet::from(["b".to_string()]));
    }

    #[test]
    fn test_skipped_dependency_satisfies() {
        let mut graph =
            TaskGraph::from_specs(vec![spec("a"), spec("b").depends_on("a")]).unwrap();
        graph.mark_status("a", TaskStatus::Skipped).unwrap();
        assert!(graph.ready_tasks().contains("b"));
    }

    #[test]
    fn test_mark_status_enforces_state_machine() {
        let mut graph = TaskGraph::from_specs(vec![spec("a")]).unwrap();

        let err = graph.mark_status("a", TaskStatus::Succeeded).unwrap_err();
        assert!(matches!(err, EngineError::InvalidTransition { .. }));

        assert_eq!(
            graph.mark_status("a", TaskStatus::Ready).unwrap(),
            TaskStatus::Pending
        );
        assert!(matches!(
            graph.mark_status("missing", TaskStatus::Ready),
            Err(EngineError::TaskNotFound(_))
        ));
    }

    #[test]
    fn test_terminal_statuses_are_final() {
        for terminal in [TaskStatus::Succeeded, TaskStatus::Failed, TaskStatus::Skipped] {
            for next in [
                TaskStatus::Pending,
                TaskStatus::Ready,
                TaskStatus::Running,
                TaskStatus::AwaitingHuman,
                TaskStatus::Succeeded,
                TaskStatus::Failed,
                TaskStatus::Skipped,
            ] {
                assert!(!terminal.can_transition_to(next));
            }
        }
    }

    #[test]
    fn test_blocked_reports_transitive_failed_ancestors() {
        let mut graph = TaskGraph::from_specs(vec![
            spec("a"),
            spec("b").depends_on("a"),
            spec("c").depends_on("b"),
            spec("d"),
        ])
        .unwrap();

        graph.mark_status("a", TaskStatus::Ready).unwrap();
        graph.mark_status("a", TaskStatus::Running).unwrap();
        graph.mark_status("a", TaskStatus::Failed).unwrap();

        let blocked = graph.blocked();
        assert_eq!(blocked.len(), 2);
        assert_eq!(blocked[0].id, "b");
        assert_eq!(blocked[1].id, "c");
        assert_eq!(blocked[1].blocked_by, vec!["a".to_string()]);
        assert!(!graph.can_complete());
    }

    #[test]
    fn test_reset_failed_keeps_history() {
        let mut graph = TaskGraph::from_specs(vec![spec("a")]).unwrap();
        graph.mark_status("a", TaskStatus::Ready).unwrap();
        graph.mark_status("a", TaskStatus::Running).unwrap();
        {
            let task = graph.task_mut("a").unwrap();
            task.attempt_count = 3;
            task.attempts.push(AttemptRecord {
                attempt: 1,
                started_at: Utc::now(),
                duration_ms: 5,
                error: Some(TaskError::new(ErrorKind::Timeout, "slow")),
            });
        }
        graph.mark_status("a", TaskStatus::Failed).unwrap();

        assert_eq!(graph.reset_failed(), vec!["a".to_string()]);
        let task = graph.task("a").unwrap();
        assert_eq!(task.status, TaskStatus::Pending);
        assert_eq!(task.attempt_count, 0);
        assert_eq!(task.attempts.len(), 1);
    }

    #[test]
    fn test_counts_and_percent() {
        let mut graph = TaskGraph::from_specs(vec![spec("a"), spec("b")]).unwrap();
        graph.mark_status("a", TaskStatus::Skipped).unwrap();

        let counts = graph.counts();
        assert_eq!(counts.total, 2);
        assert_eq!(counts.skipped, 1);
        assert_eq!(counts.pending, 1);
        assert_eq!(counts.percent_complete(), 50.0);
    }

    #[test]
    fn test_graph_serde_preserves_statuses() {
        let mut graph = TaskGraph::from_specs(vec![spec("a"), spec("b").depends_on("a")]).unwrap();
        graph.mark_status("a", TaskStatus::Skipped).unwrap();

        let json = serde_json::to_string(&graph).unwrap();
        let decoded: TaskGraph = serde_json::from_str(&json).unwrap();
        assert_eq!(decoded, graph);
        assert_eq!(decoded.status("a"), Some(TaskStatus::Skipped));
    }
}
