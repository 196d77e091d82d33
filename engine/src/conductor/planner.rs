//! Conductor Planner
//!
//! Turns a task graph into an [`ExecutionPlan`]: Kahn layering into parallel
//! groups, each group ordered so the work memory trusts most runs first.
//!
//! Only `pending`/`ready` tasks are planned. Anything already running or
//! terminal is treated as scheduled outside the plan, which is what makes
//! re-planning mid-execution safe. Tasks behind a failed ancestor are left
//! out and listed as blocked.

use crate::conductor::types::ExecutionPlan;
use crate::config::PlannerConfig;
use crate::graph::{Task, TaskGraph, TaskId, TaskStatus};
use crate::memory::{MemoryStore, PatternKey, PatternSnapshot};
use chrono::Utc;
use sdk::errors::PlanningError;
use std::collections::{BTreeMap, BTreeSet};
use tracing::debug;

pub struct Planner {
    config: PlannerConfig,
}

/// Ordering key of one task inside its group
struct Priority<'a> {
    id: &'a str,
    confidence: f64,
    cost: f64,
}

impl Planner {
    pub fn new(config: PlannerConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &PlannerConfig {
        &self.config
    }

    /// Plan against the current state of the memory store
    pub async fn plan(
        &self,
        graph: &TaskGraph,
        memory: &MemoryStore,
    ) -> Result<ExecutionPlan, PlanningError> {
        let snapshot = memory.snapshot().await;
        self.plan_with(graph, &snapshot)
    }

    /// Plan against a fixed pattern snapshot
    pub fn plan_with(
        &self,
        graph: &TaskGraph,
        patterns: &PatternSnapshot,
    ) -> Result<ExecutionPlan, PlanningError> {
        let mut schedulable: BTreeMap<&str, &Task> = graph
            .tasks()
            .filter(|t| matches!(t.status, TaskStatus::Pending | TaskStatus::Ready))
            .map(|t| (t.id.as_str(), t))
            .collect();

        // A failed ancestor makes a task unreachable until the failure is retried
        let mut blocked: BTreeSet<&str> = BTreeSet::new();
        loop {
            let before = blocked.len();
            for (&id, task) in &schedulable {
                if blocked.contains(id) {
                    continue;
                }
                let stuck = task.dependencies.iter().any(|dep| {
                    blocked.contains(dep.as_str()) || graph.status(dep) == Some(TaskStatus::Failed)
                });
                if stuck {
                    blocked.insert(id);
                }
            }
            if blocked.len() == before {
                break;
            }
        }
        schedulable.retain(|id, _| !blocked.contains(id));

        // In-degree only counts dependencies that are themselves planned
        let mut indegree: BTreeMap<&str, usize> = BTreeMap::new();
        let mut dependents: BTreeMap<&str, Vec<&str>> = BTreeMap::new();
        for (&id, task) in &schedulable {
            let planned_deps: Vec<&str> = task
                .dependencies
                .iter()
                .map(String::as_str)
                .filter(|dep| schedulable.contains_key(dep))
                .collect();
            indegree.insert(id, planned_deps.len());
            for dep in planned_deps {
                dependents.entry(dep).or_default().push(id);
            }
        }

        let mut groups: Vec<Vec<TaskId>> = Vec::new();
        let mut low_confidence = BTreeSet::new();
        let mut layer: Vec<&str> = indegree
            .iter()
            .filter(|(_, degree)| **degree == 0)
            .map(|(id, _)| *id)
            .collect();
        let mut scheduled = 0usize;

        while !layer.is_empty() {
            let mut ranked: Vec<Priority> = layer
                .iter()
                .filter_map(|id| schedulable.get(id))
                .map(|task| {
                    let (confidence, low) = self.confidence_of(task, patterns);
                    if low {
                        low_confidence.insert(task.id.clone());
                    }
                    Priority {
                        id: task.id.as_str(),
                        confidence,
                        cost: task.estimated_cost,
                    }
                })
                .collect();

            ranked.sort_by(|a, b| {
                b.confidence
                    .total_cmp(&a.confidence)
                    .then(a.cost.total_cmp(&b.cost))
                    .then(a.id.cmp(b.id))
            });

            let mut next = Vec::new();
            for id in &layer {
                for dependent in dependents.get(id).into_iter().flatten() {
                    if let Some(degree) = indegree.get_mut(dependent) {
                        *degree -= 1;
                        if *degree == 0 {
                            next.push(*dependent);
                        }
                    }
                }
            }

            scheduled += ranked.len();
            groups.push(ranked.into_iter().map(|p| p.id.to_string()).collect());
            next.sort_unstable();
            layer = next;
        }

        if scheduled < schedulable.len() {
            let planned: BTreeSet<&str> = groups.iter().flatten().map(String::as_str).collect();
            let remaining = schedulable
                .keys()
                .filter(|id| !planned.contains(*id))
                .map(|id| id.to_string())
                .collect();
            return Err(PlanningError::UnschedulableGraph { remaining });
        }

        debug!(
            "Planned {} task(s) in {} group(s), {} low-confidence, {} blocked",
            scheduled,
            groups.len(),
            low_confidence.len(),
            blocked.len()
        );

        Ok(ExecutionPlan {
            groups,
            low_confidence,
            blocked: blocked.into_iter().map(str::to_string).collect(),
            created_at: Utc::now(),
        })
    }

    /// Learned confidence for a task and whether it is below the threshold
    fn confidence_of(&self, task: &Task, patterns: &PatternSnapshot) -> (f64, bool) {
        let Some(tool) = task.tool.as_deref() else {
            return (self.config.default_confidence, false);
        };

        match patterns.get(&PatternKey::from_params(tool, &task.params)) {
            Some(pattern) if pattern.sample_count > 0 => {
                let confidence = pattern.confidence();
                let low = pattern.sample_count >= self.config.min_samples
                    && confidence < self.config.low_confidence_threshold;
                (confidence, low)
            }
            _ => (self.config.default_confidence, false),
        }
    }
}
