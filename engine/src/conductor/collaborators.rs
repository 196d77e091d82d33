//! External collaborators of the pipeline
//!
//! Decomposition turns goal text into a task graph seed; reasoning fills in
//! a tool and parameters for a task that has none. Both are traits so the
//! text-completion service behind them stays outside the core.

use crate::graph::{Dependency, TaskGraph, TaskSpec};
use async_trait::async_trait;
use sdk::errors::{EngineError, ValidationError};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::path::Path;

/// Tasks and edges proposed for a goal, not yet validated
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskGraphSeed {
    #[serde(default)]
    pub goal: String,
    #[serde(default)]
    pub context: Option<String>,
    #[serde(default)]
    pub tasks: Vec<TaskSpec>,
    #[serde(default)]
    pub edges: Vec<Dependency>,
}

impl TaskGraphSeed {
    pub fn new(goal: impl Into<String>, tasks: Vec<TaskSpec>) -> Self {
        Self {
            goal: goal.into(),
            context: None,
            tasks,
            edges: Vec::new(),
        }
    }

    pub fn with_edges(mut self, edges: Vec<Dependency>) -> Self {
        self.edges = edges;
        self
    }

    pub fn into_graph(self) -> Result<TaskGraph, ValidationError> {
        TaskGraph::build(self.tasks, self.edges)
    }

    /// Parse a goal file; `.json` files are JSON, anything else TOML
    pub fn load(path: &Path) -> Result<Self, EngineError> {
        let contents = std::fs::read_to_string(path).map_err(|e| {
            EngineError::Decomposition(format!("Failed to read {}: {}", path.display(), e))
        })?;

        let is_json = path
            .extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| ext.eq_ignore_ascii_case("json"));

        if is_json {
            Self::from_json_str(&contents)
        } else {
            Self::from_toml_str(&contents)
        }
    }

    pub fn from_toml_str(contents: &str) -> Result<Self, EngineError> {
        toml::from_str(contents)
            .map_err(|e| EngineError::Decomposition(format!("Invalid goal file: {}", e)))
    }

    pub fn from_json_str(contents: &str) -> Result<Self, EngineError> {
        serde_json::from_str(contents)
            .map_err(|e| EngineError::Decomposition(format!("Invalid goal file: {}", e)))
    }
}

#[async_trait]
pub trait Decomposer: Send + Sync {
    /// Failures surface as `EngineError::Decomposition`
    async fn decompose(
        &self,
        goal: &str,
        context: Option<&str>,
    ) -> Result<TaskGraphSeed, EngineError>;
}

/// Decomposition from a pre-written seed (goal files, tests)
#[derive(Debug, Clone)]
pub struct StaticDecomposer {
    seed: TaskGraphSeed,
}

impl StaticDecomposer {
    pub fn new(seed: TaskGraphSeed) -> Self {
        Self { seed }
    }

    pub fn from_file(path: &Path) -> Result<Self, EngineError> {
        Ok(Self::new(TaskGraphSeed::load(path)?))
    }

    pub fn seed(&self) -> &TaskGraphSeed {
        &self.seed
    }
}

#[async_trait]
impl Decomposer for StaticDecomposer {
    async fn decompose(
        &self,
        goal: &str,
        context: Option<&str>,
    ) -> Result<TaskGraphSeed, EngineError> {
        if self.seed.tasks.is_empty() {
            return Err(EngineError::Decomposition(format!(
                "no tasks for goal '{}'",
                goal
            )));
        }

        let mut seed = self.seed.clone();
        if seed.goal.is_empty() {
            seed.goal = goal.to_string();
        }
        if seed.context.is_none() {
            seed.context = context.map(String::from);
        }
        Ok(seed)
    }
}

/// Chain-of-thought answer for a task that lacks a tool
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Reasoning {
    pub steps: Vec<String>,
    pub conclusion: String,
    /// Tool the reasoning settled on
    #[serde(default)]
    pub tool: Option<String>,
    /// Parameters merged over the task's own
    #[serde(default)]
    pub parameters: Map<String, Value>,
}

#[async_trait]
pub trait Reasoner: Send + Sync {
    async fn reason(&self, problem: &str) -> Result<Reasoning, EngineError>;
}
