//! Goal runner
//!
//! Entry point for a goal's whole life: decomposition, graph validation,
//! execution, adaptation summary and session persistence. Resume and retry
//! reload a stored session and run whatever is left.

use crate::conductor::adaptation::AdaptationEngine;
use crate::conductor::collaborators::Decomposer;
use crate::conductor::orchestrator::Orchestrator;
use crate::conductor::types::{Goal, GoalSession, GoalStatus};
use crate::db::SessionRepository;
use sdk::errors::EngineError;
use std::sync::Arc;
use tracing::{info, warn};

pub struct GoalRunner {
    orchestrator: Arc<Orchestrator>,
    adaptation: Arc<AdaptationEngine>,
    sessions: Arc<SessionRepository>,
}

impl GoalRunner {
    pub fn new(
        orchestrator: Arc<Orchestrator>,
        adaptation: Arc<AdaptationEngine>,
        sessions: Arc<SessionRepository>,
    ) -> Self {
        Self {
            orchestrator,
            adaptation,
            sessions,
        }
    }

    pub fn orchestrator(&self) -> &Arc<Orchestrator> {
        &self.orchestrator
    }

    /// Decompose, validate and run a new goal.
    ///
    /// Decomposition and validation errors are returned before anything is
    /// stored or executed.
    pub async fn submit(
        &self,
        goal_text: &str,
        context: Option<&str>,
        decomposer: &dyn Decomposer,
    ) -> Result<GoalSession, EngineError> {
        let seed = decomposer.decompose(goal_text, context).await?;
        let context = seed.context.clone();
        let graph = seed.into_graph()?;

        let goal = Goal::new(goal_text, graph).with_context(context);
        info!(
            "Goal {} accepted with {} task(s): {}",
            goal.id,
            goal.graph.len(),
            goal.text
        );
        self.save(&GoalSession::new(goal.clone(), None)).await?;

        self.run(goal).await
    }

    /// Continue an interrupted goal from its stored session
    pub async fn resume(&self, goal_id: &str) -> Result<GoalSession, EngineError> {
        let session = self.load(goal_id).await?;
        if session.goal.status == GoalStatus::Completed {
            info!("Goal {} already completed; nothing to resume", goal_id);
            return Ok(session);
        }

        let mut goal = session.goal;
        let reset = goal.graph.reset_interrupted();
        info!(
            "Goal {} resuming; {} interrupted task(s) back to pending",
            goal_id,
            reset.len()
        );
        self.run(goal).await
    }

    /// Run failed tasks again, plus everything they blocked
    pub async fn retry_failed(&self, goal_id: &str) -> Result<GoalSession, EngineError> {
        let session = self.load(goal_id).await?;
        let mut goal = session.goal;

        let reset = goal.graph.reset_failed();
        if reset.is_empty() {
            info!("Goal {} has no failed tasks to retry", goal_id);
            return Ok(GoalSession::new(goal, session.report));
        }

        info!("Goal {} retrying {} failed task(s): {:?}", goal_id, reset.len(), reset);
        self.run(goal).await
    }

    pub async fn session(&self, goal_id: &str) -> Result<GoalSession, EngineError> {
        self.load(goal_id).await
    }

    pub async fn sessions(&self, limit: usize) -> Result<Vec<GoalSession>, EngineError> {
        self.sessions.list(limit).await.map_err(database_error)
    }

    async fn run(&self, mut goal: Goal) -> Result<GoalSession, EngineError> {
        let report = match self.orchestrator.execute(&mut goal).await {
            Ok(report) => report,
            Err(e) => {
                self.save(&GoalSession::new(goal, None)).await?;
                return Err(e);
            }
        };

        match self.adaptation.summarize(&goal.id).await {
            Ok(summary) => info!(
                "Goal {} adaptation summary: {} outcome(s), {} succeeded, {} failed",
                goal.id, summary.outcomes, summary.succeeded, summary.failed
            ),
            Err(e) => warn!("Failed to summarize goal {}: {:#}", goal.id, e),
        }
        if let Err(e) = self.adaptation.memory().flush().await {
            warn!("Failed to flush memory after goal {}: {:#}", goal.id, e);
        }

        let session = GoalSession::new(goal, Some(report));
        self.save(&session).await?;
        Ok(session)
    }

    async fn load(&self, goal_id: &str) -> Result<GoalSession, EngineError> {
        self.sessions
            .load(goal_id)
            .await
            .map_err(database_error)?
            .ok_or_else(|| EngineError::GoalNotFound(goal_id.to_string()))
    }

    async fn save(&self, session: &GoalSession) -> Result<(), EngineError> {
        self.sessions.save(session).await.map_err(database_error)
    }
}

fn database_error(error: anyhow::Error) -> EngineError {
    EngineError::Database(format!("{:#}", error))
}
