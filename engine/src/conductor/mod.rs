//! Conductor System
//!
//! Turns a goal into an executed task graph: planning, orchestration, human
//! escalation and adaptation from past outcomes.

pub mod adaptation;
pub mod collaborators;
pub mod escalation;
pub mod orchestrator;
pub mod planner;
pub mod runner;
pub mod types;

pub use adaptation::{AdaptationEngine, OutcomeObserver};
pub use collaborators::{Decomposer, Reasoner, Reasoning, StaticDecomposer, TaskGraphSeed};
pub use escalation::{
    resolve_escalation, EscalationChannel, EscalationInbox, EscalationOutcome, EscalationReason,
    EscalationRequest, HumanResponse, QueuedEscalations, StaticResponder,
};
pub use orchestrator::{CancelHandle, Orchestrator};
pub use planner::Planner;
pub use runner::GoalRunner;
pub use types::{ExecutionPlan, FailedTask, Goal, GoalReport, GoalSession, GoalStatus};
