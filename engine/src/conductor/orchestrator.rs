//! Conductor Orchestrator
//!
//! Drives every task of a goal from `pending` to a terminal status.
//!
//! Plan groups are barriers: group `i + 1` starts only once every task of
//! group `i` is terminal (or blocked behind a failed ancestor). Inside a
//! group at most `concurrency` tool invocations run at once. Workers never
//! touch the graph; they report back over a single mpsc channel and the
//! coordinator loop applies every status change, so the state machine has
//! exactly one writer.

use crate::conductor::adaptation::OutcomeObserver;
use crate::conductor::collaborators::{Reasoner, Reasoning};
use crate::conductor::escalation::{
    resolve_escalation, EscalationChannel, EscalationOutcome, EscalationReason, EscalationRequest,
};
use crate::conductor::planner::Planner;
use crate::conductor::types::{Goal, GoalReport, GoalSession, GoalStatus};
use crate::config::OrchestratorConfig;
use crate::db::SessionRepository;
use crate::graph::{Approval, AttemptRecord, Task, TaskError, TaskId, TaskStatus};
use crate::memory::{MemoryStore, OutcomeRecord, OutcomeStatus};
use crate::message_bus::{Event, MessageBus};
use crate::risk_assessor::{RiskAssessment, RiskAssessor};
use crate::tools::ToolGateway;
use chrono::{DateTime, Utc};
use futures::FutureExt;
use sdk::errors::EngineError;
use sdk::types::{ErrorKind, ToolError, ToolRequest, ToolResult};
use std::collections::{HashSet, VecDeque};
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

/// Buffer of the worker result channel
const RESULT_CHANNEL_SIZE: usize = 64;

/// Requests cancellation of the goals the orchestrator is running.
///
/// Each `execute` call is its own cancellation scope: `cancel` reaches the
/// goals already running when it is called and never a goal started after
/// it. Cancelling skips every task that has not started yet; running tasks
/// finish and their outcome is still recorded.
#[derive(Clone)]
pub struct CancelHandle {
    /// Bumped once per cancel request
    tx: Arc<watch::Sender<u64>>,
}

impl CancelHandle {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(0);
        Self { tx: Arc::new(tx) }
    }

    pub fn cancel(&self) {
        self.tx.send_modify(|generation| *generation += 1);
    }

    /// Open a scope that only sees cancellations requested from now on
    fn scope(&self) -> CancelScope {
        let rx = self.tx.subscribe();
        let baseline = *rx.borrow();
        CancelScope { rx, baseline }
    }
}

/// Cancellation as seen by one `execute` call
struct CancelScope {
    rx: watch::Receiver<u64>,
    baseline: u64,
}

impl CancelScope {
    fn requested(&mut self) -> bool {
        *self.rx.borrow_and_update() > self.baseline
    }
}

impl Default for CancelHandle {
    fn default() -> Self {
        Self::new()
    }
}

pub struct Orchestrator {
    config: OrchestratorConfig,
    planner: Planner,
    memory: Arc<MemoryStore>,
    gateway: Arc<ToolGateway>,
    escalation: Arc<dyn EscalationChannel>,
    assessor: RiskAssessor,
    observer: Option<Arc<dyn OutcomeObserver>>,
    reasoner: Option<Arc<dyn Reasoner>>,
    bus: Option<MessageBus>,
    sessions: Option<Arc<SessionRepository>>,
    cancel: CancelHandle,
}

impl Orchestrator {
    pub fn new(
        config: OrchestratorConfig,
        planner: Planner,
        memory: Arc<MemoryStore>,
        gateway: Arc<ToolGateway>,
        escalation: Arc<dyn EscalationChannel>,
    ) -> Result<Self, EngineError> {
        let assessor = RiskAssessor::new().map_err(|e| EngineError::Config(e.to_string()))?;
        Ok(Self {
            config,
            planner,
            memory,
            gateway,
            escalation,
            assessor,
            observer: None,
            reasoner: None,
            bus: None,
            sessions: None,
            cancel: CancelHandle::new(),
        })
    }

    /// Receive every terminal outcome (normally the adaptation engine)
    pub fn with_observer(mut self, observer: Arc<dyn OutcomeObserver>) -> Self {
        self.observer = Some(observer);
        self
    }

    /// Consulted for tasks without a usable tool
    pub fn with_reasoner(mut self, reasoner: Arc<dyn Reasoner>) -> Self {
        self.reasoner = Some(reasoner);
        self
    }

    pub fn with_bus(mut self, bus: MessageBus) -> Self {
        self.bus = Some(bus);
        self
    }

    /// Checkpoint the goal after every group
    pub fn with_sessions(mut self, sessions: Arc<SessionRepository>) -> Self {
        self.sessions = Some(sessions);
        self
    }

    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    pub fn gateway(&self) -> &Arc<ToolGateway> {
        &self.gateway
    }

    pub fn cancel_handle(&self) -> CancelHandle {
        self.cancel.clone()
    }

    /// Plan and run a goal until every reachable task is terminal.
    ///
    /// A planning error aborts before any task runs. The goal is mutated in
    /// place; the returned report is derived from its final state.
    pub async fn execute(&self, goal: &mut Goal) -> Result<GoalReport, EngineError> {
        let cancel = self.cancel.scope();
        let plan = match self.planner.plan(&goal.graph, &self.memory).await {
            Ok(plan) => plan,
            Err(e) => {
                warn!("Goal {} could not be planned: {}", goal.id, e);
                goal.status = GoalStatus::Failed;
                return Err(e.into());
            }
        };

        info!(
            "Goal {} starting: {} task(s) in {} group(s), {} low-confidence",
            goal.id,
            plan.task_count(),
            plan.groups.len(),
            plan.low_confidence.len()
        );

        goal.status = GoalStatus::InProgress;
        let groups = plan.groups.clone();
        goal.plan = Some(plan);
        self.publish(Event::GoalStarted {
            goal_id: goal.id.clone(),
            task_count: goal.graph.len(),
            group_count: groups.len(),
        })
        .await;

        let mut run = Run::new(self, goal, cancel);
        let driven = run.drive(groups).await;
        run.shutdown().await;

        if let Err(e) = driven {
            warn!("Goal {} aborted: {}", run.goal.id, e);
            run.goal.status = GoalStatus::Failed;
            return Err(e);
        }

        let status = run.finish();
        let goal_id = run.goal.id.clone();
        drop(run);

        let report = GoalReport::from_goal(goal);
        info!(
            "Goal {} {}: {} succeeded, {} failed, {} skipped, {} unfinished",
            goal_id,
            status,
            report.succeeded.len(),
            report.failed.len(),
            report.skipped.len(),
            report.unfinished.len()
        );
        self.publish(Event::GoalFinished { goal_id, status }).await;
        Ok(report)
    }

    async fn publish(&self, event: Event) {
        if let Some(bus) = &self.bus {
            bus.publish(event).await;
        }
    }
}

enum WorkerMessage {
    Finished {
        task_id: TaskId,
        attempt: u32,
        started_at: DateTime<Utc>,
        duration_ms: u64,
        result: Result<ToolResult, ToolError>,
    },
    Escalated {
        task_id: TaskId,
        reason: EscalationReason,
        outcome: EscalationOutcome,
    },
    Reasoned {
        task_id: TaskId,
        result: Result<Reasoning, EngineError>,
    },
    RetryDue {
        task_id: TaskId,
    },
}

enum Wake {
    Message(Option<WorkerMessage>),
    Cancel(bool),
}

/// State of one `execute` call
struct Run<'a> {
    orchestrator: &'a Orchestrator,
    goal: &'a mut Goal,
    tx: mpsc::Sender<WorkerMessage>,
    rx: mpsc::Receiver<WorkerMessage>,
    /// Ready tasks waiting for a worker, in plan order
    queue: VecDeque<TaskId>,
    /// Tasks with a worker, timer, reasoner or human outstanding
    in_flight: HashSet<TaskId>,
    running: usize,
    /// Backoff timers, escalations and reasoning calls
    background: JoinSet<()>,
    absorptions: JoinSet<()>,
    cancel: CancelScope,
    cancel_open: bool,
    cancelled: bool,
    /// Set after a permanent failure when draining is off
    halted: bool,
}

impl<'a> Run<'a> {
    fn new(orchestrator: &'a Orchestrator, goal: &'a mut Goal, cancel: CancelScope) -> Self {
        let (tx, rx) = mpsc::channel(RESULT_CHANNEL_SIZE);
        Self {
            orchestrator,
            goal,
            tx,
            rx,
            queue: VecDeque::new(),
            in_flight: HashSet::new(),
            running: 0,
            background: JoinSet::new(),
            absorptions: JoinSet::new(),
            cancel,
            cancel_open: true,
            cancelled: false,
            halted: false,
        }
    }

    fn config(&self) -> &OrchestratorConfig {
        &self.orchestrator.config
    }

    async fn drive(&mut self, groups: Vec<Vec<TaskId>>) -> Result<(), EngineError> {
        let mut remaining: VecDeque<Vec<TaskId>> = groups.into();
        let mut index = 0;

        while let Some(group) = remaining.pop_front() {
            self.check_cancel().await?;
            if self.cancelled || self.halted {
                break;
            }

            self.run_group(index, &group).await?;
            index += 1;

            self.drain_absorptions().await;
            self.checkpoint().await;

            if self.config().auto_replan && !remaining.is_empty() && !self.cancelled && !self.halted
            {
                let plan = self
                    .orchestrator
                    .planner
                    .plan(&self.goal.graph, &self.orchestrator.memory)
                    .await?;
                debug!(
                    "Goal {} re-planned: {} group(s) left",
                    self.goal.id,
                    plan.groups.len()
                );
                remaining = plan.groups.clone().into();
                self.goal.plan = Some(plan);
            }
        }

        Ok(())
    }

    async fn run_group(&mut self, index: usize, group: &[TaskId]) -> Result<(), EngineError> {
        debug!("Goal {} group {}: {:?}", self.goal.id, index, group);
        self.orchestrator
            .publish(Event::GroupStarted {
                goal_id: self.goal.id.clone(),
                index,
                tasks: group.to_vec(),
            })
            .await;

        for id in group {
            match self.goal.graph.status(id) {
                Some(TaskStatus::Pending) if self.goal.graph.dependencies_satisfied(id) => {
                    self.transition(id, TaskStatus::Ready).await?;
                    self.queue.push_back(id.clone());
                }
                Some(TaskStatus::Ready) => self.queue.push_back(id.clone()),
                _ => {}
            }
        }

        loop {
            self.check_cancel().await?;
            self.pump().await?;

            if self.group_settled(group) {
                break;
            }
            if self.queue.is_empty() && self.in_flight.is_empty() {
                warn!("Goal {} group {} stalled with nothing in flight", self.goal.id, index);
                break;
            }

            let wake = tokio::select! {
                message = self.rx.recv() => Wake::Message(message),
                changed = self.cancel.rx.changed(), if self.cancel_open => Wake::Cancel(changed.is_ok()),
            };

            match wake {
                Wake::Message(Some(message)) => self.handle(message).await?,
                Wake::Message(None) => break,
                Wake::Cancel(true) => self.check_cancel().await?,
                Wake::Cancel(false) => self.cancel_open = false,
            }
        }

        Ok(())
    }

    /// Every task is terminal or still pending behind a failed ancestor
    fn group_settled(&self, group: &[TaskId]) -> bool {
        group.iter().all(|id| {
            self.goal
                .graph
                .status(id)
                .map_or(true, |s| s.is_terminal() || s == TaskStatus::Pending)
        })
    }

    async fn handle(&mut self, message: WorkerMessage) -> Result<(), EngineError> {
        match message {
            WorkerMessage::Finished {
                task_id,
                attempt,
                started_at,
                duration_ms,
                result,
            } => {
                self.on_finished(task_id, attempt, started_at, duration_ms, result)
                    .await
            }
            WorkerMessage::Escalated {
                task_id,
                reason,
                outcome,
            } => self.on_escalated(task_id, reason, outcome).await,
            WorkerMessage::Reasoned { task_id, result } => self.on_reasoned(task_id, result).await,
            WorkerMessage::RetryDue { task_id } => {
                self.in_flight.remove(&task_id);
                if !self.cancelled && self.goal.graph.status(&task_id) == Some(TaskStatus::Ready) {
                    self.queue.push_back(task_id);
                }
                Ok(())
            }
        }
    }

    /// Start queued tasks until the pool is full
    async fn pump(&mut self) -> Result<(), EngineError> {
        if self.cancelled {
            self.queue.clear();
            return Ok(());
        }

        while let Some(id) = self.queue.pop_front() {
            if self.goal.graph.status(&id) != Some(TaskStatus::Ready) {
                continue;
            }
            if let Some(request) = self.prepare(&id).await? {
                if self.running >= self.config().concurrency.max(1) {
                    self.queue.push_front(id);
                    break;
                }
                self.dispatch(&id, request).await?;
            }
        }
        Ok(())
    }

    /// Build the tool request for a ready task, or route it to the reasoner
    /// or a human first. `None` means the task is not dispatchable yet.
    async fn prepare(&mut self, id: &str) -> Result<Option<ToolRequest>, EngineError> {
        let task = self
            .goal
            .graph
            .task(id)
            .cloned()
            .ok_or_else(|| EngineError::TaskNotFound(id.to_string()))?;

        let orchestrator = self.orchestrator;
        let known_tool = task
            .tool
            .as_deref()
            .is_some_and(|tool| orchestrator.gateway.contains(tool));
        if !known_tool && task.reasoning.is_empty() {
            if let Some(reasoner) = &orchestrator.reasoner {
                self.start_reasoning(&task, Arc::clone(reasoner));
                return Ok(None);
            }
        }

        let Some(tool) = task.tool.clone() else {
            self.fail_ready(id, TaskError::new(ErrorKind::NotFound, "task has no tool to run"))
                .await?;
            return Ok(None);
        };

        let assessment = orchestrator.assessor.assess_task(&task);
        let request = ToolRequest::new(tool)
            .with_params(task.params.clone())
            .destructive(assessment.destructive)
            .confirmed(task.has_approval(EscalationReason::DestructiveAction.as_str()));

        if let Some((reason, question, option)) = self.escalation_for(&task, &request, &assessment)
        {
            self.escalate(id, reason, question, vec![option.to_string()])
                .await?;
            return Ok(None);
        }

        Ok(Some(request))
    }

    /// First unapproved reason this task needs a human for
    fn escalation_for(
        &self,
        task: &Task,
        request: &ToolRequest,
        assessment: &RiskAssessment,
    ) -> Option<(EscalationReason, String, &'static str)> {
        let action = describe_action(request);

        let destructive = request.destructive
            || self
                .orchestrator
                .gateway
                .get(&request.tool)
                .is_some_and(|tool| tool.is_destructive(request));
        if destructive && !request.confirmed {
            return Some((
                EscalationReason::DestructiveAction,
                format!("Task '{}' is destructive ({}). Proceed?", task.id, action),
                "proceed",
            ));
        }

        if self.config().escalate_ambiguous
            && !task.has_approval(EscalationReason::AmbiguousRequirement.as_str())
        {
            if let Some(phrase) = &assessment.ambiguity {
                return Some((
                    EscalationReason::AmbiguousRequirement,
                    format!(
                        "Task '{}' is vague (\"{}\"): {}. Run it as written ({})?",
                        task.id, phrase, task.description, action
                    ),
                    "run as written",
                ));
            }
        }

        let low_confidence = self
            .goal
            .plan
            .as_ref()
            .is_some_and(|plan| plan.is_low_confidence(&task.id));
        if low_confidence && !task.has_approval(EscalationReason::LowConfidencePlan.as_str()) {
            return Some((
                EscalationReason::LowConfidencePlan,
                format!(
                    "Similar calls to {} have mostly failed before. Run task '{}' anyway?",
                    action, task.id
                ),
                "run anyway",
            ));
        }

        None
    }

    async fn escalate(
        &mut self,
        id: &str,
        reason: EscalationReason,
        question: String,
        options: Vec<String>,
    ) -> Result<(), EngineError> {
        self.transition(id, TaskStatus::AwaitingHuman).await?;

        let request = EscalationRequest::new(self.goal.id.clone(), id, reason, question, options);
        info!(
            "Goal {} task {} escalated ({}): {}",
            self.goal.id, id, reason, request.question
        );
        self.orchestrator
            .publish(Event::EscalationRaised {
                goal_id: self.goal.id.clone(),
                task_id: id.to_string(),
                request_id: request.id.clone(),
                reason,
            })
            .await;

        self.in_flight.insert(id.to_string());
        let channel = Arc::clone(&self.orchestrator.escalation);
        let max_defers = self.config().max_defers;
        let tx = self.tx.clone();
        let task_id = id.to_string();
        self.background.spawn(async move {
            let outcome = resolve_escalation(channel.as_ref(), &request, max_defers).await;
            let _ = tx
                .send(WorkerMessage::Escalated {
                    task_id,
                    reason,
                    outcome,
                })
                .await;
        });
        Ok(())
    }

    async fn on_escalated(
        &mut self,
        task_id: TaskId,
        reason: EscalationReason,
        outcome: EscalationOutcome,
    ) -> Result<(), EngineError> {
        self.in_flight.remove(&task_id);
        if self.goal.graph.status(&task_id) != Some(TaskStatus::AwaitingHuman) {
            return Ok(());
        }

        match outcome {
            EscalationOutcome::Approved { option, .. } => {
                let task = self.goal.graph.task_mut(&task_id)?;
                task.approvals.push(Approval {
                    reason: reason.as_str().to_string(),
                    option,
                    approved_at: Utc::now(),
                });
                if reason == EscalationReason::RepeatedFailure {
                    task.extra_attempts += 1;
                }
                self.transition(&task_id, TaskStatus::Ready).await?;
                self.queue.push_back(task_id);
            }
            EscalationOutcome::Declined if reason == EscalationReason::RepeatedFailure => {
                let task = self.goal.graph.task_mut(&task_id)?;
                let previous = task
                    .last_error
                    .as_ref()
                    .map(|e| e.message.clone())
                    .unwrap_or_default();
                task.last_error = Some(TaskError::new(
                    ErrorKind::Declined,
                    format!("retry declined after: {}", previous),
                ));
                self.transition(&task_id, TaskStatus::Failed).await?;
                self.on_permanent_failure(&task_id);
            }
            EscalationOutcome::Declined => {
                self.transition(&task_id, TaskStatus::Skipped).await?;
            }
            EscalationOutcome::Unresolved { defers } => {
                let message = EngineError::EscalationTimeout {
                    task_id: task_id.clone(),
                    defers,
                }
                .to_string();
                self.goal.graph.task_mut(&task_id)?.last_error =
                    Some(TaskError::new(ErrorKind::Unresolved, message));
                self.transition(&task_id, TaskStatus::Failed).await?;
                self.on_permanent_failure(&task_id);
            }
        }
        Ok(())
    }

    fn start_reasoning(&mut self, task: &Task, reasoner: Arc<dyn Reasoner>) {
        debug!("Goal {} task {} sent to the reasoner", self.goal.id, task.id);

        let problem = format!(
            "Task: {}\nDescription: {}\nRequested tool: {}\nParameters: {}",
            task.id,
            task.description,
            task.tool.as_deref().unwrap_or("none"),
            serde_json::Value::Object(task.params.clone())
        );
        self.in_flight.insert(task.id.clone());
        let tx = self.tx.clone();
        let task_id = task.id.clone();
        self.background.spawn(async move {
            let result = reasoner.reason(&problem).await;
            let _ = tx.send(WorkerMessage::Reasoned { task_id, result }).await;
        });
    }

    async fn on_reasoned(
        &mut self,
        task_id: TaskId,
        result: Result<Reasoning, EngineError>,
    ) -> Result<(), EngineError> {
        self.in_flight.remove(&task_id);
        if self.goal.graph.status(&task_id) != Some(TaskStatus::Ready) {
            return Ok(());
        }

        let reasoning = match result {
            Ok(reasoning) => reasoning,
            Err(e) => {
                return self
                    .fail_ready(
                        &task_id,
                        TaskError::new(ErrorKind::NotFound, format!("reasoning failed: {}", e)),
                    )
                    .await;
            }
        };

        let task = self.goal.graph.task_mut(&task_id)?;
        task.reasoning = reasoning.steps;
        task.reasoning.push(format!("conclusion: {}", reasoning.conclusion));
        for (key, value) in reasoning.parameters {
            task.params.insert(key, value);
        }

        match reasoning.tool {
            Some(tool) => {
                debug!("Goal {} task {} resolved to tool {}", self.goal.id, task_id, tool);
                task.tool = Some(tool);
                self.queue.push_back(task_id);
                Ok(())
            }
            None => {
                self.fail_ready(
                    &task_id,
                    TaskError::new(ErrorKind::NotFound, "reasoning did not name a tool"),
                )
                .await
            }
        }
    }

    async fn dispatch(&mut self, id: &str, request: ToolRequest) -> Result<(), EngineError> {
        self.transition(id, TaskStatus::Running).await?;
        let task = self.goal.graph.task_mut(id)?;
        task.attempt_count += 1;
        let attempt = task.attempt_count;

        self.running += 1;
        self.in_flight.insert(id.to_string());
        debug!(
            "Goal {} task {} dispatched to {} (attempt {}, {} running)",
            self.goal.id, id, request.tool, attempt, self.running
        );

        let gateway = Arc::clone(&self.orchestrator.gateway);
        let timeout = self.config().task_timeout();
        let tx = self.tx.clone();
        let task_id = id.to_string();
        tokio::spawn(async move {
            let started_at = Utc::now();
            let start = Instant::now();
            let result = AssertUnwindSafe(gateway.invoke(&request, timeout))
                .catch_unwind()
                .await
                .unwrap_or_else(|_| Err(ToolError::ExecutionFailure("tool panicked".to_string())));
            let _ = tx
                .send(WorkerMessage::Finished {
                    task_id,
                    attempt,
                    started_at,
                    duration_ms: start.elapsed().as_millis() as u64,
                    result,
                })
                .await;
        });
        Ok(())
    }

    async fn on_finished(
        &mut self,
        task_id: TaskId,
        attempt: u32,
        started_at: DateTime<Utc>,
        duration_ms: u64,
        result: Result<ToolResult, ToolError>,
    ) -> Result<(), EngineError> {
        self.running = self.running.saturating_sub(1);
        self.in_flight.remove(&task_id);

        let task = self.goal.graph.task_mut(&task_id)?;
        task.attempts.push(AttemptRecord {
            attempt,
            started_at,
            duration_ms,
            error: result
                .as_ref()
                .err()
                .map(|e| TaskError::new(e.kind(), e.to_string())),
        });

        match result {
            Ok(output) => {
                if let Some(effect) = &output.side_effect {
                    info!(
                        "Goal {} task {} side effect: {} {}",
                        self.goal.id, task_id, effect.kind, effect.target
                    );
                }
                task.output = Some(output.output);
                task.side_effect = output.side_effect;
                task.last_error = None;
                self.transition(&task_id, TaskStatus::Succeeded).await
            }
            Err(error) => self.on_failure(&task_id, error).await,
        }
    }

    /// Retry with backoff, escalate a stuck failure, or fail for good
    async fn on_failure(&mut self, id: &str, error: ToolError) -> Result<(), EngineError> {
        let max_attempts = self.config().max_attempts;
        let task = self.goal.graph.task_mut(id)?;
        task.last_error = Some(TaskError::new(error.kind(), error.to_string()));
        let attempts = task.attempt_count;
        let limit = max_attempts + task.extra_attempts;
        let retry_approved = task.has_approval(EscalationReason::RepeatedFailure.as_str());
        let repeated = failed_identically(task, max_attempts);

        if !error.is_retryable() || self.cancelled {
            warn!("Goal {} task {} failed: {}", self.goal.id, id, error);
            self.transition(id, TaskStatus::Failed).await?;
            self.on_permanent_failure(id);
            return Ok(());
        }

        if attempts < limit {
            let delay = self.config().backoff_delay(attempts);
            info!(
                "Goal {} task {} attempt {}/{} failed ({}), retrying in {:?}",
                self.goal.id, id, attempts, limit, error, delay
            );
            self.transition(id, TaskStatus::Ready).await?;
            self.orchestrator
                .publish(Event::TaskRetrying {
                    goal_id: self.goal.id.clone(),
                    task_id: id.to_string(),
                    attempt: attempts,
                    delay_ms: delay.as_millis() as u64,
                    error: error.to_string(),
                })
                .await;

            self.in_flight.insert(id.to_string());
            let tx = self.tx.clone();
            let task_id = id.to_string();
            self.background.spawn(async move {
                tokio::time::sleep(delay).await;
                let _ = tx.send(WorkerMessage::RetryDue { task_id }).await;
            });
            return Ok(());
        }

        if self.config().escalate_repeated_failures
            && matches!(error, ToolError::ExecutionFailure(_))
            && repeated
            && !retry_approved
        {
            let question = format!(
                "Task '{}' failed {} times with the same error: {}. Retry once more?",
                id, attempts, error
            );
            return self
                .escalate(
                    id,
                    EscalationReason::RepeatedFailure,
                    question,
                    vec!["retry once more".to_string()],
                )
                .await;
        }

        warn!(
            "Goal {} task {} failed after {} attempt(s): {}",
            self.goal.id, id, attempts, error
        );
        self.transition(id, TaskStatus::Failed).await?;
        self.on_permanent_failure(id);
        Ok(())
    }

    async fn fail_ready(&mut self, id: &str, error: TaskError) -> Result<(), EngineError> {
        warn!("Goal {} task {} cannot run: {}", self.goal.id, id, error.message);
        self.goal.graph.task_mut(id)?.last_error = Some(error);
        self.transition(id, TaskStatus::Failed).await?;
        self.on_permanent_failure(id);
        Ok(())
    }

    fn on_permanent_failure(&mut self, id: &str) {
        if !self.config().drain_after_failure && !self.halted {
            info!(
                "Goal {} stops after task {} failed; no further groups start",
                self.goal.id, id
            );
            self.halted = true;
        }
    }

    async fn check_cancel(&mut self) -> Result<(), EngineError> {
        if self.cancel.requested() && !self.cancelled {
            self.cancel_goal().await?;
        }
        Ok(())
    }

    /// Skip everything not yet running; running tasks finish on their own
    async fn cancel_goal(&mut self) -> Result<(), EngineError> {
        info!("Goal {} cancelled", self.goal.id);
        self.cancelled = true;
        self.goal.status = GoalStatus::Cancelled;
        self.background.abort_all();
        self.queue.clear();

        let waiting: Vec<TaskId> = self
            .goal
            .graph
            .tasks()
            .filter(|t| {
                matches!(
                    t.status,
                    TaskStatus::Pending | TaskStatus::Ready | TaskStatus::AwaitingHuman
                )
            })
            .map(|t| t.id.clone())
            .collect();

        for id in waiting {
            self.in_flight.remove(&id);
            self.transition(&id, TaskStatus::Skipped).await?;
        }
        Ok(())
    }

    /// Apply a status change, announce it and hand terminal outcomes to the
    /// observer
    async fn transition(&mut self, id: &str, to: TaskStatus) -> Result<(), EngineError> {
        let from = self.goal.graph.mark_status(id, to)?;
        debug!("Goal {} task {}: {} -> {}", self.goal.id, id, from, to);

        self.orchestrator
            .publish(Event::TaskStatusChanged {
                goal_id: self.goal.id.clone(),
                task_id: id.to_string(),
                from,
                to,
            })
            .await;

        if let Some(status) = outcome_status(to) {
            self.record_outcome(id, status).await?;
        }
        Ok(())
    }

    /// Append the outcome before the next transition can, then learn from it
    /// in the background
    async fn record_outcome(&mut self, id: &str, status: OutcomeStatus) -> Result<(), EngineError> {
        let orchestrator = self.orchestrator;
        let Some(observer) = &orchestrator.observer else {
            return Ok(());
        };

        let task = self
            .goal
            .graph
            .task(id)
            .ok_or_else(|| EngineError::TaskNotFound(id.to_string()))?;
        let error_kind = match status {
            OutcomeStatus::Failed => task.last_error.as_ref().map(|e| e.kind),
            _ => None,
        };
        let record = OutcomeRecord::new(
            self.goal.id.clone(),
            id,
            task.tool.clone(),
            task.params.clone(),
            status,
        )
        .with_attempt(task.attempt_count)
        .with_duration(task.attempts.last().map_or(0, |a| a.duration_ms))
        .with_error_kind(error_kind);

        match observer.record(&record).await {
            Ok(true) => {}
            Ok(false) => return Ok(()),
            Err(e) => {
                warn!("Goal {} failed to record outcome of {}: {:#}", self.goal.id, id, e);
                return Ok(());
            }
        }

        let observer = Arc::clone(observer);
        self.absorptions.spawn(async move {
            if let Err(e) = observer.learn(record).await {
                warn!("Failed to learn from outcome: {:#}", e);
            }
        });
        Ok(())
    }

    async fn drain_absorptions(&mut self) {
        while let Some(joined) = self.absorptions.join_next().await {
            if let Err(e) = joined {
                warn!("Outcome absorption panicked: {}", e);
            }
        }
    }

    async fn checkpoint(&self) {
        let Some(sessions) = &self.orchestrator.sessions else {
            return;
        };
        let session = GoalSession::new(self.goal.clone(), None);
        if let Err(e) = sessions.save(&session).await {
            warn!("Failed to checkpoint goal {}: {:#}", self.goal.id, e);
        }
    }

    /// Wait for running workers and pending absorptions, drop the rest
    async fn shutdown(&mut self) {
        self.background.abort_all();
        while self.running > 0 {
            match self.rx.recv().await {
                Some(WorkerMessage::Finished {
                    task_id,
                    attempt,
                    started_at,
                    duration_ms,
                    result,
                }) => {
                    if let Err(e) = self
                        .on_finished(task_id, attempt, started_at, duration_ms, result)
                        .await
                    {
                        warn!("Goal {} could not record a late result: {}", self.goal.id, e);
                    }
                }
                Some(_) => {}
                None => break,
            }
        }
        self.drain_absorptions().await;
    }

    fn finish(&mut self) -> GoalStatus {
        let counts = self.goal.graph.counts();
        let status = if self.cancelled {
            GoalStatus::Cancelled
        } else if counts.succeeded + counts.skipped == counts.total {
            GoalStatus::Completed
        } else {
            GoalStatus::Failed
        };
        self.goal.status = status;
        status
    }
}

fn outcome_status(status: TaskStatus) -> Option<OutcomeStatus> {
    match status {
        TaskStatus::Succeeded => Some(OutcomeStatus::Succeeded),
        TaskStatus::Failed => Some(OutcomeStatus::Failed),
        TaskStatus::Skipped => Some(OutcomeStatus::Skipped),
        _ => None,
    }
}

/// The last `window` attempts all failed with the same error
fn failed_identically(task: &Task, window: u32) -> bool {
    let window = window as usize;
    if window < 2 || task.attempts.len() < window {
        return false;
    }
    let recent = &task.attempts[task.attempts.len() - window..];
    let Some(first) = recent[0].error.as_ref() else {
        return false;
    };
    recent.iter().all(|a| a.error.as_ref() == Some(first))
}

fn describe_action(request: &ToolRequest) -> String {
    match request.operation() {
        Some(operation) => format!("{}.{}", request.tool, operation),
        None => request.tool.clone(),
    }
}
