//! Command handlers for CLI operations
//!
//! This module implements the handlers for all CLI commands:
//! - run: Execute a goal file
//! - resume / retry: Continue or retry a stored goal
//! - sessions / show: Browse stored goals
//! - patterns: List learned patterns
//! - tools / config show: Inspect the setup

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde_json::json;
use std::io::Write;
use std::path::Path;
use std::sync::Arc;
use tokio::sync::Mutex;

use crate::conductor::{
    AdaptationEngine, EscalationChannel, EscalationRequest, GoalRunner, GoalSession, GoalStatus,
    HumanResponse, Orchestrator, Planner, StaticDecomposer, StaticResponder,
};
use crate::config::Config;
use crate::db::{Database, KvStore, SessionRepository};
use crate::graph::TaskStatus;
use crate::memory::MemoryStore;
use crate::message_bus::{Event, EventType, MessageBus};
use crate::tools::ToolGateway;

/// Output format for command results
#[derive(Debug, Clone, Copy)]
pub enum OutputFormat {
    /// Human-readable text output
    Text,
    /// JSON output for machine consumption
    Json,
}

/// Everything a command needs, wired from config
pub struct EngineContext {
    pub database: Arc<Database>,
    pub memory: Arc<MemoryStore>,
    pub gateway: Arc<ToolGateway>,
    pub bus: MessageBus,
    pub runner: GoalRunner,
}

impl EngineContext {
    /// Flush memory and the WAL before the process exits
    pub async fn close(&self) -> Result<()> {
        self.memory.close().await?;
        self.database.flush_wal().await
    }
}

/// Open the database and memory store and assemble the pipeline
pub async fn open_engine(
    config: &Config,
    escalation: Arc<dyn EscalationChannel>,
) -> Result<EngineContext> {
    let database = Arc::new(
        Database::new(&config.database_path())
            .await
            .context("Failed to open database")?,
    );
    let kv: Arc<dyn KvStore> = database.clone();

    let memory = if config.memory.persist {
        Arc::new(
            MemoryStore::open(Arc::clone(&kv), config.memory.ewma_alpha)
                .await
                .context("Failed to open memory store")?,
        )
    } else {
        Arc::new(MemoryStore::in_memory(config.memory.ewma_alpha))
    };

    let gateway = Arc::new(
        ToolGateway::from_config(&config.tools, &config.core.workspace)
            .context("Failed to set up tools")?,
    );
    let sessions = Arc::new(SessionRepository::new(kv));
    let adaptation = Arc::new(AdaptationEngine::new(Arc::clone(&memory)));
    let bus = MessageBus::new();

    let orchestrator = Orchestrator::new(
        config.orchestrator.clone(),
        Planner::new(config.planner.clone()),
        Arc::clone(&memory),
        Arc::clone(&gateway),
        escalation,
    )?
    .with_observer(adaptation.clone())
    .with_bus(bus.clone())
    .with_sessions(Arc::clone(&sessions));

    Ok(EngineContext {
        database,
        memory,
        gateway,
        bus,
        runner: GoalRunner::new(Arc::new(orchestrator), adaptation, sessions),
    })
}

/// Asks on the terminal, one escalation at a time
pub struct PromptEscalations {
    lock: Mutex<()>,
}

impl PromptEscalations {
    pub fn new() -> Self {
        Self {
            lock: Mutex::new(()),
        }
    }
}

impl Default for PromptEscalations {
    fn default() -> Self {
        Self::new()
    }
}

/// `1..=n` approves that option, `n`/`no` declines, anything else defers
pub fn parse_prompt_answer(answer: &str, options: usize) -> HumanResponse {
    let answer = answer.trim().to_lowercase();
    match answer.as_str() {
        "n" | "no" | "decline" => HumanResponse::Decline,
        "y" | "yes" if options > 0 => HumanResponse::Approve(0),
        _ => match answer.parse::<usize>() {
            Ok(choice) if (1..=options).contains(&choice) => HumanResponse::Approve(choice - 1),
            _ => HumanResponse::Defer,
        },
    }
}

#[async_trait]
impl EscalationChannel for PromptEscalations {
    async fn request(&self, request: &EscalationRequest) -> HumanResponse {
        let _guard = self.lock.lock().await;

        let mut prompt = format!(
            "\n[{}] task {}: {}\n",
            request.reason, request.task_id, request.question
        );
        for (index, option) in request.options.iter().enumerate() {
            prompt.push_str(&format!("  {}) {}\n", index + 1, option));
        }
        prompt.push_str("Choose an option, 'n' to decline, Enter to defer: ");

        let options = request.options.len();
        let answer = tokio::task::spawn_blocking(move || {
            let mut stderr = std::io::stderr();
            let _ = stderr.write_all(prompt.as_bytes());
            let _ = stderr.flush();
            let mut line = String::new();
            std::io::stdin().read_line(&mut line).map(|_| line)
        })
        .await;

        match answer {
            Ok(Ok(line)) => parse_prompt_answer(&line, options),
            _ => HumanResponse::Defer,
        }
    }
}

/// Run the goal in a goal file
pub async fn handle_run(
    goal_file: &Path,
    concurrency: Option<usize>,
    escalation: Arc<dyn EscalationChannel>,
    config: &Config,
    format: OutputFormat,
) -> Result<()> {
    let decomposer = StaticDecomposer::from_file(goal_file)
        .with_context(|| format!("Failed to load goal file {}", goal_file.display()))?;

    let mut config = config.clone();
    if let Some(concurrency) = concurrency {
        anyhow::ensure!(concurrency > 0, "--concurrency must be at least 1");
        config.orchestrator.concurrency = concurrency;
    }

    let engine = open_engine(&config, escalation).await?;
    let progress = spawn_progress(&engine.bus, format).await;
    let cancel = engine.runner.orchestrator().cancel_handle();
    let interrupt = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("Interrupted; cancelling goal");
            cancel.cancel();
        }
    });

    let goal_text = match decomposer.seed().goal.as_str() {
        "" => goal_file
            .file_stem()
            .map(|s| s.to_string_lossy().to_string())
            .unwrap_or_else(|| "goal".to_string()),
        text => text.to_string(),
    };
    let context = decomposer.seed().context.clone();

    let result = engine
        .runner
        .submit(&goal_text, context.as_deref(), &decomposer)
        .await;

    interrupt.abort();
    progress.abort();
    engine.close().await?;

    let session = result?;
    print_session(&session, format)?;
    finished_ok(&session)
}

pub async fn handle_resume(
    goal_id: &str,
    escalation: Arc<dyn EscalationChannel>,
    config: &Config,
    format: OutputFormat,
) -> Result<()> {
    let engine = open_engine(config, escalation).await?;
    let progress = spawn_progress(&engine.bus, format).await;
    let result = engine.runner.resume(goal_id).await;
    progress.abort();
    engine.close().await?;

    let session = result?;
    print_session(&session, format)?;
    finished_ok(&session)
}

pub async fn handle_retry(
    goal_id: &str,
    escalation: Arc<dyn EscalationChannel>,
    config: &Config,
    format: OutputFormat,
) -> Result<()> {
    let engine = open_engine(config, escalation).await?;
    let progress = spawn_progress(&engine.bus, format).await;
    let result = engine.runner.retry_failed(goal_id).await;
    progress.abort();
    engine.close().await?;

    let session = result?;
    print_session(&session, format)?;
    finished_ok(&session)
}

/// Show recent goal sessions
pub async fn handle_sessions(limit: usize, config: &Config, format: OutputFormat) -> Result<()> {
    let engine = open_engine(config, Arc::new(StaticResponder::decline_all())).await?;
    let sessions = engine.runner.sessions(limit).await?;

    match format {
        OutputFormat::Text => {
            if sessions.is_empty() {
                println!("No goals in history");
                return Ok(());
            }

            println!("Goal sessions (last {}):", limit);
            println!();
            for session in &sessions {
                let goal = &session.goal;
                let progress = goal.progress();
                println!("Goal ID: {}", goal.id);
                println!("  Goal: {}", goal.text);
                println!("  Status: {}", goal.status);
                println!(
                    "  Progress: {:.0}% ({} of {} tasks done)",
                    progress.percent_complete(),
                    progress.succeeded + progress.skipped,
                    progress.total
                );
                println!(
                    "  Updated: {}",
                    session.updated_at.format("%Y-%m-%d %H:%M:%S")
                );
                println!();
            }
        }
        OutputFormat::Json => {
            let summaries: Vec<_> = sessions
                .iter()
                .map(|s| {
                    json!({
                        "goal_id": s.goal.id,
                        "goal": s.goal.text,
                        "status": s.goal.status,
                        "progress": s.goal.progress(),
                        "updated_at": s.updated_at,
                    })
                })
                .collect();
            let output = json!({
                "sessions": summaries,
                "count": sessions.len(),
                "limit": limit
            });
            println!("{}", serde_json::to_string_pretty(&output)?);
        }
    }

    Ok(())
}

/// Show every task of one goal
pub async fn handle_show(goal_id: &str, config: &Config, format: OutputFormat) -> Result<()> {
    let engine = open_engine(config, Arc::new(StaticResponder::decline_all())).await?;
    let session = engine.runner.session(goal_id).await?;
    print_session(&session, format)
}

/// List learned patterns, most sampled first
pub async fn handle_patterns(limit: usize, config: &Config, format: OutputFormat) -> Result<()> {
    let engine = open_engine(config, Arc::new(StaticResponder::decline_all())).await?;
    let mut patterns = engine.memory.patterns().await;
    patterns.sort_by(|a, b| {
        b.sample_count
            .cmp(&a.sample_count)
            .then(a.key.cmp(&b.key))
    });
    patterns.truncate(limit);

    match format {
        OutputFormat::Text => {
            if patterns.is_empty() {
                println!("No learned patterns yet");
                return Ok(());
            }
            println!("Learned patterns:");
            println!();
            for pattern in &patterns {
                println!("  {} [{}]", pattern.key.tool, pattern.key.shape);
                println!(
                    "    success rate {:.2}, confidence {:.2}, {} sample(s)",
                    pattern.success_rate,
                    pattern.confidence(),
                    pattern.sample_count
                );
            }
        }
        OutputFormat::Json => {
            let output = json!({ "patterns": patterns, "count": patterns.len() });
            println!("{}", serde_json::to_string_pretty(&output)?);
        }
    }
    Ok(())
}

/// List the tools enabled in config
pub async fn handle_tools(config: &Config, format: OutputFormat) -> Result<()> {
    let gateway = ToolGateway::from_config(&config.tools, &config.core.workspace)
        .context("Failed to set up tools")?;

    match format {
        OutputFormat::Text => {
            println!("Enabled tools:");
            println!();
            for tool in gateway.tools() {
                println!("  {}: {}", tool.name(), tool.operations().join(", "));
            }
        }
        OutputFormat::Json => {
            let tools: Vec<_> = gateway
                .tools()
                .map(|tool| json!({ "name": tool.name(), "operations": tool.operations() }))
                .collect();
            println!("{}", serde_json::to_string_pretty(&json!({ "tools": tools }))?);
        }
    }
    Ok(())
}

pub fn handle_config_show(config: &Config, format: OutputFormat) -> Result<()> {
    match format {
        OutputFormat::Text => {
            let text = toml::to_string_pretty(config).context("Failed to render configuration")?;
            println!("{}", text);
        }
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(config)?),
    }
    Ok(())
}

/// Print transitions while a goal runs
async fn spawn_progress(bus: &MessageBus, format: OutputFormat) -> tokio::task::JoinHandle<()> {
    let mut events = bus.subscribe(EventType::All).await;
    tokio::spawn(async move {
        if matches!(format, OutputFormat::Json) {
            return;
        }
        while let Some(event) = events.recv().await {
            match event {
                Event::GoalStarted {
                    goal_id,
                    task_count,
                    group_count,
                } => eprintln!(
                    "Goal {}: {} task(s) in {} group(s)",
                    goal_id, task_count, group_count
                ),
                Event::TaskStatusChanged { task_id, to, .. } if to != TaskStatus::Ready => {
                    eprintln!("  {} -> {}", task_id, to)
                }
                Event::TaskRetrying {
                    task_id,
                    attempt,
                    delay_ms,
                    error,
                    ..
                } => eprintln!(
                    "  {} attempt {} failed ({}), retrying in {}ms",
                    task_id, attempt, error, delay_ms
                ),
                _ => {}
            }
        }
    })
}

fn print_session(session: &GoalSession, format: OutputFormat) -> Result<()> {
    let goal = &session.goal;
    match format {
        OutputFormat::Text => {
            let progress = goal.progress();
            println!();
            println!("Goal {}: {}", goal.id, goal.text);
            println!(
                "Status: {} ({:.0}% complete)",
                goal.status,
                progress.percent_complete()
            );
            println!();

            for task in goal.graph.tasks() {
                let marker = match task.status {
                    TaskStatus::Succeeded => "✓",
                    TaskStatus::Failed => "✗",
                    TaskStatus::Skipped => "-",
                    _ => "…",
                };
                println!(
                    "  {} {} [{}] {} attempt(s)",
                    marker,
                    task.id,
                    task.tool.as_deref().unwrap_or("no tool"),
                    task.attempt_count
                );
                if let Some(error) = &task.last_error {
                    println!("      {}: {}", error.kind, error.message);
                }
            }

            if let Some(report) = &session.report {
                for blocked in &report.blocked {
                    println!(
                        "  blocked: {} (by {})",
                        blocked.id,
                        blocked.blocked_by.join(", ")
                    );
                }
            }
        }
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(session)?),
    }
    Ok(())
}

fn finished_ok(session: &GoalSession) -> Result<()> {
    match session.goal.status {
        GoalStatus::Completed => Ok(()),
        status => anyhow::bail!("Goal {} {}", session.goal.id, status),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_prompt_answer() {
        assert_eq!(parse_prompt_answer("1\n", 2), HumanResponse::Approve(0));
        assert_eq!(parse_prompt_answer(" 2 ", 2), HumanResponse::Approve(1));
        assert_eq!(parse_prompt_answer("yes", 1), HumanResponse::Approve(0));
        assert_eq!(parse_prompt_answer("No", 1), HumanResponse::Decline);
        assert_eq!(parse_prompt_answer("\n", 1), HumanResponse::Defer);
        assert_eq!(parse_prompt_answer("3", 2), HumanResponse::Defer);
        assert_eq!(parse_prompt_answer("0", 2), HumanResponse::Defer);
    }

    #[test]
    fn test_finished_ok() {
        let graph =
            crate::graph::TaskGraph::from_specs(vec![crate::graph::TaskSpec::new("a", "t")])
                .unwrap();
        let mut goal = crate::conductor::Goal::new("g", graph);
        goal.status = GoalStatus::Completed;
        assert!(finished_ok(&GoalSession::new(goal.clone(), None)).is_ok());

        goal.status = GoalStatus::Failed;
        assert!(finished_ok(&GoalSession::new(goal, None)).is_err());
    }
}
