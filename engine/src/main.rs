// Waypoint goal execution engine
// Main entry point for the waypoint binary

use clap::Parser;
use std::sync::Arc;
use waypoint_engine::cli::{Cli, Command, ConfigAction};
use waypoint_engine::conductor::{EscalationChannel, StaticResponder};
use waypoint_engine::config::Config;
use waypoint_engine::handlers::{
    handle_config_show, handle_patterns, handle_resume, handle_retry, handle_run,
    handle_sessions, handle_show, handle_tools, OutputFormat, PromptEscalations,
};
use waypoint_engine::telemetry::init_telemetry_with_level;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Parse CLI arguments
    let cli = Cli::parse();

    // Load configuration (or use custom path if provided)
    let config = if let Some(config_path) = &cli.config {
        Config::load_from_path(config_path)?
    } else {
        Config::load_or_create()?
    };

    // --log wins over the configured level; RUST_LOG wins over both
    init_telemetry_with_level(cli.log.as_deref().unwrap_or(&config.core.log_level));

    let version = env!("CARGO_PKG_VERSION");
    let commit = env!("GIT_COMMIT_HASH");
    let timestamp = env!("BUILD_TIMESTAMP");

    tracing::debug!("Waypoint v{} ({} - {})", version, commit, timestamp);

    // Determine output format
    let format = if cli.json {
        OutputFormat::Json
    } else {
        OutputFormat::Text
    };

    match cli.command {
        Command::Run {
            goal_file,
            concurrency,
            approve_all,
            decline_all,
        } => {
            tracing::info!("Running goal file: {}", goal_file.display());
            let escalation = escalation_channel(approve_all, decline_all);
            handle_run(&goal_file, concurrency, escalation, &config, format).await
        }

        Command::Resume { goal_id } => {
            tracing::info!("Resuming goal: {}", goal_id);
            handle_resume(&goal_id, escalation_channel(false, false), &config, format).await
        }

        Command::Retry { goal_id } => {
            tracing::info!("Retrying failed tasks of goal: {}", goal_id);
            handle_retry(&goal_id, escalation_channel(false, false), &config, format).await
        }

        Command::Sessions { limit } => handle_sessions(limit, &config, format).await,

        Command::Show { goal_id } => handle_show(&goal_id, &config, format).await,

        Command::Patterns { limit } => handle_patterns(limit, &config, format).await,

        Command::Tools => handle_tools(&config, format).await,

        Command::Config { action } => match action {
            ConfigAction::Show => handle_config_show(&config, format),
        },
    }
}

fn escalation_channel(approve_all: bool, decline_all: bool) -> Arc<dyn EscalationChannel> {
    if approve_all {
        Arc::new(StaticResponder::approve_all())
    } else if decline_all {
        Arc::new(StaticResponder::decline_all())
    } else {
        Arc::new(PromptEscalations::new())
    }
}
