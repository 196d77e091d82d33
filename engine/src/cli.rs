//! CLI interface for Waypoint
//!
//! This module provides the command-line interface using clap's derive API.
//! It defines all commands and global flags for running and inspecting goals.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Waypoint goal execution engine
///
/// Runs a goal's task graph through planning, tool dispatch, human escalation
/// and adaptation from earlier outcomes.
#[derive(Parser, Debug)]
#[command(name = "waypoint")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Output in JSON format
    #[arg(long, global = true)]
    pub json: bool,

    /// Set log level (error, warn, info, debug, trace)
    #[arg(long, global = true, value_name = "LEVEL")]
    pub log: Option<String>,

    /// Specify alternate configuration file
    #[arg(long, global = true, value_name = "PATH")]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

/// Available commands
#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run the goal described in a TOML or JSON goal file
    Run {
        /// Goal file with `goal`, `[[tasks]]` and optional `[[edges]]`
        goal_file: PathBuf,

        /// Override the configured worker pool size
        #[arg(long, value_name = "N")]
        concurrency: Option<usize>,

        /// Approve every escalation without prompting
        #[arg(long, conflicts_with = "decline_all")]
        approve_all: bool,

        /// Decline every escalation without prompting
        #[arg(long)]
        decline_all: bool,
    },

    /// Continue an interrupted goal
    Resume {
        /// Goal ID to resume
        goal_id: String,
    },

    /// Run the failed tasks of a goal again
    Retry {
        /// Goal ID to retry
        goal_id: String,
    },

    /// Show recent goal sessions
    Sessions {
        /// Number of sessions to show (default: 10)
        #[arg(short, long, default_value = "10")]
        limit: usize,
    },

    /// Show every task of a goal
    Show {
        /// Goal ID to show
        goal_id: String,
    },

    /// List learned patterns, most sampled first
    Patterns {
        /// Number of patterns to show (default: 20)
        #[arg(short, long, default_value = "20")]
        limit: usize,
    },

    /// List the enabled tools
    Tools,

    /// Manage configuration
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

/// Configuration management actions
#[derive(Subcommand, Debug)]
pub enum ConfigAction {
    /// Show current configuration
    Show,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_parsing() {
        let cli = Cli::parse_from(["waypoint", "tools"]);
        assert!(matches!(cli.command, Command::Tools));
        assert!(!cli.json);
        assert!(cli.log.is_none());
        assert!(cli.config.is_none());
    }

    #[test]
    fn test_global_flags() {
        let cli = Cli::parse_from(["waypoint", "--json", "--log", "debug", "sessions"]);
        assert!(cli.json);
        assert_eq!(cli.log, Some("debug".to_string()));
    }

    #[test]
    fn test_run_command() {
        let cli = Cli::parse_from([
            "waypoint",
            "run",
            "release.toml",
            "--concurrency",
            "2",
            "--approve-all",
        ]);
        if let Command::Run {
            goal_file,
            concurrency,
            approve_all,
            decline_all,
        } = cli.command
        {
            assert_eq!(goal_file, PathBuf::from("release.toml"));
            assert_eq!(concurrency, Some(2));
            assert!(approve_all);
            assert!(!decline_all);
        } else {
            panic!("Expected Run command");
        }
    }

    #[test]
    fn test_approve_and_decline_conflict() {
        let result = Cli::try_parse_from(["waypoint", "run", "g.toml", "--approve-all", "--decline-all"]);
        assert!(result.is_err());
    }

    #[test]
    fn test_sessions_command() {
        let cli = Cli::parse_from(["waypoint", "sessions", "--limit", "20"]);
        if let Command::Sessions { limit } = cli.command {
            assert_eq!(limit, 20);
        } else {
            panic!("Expected Sessions command");
        }
    }

    #[test]
    fn test_goal_id_commands() {
        let cli = Cli::parse_from(["waypoint", "retry", "abc"]);
        assert!(matches!(cli.command, Command::Retry { goal_id } if goal_id == "abc"));

        let cli = Cli::parse_from(["waypoint", "resume", "abc"]);
        assert!(matches!(cli.command, Command::Resume { goal_id } if goal_id == "abc"));
    }

    #[test]
    fn test_config_show() {
        let cli = Cli::parse_from(["waypoint", "config", "show"]);
        if let Command::Config { action } = cli.command {
            assert!(matches!(action, ConfigAction::Show));
        } else {
            panic!("Expected Config command");
        }
    }
}
