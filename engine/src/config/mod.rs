//! Configuration management
//!
//! This module handles loading, validation, and management of the Waypoint configuration.
//! Configuration is stored in TOML format at ~/.waypoint/config.toml.
//!
//! # Configuration Sections
//!
//! - **core**: Workspace path, log level, data directory
//! - **orchestrator**: Worker pool size, retry/backoff policy, escalation switches
//! - **planner**: Low-confidence threshold and default confidence
//! - **memory**: Moving-average weight and persistence
//! - **tools**: Built-in tool enablement, command allowlist, timeouts
//!
//! # Path Expansion
//!
//! The configuration system automatically:
//! - Expands ~ to the user's home directory
//! - Canonicalizes the workspace, creating it if needed
//! - Creates the data directory if it doesn't exist
//!
//! # Examples
//!
//! ```no_run
//! use waypoint_engine::config::Config;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! // Load configuration from default location
//! let config = Config::load_or_create()?;
//!
//! println!("Workspace: {:?}", config.core.workspace);
//! println!("Concurrency: {}", config.orchestrator.concurrency);
//! # Ok(())
//! # }
//! ```

use sdk::errors::EngineError;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Core engine settings
    pub core: CoreConfig,

    /// Execution policy
    #[serde(default)]
    pub orchestrator: OrchestratorConfig,

    /// Planning heuristics
    #[serde(default)]
    pub planner: PlannerConfig,

    /// Memory store settings
    #[serde(default)]
    pub memory: MemoryConfig,

    /// Built-in tool settings
    #[serde(default)]
    pub tools: ToolsConfig,
}

/// Core engine configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoreConfig {
    /// Workspace directory path (supports ~ expansion)
    pub workspace: PathBuf,

    /// Log level (error, warn, info, debug, trace)
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Data directory path (supports ~ expansion)
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
}

/// Orchestrator execution policy
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OrchestratorConfig {
    /// Maximum number of tasks running at once
    pub concurrency: usize,

    /// Dispatches per task before it is failed
    pub max_attempts: u32,

    /// Retry delay is `backoff_base_ms * 2^attempt`, capped
    pub backoff_base_ms: u64,
    pub backoff_cap_ms: u64,

    /// Per-invocation tool timeout
    pub task_timeout_secs: u64,

    /// Defers allowed before an escalation resolves as unresolved
    pub max_defers: u32,

    pub escalate_ambiguous: bool,
    pub escalate_repeated_failures: bool,

    /// Keep running independent work after a permanent failure
    pub drain_after_failure: bool,

    /// Re-plan remaining groups between barriers after outcomes are absorbed
    pub auto_replan: bool,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            concurrency: 4,
            max_attempts: 3,
            backoff_base_ms: 500,
            backoff_cap_ms: 30_000,
            task_timeout_secs: 60,
            max_defers: 3,
            escalate_ambiguous: true,
            escalate_repeated_failures: true,
            drain_after_failure: true,
            auto_replan: false,
        }
    }
}

impl OrchestratorConfig {
    /// Delay before re-dispatching a task that has been attempted `attempt` times
    pub fn backoff_delay(&self, attempt: u32) -> Duration {
        let factor = 1u64.checked_shl(attempt.min(32)).unwrap_or(u64::MAX);
        let millis = self
            .backoff_base_ms
            .saturating_mul(factor)
            .min(self.backoff_cap_ms);
        Duration::from_millis(millis)
    }

    pub fn task_timeout(&self) -> Duration {
        Duration::from_secs(self.task_timeout_secs)
    }
}

/// Planner heuristics
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PlannerConfig {
    /// Confidence below which a task is flagged for review
    pub low_confidence_threshold: f64,

    /// Samples a pattern needs before it can flag a task
    pub min_samples: u64,

    /// Confidence assumed for tool shapes memory has never seen
    pub default_confidence: f64,
}

impl Default for PlannerConfig {
    fn default() -> Self {
        Self {
            low_confidence_threshold: 0.3,
            min_samples: 3,
            default_confidence: 0.5,
        }
    }
}

/// Memory store configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MemoryConfig {
    /// Weight of the newest sample in the success-rate moving average
    pub ewma_alpha: f64,

    /// Persist outcomes and patterns to the database
    pub persist: bool,
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            ewma_alpha: 0.3,
            persist: true,
        }
    }
}

/// Built-in tool configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ToolsConfig {
    pub file_operations: bool,
    pub command_executor: bool,
    pub git_operations: bool,
    pub web_operations: bool,

    /// Programs `command_executor` may run
    pub allowed_commands: Vec<String>,

    pub command_timeout_secs: u64,
    pub web_timeout_secs: u64,
}

impl Default for ToolsConfig {
    fn default() -> Self {
        Self {
            file_operations: true,
            command_executor: true,
            git_operations: true,
            web_operations: true,
            allowed_commands: default_allowed_commands(),
            command_timeout_secs: 30,
            web_timeout_secs: 30,
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("~/.waypoint/data")
}

fn default_allowed_commands() -> Vec<String> {
    [
        "ls", "cat", "echo", "grep", "find", "head", "tail", "wc", "pwd", "date", "python",
        "python3", "pip", "node", "npm", "cargo", "rustc", "make", "git",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

impl Config {
    /// Load configuration from the default location (~/.waypoint/config.toml)
    ///
    /// If the configuration file doesn't exist, creates a default configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - Configuration file cannot be read
    /// - TOML parsing fails
    /// - Validation fails (invalid values, unusable paths)
    pub fn load_or_create() -> Result<Self, EngineError> {
        let config_path = Self::default_config_path()?;

        if config_path.exists() {
            Self::load_from_path(&config_path)
        } else {
            Self::create_default(&config_path)
        }
    }

    /// Load configuration from a specific path
    pub fn load_from_path(path: &Path) -> Result<Self, EngineError> {
        let contents = fs::read_to_string(path)
            .map_err(|e| EngineError::Config(format!("Failed to read config file: {}", e)))?;

        Self::from_toml_str(&contents)
    }

    /// Parse and validate configuration text
    pub fn from_toml_str(contents: &str) -> Result<Self, EngineError> {
        let mut config: Config = toml::from_str(contents)
            .map_err(|e| EngineError::Config(format!("Failed to parse config: {}", e)))?;

        // Validate and process configuration
        config.validate_and_process()?;

        Ok(config)
    }

    /// Create default configuration and save to path
    fn create_default(path: &Path) -> Result<Self, EngineError> {
        // Create config directory if it doesn't exist
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|e| {
                EngineError::Config(format!("Failed to create config directory: {}", e))
            })?;
        }

        let mut config = Self::default_config();
        config.validate_and_process()?;

        let toml_string = toml::to_string_pretty(&config)
            .map_err(|e| EngineError::Config(format!("Failed to serialize config: {}", e)))?;

        fs::write(path, toml_string)
            .map_err(|e| EngineError::Config(format!("Failed to write config file: {}", e)))?;

        Ok(config)
    }

    /// Get the default configuration file path (~/.waypoint/config.toml)
    fn default_config_path() -> Result<PathBuf, EngineError> {
        let home = dirs::home_dir()
            .ok_or_else(|| EngineError::Config("Could not determine home directory".to_string()))?;

        Ok(home.join(".waypoint").join("config.toml"))
    }

    fn default_config() -> Self {
        Self {
            core: CoreConfig {
                workspace: PathBuf::from("~/projects"),
                log_level: default_log_level(),
                data_dir: default_data_dir(),
            },
            orchestrator: OrchestratorConfig::default(),
            planner: PlannerConfig::default(),
            memory: MemoryConfig::default(),
            tools: ToolsConfig::default(),
        }
    }

    /// SQLite file holding sessions, outcomes and patterns
    pub fn database_path(&self) -> PathBuf {
        self.core.data_dir.join("waypoint.db")
    }

    /// Validate and process configuration
    ///
    /// This method:
    /// - Validates value ranges
    /// - Expands ~ in paths
    /// - Canonicalizes the workspace, creating it if needed
    /// - Creates the data directory if needed
    fn validate_and_process(&mut self) -> Result<(), EngineError> {
        self.validate_values()?;

        // Expand and validate workspace path
        self.core.workspace = expand_path(&self.core.workspace)?;
        self.core.workspace = canonicalize_or_create(&self.core.workspace)?;

        // Verify workspace is a directory
        if !self.core.workspace.is_dir() {
            return Err(EngineError::Config(format!(
                "Workspace path is not a directory: {:?}",
                self.core.workspace
            )));
        }

        // Expand and validate data directory
        self.core.data_dir = expand_path(&self.core.data_dir)?;

        if !self.core.data_dir.exists() {
            fs::create_dir_all(&self.core.data_dir).map_err(|e| {
                EngineError::Config(format!("Failed to create data directory: {}", e))
            })?;
        }

        Ok(())
    }

    fn validate_values(&self) -> Result<(), EngineError> {
        // Validate log level
        let valid_log_levels = ["error", "warn", "info", "debug", "trace"];
        if !valid_log_levels.contains(&self.core.log_level.as_str()) {
            return Err(EngineError::Config(format!(
                "Invalid log level '{}'. Must be one of: {}",
                self.core.log_level,
                valid_log_levels.join(", ")
            )));
        }

        let orchestrator = &self.orchestrator;
        if orchestrator.concurrency == 0 {
            return Err(EngineError::Config(
                "orchestrator.concurrency must be at least 1".to_string(),
            ));
        }
        if orchestrator.max_attempts == 0 {
            return Err(EngineError::Config(
                "orchestrator.max_attempts must be at least 1".to_string(),
            ));
        }
        if orchestrator.backoff_base_ms > orchestrator.backoff_cap_ms {
            return Err(EngineError::Config(
                "orchestrator.backoff_base_ms must not exceed backoff_cap_ms".to_string(),
            ));
        }

        // Validate thresholds
        for (name, value) in [
            (
                "planner.low_confidence_threshold",
                self.planner.low_confidence_threshold,
            ),
            ("planner.default_confidence", self.planner.default_confidence),
        ] {
            if !(0.0..=1.0).contains(&value) {
                return Err(EngineError::Config(format!(
                    "{} must be between 0.0 and 1.0",
                    name
                )));
            }
        }

        if !(self.memory.ewma_alpha > 0.0 && self.memory.ewma_alpha <= 1.0) {
            return Err(EngineError::Config(
                "memory.ewma_alpha must be greater than 0.0 and at most 1.0".to_string(),
            ));
        }

        Ok(())
    }
}

/// Expand ~ in path to user's home directory
fn expand_path(path: &Path) -> Result<PathBuf, EngineError> {
    let path_str = path
        .to_str()
        .ok_or_else(|| EngineError::Config("Invalid UTF-8 in path".to_string()))?;

    if let Some(rest) = path_str.strip_prefix("~/") {
        let home = dirs::home_dir()
            .ok_or_else(|| EngineError::Config("Could not determine home directory".to_string()))?;

        Ok(home.join(rest))
    } else if path_str == "~" {
        dirs::home_dir()
            .ok_or_else(|| EngineError::Config("Could not determine home directory".to_string()))
    } else {
        Ok(path.to_path_buf())
    }
}

/// Canonicalize path, creating it if it doesn't exist
fn canonicalize_or_create(path: &Path) -> Result<PathBuf, EngineError> {
    if !path.exists() {
        fs::create_dir_all(path).map_err(|e| {
            EngineError::Config(format!("Failed to create directory {:?}: {}", path, e))
        })?;
    }

    path.canonicalize()
        .map_err(|e| EngineError::PathCanonicalization(path.to_path_buf(), e.to_string()))
}
