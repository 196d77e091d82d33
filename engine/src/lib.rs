//! Waypoint Engine Library
//!
//! Goal-to-execution pipeline: task graphs, planning, orchestration, tool
//! gateway, memory and adaptation. Used by the `waypoint` binary and by the
//! integration tests.

/// Configuration management module
pub mod config;

/// File system security module
pub mod fs_guard;

/// Command execution security module
pub mod command_executor;

/// Risk assessment module
pub mod risk_assessor;

/// Database persistence module
pub mod db;

/// Message bus for goal progress events
pub mod message_bus;

/// Task graph and task state machine
pub mod graph;

/// Outcome records and learned patterns
pub mod memory;

/// Conductor orchestration module
pub mod conductor;

/// Built-in tools and the tool gateway
pub mod tools;

/// Telemetry and Observability
pub mod telemetry;

/// CLI interface module
pub mod cli;

/// Command handlers module
pub mod handlers;
