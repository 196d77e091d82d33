//! Integration tests for the RiskAssessor module
//!
//! These tests verify that the RiskAssessor classifies tool operations into
//! tiers and flags tasks that need a human before they run.

use serde_json::json;
use waypoint_engine::graph::{Task, TaskGraph, TaskSpec};
use waypoint_engine::risk_assessor::{Operation, RiskAssessor, RiskTier};

fn assessor() -> RiskAssessor {
    RiskAssessor::new().unwrap()
}

fn task(spec: TaskSpec) -> Task {
    let id = spec.id.clone();
    TaskGraph::from_specs(vec![spec])
        .unwrap()
        .task(&id)
        .unwrap()
        .clone()
}

fn args(list: &[&str]) -> Vec<String> {
    list.iter().map(|s| s.to_string()).collect()
}

#[test]
fn test_all_tier0_operations_classified_correctly() {
    let assessor = assessor();
    let ops = [
        ("file_operations", "read_file"),
        ("file_operations", "list_directory"),
        ("git_operations", "status"),
        ("git_operations", "current_branch"),
        ("web_operations", "get"),
    ];

    for (tool, name) in ops {
        let result = assessor.assess(&Operation::new(tool, name, vec![]));
        assert_eq!(result.unwrap(), RiskTier::Tier0, "{}.{} should be Tier 0", tool, name);
    }
}

#[test]
fn test_all_tier1_operations_classified_correctly() {
    let assessor = assessor();
    let ops = [
        ("file_operations", "write_file"),
        ("file_operations", "create_file"),
        ("file_operations", "create_directory"),
        ("git_operations", "add"),
        ("git_operations", "commit"),
        ("git_operations", "pull"),
        ("command_executor", "execute"),
        ("web_operations", "post"),
    ];

    for (tool, name) in ops {
        let result = assessor.assess(&Operation::new(tool, name, vec![]));
        assert_eq!(result.unwrap(), RiskTier::Tier1, "{}.{} should be Tier 1", tool, name);
    }
}

#[test]
fn test_all_tier2_operations_classified_correctly() {
    let assessor = assessor();
    let ops = [
        ("file_operations", "delete_file"),
        ("git_operations", "push"),
        ("git_operations", "reset"),
    ];

    for (tool, name) in ops {
        let result = assessor.assess(&Operation::new(tool, name, vec![]));
        assert_eq!(result.unwrap(), RiskTier::Tier2, "{}.{} should be Tier 2", tool, name);
    }
}

#[test]
fn test_all_dangerous_flags_detected() {
    let assessor = assessor();

    for flag in ["--force", "-rf", "--delete", "--hard"] {
        let op = Operation::new("command_executor", "execute", args(&["tool", flag]));
        assert_eq!(
            assessor.assess(&op).unwrap(),
            RiskTier::Tier2,
            "flag {} should escalate to Tier 2",
            flag
        );
    }

    // Flags embedded in a longer argument still count
    let op = Operation::new("git_operations", "commit", args(&["--force-with-lease"]));
    assert_eq!(assessor.assess(&op).unwrap(), RiskTier::Tier2);
}

#[test]
fn test_unknown_operation_rejected() {
    let assessor = assessor();
    assert!(assessor.assess(&Operation::new("file_operations", "", vec![])).is_err());
    assert!(assessor.assess(&Operation::new("plugin", "run", vec![])).is_err());
}

#[test]
fn test_realistic_git_tasks() {
    let assessor = assessor();

    let status = task(
        TaskSpec::new("status", "git_operations")
            .with_description("Show working tree state")
            .with_param("operation", json!("status")),
    );
    let assessment = assessor.assess_task(&status);
    assert_eq!(assessment.tier, Some(RiskTier::Tier0));
    assert!(!assessment.destructive);

    let push = task(
        TaskSpec::new("push", "git_operations")
            .with_description("Publish the release branch")
            .with_param("operation", json!("push"))
            .with_param("args", json!(["origin", "release"])),
    );
    let assessment = assessor.assess_task(&push);
    assert_eq!(assessment.tier, Some(RiskTier::Tier2));
    assert!(assessment.destructive);
}

#[test]
fn test_realistic_command_tasks() {
    let assessor = assessor();

    let build = task(
        TaskSpec::new("build", "command_executor")
            .with_description("Build the project")
            .with_param("operation", json!("execute"))
            .with_param("command", json!("cargo build --release")),
    );
    let assessment = assessor.assess_task(&build);
    assert_eq!(assessment.tier, Some(RiskTier::Tier1));
    assert!(!assessment.destructive);

    let clean = task(
        TaskSpec::new("clean", "command_executor")
            .with_description("Reset the build directory")
            .with_param("operation", json!("execute"))
            .with_param("command", json!("rm -rf target")),
    );
    assert!(assessor.assess_task(&clean).destructive);
}

#[test]
fn test_destructive_wording_and_flag() {
    let assessor = assessor();

    let by_wording = task(
        TaskSpec::new("tidy", "custom_tool").with_description("Delete the stale caches"),
    );
    let assessment = assessor.assess_task(&by_wording);
    assert_eq!(assessment.tier, None);
    assert!(assessment.destructive);

    let by_flag = task(TaskSpec::new("flagged", "custom_tool").destructive(true));
    assert!(assessor.assess_task(&by_flag).destructive);

    // Whole words only
    let harmless = task(
        TaskSpec::new("docs", "custom_tool").with_description("Document the formatter"),
    );
    assert!(!assessor.assess_task(&harmless).destructive);
}

#[test]
fn test_ambiguity_detection() {
    let assessor = assessor();

    let vague = task(
        TaskSpec::new("vague", "custom_tool")
            .with_description("Perhaps update the changelog or something"),
    );
    assert_eq!(
        assessor.assess_task(&vague).ambiguity,
        Some("perhaps".to_string())
    );

    assert_eq!(
        assessor.find_ambiguity("I'm NOT SURE which branch"),
        Some("not sure".to_string())
    );
    assert_eq!(assessor.find_ambiguity("Update the changelog"), None);
}
