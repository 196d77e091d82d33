use serde_json::json;
use std::time::Duration;
use waypoint_engine::config::ToolsConfig;
use waypoint_engine::fs_guard::FileSystemGuard;
use waypoint_engine::tools::ToolGateway;
use sdk::errors::EngineError;
use sdk::types::{ToolError, ToolRequest};
use tempfile::TempDir;

#[test]
fn test_path_traversal_prevention() {
    let temp = TempDir::new().unwrap();
    let workspace = temp.path().join("workspace");

    std::fs::create_dir_all(workspace.join("src")).unwrap();
    std::fs::write(workspace.join("src/main.rs"), "fn main() {}").unwrap();
    std::fs::write(temp.path().join("outside.txt"), "secret").unwrap();

    let guard = FileSystemGuard::new(&workspace).unwrap();

    assert!(guard.validate_path(&workspace.join("src/main.rs")).is_ok());
    assert!(guard.validate_path(std::path::Path::new("src/main.rs")).is_ok());

    let traversal = workspace.join("../outside.txt");
    assert!(matches!(
        guard.validate_path(&traversal),
        Err(EngineError::PathOutsideWorkspace(_))
    ));
    assert!(guard
        .validate_new_path(std::path::Path::new("../escape.txt"))
        .is_err());

    // Deny list applies inside the workspace too
    std::fs::create_dir_all(workspace.join(".ssh")).unwrap();
    assert!(matches!(
        guard.validate_path(&workspace.join(".ssh")),
        Err(EngineError::PathDenied(_))
    ));
    assert!(guard
        .validate_new_path(&workspace.join(".env"))
        .is_err());
}

#[cfg(unix)]
#[test]
fn test_symlink_escape_prevention() {
    let temp = TempDir::new().unwrap();
    let workspace = temp.path().join("workspace");
    std::fs::create_dir_all(&workspace).unwrap();
    std::fs::write(temp.path().join("outside.txt"), "secret").unwrap();
    std::os::unix::fs::symlink(temp.path().join("outside.txt"), workspace.join("link.txt"))
        .unwrap();

    let guard = FileSystemGuard::new(&workspace).unwrap();
    assert!(guard.validate_path(&workspace.join("link.txt")).is_err());
}

fn gateway(workspace: &std::path::Path) -> ToolGateway {
    let config = ToolsConfig {
        web_operations: false,
        ..Default::default()
    };
    ToolGateway::from_config(&config, workspace).unwrap()
}

#[tokio::test]
async fn test_gateway_refuses_unconfirmed_delete() {
    let temp = TempDir::new().unwrap();
    std::fs::write(temp.path().join("keep.txt"), "data").unwrap();
    let gateway = gateway(temp.path());

    let request = ToolRequest::new("file_operations")
        .with_param("operation", json!("delete_file"))
        .with_param("path", json!("keep.txt"));

    let result = gateway.invoke(&request, Duration::from_secs(5)).await;
    assert!(matches!(result, Err(ToolError::PermissionDenied(_))));
    assert!(temp.path().join("keep.txt").exists());

    let result = gateway
        .invoke(&request.confirmed(true), Duration::from_secs(5))
        .await;
    assert!(result.is_ok());
    assert!(!temp.path().join("keep.txt").exists());
}

#[tokio::test]
async fn test_gateway_blocks_command_injection() {
    let temp = TempDir::new().unwrap();
    let gateway = gateway(temp.path());

    for command in ["ls; rm -rf /", "cat file.txt | sh", "echo `whoami`", "bash -c ls"] {
        let request = ToolRequest::new("command_executor").with_param("command", json!(command));
        let result = gateway.invoke(&request, Duration::from_secs(5)).await;
        assert!(
            matches!(result, Err(ToolError::PermissionDenied(_))),
            "{} was not blocked: {:?}",
            command,
            result
        );
    }
}

#[tokio::test]
async fn test_gateway_denies_secret_reads() {
    let temp = TempDir::new().unwrap();
    std::fs::write(temp.path().join(".env"), "TOKEN=abc").unwrap();
    let gateway = gateway(temp.path());

    let request = ToolRequest::new("file_operations")
        .with_param("operation", json!("read_file"))
        .with_param("path", json!(".env"));

    let result = gateway.invoke(&request, Duration::from_secs(5)).await;
    assert!(matches!(result, Err(ToolError::PermissionDenied(_))));
}
