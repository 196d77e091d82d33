use proptest::prelude::*;
use sdk::errors::{EngineError, ErrorExt, ValidationError};
use sdk::types::{ErrorKind, ToolError, ToolRequest};

// Error hints are static text and never echo the error payload
proptest! {
    #[test]
    fn test_error_user_hint_completeness(error_str in "[a-zA-Z0-9/._-]{8,40}") {
        let errs = vec![
            EngineError::Config(error_str.clone()),
            EngineError::Database(error_str.clone()),
            EngineError::Decomposition(error_str.clone()),
            EngineError::GoalNotFound(error_str.clone()),
            EngineError::Tool(ToolError::ExecutionFailure(error_str.clone())),
            EngineError::Tool(ToolError::NotFound(error_str.clone())),
            EngineError::PathDenied(std::path::PathBuf::from(&error_str)),
            EngineError::Validation(ValidationError::DuplicateTask(error_str.clone())),
        ];

        for err in errs {
            let hint = err.user_hint();
            prop_assert!(!hint.is_empty());
            prop_assert!(!hint.contains(&error_str));
        }
    }
}

// Retryability is exactly {Timeout, ExecutionFailure}
proptest! {
    #[test]
    fn test_only_transient_tool_errors_are_retryable(msg in "\\PC{0,32}", ms in 0u64..100_000) {
        let errors = vec![
            ToolError::NotFound(msg.clone()),
            ToolError::InvalidParameters(msg.clone()),
            ToolError::Timeout(ms),
            ToolError::ExecutionFailure(msg.clone()),
            ToolError::PermissionDenied(msg.clone()),
        ];

        for err in errors {
            let expected = matches!(err.kind(), ErrorKind::Timeout | ErrorKind::ExecutionFailure);
            prop_assert_eq!(err.is_retryable(), expected);
        }
    }
}

// Requests survive JSON transport with their flags intact
proptest! {
    #[test]
    fn test_tool_request_json_transport(
        tool in "[a-z_]{1,20}",
        key in "[a-z]{1,10}",
        value in "\\PC{0,40}",
        destructive in any::<bool>(),
        confirmed in any::<bool>(),
    ) {
        let request = ToolRequest::new(tool)
            .with_param(key.clone(), serde_json::Value::String(value.clone()))
            .destructive(destructive)
            .confirmed(confirmed);

        let encoded = serde_json::to_string(&request).expect("encode");
        let decoded: ToolRequest = serde_json::from_str(&encoded).expect("decode");

        prop_assert_eq!(decoded.param_str(&key).ok(), Some(value));
        prop_assert_eq!(decoded.destructive, destructive);
        prop_assert_eq!(decoded.confirmed, confirmed);
    }
}
