//! Tests for the sandbox manager

#[cfg(test)]
mod tests {
    use crate::config::SandboxConfig;
    use crate::sandbox::executor::{CodeExecutor, ExecutionResult, MockCodeExecutor};
    use crate::sandbox::manager::{ExecutionRequest, SandboxManager};
    use crate::sandbox::{ExecutionMode, FailureKind};
    use async_trait::async_trait;
    use serde_json::json;
    use std::path::Path;
    use std::sync::Arc;
    use std::time::{Duration, Instant};
    use tempfile::TempDir;

    const VALID_CODE: &str = "values = [1, 2, 3]\nresult = {'total': sum(values)}\n";

    fn manager_with(executor: MockCodeExecutor) -> SandboxManager {
        SandboxManager::builder()
            .executor(Arc::new(executor))
            .build()
            .unwrap()
    }

    fn succeeding_mock() -> MockCodeExecutor {
        let mut mock = MockCodeExecutor::new();
        mock.expect_mode().return_const(ExecutionMode::Restricted);
        mock.expect_execute().times(1).returning(|_, path, _| {
            ExecutionResult::completed(path, Some(json!({"total": 6})), Duration::from_millis(40))
        });
        mock
    }

    struct SlowExecutor;

    #[async_trait]
    impl CodeExecutor for SlowExecutor {
        fn mode(&self) -> ExecutionMode {
            ExecutionMode::Restricted
        }

        async fn execute(&self, _code: &str, output_path: &Path, _timeout: Duration) -> ExecutionResult {
            tokio::time::sleep(Duration::from_secs(30)).await;
            ExecutionResult::completed(output_path, None, Duration::from_secs(30))
        }
    }

    /// Waits one full timeout for its turn, then runs briefly
    struct QueuedExecutor;

    #[async_trait]
    impl CodeExecutor for QueuedExecutor {
        fn mode(&self) -> ExecutionMode {
            ExecutionMode::Restricted
        }

        async fn execute(&self, _code: &str, output_path: &Path, timeout: Duration) -> ExecutionResult {
            tokio::time::sleep(timeout).await;
            let run = Duration::from_millis(150);
            tokio::time::sleep(run).await;
            ExecutionResult::completed(output_path, Some(json!(1)), run)
        }
    }

    #[tokio::test]
    async fn test_validation_failure_skips_executor() {
        let mut mock = MockCodeExecutor::new();
        mock.expect_mode().return_const(ExecutionMode::Restricted);
        mock.expect_execute().never();
        let manager = manager_with(mock);

        let response = manager
            .execute_code_safely(
                "import os\nos.system('id')",
                Path::new("/tmp/plot.png"),
                None,
                None,
                true,
            )
            .await;

        assert!(!response.overall_success);
        assert!(response.execution_result.is_none());
        assert_eq!(response.error_kind, Some(FailureKind::SecurityRejected));
        assert!(response.error_message.unwrap().contains("'os'"));
        assert!(!response.validation_result.unwrap().is_valid());

        let stats = manager.get_sandbox_stats();
        assert_eq!(stats.counters.total_executions, 1);
        assert_eq!(stats.counters.validation_failures, 1);
        assert_eq!(stats.counters.executor_invocations, 0);
        assert_eq!(stats.validation_failure_rate, 1.0);
    }

    #[tokio::test]
    async fn test_syntax_failure_skips_executor() {
        let mut mock = MockCodeExecutor::new();
        mock.expect_mode().return_const(ExecutionMode::Restricted);
        mock.expect_execute().never();
        let manager = manager_with(mock);

        let response = manager
            .execute(&ExecutionRequest::new("def broken(:", "/tmp/plot.png"))
            .await;

        assert_eq!(response.error_kind, Some(FailureKind::SyntaxInvalid));
        assert_eq!(manager.get_sandbox_stats().counters.validation_failures, 1);
    }

    #[tokio::test]
    async fn test_successful_dispatch() {
        let manager = manager_with(succeeding_mock());

        let response = manager
            .execute(&ExecutionRequest::new(VALID_CODE, "/tmp/plot.png"))
            .await;

        assert!(response.overall_success);
        assert!(response.error_message.is_none());
        assert!(response.validation_result.unwrap().is_valid());
        let execution = response.execution_result.unwrap();
        assert_eq!(execution.result_data, Some(json!({"total": 6})));

        let stats = manager.get_sandbox_stats();
        assert_eq!(stats.counters.successful_executions, 1);
        assert_eq!(stats.counters.executor_invocations, 1);
        assert_eq!(stats.counters.average_execution_time, Duration::from_millis(40));
        assert_eq!(stats.success_rate, 1.0);
    }

    #[tokio::test]
    async fn test_executor_failure_counted() {
        let mut mock = MockCodeExecutor::new();
        mock.expect_mode().return_const(ExecutionMode::Restricted);
        mock.expect_execute().times(1).returning(|_, _, _| {
            ExecutionResult::failure(
                FailureKind::RuntimeFailure,
                "code execution error: ZeroDivisionError: division by zero",
                Duration::from_millis(3),
            )
        });
        let manager = manager_with(mock);

        let response = manager
            .execute(&ExecutionRequest::new(VALID_CODE, "/tmp/plot.png"))
            .await;

        assert!(!response.overall_success);
        assert_eq!(response.error_kind, Some(FailureKind::RuntimeFailure));
        assert!(response.error_message.unwrap().contains("ZeroDivisionError"));

        let stats = manager.get_sandbox_stats();
        assert_eq!(stats.counters.execution_failures, 1);
        assert_eq!(stats.counters.failed_executions, 1);
        assert_eq!(stats.execution_failure_rate, 1.0);
    }

    #[tokio::test]
    async fn test_skip_validation_dispatches_directly() {
        let mut mock = MockCodeExecutor::new();
        mock.expect_mode().return_const(ExecutionMode::Restricted);
        mock.expect_execute().times(1).returning(|_, _, _| {
            ExecutionResult::failure(
                FailureKind::SecurityRejected,
                "code failed security validation: line 1: import of forbidden module 'os'",
                Duration::ZERO,
            )
        });
        let manager = manager_with(mock);

        let request = ExecutionRequest::new("import os", "/tmp/plot.png").skip_validation();
        let response = manager.execute(&request).await;

        assert!(response.validation_result.is_none());
        assert!(!response.overall_success);
        assert_eq!(manager.get_sandbox_stats().counters.validation_failures, 0);
    }

    #[tokio::test]
    async fn test_executor_panic_becomes_harness_failure() {
        let mut mock = MockCodeExecutor::new();
        mock.expect_mode().return_const(ExecutionMode::Restricted);
        mock.expect_execute()
            .returning(|_, _, _| panic!("interpreter state corrupted"));
        let manager = manager_with(mock);

        let response = manager
            .execute(&ExecutionRequest::new(VALID_CODE, "/tmp/plot.png"))
            .await;

        assert!(!response.overall_success);
        assert_eq!(response.error_kind, Some(FailureKind::HarnessFailure));
        assert!(response.error_message.unwrap().contains("interpreter state corrupted"));
        assert_eq!(manager.get_sandbox_stats().counters.execution_failures, 1);
    }

    #[tokio::test]
    async fn test_claimed_artifact_rechecked() {
        let dir = TempDir::new().unwrap();
        let output = dir.path().join("plot.png");

        let mut mock = MockCodeExecutor::new();
        mock.expect_mode().return_const(ExecutionMode::Restricted);
        mock.expect_execute().returning(|_, path, _| {
            let mut result = ExecutionResult::completed(path, None, Duration::ZERO);
            result.image_path = Some(path.to_path_buf());
            result
        });
        let manager = manager_with(mock);

        let response = manager
            .execute(&ExecutionRequest::new(VALID_CODE, output.clone()))
            .await;

        assert!(response.overall_success);
        assert!(response.execution_result.unwrap().image_path.is_none());
    }

    #[tokio::test]
    async fn test_unregistered_mode_refused() {
        let manager = SandboxManager::new(SandboxConfig::default()).unwrap();
        assert_eq!(manager.available_modes(), vec![ExecutionMode::Process]);

        let request = ExecutionRequest::new(VALID_CODE, "/tmp/plot.png")
            .with_mode(ExecutionMode::Restricted);
        let response = manager.execute(&request).await;

        assert_eq!(response.error_kind, Some(FailureKind::HarnessFailure));
        assert!(response.error_message.unwrap().contains("restricted"));
        assert_eq!(manager.get_sandbox_stats().counters.executor_invocations, 0);
    }

    #[tokio::test]
    async fn test_artifact_root_containment() {
        let root = TempDir::new().unwrap();
        let mut mock = MockCodeExecutor::new();
        mock.expect_mode().return_const(ExecutionMode::Restricted);
        mock.expect_execute().never();

        let config = SandboxConfig {
            artifact_root: Some(root.path().to_path_buf()),
            ..Default::default()
        };
        let manager = SandboxManager::builder()
            .config(config)
            .executor(Arc::new(mock))
            .build()
            .unwrap();

        let outside = root.path().join("..").join("escape.png");
        let response = manager
            .execute(&ExecutionRequest::new(VALID_CODE, outside))
            .await;

        assert_eq!(response.error_kind, Some(FailureKind::SecurityRejected));
        assert!(response.error_message.unwrap().contains("outside the artifact root"));
    }

    #[tokio::test]
    async fn test_invalid_timeout_refused() {
        let mut mock = MockCodeExecutor::new();
        mock.expect_mode().return_const(ExecutionMode::Restricted);
        mock.expect_execute().never();
        let manager = manager_with(mock);

        let request = ExecutionRequest {
            timeout_seconds: Some(-3.0),
            ..ExecutionRequest::new(VALID_CODE, "/tmp/plot.png")
        };
        let response = manager.execute(&request).await;

        assert!(!response.overall_success);
        assert!(response.error_message.unwrap().contains("timeout_seconds"));
    }

    #[tokio::test]
    async fn test_caller_side_bound() {
        let config = SandboxConfig {
            timeout_grace: Duration::from_millis(100),
            ..Default::default()
        };
        let manager = SandboxManager::builder()
            .config(config)
            .executor(Arc::new(SlowExecutor))
            .build()
            .unwrap();

        let start = Instant::now();
        let response = manager
            .execute_code_safely(
                VALID_CODE,
                Path::new("/tmp/plot.png"),
                None,
                Some(Duration::from_millis(200)),
                true,
            )
            .await;

        assert!(start.elapsed() < Duration::from_secs(5));
        assert_eq!(response.error_kind, Some(FailureKind::ExecutionTimeout));
        assert_eq!(response.error_message.as_deref(), Some("execution timed out"));
    }

    #[tokio::test]
    async fn test_queue_wait_not_reported_as_timeout() {
        let config = SandboxConfig {
            timeout_grace: Duration::from_millis(100),
            ..Default::default()
        };
        let manager = SandboxManager::builder()
            .config(config)
            .executor(Arc::new(QueuedExecutor))
            .build()
            .unwrap();

        let response = manager
            .execute_code_safely(
                VALID_CODE,
                Path::new("/tmp/plot.png"),
                None,
                Some(Duration::from_millis(200)),
                true,
            )
            .await;

        assert!(response.overall_success, "unexpected failure: {:?}", response.error_message);
        assert_eq!(response.execution_result.unwrap().result_data, Some(json!(1)));
    }

    #[tokio::test]
    async fn test_concurrent_calls_counted_once_each() {
        let mut mock = MockCodeExecutor::new();
        mock.expect_mode().return_const(ExecutionMode::Restricted);
        mock.expect_execute()
            .times(16)
            .returning(|_, path, _| ExecutionResult::completed(path, None, Duration::from_millis(1)));
        let manager = Arc::new(manager_with(mock));

        let handles: Vec<_> = (0..16)
            .map(|_| {
                let manager = Arc::clone(&manager);
                tokio::spawn(async move {
                    manager
                        .execute(&ExecutionRequest::new(VALID_CODE, "/tmp/plot.png"))
                        .await
                })
            })
            .collect();
        for handle in handles {
            assert!(handle.await.unwrap().overall_success);
        }

        let stats = manager.get_sandbox_stats();
        assert_eq!(stats.counters.total_executions, 16);
        assert_eq!(stats.counters.successful_executions, 16);
    }

    #[tokio::test]
    async fn test_reset_stats() {
        let manager = manager_with(succeeding_mock());
        manager
            .execute(&ExecutionRequest::new(VALID_CODE, "/tmp/plot.png"))
            .await;
        assert_eq!(manager.get_sandbox_stats().counters.total_executions, 1);

        manager.reset_stats();
        let stats = manager.get_sandbox_stats();
        assert_eq!(stats.counters.total_executions, 0);
        assert!(stats.counters.last_execution_at.is_none());
    }

    #[test]
    fn test_security_report() {
        let manager = SandboxManager::new(SandboxConfig::default()).unwrap();
        let report = manager.get_security_report();
        assert!(report.forbidden_modules.contains(&"os".to_string()));
        assert!(report.allowed_modules.contains(&"matplotlib".to_string()));
        assert_eq!(report.forbidden_modules_count, report.forbidden_modules.len());
    }

    #[test]
    fn test_policy_overrides_applied() {
        let mut config = SandboxConfig::default();
        config.policy.extra_denied_functions.push("sorted".to_string());
        let manager = SandboxManager::new(config).unwrap();

        let validation = manager.validate("result = sorted([3, 1, 2])\n");
        assert!(!validation.is_valid());
        assert!(validation.security_issues()[0].contains("sorted"));
    }
}
