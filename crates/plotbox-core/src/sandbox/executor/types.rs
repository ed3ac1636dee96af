//! Types shared by the executor strategies.

use crate::sandbox::{ExecutionMode, FailureKind, SandboxResult};
use crate::serde_helpers::duration_secs;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Outcome of running a submission
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionResult {
    /// Whether the code ran to completion
    pub success: bool,

    /// Artifact location, set only if the file existed when the run finished
    pub image_path: Option<PathBuf>,

    /// JSON form of the `result` binding left by the code
    pub result_data: Option<serde_json::Value>,

    /// Wall-clock duration of the run
    #[serde(with = "duration_secs")]
    pub execution_time: Duration,

    /// Peak resident memory in bytes (best effort)
    pub memory_usage: Option<u64>,

    /// Always set when `success` is false
    pub error_message: Option<String>,

    /// Classification of the failure
    pub error_kind: Option<FailureKind>,

    /// Captured output, tracebacks included
    pub output_logs: String,
}

impl ExecutionResult {
    /// Successful run; the artifact is re-checked on disk here
    pub fn completed(
        output_path: &Path,
        result_data: Option<serde_json::Value>,
        execution_time: Duration,
    ) -> Self {
        Self {
            success: true,
            image_path: existing_artifact(output_path),
            result_data,
            execution_time,
            memory_usage: None,
            error_message: None,
            error_kind: None,
            output_logs: String::new(),
        }
    }

    /// Failed run
    pub fn failure(kind: FailureKind, message: impl Into<String>, execution_time: Duration) -> Self {
        let message = message.into();
        Self {
            success: false,
            image_path: None,
            result_data: None,
            execution_time,
            memory_usage: None,
            error_message: Some(if message.is_empty() {
                kind.as_str().to_string()
            } else {
                message
            }),
            error_kind: Some(kind),
            output_logs: String::new(),
        }
    }

    pub fn with_logs(mut self, logs: impl Into<String>) -> Self {
        self.output_logs = logs.into();
        self
    }

    pub fn with_memory_usage(mut self, bytes: Option<u64>) -> Self {
        self.memory_usage = bytes;
        self
    }
}

/// `path` if it names an existing file
pub fn existing_artifact(path: &Path) -> Option<PathBuf> {
    path.is_file().then(|| path.to_path_buf())
}

/// Absolute form of `output_path` with its directory created
pub async fn prepare_output_path(output_path: &Path) -> SandboxResult<PathBuf> {
    let absolute = std::path::absolute(output_path)?;
    if let Some(parent) = absolute.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    Ok(absolute)
}

/// A strategy for running validated code
///
/// Implementations re-validate the code themselves and never return an
/// error: every failure is reported through the result.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait CodeExecutor: Send + Sync {
    /// Which strategy this is
    fn mode(&self) -> ExecutionMode;

    /// Run `code`, expecting it to write its artifact to `output_path`
    async fn execute(&self, code: &str, output_path: &Path, timeout: Duration) -> ExecutionResult;
}
