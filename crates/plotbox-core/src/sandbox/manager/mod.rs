//! Sandbox manager
//!
//! The single entry point for callers: optional validation, dispatch to the
//! configured executor strategy, and aggregate statistics. Failures never
//! cross this boundary as errors; they come back as an unsuccessful
//! [`SandboxExecutionResponse`].

mod artifact;
mod builder;
mod request;
mod response;
mod stats;

#[cfg(test)]
mod tests;

pub use builder::SandboxManagerBuilder;
pub use request::ExecutionRequest;
pub use response::SandboxExecutionResponse;
pub use stats::{ExecutionStats, SandboxStats};

use crate::config::SandboxConfig;
use crate::error::PlotboxResult;
use crate::sandbox::executor::CodeExecutor;
use crate::sandbox::policy::SecurityReport;
use crate::sandbox::validation::{CodeValidationResult, SecurityValidator};
use crate::sandbox::{ExecutionMode, SandboxError, SandboxResult, code_digest};
use futures::FutureExt;
use parking_lot::Mutex;
use std::any::Any;
use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{error, info, instrument, warn};

/// Orchestrates validation, execution and statistics
pub struct SandboxManager {
    validator: Arc<SecurityValidator>,
    executors: HashMap<ExecutionMode, Arc<dyn CodeExecutor>>,
    default_mode: ExecutionMode,
    default_timeout: Duration,
    timeout_grace: Duration,
    artifact_root: Option<PathBuf>,
    stats: Mutex<ExecutionStats>,
}

impl std::fmt::Debug for SandboxManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SandboxManager")
            .field("modes", &self.available_modes())
            .field("default_mode", &self.default_mode)
            .field("default_timeout", &self.default_timeout)
            .field("artifact_root", &self.artifact_root)
            .finish()
    }
}

impl SandboxManager {
    pub fn builder() -> SandboxManagerBuilder {
        SandboxManagerBuilder::new()
    }

    /// Manager with only the process strategy registered
    pub fn new(config: SandboxConfig) -> PlotboxResult<Self> {
        Self::builder().config(config).build()
    }

    pub fn validator(&self) -> &Arc<SecurityValidator> {
        &self.validator
    }

    pub fn default_mode(&self) -> ExecutionMode {
        self.default_mode
    }

    /// Modes with a registered executor
    pub fn available_modes(&self) -> Vec<ExecutionMode> {
        let mut modes: Vec<_> = self.executors.keys().copied().collect();
        modes.sort_by_key(|mode| mode.as_str());
        modes
    }

    /// Run the validator alone
    pub fn validate(&self, code: &str) -> CodeValidationResult {
        self.validator.validate(code)
    }

    /// Validate (unless told not to) and run `code`.
    ///
    /// `mode` and `timeout` fall back to the configured defaults.
    pub async fn execute_code_safely(
        &self,
        code: &str,
        output_path: &Path,
        mode: Option<ExecutionMode>,
        timeout: Option<Duration>,
        validate_first: bool,
    ) -> SandboxExecutionResponse {
        let request = ExecutionRequest {
            code: code.to_string(),
            output_path: output_path.to_path_buf(),
            execution_mode: mode,
            timeout_seconds: timeout.map(|timeout| timeout.as_secs_f64()),
            validate_first,
        };
        self.execute(&request).await
    }

    /// Handle one request
    #[instrument(
        skip(self, request),
        fields(
            code_len = request.code.len(),
            code_sha256 = %code_digest(&request.code),
            mode = ?request.execution_mode,
            validate_first = request.validate_first,
        )
    )]
    pub async fn execute(&self, request: &ExecutionRequest) -> SandboxExecutionResponse {
        match AssertUnwindSafe(self.run(request)).catch_unwind().await {
            Ok(response) => response,
            Err(panic) => {
                let err = SandboxError::harness(format!(
                    "manager fault: {}",
                    panic_message(panic.as_ref())
                ));
                error!(error = %err, "sandbox manager panicked");
                self.stats.lock().record_rejection();
                SandboxExecutionResponse::failed(None, &err)
            }
        }
    }

    /// Counters plus derived rates
    pub fn get_sandbox_stats(&self) -> SandboxStats {
        SandboxStats::from(self.stats.lock().clone())
    }

    pub fn reset_stats(&self) {
        *self.stats.lock() = ExecutionStats::default();
        info!("sandbox statistics reset");
    }

    /// Sizes and contents of the policy tables
    pub fn get_security_report(&self) -> SecurityReport {
        self.validator.security_report()
    }

    async fn run(&self, request: &ExecutionRequest) -> SandboxExecutionResponse {
        let validation = if request.validate_first {
            let validation = self.validator.validate(&request.code);
            if !validation.is_valid() {
                info!(
                    security_issues = validation.security_issues().len(),
                    syntax_errors = validation.syntax_errors().len(),
                    "submission rejected by validator"
                );
                self.stats.lock().record_validation_failure();
                return SandboxExecutionResponse::rejected(validation);
            }
            Some(validation)
        } else {
            None
        };

        let (executor, timeout) = match self.dispatch_target(request) {
            Ok(target) => target,
            Err(err) => {
                warn!(error = %err, "request refused before dispatch");
                self.stats.lock().record_rejection();
                return SandboxExecutionResponse::failed(validation, &err);
            }
        };

        let start = Instant::now();
        let dispatched = AssertUnwindSafe(executor.execute(
            &request.code,
            &request.output_path,
            timeout,
        ))
        .catch_unwind();

        // the executor enforces `timeout` itself; this bound only catches an
        // executor that fails to. An executor may queue for up to `timeout`
        // before its own bound starts.
        let bound = timeout
            .saturating_add(self.timeout_grace)
            .saturating_mul(2);
        let mut result = match tokio::time::timeout(bound, dispatched).await {
            Ok(Ok(result)) => result,
            Ok(Err(panic)) => {
                let err = SandboxError::harness(format!(
                    "executor panicked: {}",
                    panic_message(panic.as_ref())
                ));
                error!(error = %err, mode = %executor.mode(), "executor fault");
                err.into_execution_result(start.elapsed())
            }
            Err(_) => {
                warn!(mode = %executor.mode(), "executor overran its watchdog, abandoning run");
                SandboxError::Timeout(timeout).into_execution_result(start.elapsed())
            }
        };
        result.image_path = result.image_path.filter(|path| path.is_file());

        self.stats
            .lock()
            .record_execution(result.success, result.execution_time);

        info!(
            mode = %executor.mode(),
            success = result.success,
            error_kind = result.error_kind.map(|kind| kind.as_str()),
            elapsed_ms = result.execution_time.as_millis() as u64,
            "execution finished"
        );
        SandboxExecutionResponse::executed(validation, result)
    }

    fn dispatch_target(
        &self,
        request: &ExecutionRequest,
    ) -> SandboxResult<(&Arc<dyn CodeExecutor>, Duration)> {
        let timeout = request.timeout()?.unwrap_or(self.default_timeout);
        let mode = request.execution_mode.unwrap_or(self.default_mode);
        let executor = self.executors.get(&mode).ok_or_else(|| {
            SandboxError::harness(format!("no executor configured for mode '{}'", mode))
        })?;
        if let Some(root) = &self.artifact_root {
            artifact::check_output_path(root, &request.output_path)?;
        }
        Ok((executor, timeout))
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}
