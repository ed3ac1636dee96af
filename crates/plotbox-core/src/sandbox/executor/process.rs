//! Process-isolated strategy: the harnessed script runs in a child interpreter

use super::harness::{self, EXIT_IMPORT_DENIED, EXIT_MEMORY_ERROR, EXIT_SYNTAX_ERROR};
use super::limits::{apply_child_limits, kill_process_group};
use super::output::{CapturedOutput, read_output_limited};
use super::types::{CodeExecutor, ExecutionResult, prepare_output_path};
use crate::config::SandboxConfig;
use crate::sandbox::validation::SecurityValidator;
use crate::sandbox::{
    ExecutionMode, ResourceLimits, SandboxError, SandboxResult, code_digest, usage,
};
use async_trait::async_trait;
use serde::{Deserialize, Deserializer};
use std::path::Path;
use std::process::{ExitStatus, Stdio};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::io::AsyncRead;
use tokio::process::Command;
use tokio::task::JoinHandle;
use tracing::{debug, error, instrument, warn};
use uuid::Uuid;

/// How long to wait for the output readers once the child is gone
const READER_DRAIN_TIMEOUT: Duration = Duration::from_secs(2);

const SCRIPT_NAME: &str = "script.py";

/// Accounting slack when comparing reaped CPU time against the limit
const CPU_ACCOUNTING_SLACK_SECS: f64 = 0.1;

/// Report line the harness prints after the code has run
#[derive(Debug, Default, PartialEq, Deserialize)]
struct HarnessReport {
    /// `Some(Null)` when the code bound `result = None`
    #[serde(default, deserialize_with = "present")]
    result: Option<serde_json::Value>,
    /// Peak RSS of the child itself
    #[serde(default)]
    max_rss_bytes: Option<u64>,
}

fn present<'de, D>(deserializer: D) -> Result<Option<serde_json::Value>, D::Error>
where
    D: Deserializer<'de>,
{
    serde_json::Value::deserialize(deserializer).map(Some)
}

/// Runs each submission in a fresh interpreter process.
///
/// The child gets a cleared environment, its own process group and rlimits
/// set before exec. The supervisor kills the whole group when the wall-clock
/// bound expires.
#[derive(Debug, Clone)]
pub struct ProcessExecutor {
    validator: Arc<SecurityValidator>,
    python: String,
    env_passthrough: Vec<String>,
    limits: ResourceLimits,
}

impl ProcessExecutor {
    pub fn new(validator: Arc<SecurityValidator>, config: &SandboxConfig) -> Self {
        Self {
            validator,
            python: config.python_executable.clone(),
            env_passthrough: config.env_passthrough.clone(),
            limits: config.limits.clone(),
        }
    }

    /// Interpreter the child is started with
    pub fn python_executable(&self) -> &str {
        &self.python
    }

    async fn run(
        &self,
        code: &str,
        output_path: &Path,
        timeout: Duration,
        start: Instant,
    ) -> SandboxResult<ExecutionResult> {
        let validation = self.validator.validate(code);
        if !validation.is_valid() {
            return Err(SandboxError::from_validation(&validation));
        }

        let output_path = prepare_output_path(output_path).await?;
        let workspace = tempfile::Builder::new().prefix("plotbox-").tempdir()?;
        let marker = format!("PLOTBOX_RESULT_{}:", Uuid::new_v4().simple());
        let script = harness::render(code, &output_path, &marker, self.validator.policy())?;
        tokio::fs::write(workspace.path().join(SCRIPT_NAME), script).await?;

        let children_cpu_before = usage::cpu_seconds_children();
        let mut child = self.command(workspace.path()).spawn().map_err(|e| {
            SandboxError::harness(format!("failed to start '{}': {}", self.python, e))
        })?;
        let pid = child.id();
        debug!(pid, "child interpreter started");

        let cap = self.limits.output_cap();
        let stdout_task = spawn_reader(child.stdout.take(), cap, Some(marker));
        let stderr_task = spawn_reader(child.stderr.take(), cap, None);

        let status = match tokio::time::timeout(timeout, child.wait()).await {
            Ok(Ok(status)) => Some(status),
            Ok(Err(e)) => {
                kill_process_group(pid);
                let _ = child.kill().await;
                return Err(SandboxError::harness(format!(
                    "failed to wait for child: {}",
                    e
                )));
            }
            Err(_) => {
                warn!(pid, timeout_secs = timeout.as_secs_f64(), "child exceeded time limit, killing");
                kill_process_group(pid);
                if let Err(e) = child.kill().await {
                    debug!(error = %e, "child already gone");
                }
                None
            }
        };

        let stdout = collect(stdout_task).await;
        let stderr = collect(stderr_task).await;
        let elapsed = start.elapsed();
        let HarnessReport {
            result: result_data,
            max_rss_bytes,
        } = parse_report(stdout.marked.as_deref());

        let result = match status {
            None => SandboxError::Timeout(timeout).into_execution_result(elapsed),
            Some(status) => {
                debug!(?status, max_rss_bytes, "child exited");
                let cpu_exhausted = cpu_limit_reached(
                    self.limits.max_cpu_seconds,
                    children_cpu_before,
                    usage::cpu_seconds_children(),
                );
                if status.success() {
                    ExecutionResult::completed(&output_path, result_data, elapsed)
                } else {
                    exit_error(status, &stderr, cpu_exhausted).into_execution_result(elapsed)
                }
            }
        };

        if let Err(e) = workspace.close() {
            warn!(error = %e, "failed to remove child workspace");
        }

        Ok(result
            .with_logs(combine_logs(&stdout, &stderr))
            .with_memory_usage(max_rss_bytes))
    }

    fn command(&self, workspace: &Path) -> Command {
        let mut cmd = Command::new(&self.python);
        cmd.arg("-B")
            .arg(SCRIPT_NAME)
            .current_dir(workspace)
            .env_clear()
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        for key in &self.env_passthrough {
            if let Some(value) = std::env::var_os(key) {
                cmd.env(key, value);
            }
        }
        cmd.env("MPLBACKEND", "Agg")
            .env("OPENBLAS_NUM_THREADS", "1")
            .env("PYTHONDONTWRITEBYTECODE", "1")
            .env("PYTHONIOENCODING", "utf-8");

        apply_child_limits(&mut cmd, &self.limits);
        cmd
    }
}

#[async_trait]
impl CodeExecutor for ProcessExecutor {
    fn mode(&self) -> ExecutionMode {
        ExecutionMode::Process
    }

    #[instrument(
        skip(self, code, output_path),
        fields(
            mode = "process",
            code_len = code.len(),
            code_sha256 = %code_digest(code),
            output = %output_path.display(),
        )
    )]
    async fn execute(&self, code: &str, output_path: &Path, timeout: Duration) -> ExecutionResult {
        let start = Instant::now();
        match self.run(code, output_path, timeout, start).await {
            Ok(result) => result,
            Err(err) => {
                if err.kind().is_submission_fault() {
                    debug!(error = %err, "submission rejected before spawn");
                } else {
                    error!(error = %err, "process execution failed");
                }
                err.into_execution_result(start.elapsed())
            }
        }
    }
}

fn spawn_reader<R>(stream: Option<R>, cap: u64, marker: Option<String>) -> JoinHandle<CapturedOutput>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        match stream {
            Some(stream) => read_output_limited(stream, cap, marker).await,
            None => CapturedOutput::default(),
        }
    })
}

async fn collect(mut task: JoinHandle<CapturedOutput>) -> CapturedOutput {
    match tokio::time::timeout(READER_DRAIN_TIMEOUT, &mut task).await {
        Ok(Ok(output)) => output,
        Ok(Err(e)) => {
            warn!(error = %e, "output reader failed");
            CapturedOutput::default()
        }
        Err(_) => {
            warn!("output stream still held open after child exit");
            task.abort();
            CapturedOutput::default()
        }
    }
}

fn parse_report(marked: Option<&str>) -> HarnessReport {
    let Some(payload) = marked else {
        return HarnessReport::default();
    };
    serde_json::from_str(payload).unwrap_or_else(|e| {
        warn!(error = %e, "report line is not valid JSON");
        HarnessReport::default()
    })
}

/// Whether the CPU limit can explain a kill.
///
/// Reaped-children CPU time only grows, so the delta over this run is an
/// upper bound on what the child used.
fn cpu_limit_reached(limit: Option<u64>, before: Option<f64>, after: Option<f64>) -> bool {
    let Some(limit) = limit else {
        return false;
    };
    match (before, after) {
        (Some(before), Some(after)) => after - before + CPU_ACCOUNTING_SLACK_SECS >= limit as f64,
        // no accounting available, assume the rlimit
        _ => true,
    }
}

fn exit_error(status: ExitStatus, stderr: &CapturedOutput, cpu_exhausted: bool) -> SandboxError {
    let last_line = stderr.last_line().map(str::to_string);
    match status.code() {
        Some(EXIT_SYNTAX_ERROR) => SandboxError::SyntaxInvalid(vec![
            last_line.unwrap_or_else(|| "invalid syntax".to_string()),
        ]),
        Some(EXIT_IMPORT_DENIED) => SandboxError::SecurityRejected(vec![
            last_line.unwrap_or_else(|| "import refused at runtime".to_string()),
        ]),
        Some(EXIT_MEMORY_ERROR) => SandboxError::memory_exceeded(),
        Some(code) => SandboxError::RuntimeFailure(
            last_line.unwrap_or_else(|| format!("exit status {}", code)),
        ),
        None => signal_error(status, last_line, cpu_exhausted),
    }
}

#[cfg(unix)]
fn signal_error(status: ExitStatus, last_line: Option<String>, cpu_exhausted: bool) -> SandboxError {
    use std::os::unix::process::ExitStatusExt;

    match status.signal() {
        Some(libc::SIGXCPU) => SandboxError::cpu_exceeded(),
        // the CPU hard limit, or the OOM killer
        Some(libc::SIGKILL) if cpu_exhausted => SandboxError::cpu_exceeded(),
        Some(signal) => SandboxError::RuntimeFailure(
            last_line.unwrap_or_else(|| format!("terminated by signal {}", signal)),
        ),
        None => SandboxError::harness("child exited without a status"),
    }
}

#[cfg(not(unix))]
fn signal_error(_status: ExitStatus, last_line: Option<String>, _cpu_exhausted: bool) -> SandboxError {
    SandboxError::RuntimeFailure(last_line.unwrap_or_else(|| "abnormal exit".to_string()))
}

/// Stdout text followed by stderr text
fn combine_logs(stdout: &CapturedOutput, stderr: &CapturedOutput) -> String {
    let out = stdout.text.trim_end_matches('\n');
    match (out.is_empty(), stderr.text.is_empty()) {
        (_, true) => stdout.text.clone(),
        (true, false) => stderr.text.clone(),
        (false, false) => format!("{}\n{}", out, stderr.text),
    }
}
