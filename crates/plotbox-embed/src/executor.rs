//! In-process restricted strategy

use crate::namespace::{build_namespace, release_figures, ImportDenied};
use crate::watchdog::{self, Expiry, Watchdog, WatchdogExpired};
use async_trait::async_trait;
use once_cell::sync::Lazy;
use plotbox_core::config::SandboxConfig;
use plotbox_core::sandbox::executor::{prepare_output_path, CodeExecutor, ExecutionResult};
use plotbox_core::sandbox::monitor::ResourceMonitor;
use plotbox_core::sandbox::policy::SecurityPolicy;
use plotbox_core::sandbox::validation::SecurityValidator;
use plotbox_core::sandbox::{code_digest, usage, ExecutionMode, SandboxError};
use pyo3::exceptions::{PyMemoryError, PySyntaxError};
use pyo3::prelude::*;
use pyo3::types::PyDict;
use std::os::raw::c_ulong;
use std::path::{Path, PathBuf};
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, instrument, warn};

const TRUNCATION_NOTICE: &str = "\n... (output truncated due to size limit)\n";

/// One interpreter per process: runs are serialized, and the lock is held
/// until the interpreter thread is really done, even after the caller gave up.
static INTERPRETER_LOCK: Lazy<Arc<tokio::sync::Mutex<()>>> =
    Lazy::new(|| Arc::new(tokio::sync::Mutex::new(())));

/// Runs submissions in the embedded interpreter under a restricted namespace.
///
/// Each run gets fresh globals with only the safe builtins, a gated
/// `__import__` and the preloaded libraries. A watchdog interrupts the run
/// at the timeout and the resource monitor holds the memory and CPU
/// ceilings for its duration.
#[derive(Debug, Clone)]
pub struct RestrictedExecutor {
    validator: Arc<SecurityValidator>,
    monitor: ResourceMonitor,
    grace: Duration,
    max_output_bytes: u64,
}

impl RestrictedExecutor {
    pub fn new(validator: Arc<SecurityValidator>, config: &SandboxConfig) -> Self {
        Self {
            validator,
            monitor: ResourceMonitor::new(config.limits.clone()),
            grace: config.timeout_grace,
            max_output_bytes: config.limits.output_cap(),
        }
    }
}

struct Job {
    code: String,
    output_path: PathBuf,
    timeout: Duration,
    policy: Arc<SecurityPolicy>,
    monitor: ResourceMonitor,
    max_output_bytes: u64,
    cancel: CancellationToken,
}

#[async_trait]
impl CodeExecutor for RestrictedExecutor {
    fn mode(&self) -> ExecutionMode {
        ExecutionMode::Restricted
    }

    #[instrument(
        skip(self, code, output_path),
        fields(
            mode = "restricted",
            code_len = code.len(),
            code_sha256 = %code_digest(code),
            output = %output_path.display(),
        )
    )]
    async fn execute(&self, code: &str, output_path: &Path, timeout: Duration) -> ExecutionResult {
        let start = Instant::now();
        let validation = self.validator.validate(code);
        if !validation.is_valid() {
            debug!("submission rejected before execution");
            return SandboxError::from_validation(&validation).into_execution_result(start.elapsed());
        }
        let output_path = match prepare_output_path(output_path).await {
            Ok(path) => path,
            Err(err) => return err.into_execution_result(start.elapsed()),
        };

        // queueing gets the same budget as the run; the run's own bound starts once acquired
        let acquire = Arc::clone(&INTERPRETER_LOCK).lock_owned();
        let permit = match tokio::time::timeout(timeout, acquire).await {
            Ok(permit) => permit,
            Err(_) => {
                warn!(
                    waited_ms = start.elapsed().as_millis() as u64,
                    "interpreter still busy, giving up"
                );
                return SandboxError::harness("interpreter busy")
                    .into_execution_result(start.elapsed());
            }
        };
        debug!(waited_ms = start.elapsed().as_millis() as u64, "interpreter acquired");

        // cancels the watchdog if this future is dropped or abandons the run
        let cancel = CancellationToken::new();
        let _cancel_on_exit = cancel.clone().drop_guard();

        let job = Job {
            code: code.to_string(),
            output_path,
            timeout,
            policy: Arc::clone(self.validator.policy()),
            monitor: self.monitor.clone(),
            max_output_bytes: self.max_output_bytes,
            cancel,
        };
        let started = Instant::now();
        let task = tokio::task::spawn_blocking(move || {
            let _permit = permit;
            run_job(job)
        });

        match tokio::time::timeout(timeout.saturating_add(self.grace), task).await {
            Ok(Ok(result)) => result,
            Ok(Err(e)) => {
                error!(error = %e, "interpreter thread failed");
                SandboxError::harness(format!("interpreter thread failed: {}", e))
                    .into_execution_result(started.elapsed())
            }
            Err(_) => {
                warn!("submission ignored the watchdog, abandoning run");
                SandboxError::Timeout(timeout).into_execution_result(started.elapsed())
            }
        }
    }
}

/// Body of the blocking interpreter thread
fn run_job(job: Job) -> ExecutionResult {
    let start = Instant::now();
    // without a reset the high-water mark spans every earlier run
    let peak_is_per_run = usage::reset_peak_rss();
    let guard = job.monitor.acquire();
    if !guard.is_enforcing() {
        debug!("running without resource ceilings");
    }
    let cpu_flag = guard.cpu_flag();

    let (outcome, logs) = Python::with_gil(|py| {
        let mut notes = String::new();
        let capture = match StdoutCapture::install(py) {
            Ok(capture) => capture,
            Err(e) => return (Err(py_harness("failed to capture stdout", &e)), notes),
        };
        let outcome = run_submission(py, &job, cpu_flag, &mut notes);
        let mut logs = capture.restore(py);
        logs.push_str(&notes);
        release_figures(py);
        (outcome, logs)
    });
    drop(guard);

    let elapsed = start.elapsed();
    let result = match outcome {
        Ok(result_data) => ExecutionResult::completed(&job.output_path, result_data, elapsed),
        Err(err) => err.into_execution_result(elapsed),
    };
    result
        .with_logs(cap_output(logs, job.max_output_bytes))
        .with_memory_usage(usage::peak_rss_self().filter(|_| peak_is_per_run))
}

fn run_submission(
    py: Python<'_>,
    job: &Job,
    cpu_flag: Arc<AtomicBool>,
    notes: &mut String,
) -> Result<Option<serde_json::Value>, SandboxError> {
    let builtins = py
        .import_bound("builtins")
        .map_err(|e| py_harness("builtins unavailable", &e))?;
    let output_path = job
        .output_path
        .to_str()
        .ok_or_else(|| SandboxError::harness("output path is not valid UTF-8"))?;
    let namespace = build_namespace(py, &job.policy, output_path)
        .map_err(|e| py_harness("failed to build namespace", &e))?;

    let compiled = builtins
        .getattr("compile")
        .and_then(|compile| compile.call1((job.code.as_str(), "<submission>", "exec")))
        .map_err(|e| {
            if e.is_instance_of::<PySyntaxError>(py) {
                SandboxError::SyntaxInvalid(vec![e.to_string()])
            } else {
                py_harness("compile failed", &e)
            }
        })?;

    let thread_id: c_ulong = py
        .import_bound("threading")
        .and_then(|threading| threading.call_method0("get_ident"))
        .and_then(|ident| ident.extract())
        .map_err(|e| py_harness("failed to identify interpreter thread", &e))?;
    let watchdog = Watchdog::arm(thread_id, job.timeout, cpu_flag, job.cancel.clone())
        .map_err(|e| SandboxError::harness(format!("failed to arm watchdog: {}", e)))?;

    let executed = builtins
        .getattr("exec")
        .and_then(|exec| exec.call1((compiled, &namespace)));

    let expiry = py.allow_threads(move || watchdog.disarm());
    if expiry.is_some() {
        watchdog::clear_pending(py, thread_id);
    }

    if let Err(err) = executed {
        notes.push_str(&format_traceback(py, &err));
        return Err(classify(py, &err, expiry, job.timeout));
    }
    if let Some(reason) = expiry {
        debug!(?reason, "watchdog fired as the submission finished");
    }

    Ok(extract_result(py, &namespace, notes))
}

fn classify(py: Python<'_>, err: &PyErr, expiry: Option<Expiry>, timeout: Duration) -> SandboxError {
    if let Some(reason) = expiry {
        return match reason {
            Expiry::CpuLimit => SandboxError::cpu_exceeded(),
            Expiry::Timeout | Expiry::Cancelled => SandboxError::Timeout(timeout),
        };
    }
    if err.is_instance_of::<WatchdogExpired>(py) {
        return SandboxError::Timeout(timeout);
    }
    if err.is_instance_of::<ImportDenied>(py) {
        return SandboxError::SecurityRejected(vec![err.value_bound(py).to_string()]);
    }
    if err.is_instance_of::<PyMemoryError>(py) {
        return SandboxError::memory_exceeded();
    }
    SandboxError::RuntimeFailure(err.to_string())
}

/// JSON form of the `result` binding, if there is one
fn extract_result(
    py: Python<'_>,
    namespace: &Bound<'_, PyDict>,
    notes: &mut String,
) -> Option<serde_json::Value> {
    let value = match namespace.get_item("result") {
        Ok(Some(value)) => value,
        Ok(None) => return None,
        Err(e) => {
            notes.push_str(&format!("result could not be read: {}\n", e));
            return None;
        }
    };

    let dumped = py.import_bound("json").and_then(|json| {
        let kwargs = PyDict::new_bound(py);
        kwargs.set_item("ensure_ascii", false)?;
        kwargs.set_item("default", py.import_bound("builtins")?.getattr("str")?)?;
        json.call_method("dumps", (value,), Some(&kwargs))?
            .extract::<String>()
    });

    match dumped.map(|text| serde_json::from_str(&text)) {
        Ok(Ok(data)) => Some(data),
        Ok(Err(e)) => {
            notes.push_str(&format!("result could not be serialised: {}\n", e));
            None
        }
        Err(e) => {
            notes.push_str(&format!("result could not be serialised: {}\n", e));
            None
        }
    }
}

fn format_traceback(py: Python<'_>, err: &PyErr) -> String {
    py.import_bound("traceback")
        .and_then(|traceback| {
            traceback.call_method1(
                "format_exception",
                (
                    err.get_type_bound(py),
                    err.value_bound(py),
                    err.traceback_bound(py),
                ),
            )
        })
        .and_then(|lines| lines.extract::<Vec<String>>())
        .map(|lines| lines.concat())
        .unwrap_or_else(|_| format!("{}\n", err))
}

fn py_harness(context: &str, err: &PyErr) -> SandboxError {
    SandboxError::harness(format!("{}: {}", context, err))
}

/// Swaps `sys.stdout` for an in-memory buffer
struct StdoutCapture {
    previous: PyObject,
    buffer: PyObject,
}

impl StdoutCapture {
    fn install(py: Python<'_>) -> PyResult<Self> {
        let sys = py.import_bound("sys")?;
        let buffer = py.import_bound("io")?.call_method0("StringIO")?;
        let previous = sys.getattr("stdout")?;
        sys.setattr("stdout", &buffer)?;
        Ok(Self {
            previous: previous.unbind(),
            buffer: buffer.unbind(),
        })
    }

    /// Put the previous stream back and return what was written
    fn restore(self, py: Python<'_>) -> String {
        if let Err(e) = py
            .import_bound("sys")
            .and_then(|sys| sys.setattr("stdout", self.previous.bind(py)))
        {
            error!(error = %e, "failed to restore sys.stdout");
        }
        self.buffer
            .bind(py)
            .call_method0("getvalue")
            .and_then(|text| text.extract::<String>())
            .unwrap_or_default()
    }
}

fn cap_output(mut text: String, max_bytes: u64) -> String {
    let max = usize::try_from(max_bytes).unwrap_or(usize::MAX);
    if text.len() <= max {
        return text;
    }
    let mut cut = max;
    while !text.is_char_boundary(cut) {
        cut -= 1;
    }
    text.truncate(cut);
    text.push_str(TRUNCATION_NOTICE);
    text
}

#[cfg(test)]
mod tests {
    use super::*;
    use plotbox_core::sandbox::FailureKind;
    use serial_test::serial;
    use tempfile::TempDir;

    fn executor() -> RestrictedExecutor {
        let validator = Arc::new(SecurityValidator::new().unwrap());
        RestrictedExecutor::new(validator, &SandboxConfig::default())
    }

    #[tokio::test]
    #[serial]
    async fn test_result_and_stdout_captured() {
        let dir = TempDir::new().unwrap();
        let code = "print('computing')\nvalues = [3, 4]\nresult = {'sum': sum(values), 'path': output_path}\n";
        let output = dir.path().join("plot.png");

        let result = executor().execute(code, &output, Duration::from_secs(10)).await;

        assert!(result.success, "unexpected failure: {:?}", result.error_message);
        let data = result.result_data.unwrap();
        assert_eq!(data["sum"], 7);
        assert_eq!(data["path"], output.to_str().unwrap());
        assert_eq!(result.output_logs, "computing\n");
        assert!(result.image_path.is_none());
    }

    #[tokio::test]
    #[serial]
    async fn test_runtime_error_traceback_in_logs() {
        let dir = TempDir::new().unwrap();
        let result = executor()
            .execute("x = 1 / 0\n", &dir.path().join("plot.png"), Duration::from_secs(10))
            .await;

        assert!(!result.success);
        assert_eq!(result.error_kind, Some(FailureKind::RuntimeFailure));
        assert!(result.error_message.unwrap().contains("ZeroDivisionError"));
        assert!(result.output_logs.contains("Traceback"));
    }

    #[tokio::test]
    #[serial]
    async fn test_watchdog_stops_infinite_loop() {
        let dir = TempDir::new().unwrap();
        let start = Instant::now();
        let result = executor()
            .execute(
                "while True:\n    pass\n",
                &dir.path().join("plot.png"),
                Duration::from_secs(1),
            )
            .await;

        assert!(!result.success);
        assert_eq!(result.error_kind, Some(FailureKind::ExecutionTimeout));
        assert_eq!(result.error_message.as_deref(), Some("execution timed out"));
        assert!(start.elapsed() < Duration::from_secs(4));
    }

    #[tokio::test]
    #[serial]
    async fn test_swallowing_exceptions_does_not_escape_watchdog() {
        let dir = TempDir::new().unwrap();
        let code = "while True:\n    try:\n        pass\n    except Exception:\n        pass\n";
        let result = executor()
            .execute(code, &dir.path().join("plot.png"), Duration::from_secs(1))
            .await;

        assert_eq!(result.error_kind, Some(FailureKind::ExecutionTimeout));
    }

    #[tokio::test]
    #[serial]
    async fn test_interpreter_usable_after_timeout() {
        let dir = TempDir::new().unwrap();
        let output = dir.path().join("plot.png");
        executor()
            .execute("while True:\n    pass\n", &output, Duration::from_millis(300))
            .await;

        let result = executor()
            .execute("result = 1 + 1\n", &output, Duration::from_secs(10))
            .await;
        assert!(result.success, "unexpected failure: {:?}", result.error_message);
        assert_eq!(result.result_data, Some(serde_json::json!(2)));
    }

    #[tokio::test]
    #[serial]
    async fn test_rejected_code_never_runs() {
        let dir = TempDir::new().unwrap();
        let result = executor()
            .execute(
                "import os\nos.system('id')\n",
                &dir.path().join("plot.png"),
                Duration::from_secs(10),
            )
            .await;

        assert_eq!(result.error_kind, Some(FailureKind::SecurityRejected));
        assert!(result.output_logs.is_empty());
    }

    #[tokio::test]
    #[serial]
    async fn test_unserialisable_result_is_stringified() {
        let dir = TempDir::new().unwrap();
        let result = executor()
            .execute("result = {1, 2}\n", &dir.path().join("plot.png"), Duration::from_secs(10))
            .await;

        assert!(result.success);
        assert_eq!(result.result_data, Some(serde_json::json!("{1, 2}")));
    }

    #[tokio::test]
    #[serial]
    async fn test_queued_submission_reports_busy_interpreter() {
        let dir = TempDir::new().unwrap();
        let _held = INTERPRETER_LOCK.lock().await;

        let result = executor()
            .execute("result = 1\n", &dir.path().join("plot.png"), Duration::from_millis(200))
            .await;

        assert!(!result.success);
        assert_eq!(result.error_kind, Some(FailureKind::HarnessFailure));
        assert_eq!(
            result.error_message.as_deref(),
            Some("sandbox internal error: interpreter busy")
        );
    }

    #[tokio::test]
    #[serial]
    async fn test_memory_usage_is_per_run() {
        let dir = TempDir::new().unwrap();
        let output = dir.path().join("plot.png");
        let timeout = Duration::from_secs(10);

        let big = executor()
            .execute("block = b'x' * (64 * 1024 * 1024)\ndel block\n", &output, timeout)
            .await;
        let small = executor().execute("x = 1\n", &output, timeout).await;

        assert!(big.success, "unexpected failure: {:?}", big.error_message);
        assert!(small.success, "unexpected failure: {:?}", small.error_message);
        if let (Some(big), Some(small)) = (big.memory_usage, small.memory_usage) {
            assert!(small < big, "small run reported {} after a {} byte run", small, big);
        }
    }

    #[test]
    fn test_cap_output() {
        assert_eq!(cap_output("short".to_string(), 100), "short");
        let capped = cap_output("é".repeat(10), 5);
        assert!(capped.starts_with("éé"));
        assert!(capped.ends_with(TRUNCATION_NOTICE));
    }

    #[test]
    fn test_mode() {
        assert_eq!(executor().mode(), ExecutionMode::Restricted);
    }
}
