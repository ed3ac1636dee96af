//! Inbound execution request

use crate::sandbox::{ExecutionMode, SandboxError, SandboxResult};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

fn default_validate_first() -> bool {
    true
}

/// One submission to run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionRequest {
    pub code: String,
    pub output_path: PathBuf,
    /// Strategy; the manager's default when absent
    #[serde(default)]
    pub execution_mode: Option<ExecutionMode>,
    /// Wall-clock bound; the manager's default when absent
    #[serde(default)]
    pub timeout_seconds: Option<f64>,
    #[serde(default = "default_validate_first")]
    pub validate_first: bool,
}

impl ExecutionRequest {
    pub fn new(code: impl Into<String>, output_path: impl Into<PathBuf>) -> Self {
        Self {
            code: code.into(),
            output_path: output_path.into(),
            execution_mode: None,
            timeout_seconds: None,
            validate_first: true,
        }
    }

    pub fn with_mode(mut self, mode: ExecutionMode) -> Self {
        self.execution_mode = Some(mode);
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout_seconds = Some(timeout.as_secs_f64());
        self
    }

    /// Skip the validator; the executors still re-validate
    pub fn skip_validation(mut self) -> Self {
        self.validate_first = false;
        self
    }

    /// The requested timeout, rejected unless positive and finite
    pub fn timeout(&self) -> SandboxResult<Option<Duration>> {
        match self.timeout_seconds {
            None => Ok(None),
            Some(secs) => match Duration::try_from_secs_f64(secs) {
                Ok(timeout) if !timeout.is_zero() => Ok(Some(timeout)),
                _ => Err(SandboxError::harness(format!(
                    "invalid request: timeout_seconds must be a positive number, got {}",
                    secs
                ))),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_deserialize_inbound_shape() {
        let request: ExecutionRequest = serde_json::from_str(
            r#"{"code": "x = 1", "output_path": "/tmp/a.png", "execution_mode": "process", "timeout_seconds": 2}"#,
        )
        .unwrap();
        assert_eq!(request.execution_mode, Some(ExecutionMode::Process));
        assert_eq!(request.timeout().unwrap(), Some(Duration::from_secs(2)));
        assert!(request.validate_first);
    }

    #[test]
    fn test_invalid_timeouts() {
        for secs in [0.0, -1.0, f64::NAN, f64::INFINITY] {
            let request = ExecutionRequest {
                timeout_seconds: Some(secs),
                ..ExecutionRequest::new("x = 1", "/tmp/a.png")
            };
            assert!(request.timeout().is_err(), "accepted {}", secs);
        }
    }

    #[test]
    fn test_builder_methods() {
        let request = ExecutionRequest::new("x = 1", "a.png")
            .with_mode(ExecutionMode::Restricted)
            .with_timeout(Duration::from_millis(500))
            .skip_validation();
        assert_eq!(request.timeout().unwrap(), Some(Duration::from_millis(500)));
        assert!(!request.validate_first);
    }
}
