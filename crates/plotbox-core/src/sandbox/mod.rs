//! Sandbox execution environment for untrusted plotting code
//!
//! Validation, resource ceilings, executor strategies and the manager that
//! ties them together.

pub mod executor;
mod limits;
pub mod manager;
mod mode;
pub mod monitor;
pub mod policy;
pub mod usage;
pub mod validation;

pub use limits::ResourceLimits;
pub use mode::ExecutionMode;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::time::Duration;

use executor::ExecutionResult;
use validation::CodeValidationResult;

/// Result type for sandbox operations
pub type SandboxResult<T> = Result<T, SandboxError>;

/// Hex SHA-256 of a submission, used to correlate log lines
pub fn code_digest(code: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(code.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Stable classification of why a submission did not succeed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// The code could not be parsed
    SyntaxInvalid,
    /// One or more policy violations
    SecurityRejected,
    /// The watchdog or supervisor ran out of time
    ExecutionTimeout,
    /// A memory or CPU ceiling was hit
    ResourceExceeded,
    /// The submitted code raised during normal operation
    RuntimeFailure,
    /// Internal fault of the executor or manager
    HarnessFailure,
}

impl FailureKind {
    /// Get the stable string code
    pub fn as_str(&self) -> &'static str {
        match self {
            FailureKind::SyntaxInvalid => "syntax_invalid",
            FailureKind::SecurityRejected => "security_rejected",
            FailureKind::ExecutionTimeout => "execution_timeout",
            FailureKind::ResourceExceeded => "resource_exceeded",
            FailureKind::RuntimeFailure => "runtime_failure",
            FailureKind::HarnessFailure => "harness_failure",
        }
    }

    /// Whether the submission itself is at fault and should be discarded
    /// rather than retried.
    pub fn is_submission_fault(&self) -> bool {
        matches!(
            self,
            FailureKind::SyntaxInvalid | FailureKind::SecurityRejected
        )
    }
}

impl std::fmt::Display for FailureKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Errors that can occur while validating or running a submission
#[derive(Debug, Clone, thiserror::Error)]
pub enum SandboxError {
    /// Unparseable code
    #[error("syntax error: {}", .0.join("; "))]
    SyntaxInvalid(Vec<String>),

    /// Policy violations
    #[error("code failed security validation: {}", .0.join("; "))]
    SecurityRejected(Vec<String>),

    /// Execution timeout
    #[error("execution timed out")]
    Timeout(Duration),

    /// Resource ceiling hit
    #[error("{resource} limit exceeded")]
    ResourceExceeded { resource: String },

    /// The executed code raised
    #[error("code execution error: {0}")]
    RuntimeFailure(String),

    /// Internal fault, not attributable to the submitted code
    #[error("sandbox internal error: {0}")]
    HarnessFailure(String),
}

impl SandboxError {
    /// Build the rejection matching a failed validation
    pub fn from_validation(validation: &CodeValidationResult) -> Self {
        if !validation.syntax_errors().is_empty() {
            Self::SyntaxInvalid(validation.syntax_errors().to_vec())
        } else {
            Self::SecurityRejected(validation.security_issues().to_vec())
        }
    }

    /// Memory ceiling hit
    pub fn memory_exceeded() -> Self {
        Self::ResourceExceeded {
            resource: "memory".to_string(),
        }
    }

    /// CPU time ceiling hit
    pub fn cpu_exceeded() -> Self {
        Self::ResourceExceeded {
            resource: "cpu time".to_string(),
        }
    }

    /// Create a harness failure
    pub fn harness(message: impl Into<String>) -> Self {
        Self::HarnessFailure(message.into())
    }

    /// Classification of this error
    pub fn kind(&self) -> FailureKind {
        match self {
            SandboxError::SyntaxInvalid(_) => FailureKind::SyntaxInvalid,
            SandboxError::SecurityRejected(_) => FailureKind::SecurityRejected,
            SandboxError::Timeout(_) => FailureKind::ExecutionTimeout,
            SandboxError::ResourceExceeded { .. } => FailureKind::ResourceExceeded,
            SandboxError::RuntimeFailure(_) => FailureKind::RuntimeFailure,
            SandboxError::HarnessFailure(_) => FailureKind::HarnessFailure,
        }
    }

    /// Convert into the failed `ExecutionResult` shape
    pub fn into_execution_result(self, execution_time: Duration) -> ExecutionResult {
        ExecutionResult::failure(self.kind(), self.to_string(), execution_time)
    }
}

impl From<std::io::Error> for SandboxError {
    fn from(err: std::io::Error) -> Self {
        SandboxError::HarnessFailure(err.to_string())
    }
}
