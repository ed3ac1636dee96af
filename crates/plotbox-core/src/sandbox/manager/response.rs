//! Manager-level response

use crate::sandbox::executor::ExecutionResult;
use crate::sandbox::validation::CodeValidationResult;
use crate::sandbox::{FailureKind, SandboxError};
use serde::Serialize;

/// Where the pipeline stopped and what it produced
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SandboxExecutionResponse {
    /// Absent when validation was skipped
    pub validation_result: Option<CodeValidationResult>,
    /// Absent when no executor ran
    pub execution_result: Option<ExecutionResult>,
    /// True only if validation (when run) and execution both succeeded
    pub overall_success: bool,
    pub error_message: Option<String>,
    pub error_kind: Option<FailureKind>,
}

impl SandboxExecutionResponse {
    /// Stopped by the validator
    pub fn rejected(validation: CodeValidationResult) -> Self {
        let err = SandboxError::from_validation(&validation);
        Self {
            validation_result: Some(validation),
            execution_result: None,
            overall_success: false,
            error_message: Some(err.to_string()),
            error_kind: Some(err.kind()),
        }
    }

    /// An executor ran
    pub fn executed(validation: Option<CodeValidationResult>, execution: ExecutionResult) -> Self {
        Self {
            validation_result: validation,
            overall_success: execution.success,
            error_message: execution.error_message.clone(),
            error_kind: execution.error_kind,
            execution_result: Some(execution),
        }
    }

    /// Refused or failed inside the manager itself
    pub fn failed(validation: Option<CodeValidationResult>, err: &SandboxError) -> Self {
        Self {
            validation_result: validation,
            execution_result: None,
            overall_success: false,
            error_message: Some(err.to_string()),
            error_kind: Some(err.kind()),
        }
    }
}
