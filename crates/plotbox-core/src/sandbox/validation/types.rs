//! Types for code validation.

use crate::serde_helpers::duration_secs;
use serde::Serialize;
use std::time::Duration;

/// Outcome of statically validating a submission
///
/// `is_valid` is derived at construction and the fields cannot be changed
/// afterwards, so it always agrees with the issue lists.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CodeValidationResult {
    is_valid: bool,
    security_issues: Vec<String>,
    syntax_errors: Vec<String>,
    warnings: Vec<String>,
    #[serde(with = "duration_secs")]
    validation_time: Duration,
}

impl CodeValidationResult {
    pub fn new(
        security_issues: Vec<String>,
        syntax_errors: Vec<String>,
        warnings: Vec<String>,
        validation_time: Duration,
    ) -> Self {
        Self {
            is_valid: security_issues.is_empty() && syntax_errors.is_empty(),
            security_issues,
            syntax_errors,
            warnings,
            validation_time,
        }
    }

    /// Result for code that could not be parsed
    pub fn syntax_failure(syntax_errors: Vec<String>, validation_time: Duration) -> Self {
        Self::new(Vec::new(), syntax_errors, Vec::new(), validation_time)
    }

    pub fn is_valid(&self) -> bool {
        self.is_valid
    }

    pub fn security_issues(&self) -> &[String] {
        &self.security_issues
    }

    pub fn syntax_errors(&self) -> &[String] {
        &self.syntax_errors
    }

    pub fn warnings(&self) -> &[String] {
        &self.warnings
    }

    pub fn validation_time(&self) -> Duration {
        self.validation_time
    }
}
