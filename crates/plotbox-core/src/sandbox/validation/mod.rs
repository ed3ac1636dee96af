//! Static security validation of submitted Python code.
//!
//! The validator parses the code once and then runs every check, collecting
//! all violations in a single pass:
//! - forbidden builtin calls, attribute access and name references
//! - imports outside the allow-list or inside the deny-list
//! - dangerous textual patterns
//! - file-open idioms outside the artifact save call
//! - network access idioms
//!
//! Quality warnings are reported alongside but never affect validity.

mod ast_check;
mod import_check;
mod pattern_check;
mod quality_check;
mod syntax;
mod types;

pub use types::CodeValidationResult;

use super::code_digest;
use super::policy::{SecurityPolicy, SecurityReport};
use crate::config::PolicyOverrides;
use crate::error::PlotboxResult;
use std::sync::Arc;
use std::time::Instant;
use syntax::ParseOutcome;
use tracing::{debug, instrument, warn};

/// Static analyser deciding whether a submission may run
#[derive(Debug, Clone)]
pub struct SecurityValidator {
    policy: Arc<SecurityPolicy>,
}

impl SecurityValidator {
    /// Validator over the built-in policy
    pub fn new() -> PlotboxResult<Self> {
        Ok(Self::with_policy(SecurityPolicy::shared()?))
    }

    /// Validator over the built-in policy plus configured additions
    pub fn from_overrides(overrides: &PolicyOverrides) -> PlotboxResult<Self> {
        Ok(Self::with_policy(Arc::new(SecurityPolicy::with_overrides(
            overrides,
        )?)))
    }

    pub fn with_policy(policy: Arc<SecurityPolicy>) -> Self {
        Self { policy }
    }

    /// The policy tables this validator enforces
    pub fn policy(&self) -> &Arc<SecurityPolicy> {
        &self.policy
    }

    /// Sizes and contents of the policy tables
    pub fn security_report(&self) -> SecurityReport {
        self.policy.report()
    }

    /// Validate a submission.
    ///
    /// Parse failures short-circuit with only `syntax_errors` populated. A
    /// fault of the validator itself fails closed as a security issue.
    #[instrument(skip(self, code), fields(code_len = code.len(), code_sha256 = %code_digest(code)))]
    pub fn validate(&self, code: &str) -> CodeValidationResult {
        let start = Instant::now();

        let parsed = match syntax::parse(code) {
            Ok(ParseOutcome::Parsed(parsed)) => parsed,
            Ok(ParseOutcome::Invalid(errors)) => {
                debug!(errors = errors.len(), "code failed to parse");
                return CodeValidationResult::syntax_failure(errors, start.elapsed());
            }
            Err(e) => {
                warn!(error = %e, "validator could not parse code");
                return CodeValidationResult::new(
                    vec![format!("validator error: {}", e)],
                    Vec::new(),
                    Vec::new(),
                    start.elapsed(),
                );
            }
        };

        let mut security_issues = Vec::new();

        let capability_issues = ast_check::check_capabilities(&parsed, &self.policy);
        debug!(count = capability_issues.len(), "capability check");
        security_issues.extend(capability_issues);

        let import_issues = import_check::check_imports(&parsed, &self.policy);
        debug!(count = import_issues.len(), "import check");
        security_issues.extend(import_issues);

        let pattern_issues = pattern_check::check_dangerous_patterns(code, &self.policy);
        debug!(count = pattern_issues.len(), "dangerous pattern check");
        security_issues.extend(pattern_issues);

        let file_issues = pattern_check::check_file_operations(&parsed, &self.policy);
        debug!(count = file_issues.len(), "file operation check");
        security_issues.extend(file_issues);

        let network_issues = pattern_check::check_network_access(code, &self.policy);
        debug!(count = network_issues.len(), "network access check");
        security_issues.extend(network_issues);

        let warnings = quality_check::check_quality(&parsed);

        let result = CodeValidationResult::new(security_issues, Vec::new(), warnings, start.elapsed());
        debug!(
            is_valid = result.is_valid(),
            issues = result.security_issues().len(),
            warnings = result.warnings().len(),
            "validation finished"
        );
        result
    }
}
