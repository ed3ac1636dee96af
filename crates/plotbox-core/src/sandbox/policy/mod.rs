//! Security policy tables
//!
//! One immutable set of tables shared by the static validator and both
//! runtime import gates, so "what was declared safe" and "what is permitted
//! at runtime" cannot drift apart.

mod defaults;

use crate::config::PolicyOverrides;
use crate::error::{PlotboxError, PlotboxResult};
use regex::{Regex, RegexBuilder};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::sync::Arc;

/// Outcome of checking a module name against the policy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModuleVerdict {
    /// Present in the allow-list
    Allowed,
    /// Top-level name is in the deny-list
    Denied,
    /// Neither denied nor allowed (default-deny)
    Unapproved,
}

/// A compiled pattern together with its source text
#[derive(Debug, Clone)]
pub struct PatternRule {
    source: String,
    regex: Regex,
}

impl PatternRule {
    fn compile(source: &str) -> PlotboxResult<Self> {
        let regex = RegexBuilder::new(source)
            .case_insensitive(true)
            .multi_line(true)
            .build()?;
        Ok(Self {
            source: source.to_string(),
            regex,
        })
    }

    /// The pattern as written
    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn regex(&self) -> &Regex {
        &self.regex
    }
}

/// Allow-list, deny-lists and pattern tables
#[derive(Debug)]
pub struct SecurityPolicy {
    denied_functions: BTreeSet<String>,
    denied_modules: BTreeSet<String>,
    allowed_modules: BTreeSet<String>,
    dangerous_patterns: Vec<PatternRule>,
    file_operation_patterns: Vec<PatternRule>,
    network_patterns: Vec<PatternRule>,
    safe_builtins: Vec<String>,
    preloaded_modules: Vec<(String, String)>,
}

impl SecurityPolicy {
    /// Build the built-in policy
    pub fn builtin() -> PlotboxResult<Self> {
        Self::with_overrides(&PolicyOverrides::default())
    }

    /// Build the built-in policy extended by configuration
    pub fn with_overrides(overrides: &PolicyOverrides) -> PlotboxResult<Self> {
        let mut denied_functions: BTreeSet<String> = to_set(defaults::DENIED_FUNCTIONS);
        denied_functions.extend(overrides.extra_denied_functions.iter().cloned());

        let mut denied_modules: BTreeSet<String> = to_set(defaults::DENIED_MODULES);
        denied_modules.extend(overrides.extra_denied_modules.iter().cloned());

        let mut allowed_modules: BTreeSet<String> = to_set(defaults::ALLOWED_MODULES);
        for module in &overrides.extra_allowed_modules {
            let top = top_level(module);
            if denied_modules.contains(top) {
                return Err(PlotboxError::policy(format!(
                    "module '{}' cannot be allowed, '{}' is denied",
                    module, top
                )));
            }
            allowed_modules.insert(module.clone());
        }

        let mut dangerous_patterns = compile_all(defaults::DANGEROUS_PATTERNS)?;
        for extra in &overrides.extra_dangerous_patterns {
            dangerous_patterns.push(PatternRule::compile(extra)?);
        }

        let preloaded_modules = defaults::PRELOADED_MODULES
            .iter()
            .map(|(alias, module)| (alias.to_string(), module.to_string()))
            .collect();

        Ok(Self {
            denied_functions,
            denied_modules,
            allowed_modules,
            dangerous_patterns,
            file_operation_patterns: compile_all(defaults::FILE_OPERATION_PATTERNS)?,
            network_patterns: compile_all(defaults::NETWORK_PATTERNS)?,
            safe_builtins: defaults::SAFE_BUILTINS.iter().map(|s| s.to_string()).collect(),
            preloaded_modules,
        })
    }

    /// Shared handle to the built-in policy
    pub fn shared() -> PlotboxResult<Arc<Self>> {
        Ok(Arc::new(Self::builtin()?))
    }

    /// Classify a (possibly dotted) module name.
    ///
    /// The deny-list wins over the allow-list; a module is allowed when either
    /// its top-level name or its full dotted name is listed.
    pub fn module_verdict(&self, module: &str) -> ModuleVerdict {
        let top = top_level(module);
        if self.denied_modules.contains(top) {
            ModuleVerdict::Denied
        } else if self.allowed_modules.contains(top) || self.allowed_modules.contains(module) {
            ModuleVerdict::Allowed
        } else {
            ModuleVerdict::Unapproved
        }
    }

    pub fn is_denied_function(&self, name: &str) -> bool {
        self.denied_functions.contains(name)
    }

    /// Exact match against the module deny-list, without dotted-name handling
    pub fn is_denied_module(&self, name: &str) -> bool {
        self.denied_modules.contains(name)
    }

    pub fn denied_functions(&self) -> &BTreeSet<String> {
        &self.denied_functions
    }

    pub fn denied_modules(&self) -> &BTreeSet<String> {
        &self.denied_modules
    }

    pub fn allowed_modules(&self) -> &BTreeSet<String> {
        &self.allowed_modules
    }

    pub fn dangerous_patterns(&self) -> &[PatternRule] {
        &self.dangerous_patterns
    }

    pub fn file_operation_patterns(&self) -> &[PatternRule] {
        &self.file_operation_patterns
    }

    pub fn network_patterns(&self) -> &[PatternRule] {
        &self.network_patterns
    }

    /// Builtin names exposed to executed code
    pub fn safe_builtins(&self) -> &[String] {
        &self.safe_builtins
    }

    /// `(binding, module)` pairs bound into the namespace before execution
    pub fn preloaded_modules(&self) -> &[(String, String)] {
        &self.preloaded_modules
    }

    /// Summary of the policy tables
    pub fn report(&self) -> SecurityReport {
        SecurityReport {
            forbidden_functions_count: self.denied_functions.len(),
            forbidden_modules_count: self.denied_modules.len(),
            allowed_modules_count: self.allowed_modules.len(),
            dangerous_patterns_count: self.dangerous_patterns.len(),
            forbidden_functions: self.denied_functions.iter().cloned().collect(),
            forbidden_modules: self.denied_modules.iter().cloned().collect(),
            allowed_modules: self.allowed_modules.iter().cloned().collect(),
            dangerous_patterns: self
                .dangerous_patterns
                .iter()
                .map(|p| p.source.clone())
                .collect(),
        }
    }
}

/// Sizes and sorted contents of the policy tables
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SecurityReport {
    pub forbidden_functions_count: usize,
    pub forbidden_modules_count: usize,
    pub allowed_modules_count: usize,
    pub dangerous_patterns_count: usize,
    pub forbidden_functions: Vec<String>,
    pub forbidden_modules: Vec<String>,
    pub allowed_modules: Vec<String>,
    pub dangerous_patterns: Vec<String>,
}

/// First component of a dotted module name
pub fn top_level(module: &str) -> &str {
    module.split('.').next().unwrap_or(module)
}

fn to_set(items: &[&str]) -> BTreeSet<String> {
    items.iter().map(|s| s.to_string()).collect()
}

fn compile_all(sources: &[&str]) -> PlotboxResult<Vec<PatternRule>> {
    sources.iter().map(|s| PatternRule::compile(s)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_module_verdicts() {
        let policy = SecurityPolicy::builtin().unwrap();
        assert_eq!(policy.module_verdict("os"), ModuleVerdict::Denied);
        assert_eq!(policy.module_verdict("os.path"), ModuleVerdict::Denied);
        assert_eq!(policy.module_verdict("numpy"), ModuleVerdict::Allowed);
        assert_eq!(policy.module_verdict("numpy.linalg"), ModuleVerdict::Allowed);
        assert_eq!(
            policy.module_verdict("matplotlib.pyplot"),
            ModuleVerdict::Allowed
        );
        assert_eq!(policy.module_verdict("pandas"), ModuleVerdict::Unapproved);
    }

    #[test]
    fn test_overrides_extend_tables() {
        let overrides = PolicyOverrides {
            extra_allowed_modules: vec!["scipy".into()],
            extra_denied_modules: vec!["webbrowser".into()],
            extra_denied_functions: vec!["exit_now".into()],
            extra_dangerous_patterns: vec![r"\bkillall\b".into()],
        };
        let policy = SecurityPolicy::with_overrides(&overrides).unwrap();

        assert_eq!(policy.module_verdict("scipy.stats"), ModuleVerdict::Allowed);
        assert_eq!(policy.module_verdict("webbrowser"), ModuleVerdict::Denied);
        assert!(policy.is_denied_function("exit_now"));
        assert_eq!(
            policy.dangerous_patterns().len(),
            defaults::DANGEROUS_PATTERNS.len() + 1
        );
    }

    #[test]
    fn test_cannot_allow_denied_module() {
        let overrides = PolicyOverrides {
            extra_allowed_modules: vec!["os.path".into()],
            ..Default::default()
        };
        let err = SecurityPolicy::with_overrides(&overrides).unwrap_err();
        assert!(matches!(err, PlotboxError::Policy(_)));
    }

    #[test]
    fn test_invalid_extra_pattern() {
        let overrides = PolicyOverrides {
            extra_dangerous_patterns: vec!["(unclosed".into()],
            ..Default::default()
        };
        assert!(SecurityPolicy::with_overrides(&overrides).is_err());
    }

    #[test]
    fn test_report_is_sorted() {
        let report = SecurityPolicy::builtin().unwrap().report();
        assert_eq!(report.forbidden_functions_count, report.forbidden_functions.len());
        assert_eq!(report.dangerous_patterns_count, 31);
        let mut sorted = report.forbidden_modules.clone();
        sorted.sort();
        assert_eq!(sorted, report.forbidden_modules);
        assert!(report.allowed_modules.contains(&"matplotlib.pyplot".to_string()));
    }

    #[test]
    fn test_patterns_are_case_insensitive() {
        let policy = SecurityPolicy::builtin().unwrap();
        let system = policy
            .dangerous_patterns()
            .iter()
            .find(|p| p.source() == r"\.system\s*\(")
            .unwrap();
        assert!(system.regex().is_match("os.SYSTEM ('ls')"));
    }
}
