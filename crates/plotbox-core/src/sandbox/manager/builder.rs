//! Fluent construction of a sandbox manager

use super::SandboxManager;
use super::stats::ExecutionStats;
use crate::config::SandboxConfig;
use crate::error::PlotboxResult;
use crate::sandbox::executor::{CodeExecutor, ProcessExecutor};
use crate::sandbox::validation::SecurityValidator;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;

/// Builder for [`SandboxManager`]
///
/// The process strategy is always available; other strategies are
/// registered with [`executor`](Self::executor). A later registration for
/// the same mode replaces the earlier one.
#[derive(Default)]
pub struct SandboxManagerBuilder {
    config: Option<SandboxConfig>,
    validator: Option<Arc<SecurityValidator>>,
    executors: Vec<Arc<dyn CodeExecutor>>,
}

impl SandboxManagerBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn config(mut self, config: SandboxConfig) -> Self {
        self.config = Some(config);
        self
    }

    /// Share a validator with executors built outside the manager
    pub fn validator(mut self, validator: Arc<SecurityValidator>) -> Self {
        self.validator = Some(validator);
        self
    }

    pub fn executor(mut self, executor: Arc<dyn CodeExecutor>) -> Self {
        self.executors.push(executor);
        self
    }

    pub fn build(self) -> PlotboxResult<SandboxManager> {
        let config = self.config.unwrap_or_default();
        config.validate()?;

        let validator = match self.validator {
            Some(validator) => validator,
            None => Arc::new(SecurityValidator::from_overrides(&config.policy)?),
        };

        let process: Arc<dyn CodeExecutor> =
            Arc::new(ProcessExecutor::new(Arc::clone(&validator), &config));
        let mut executors = HashMap::new();
        for executor in std::iter::once(process).chain(self.executors) {
            executors.insert(executor.mode(), executor);
        }

        Ok(SandboxManager {
            validator,
            executors,
            default_mode: config.default_mode,
            default_timeout: config.default_timeout,
            timeout_grace: config.timeout_grace,
            artifact_root: config.artifact_root,
            stats: Mutex::new(ExecutionStats::default()),
        })
    }
}
