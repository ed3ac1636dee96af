//! Aggregate execution statistics

use crate::serde_helpers::duration_secs;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Running counters kept by the manager
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExecutionStats {
    /// Every `execute_code_safely` call
    pub total_executions: u64,
    pub successful_executions: u64,
    pub failed_executions: u64,
    /// Calls stopped by the validator
    pub validation_failures: u64,
    /// Calls that passed validation but did not succeed
    pub execution_failures: u64,
    /// Calls that reached an executor
    pub executor_invocations: u64,
    #[serde(with = "duration_secs")]
    pub total_execution_time: Duration,
    /// `total_execution_time` over `executor_invocations`
    #[serde(with = "duration_secs")]
    pub average_execution_time: Duration,
    pub last_execution_at: Option<DateTime<Utc>>,
}

impl ExecutionStats {
    pub(super) fn record_validation_failure(&mut self) {
        self.begin();
        self.failed_executions += 1;
        self.validation_failures += 1;
    }

    /// A request refused before dispatch for a reason other than validation
    pub(super) fn record_rejection(&mut self) {
        self.begin();
        self.failed_executions += 1;
        self.execution_failures += 1;
    }

    pub(super) fn record_execution(&mut self, success: bool, execution_time: Duration) {
        self.begin();
        self.executor_invocations += 1;
        self.total_execution_time += execution_time;
        self.average_execution_time = self
            .total_execution_time
            .div_f64(self.executor_invocations as f64);
        if success {
            self.successful_executions += 1;
        } else {
            self.failed_executions += 1;
            self.execution_failures += 1;
        }
    }

    fn begin(&mut self) {
        self.total_executions += 1;
        self.last_execution_at = Some(Utc::now());
    }
}

/// Snapshot of the counters with derived rates
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SandboxStats {
    #[serde(flatten)]
    pub counters: ExecutionStats,
    pub success_rate: f64,
    pub validation_failure_rate: f64,
    pub execution_failure_rate: f64,
}

impl From<ExecutionStats> for SandboxStats {
    fn from(counters: ExecutionStats) -> Self {
        let rate = |count: u64| {
            if counters.total_executions == 0 {
                0.0
            } else {
                count as f64 / counters.total_executions as f64
            }
        };
        Self {
            success_rate: rate(counters.successful_executions),
            validation_failure_rate: rate(counters.validation_failures),
            execution_failure_rate: rate(counters.execution_failures),
            counters,
        }
    }
}
