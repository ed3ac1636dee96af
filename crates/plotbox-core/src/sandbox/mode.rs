//! Executor strategy selection.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Which executor strategy runs a submission
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionMode {
    /// In-process restricted interpreter
    #[default]
    Restricted,
    /// Child process wrapped in a fixed harness
    Process,
}

impl ExecutionMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExecutionMode::Restricted => "restricted",
            ExecutionMode::Process => "process",
        }
    }
}

impl fmt::Display for ExecutionMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ExecutionMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "restricted" => Ok(ExecutionMode::Restricted),
            "process" => Ok(ExecutionMode::Process),
            other => Err(format!(
                "unknown execution mode '{}', expected 'restricted' or 'process'",
                other
            )),
        }
    }
}
