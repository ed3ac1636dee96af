//! Resource limits for sandbox execution

use serde::{Deserialize, Serialize};

/// Resource ceilings applied around an execution
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ResourceLimits {
    /// Maximum address space growth in bytes
    pub max_memory_bytes: Option<u64>,

    /// Maximum CPU time in seconds
    pub max_cpu_seconds: Option<u64>,

    /// Maximum captured output size in bytes (per stream)
    pub max_output_bytes: Option<u64>,

    /// Maximum number of open files (child process only)
    pub max_open_files: Option<u64>,

    /// Maximum number of processes for the child's user (child process only).
    /// Threads count against this on Linux.
    pub max_processes: Option<u64>,
}

impl Default for ResourceLimits {
    fn default() -> Self {
        Self {
            max_memory_bytes: Some(1024 * 1024 * 1024), // 1 GB
            max_cpu_seconds: Some(30),
            max_output_bytes: Some(1024 * 1024), // 1 MB
            max_open_files: Some(256),
            max_processes: None,
        }
    }
}

impl ResourceLimits {
    /// Create unlimited resource limits (no restrictions)
    pub fn unlimited() -> Self {
        Self {
            max_memory_bytes: None,
            max_cpu_seconds: None,
            max_output_bytes: None,
            max_open_files: None,
            max_processes: None,
        }
    }

    /// Output cap used when reading child streams
    pub fn output_cap(&self) -> u64 {
        self.max_output_bytes.unwrap_or(u64::MAX)
    }
}
