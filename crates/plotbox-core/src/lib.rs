//! Plotbox core library
//!
//! Static validation and constrained execution of untrusted, model-generated
//! plotting scripts. The pieces, leaves first:
//!
//! - [`sandbox::policy`]: the allow-list / deny-list / dangerous-pattern tables
//! - [`sandbox::validation`]: the static security validator
//! - [`sandbox::monitor`]: scoped OS resource ceilings
//! - [`sandbox::executor`]: the executor contract and the process-isolated strategy
//! - [`sandbox::manager`]: the orchestrator with aggregate statistics
//!
//! The in-process strategy lives in the `plotbox-embed` crate so that this
//! crate never links an interpreter.

pub mod config;
pub mod error;
pub mod sandbox;
mod serde_helpers;

pub use config::{LoggingConfig, PolicyOverrides, SandboxConfig};
pub use error::{PlotboxError, PlotboxResult};
pub use sandbox::executor::{CodeExecutor, ExecutionResult, ProcessExecutor};
pub use sandbox::manager::{
    ExecutionRequest, ExecutionStats, SandboxExecutionResponse, SandboxManager,
    SandboxManagerBuilder, SandboxStats,
};
pub use sandbox::monitor::{ResourceGuard, ResourceMonitor};
pub use sandbox::policy::{ModuleVerdict, SecurityPolicy, SecurityReport};
pub use sandbox::validation::{CodeValidationResult, SecurityValidator};
pub use sandbox::{ExecutionMode, FailureKind, ResourceLimits, SandboxError};
