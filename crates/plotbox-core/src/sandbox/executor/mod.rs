//! Executor strategies for validated code

mod harness;
mod limits;
mod output;
mod process;
mod types;


// Re-export public types and functions
pub use process::ProcessExecutor;
pub use types::{CodeExecutor, ExecutionResult, existing_artifact, prepare_output_path};

#[cfg(test)]
pub use types::MockCodeExecutor;
