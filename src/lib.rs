//! Plotbox: validate and run untrusted plotting scripts.
//!
//! This crate wires the core engine to the embedded interpreter strategy
//! (behind the `embedded-python` feature) and offers a process-wide
//! default manager for callers that only need one.
//!
//! ```no_run
//! # async fn demo() -> plotbox::PlotboxResult<()> {
//! let response = plotbox::execute_code_in_sandbox(
//!     "import numpy as np\nresult = {'mean': float(np.mean([1, 2, 3]))}",
//!     "/tmp/plot.png",
//!     None,
//!     None,
//! )
//! .await?;
//! assert!(response.overall_success);
//! # Ok(())
//! # }
//! ```

pub use plotbox_core::*;

#[cfg(feature = "embedded-python")]
pub use plotbox_embed::RestrictedExecutor;

use once_cell::sync::OnceCell;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

static DEFAULT_MANAGER: OnceCell<SandboxManager> = OnceCell::new();

/// Manager with every strategy this build supports registered.
///
/// Both strategies share one validator so they apply the same policy.
pub fn build_manager(config: SandboxConfig) -> PlotboxResult<SandboxManager> {
    let validator = Arc::new(SecurityValidator::from_overrides(&config.policy)?);
    let config = fit_to_build(config);

    let builder = SandboxManager::builder().validator(Arc::clone(&validator));

    #[cfg(feature = "embedded-python")]
    let builder = builder.executor(Arc::new(RestrictedExecutor::new(
        Arc::clone(&validator),
        &config,
    )));

    builder.config(config).build()
}

#[cfg(feature = "embedded-python")]
fn fit_to_build(config: SandboxConfig) -> SandboxConfig {
    config
}

#[cfg(not(feature = "embedded-python"))]
fn fit_to_build(mut config: SandboxConfig) -> SandboxConfig {
    if config.default_mode == ExecutionMode::Restricted {
        tracing::warn!("built without embedded-python, defaulting to process mode");
        config.default_mode = ExecutionMode::Process;
    }
    config
}

/// Process-wide manager, built on first use from defaults and `PLOTBOX_*`
/// environment variables
pub fn default_manager() -> PlotboxResult<&'static SandboxManager> {
    DEFAULT_MANAGER.get_or_try_init(|| build_manager(SandboxConfig::load(None)?))
}

/// Validate and run `code` through the default manager
pub async fn execute_code_in_sandbox(
    code: &str,
    output_path: impl AsRef<Path>,
    mode: Option<ExecutionMode>,
    timeout: Option<Duration>,
) -> PlotboxResult<SandboxExecutionResponse> {
    let manager = default_manager()?;
    Ok(manager
        .execute_code_safely(code, output_path.as_ref(), mode, timeout, true)
        .await)
}
