//! Configuration for the sandbox engine
//!
//! Values come from defaults, then an optional file (TOML, YAML or JSON),
//! then `PLOTBOX_*` environment variables.

mod env_loader;
mod file_loader;
mod logging_config;

pub use env_loader::{ENV_PREFIX, apply_env_overrides, apply_env_with};
pub use file_loader::load_from_file;
pub use logging_config::{LogFormat, LoggingConfig};

use crate::error::{PlotboxError, PlotboxResult};
use crate::sandbox::{ExecutionMode, ResourceLimits};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Environment variables copied into the child interpreter by default
const DEFAULT_ENV_PASSTHROUGH: &[&str] = &[
    "PATH",
    "HOME",
    "LANG",
    "LC_ALL",
    "LC_CTYPE",
    "PYENV_ROOT",
    "PYENV_VERSION",
    "PYTHONHOME",
    "PYTHONPATH",
    "VIRTUAL_ENV",
    "CONDA_PREFIX",
    "LD_LIBRARY_PATH",
    "MPLCONFIGDIR",
];

/// Additions to the built-in policy tables
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PolicyOverrides {
    pub extra_allowed_modules: Vec<String>,
    pub extra_denied_modules: Vec<String>,
    pub extra_denied_functions: Vec<String>,
    pub extra_dangerous_patterns: Vec<String>,
}

/// Sandbox engine configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SandboxConfig {
    /// Strategy used when a request does not name one
    pub default_mode: ExecutionMode,

    /// Wall-clock bound when a request does not give one
    #[serde(with = "humantime_serde")]
    pub default_timeout: Duration,

    /// Extra time the caller-side bound waits beyond the watchdog
    #[serde(with = "humantime_serde")]
    pub timeout_grace: Duration,

    /// Resource ceilings
    pub limits: ResourceLimits,

    /// Interpreter used by the process strategy
    pub python_executable: String,

    /// Environment variables kept for the child; everything else is cleared
    pub env_passthrough: Vec<String>,

    /// When set, output paths must resolve inside this directory
    pub artifact_root: Option<PathBuf>,

    /// Additions to the policy tables
    pub policy: PolicyOverrides,

    /// Logging settings
    pub logging: LoggingConfig,
}

impl Default for SandboxConfig {
    fn default() -> Self {
        Self {
            default_mode: ExecutionMode::Restricted,
            default_timeout: Duration::from_secs(30),
            timeout_grace: Duration::from_secs(2),
            limits: ResourceLimits::default(),
            python_executable: "python3".to_string(),
            env_passthrough: DEFAULT_ENV_PASSTHROUGH
                .iter()
                .map(|s| s.to_string())
                .collect(),
            artifact_root: None,
            policy: PolicyOverrides::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl SandboxConfig {
    /// Load from an optional file, then apply environment overrides
    pub fn load(path: Option<&Path>) -> PlotboxResult<Self> {
        let mut config = match path {
            Some(path) => load_from_file(path)?,
            None => Self::default(),
        };
        apply_env_overrides(&mut config)?;
        config.validate()?;
        Ok(config)
    }

    /// Reject values the engine cannot work with
    pub fn validate(&self) -> PlotboxResult<()> {
        if self.default_timeout.is_zero() {
            return Err(PlotboxError::config("default_timeout must be greater than zero"));
        }
        if self.python_executable.trim().is_empty() {
            return Err(PlotboxError::config("python_executable must not be empty"));
        }
        if self.limits.max_memory_bytes == Some(0) {
            return Err(PlotboxError::config("limits.max_memory_bytes must be greater than zero"));
        }
        if self.limits.max_cpu_seconds == Some(0) {
            return Err(PlotboxError::config("limits.max_cpu_seconds must be greater than zero"));
        }
        Ok(())
    }
}
