//! Environment variable-based configuration overrides

use super::SandboxConfig;
use crate::error::{PlotboxError, PlotboxResult};
use std::path::PathBuf;
use std::time::Duration;

/// Prefix shared by all recognised variables
pub const ENV_PREFIX: &str = "PLOTBOX_";

/// Apply `PLOTBOX_*` variables from the process environment
pub fn apply_env_overrides(config: &mut SandboxConfig) -> PlotboxResult<()> {
    apply_env_with(config, |key| std::env::var(key).ok())
}

/// Apply overrides using `lookup` to resolve variable names
///
/// Recognised: `PLOTBOX_MODE`, `PLOTBOX_TIMEOUT` (seconds or a humantime
/// string), `PLOTBOX_PYTHON`, `PLOTBOX_ARTIFACT_ROOT`,
/// `PLOTBOX_MAX_MEMORY_MB` and `PLOTBOX_LOG_LEVEL`.
pub fn apply_env_with<F>(config: &mut SandboxConfig, lookup: F) -> PlotboxResult<()>
where
    F: Fn(&str) -> Option<String>,
{
    let var = |name: &str| lookup(&format!("{}{}", ENV_PREFIX, name));

    if let Some(mode) = var("MODE") {
        config.default_mode = mode
            .parse()
            .map_err(|e: String| PlotboxError::config_with_context(e, "PLOTBOX_MODE"))?;
    }

    if let Some(timeout) = var("TIMEOUT") {
        config.default_timeout = parse_timeout(&timeout)?;
    }

    if let Some(python) = var("PYTHON") {
        config.python_executable = python;
    }

    if let Some(root) = var("ARTIFACT_ROOT") {
        config.artifact_root = if root.is_empty() {
            None
        } else {
            Some(PathBuf::from(root))
        };
    }

    if let Some(memory) = var("MAX_MEMORY_MB") {
        let megabytes: u64 = memory.trim().parse().map_err(|_| {
            PlotboxError::config_with_context(
                format!("Invalid PLOTBOX_MAX_MEMORY_MB value '{}'", memory),
                "PLOTBOX_MAX_MEMORY_MB",
            )
        })?;
        config.limits.max_memory_bytes = Some(megabytes * 1024 * 1024);
    }

    if let Some(level) = var("LOG_LEVEL") {
        config.logging.level = level;
    }

    Ok(())
}

fn parse_timeout(value: &str) -> PlotboxResult<Duration> {
    let value = value.trim();
    let parsed = match value.parse::<f64>() {
        Ok(secs) if secs.is_finite() && secs > 0.0 => Some(Duration::from_secs_f64(secs)),
        Ok(_) => None,
        Err(_) => humantime_serde::re::humantime::parse_duration(value).ok(),
    };
    parsed
        .filter(|d| !d.is_zero())
        .ok_or_else(|| {
            PlotboxError::config_with_context(
                format!("Invalid PLOTBOX_TIMEOUT value '{}'", value),
                "PLOTBOX_TIMEOUT",
            )
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sandbox::ExecutionMode;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_env_overrides() {
        let mut config = SandboxConfig::default();
        apply_env_with(
            &mut config,
            lookup(&[
                ("PLOTBOX_MODE", "process"),
                ("PLOTBOX_TIMEOUT", "12"),
                ("PLOTBOX_PYTHON", "/opt/py/bin/python"),
                ("PLOTBOX_MAX_MEMORY_MB", "512"),
                ("PLOTBOX_LOG_LEVEL", "trace"),
            ]),
        )
        .unwrap();

        assert_eq!(config.default_mode, ExecutionMode::Process);
        assert_eq!(config.default_timeout, Duration::from_secs(12));
        assert_eq!(config.python_executable, "/opt/py/bin/python");
        assert_eq!(config.limits.max_memory_bytes, Some(512 * 1024 * 1024));
        assert_eq!(config.logging.level, "trace");
    }

    #[test]
    fn test_humantime_timeout() {
        let mut config = SandboxConfig::default();
        apply_env_with(&mut config, lookup(&[("PLOTBOX_TIMEOUT", "2m")])).unwrap();
        assert_eq!(config.default_timeout, Duration::from_secs(120));
    }

    #[test]
    fn test_invalid_values_rejected() {
        let mut config = SandboxConfig::default();
        assert!(apply_env_with(&mut config, lookup(&[("PLOTBOX_MODE", "docker")])).is_err());
        assert!(apply_env_with(&mut config, lookup(&[("PLOTBOX_TIMEOUT", "0")])).is_err());
        assert!(apply_env_with(&mut config, lookup(&[("PLOTBOX_TIMEOUT", "soon")])).is_err());
        assert!(
            apply_env_with(&mut config, lookup(&[("PLOTBOX_MAX_MEMORY_MB", "lots")])).is_err()
        );
    }

    #[test]
    fn test_empty_artifact_root_clears() {
        let mut config = SandboxConfig {
            artifact_root: Some(PathBuf::from("/srv/plots")),
            ..Default::default()
        };
        apply_env_with(&mut config, lookup(&[("PLOTBOX_ARTIFACT_ROOT", "")])).unwrap();
        assert!(config.artifact_root.is_none());
    }
}
