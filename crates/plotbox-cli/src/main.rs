//! Plotbox command-line interface
//!
//! ```bash
//! plotbox validate plot.py
//! plotbox run plot.py --output out/plot.png --mode process --timeout 10
//! plotbox report
//! ```
//!
//! Results are printed to stdout as JSON; logs go to stderr.

mod args;
mod commands;
mod logging;

use anyhow::Context;
use args::Cli;
use clap::Parser;
use plotbox::SandboxConfig;
use std::path::PathBuf;
use std::process::ExitCode;

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    let cli = Cli::parse();

    let config_path = cli.config.clone().or_else(default_config_path);
    let mut config = SandboxConfig::load(config_path.as_deref()).with_context(|| match &config_path {
        Some(path) => format!("failed to load configuration from {}", path.display()),
        None => "failed to load configuration".to_string(),
    })?;
    if let Some(format) = cli.log_format {
        config.logging.format = format;
    }
    if let Some(level) = &cli.log_level {
        config.logging.level = level.clone();
    }
    logging::init(&config.logging);
    tracing::debug!(config = ?config_path, "configuration loaded");

    commands::dispatch(cli.command, config).await
}

/// `<config dir>/plotbox/config.toml`, when it exists
fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir()
        .map(|dir| dir.join("plotbox").join("config.toml"))
        .filter(|path| path.is_file())
}
