//! Subcommand implementations

use crate::args::Commands;
use anyhow::{Context, Result};
use plotbox::{ExecutionMode, ExecutionRequest, SandboxConfig, SandboxExecutionResponse, SandboxStats};
use serde::Serialize;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::process::ExitCode;

#[derive(Debug, Serialize)]
struct RunOutput {
    response: SandboxExecutionResponse,
    stats: SandboxStats,
}

pub async fn dispatch(command: Commands, config: SandboxConfig) -> Result<ExitCode> {
    let success = match command {
        Commands::Validate { file } => validate(&file, config)?,
        Commands::Run {
            file,
            output,
            mode,
            timeout,
            no_validate,
        } => run(&file, output, mode, timeout, no_validate, config).await?,
        Commands::Report => report(config)?,
    };
    Ok(if success { ExitCode::SUCCESS } else { ExitCode::FAILURE })
}

/// Prints the validation result; true when the script passed
fn validate(file: &Path, config: SandboxConfig) -> Result<bool> {
    let code = read_source(file)?;
    let manager = plotbox::build_manager(config)?;
    let result = manager.validate(&code);
    print_json(&result)?;
    Ok(result.is_valid())
}

async fn run(
    file: &Path,
    output: PathBuf,
    mode: Option<ExecutionMode>,
    timeout: Option<f64>,
    no_validate: bool,
    config: SandboxConfig,
) -> Result<bool> {
    let code = read_source(file)?;
    let manager = plotbox::build_manager(config)?;

    let mut request = ExecutionRequest::new(code, output);
    request.execution_mode = mode;
    request.timeout_seconds = timeout;
    if no_validate {
        request = request.skip_validation();
    }

    let response = manager.execute(&request).await;
    let success = response.overall_success;
    if !success {
        tracing::info!(
            error = response.error_message.as_deref().unwrap_or_default(),
            "execution did not succeed"
        );
    }
    print_json(&RunOutput {
        response,
        stats: manager.get_sandbox_stats(),
    })?;
    Ok(success)
}

fn report(config: SandboxConfig) -> Result<bool> {
    let manager = plotbox::build_manager(config)?;
    print_json(&manager.get_security_report())?;
    Ok(true)
}

fn read_source(file: &Path) -> Result<String> {
    if file == Path::new("-") {
        let mut code = String::new();
        std::io::stdin()
            .read_to_string(&mut code)
            .context("failed to read script from stdin")?;
        return Ok(code);
    }
    std::fs::read_to_string(file).with_context(|| format!("failed to read {}", file.display()))
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
