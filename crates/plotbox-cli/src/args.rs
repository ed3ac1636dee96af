//! CLI argument definitions using clap

use clap::{Parser, Subcommand};
use plotbox::{ExecutionMode, config::LogFormat};
use std::path::PathBuf;

#[derive(Debug, Parser)]
#[command(name = "plotbox")]
#[command(about = "Validate and run untrusted plotting scripts in a sandbox")]
#[command(version)]
pub struct Cli {
    /// Configuration file (TOML, YAML or JSON); defaults to the user config
    /// directory when present
    #[arg(long, global = true, env = "PLOTBOX_CONFIG")]
    pub config: Option<PathBuf>,

    /// Log output format: pretty, compact or json
    #[arg(long, global = true)]
    pub log_format: Option<LogFormat>,

    /// Log level, overridden by RUST_LOG
    #[arg(long, global = true)]
    pub log_level: Option<String>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Run the security validator over a script
    Validate {
        /// Script to check, `-` for stdin
        file: PathBuf,
    },

    /// Validate and execute a script
    Run {
        /// Script to run, `-` for stdin
        file: PathBuf,

        /// Where the script should save its artifact
        #[arg(long, short)]
        output: PathBuf,

        /// Execution strategy: restricted or process
        #[arg(long, short)]
        mode: Option<ExecutionMode>,

        /// Wall-clock limit in seconds
        #[arg(long, short)]
        timeout: Option<f64>,

        /// Skip the validator before dispatch
        #[arg(long)]
        no_validate: bool,
    },

    /// Print the security policy tables
    Report,
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_run_arguments() {
        let cli = Cli::try_parse_from([
            "plotbox", "run", "plot.py", "--output", "out.png", "--mode", "process", "--timeout",
            "2.5",
        ])
        .unwrap();
        match cli.command {
            Commands::Run {
                file,
                output,
                mode,
                timeout,
                no_validate,
            } => {
                assert_eq!(file, PathBuf::from("plot.py"));
                assert_eq!(output, PathBuf::from("out.png"));
                assert_eq!(mode, Some(ExecutionMode::Process));
                assert_eq!(timeout, Some(2.5));
                assert!(!no_validate);
            }
            other => panic!("unexpected command {:?}", other),
        }
    }

    #[test]
    fn test_global_flags_after_subcommand() {
        let cli = Cli::try_parse_from(["plotbox", "report", "--log-format", "json"]).unwrap();
        assert_eq!(cli.log_format, Some(LogFormat::Json));
    }

    #[test]
    fn test_unknown_mode_rejected() {
        assert!(Cli::try_parse_from(["plotbox", "run", "a.py", "-o", "a.png", "-m", "docker"]).is_err());
    }
}
