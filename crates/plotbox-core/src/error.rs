//! Error types for plotbox
//!
//! `PlotboxError` covers faults of the library itself (configuration, I/O,
//! policy construction). Failures of submitted code are never reported through
//! this type; see [`crate::sandbox::SandboxError`] and the structured results.

use thiserror::Error;

/// Result type alias for plotbox operations
pub type PlotboxResult<T> = Result<T, PlotboxError>;

/// Main error type for plotbox
#[derive(Error, Debug, Clone)]
pub enum PlotboxError {
    /// Configuration related errors
    #[error("Configuration error: {message}")]
    Config {
        message: String,
        context: Option<String>,
    },

    /// A policy table could not be built (e.g. an invalid pattern)
    #[error("Policy error: {0}")]
    Policy(String),

    /// The source parser could not be initialised
    #[error("Parser error: {0}")]
    Parser(String),

    /// IO errors
    #[error("IO error: {0}")]
    Io(String),

    /// JSON serialization/deserialization errors
    #[error("JSON error: {0}")]
    Json(String),
}

impl PlotboxError {
    /// Create a new configuration error
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
            context: None,
        }
    }

    /// Create a configuration error with context
    pub fn config_with_context(message: impl Into<String>, context: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
            context: Some(context.into()),
        }
    }

    /// Create a new policy error
    pub fn policy(message: impl Into<String>) -> Self {
        Self::Policy(message.into())
    }

    /// Create a new parser error
    pub fn parser(message: impl Into<String>) -> Self {
        Self::Parser(message.into())
    }

    /// Create a new IO error
    pub fn io(message: impl Into<String>) -> Self {
        Self::Io(message.into())
    }

    /// Stable code for programmatic handling
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::Config { .. } => "config",
            Self::Policy(_) => "policy",
            Self::Parser(_) => "parser",
            Self::Io(_) => "io",
            Self::Json(_) => "json",
        }
    }

    /// Optional context attached to the error
    pub fn context(&self) -> Option<&str> {
        match self {
            Self::Config { context, .. } => context.as_deref(),
            _ => None,
        }
    }
}

impl From<std::io::Error> for PlotboxError {
    fn from(error: std::io::Error) -> Self {
        Self::io(error.to_string())
    }
}

impl From<serde_json::Error> for PlotboxError {
    fn from(error: serde_json::Error) -> Self {
        Self::Json(error.to_string())
    }
}

impl From<regex::Error> for PlotboxError {
    fn from(error: regex::Error) -> Self {
        Self::policy(format!("invalid pattern: {}", error))
    }
}
