// Central Error Types for the Application

use thiserror::Error;

/// Failures of making a tool available or running it
///
/// All variants are recoverable from the caller's point of view: they carry
/// enough captured context (stderr, exit code, partial output) to log the
/// failure and move on to the next input.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum InvocationError {
    #[error("No bootstrap target for tool '{tool}' on platform '{platform}'")]
    UnsupportedPlatform { tool: String, platform: String },

    #[error("Tool '{tool}' is unavailable: {reason}")]
    ToolUnavailable { tool: String, reason: String },

    #[error("Tool '{tool}' reports version {found:?}, required '{required}'")]
    VersionMismatch {
        tool: String,
        required: String,
        found: Option<String>,
    },

    #[error("Failed to launch '{program}': {reason}")]
    ProcessLaunch { program: String, reason: String },

    #[error("Process exited with code {exit_code}: {stderr}")]
    NonZeroExit { exit_code: i32, stderr: String },

    #[error("Process '{program}' timed out after {timeout_ms}ms")]
    Timeout {
        program: String,
        timeout_ms: u64,
        stdout: String,
        stderr: String,
    },

    #[error("IO error: {0}")]
    Io(String),
}

impl From<std::io::Error> for InvocationError {
    fn from(err: std::io::Error) -> Self {
        InvocationError::Io(err.to_string())
    }
}

/// Application-level error type
#[derive(Error, Debug)]
pub enum AppError {
    #[error("Domain error: {0}")]
    Domain(#[from] crate::domain::DomainError),

    #[error("Invocation error: {0}")]
    Invocation(#[from] InvocationError),

    #[error("Fetch error: {0}")]
    Fetch(#[from] crate::port::FetchError),

    #[error("Install error: {0}")]
    Install(#[from] crate::port::InstallError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Not found: {0}")]
    NotFound(String),
}

/// Result type alias using AppError
pub type Result<T> = std::result::Result<T, AppError>;
